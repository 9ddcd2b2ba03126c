//! Tests for the on-disk layout
//!
//! These tests verify:
//! - Header encoding and every rejection path of header parsing
//! - Descriptor slot encoding, block counts and record ordering
//! - Cluster entry flag words and the free-slot convention
//! - Stream name validation

use plexfile::layout::{
    decode_entries, descriptor_offset, descriptor_table_end, encode_entries, used_prefix,
    validate_name, BlockRecord, ClusterEntry, ClusterState, ContainerHeader, StreamDescriptor,
    CLUSTER_ENTRY_SIZE, DESCRIPTOR_SIZE, HEADER_SIZE, MAGIC, MAX_BLOCKS, MAX_STREAMS,
};
use plexfile::PlexError;

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_header() -> ContainerHeader {
    ContainerHeader {
        stream_count: 3,
        cluster_size: 4096,
        clusters_per_group: 16,
    }
}

/// Overwrite a little-endian u32 and recompute the header checksum
fn patch_header(buf: &mut [u8; HEADER_SIZE], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    let crc = crc32(&buf[0..20]);
    buf[20..24].copy_from_slice(&crc.to_le_bytes());
}

fn crc32(bytes: &[u8]) -> u32 {
    // Bitwise CRC-32 (IEEE), independent of the library's implementation
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_layout() {
    let buf = sample_header().encode();

    assert_eq!(buf.len(), HEADER_SIZE);
    assert_eq!(&buf[0..4], MAGIC);
    assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 1);
    assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 3);
    assert_eq!(u32::from_le_bytes(buf[12..16].try_into().unwrap()), 4096);
    assert_eq!(u32::from_le_bytes(buf[16..20].try_into().unwrap()), 16);
    assert_eq!(
        u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        crc32(&buf[0..20])
    );
    assert!(buf[24..].iter().all(|&b| b == 0));
}

#[test]
fn test_header_decode() {
    let header = sample_header();
    let decoded = ContainerHeader::decode(&header.encode()).unwrap();
    assert_eq!(decoded, header);
}

#[test]
fn test_header_bad_magic() {
    let mut buf = sample_header().encode();
    buf[0] = b'X';

    let err = ContainerHeader::decode(&buf).unwrap_err();
    assert!(matches!(err, PlexError::NotAContainer(_)));
}

#[test]
fn test_header_checksum_mismatch() {
    let mut buf = sample_header().encode();
    buf[9] ^= 0xFF;

    let err = ContainerHeader::decode(&buf).unwrap_err();
    assert!(matches!(err, PlexError::NotAContainer(ref m) if m.contains("checksum")));
}

#[test]
fn test_header_unsupported_version() {
    let mut buf = sample_header().encode();
    patch_header(&mut buf, 4, 2);

    let err = ContainerHeader::decode(&buf).unwrap_err();
    assert!(matches!(err, PlexError::NotAContainer(ref m) if m.contains("version")));
}

#[test]
fn test_header_stream_count_over_cap() {
    let mut buf = sample_header().encode();
    patch_header(&mut buf, 8, MAX_STREAMS + 1);

    let err = ContainerHeader::decode(&buf).unwrap_err();
    assert!(matches!(err, PlexError::NotAContainer(_)));
}

#[test]
fn test_header_bad_geometry() {
    let mut buf = sample_header().encode();
    patch_header(&mut buf, 12, 1000);
    assert!(matches!(
        ContainerHeader::decode(&buf),
        Err(PlexError::NotAContainer(_))
    ));

    let mut buf = sample_header().encode();
    patch_header(&mut buf, 16, 0);
    assert!(matches!(
        ContainerHeader::decode(&buf),
        Err(PlexError::NotAContainer(_))
    ));
}

#[test]
fn test_table_offsets() {
    assert_eq!(descriptor_offset(0), HEADER_SIZE as u64);
    assert_eq!(descriptor_offset(2), (HEADER_SIZE + 2 * DESCRIPTOR_SIZE) as u64);
    assert_eq!(descriptor_table_end(3), descriptor_offset(3));
    assert_eq!(descriptor_table_end(0), HEADER_SIZE as u64);
}

// =============================================================================
// Descriptor Tests
// =============================================================================

#[test]
fn test_descriptor_encode_decode() {
    let descriptor = StreamDescriptor {
        name: "events".to_string(),
        size: 123_456,
        blocks: vec![
            BlockRecord {
                file_offset: 4160,
                stream_offset: 0,
            },
            BlockRecord {
                file_offset: 8272,
                stream_offset: 4096,
            },
        ],
    };

    let buf = descriptor.encode();
    assert_eq!(buf.len(), DESCRIPTOR_SIZE);

    let decoded = StreamDescriptor::decode(&buf).unwrap();
    assert_eq!(decoded, descriptor);
}

#[test]
fn test_descriptor_first_block_at_file_offset_zero() {
    // An explicit block count means a zero offset is an ordinary value
    let descriptor = StreamDescriptor {
        name: "a".to_string(),
        size: 0,
        blocks: vec![BlockRecord {
            file_offset: 0,
            stream_offset: 0,
        }],
    };

    let decoded = StreamDescriptor::decode(&descriptor.encode()).unwrap();
    assert_eq!(decoded.blocks.len(), 1);
}

#[test]
fn test_descriptor_without_blocks_rejected() {
    let descriptor = StreamDescriptor::new("empty");
    let err = StreamDescriptor::decode(&descriptor.encode()).unwrap_err();
    assert!(matches!(err, PlexError::NotAContainer(_)));
}

#[test]
fn test_descriptor_block_count_over_cap_rejected() {
    let mut descriptor = StreamDescriptor::new("s");
    descriptor.blocks.push(BlockRecord {
        file_offset: 100,
        stream_offset: 0,
    });
    let mut buf = descriptor.encode();
    buf[72..80].copy_from_slice(&(MAX_BLOCKS as u64 + 1).to_le_bytes());

    assert!(matches!(
        StreamDescriptor::decode(&buf),
        Err(PlexError::NotAContainer(_))
    ));
}

#[test]
fn test_descriptor_unordered_records_rejected() {
    let descriptor = StreamDescriptor {
        name: "s".to_string(),
        size: 0,
        blocks: vec![
            BlockRecord {
                file_offset: 100,
                stream_offset: 0,
            },
            BlockRecord {
                file_offset: 200,
                stream_offset: 8192,
            },
            BlockRecord {
                file_offset: 300,
                stream_offset: 4096,
            },
        ],
    };

    assert!(matches!(
        StreamDescriptor::decode(&descriptor.encode()),
        Err(PlexError::NotAContainer(_))
    ));
}

// =============================================================================
// Cluster Entry Tests
// =============================================================================

#[test]
fn test_cluster_entry_flag_words() {
    let entries = vec![
        ClusterEntry::plain(0),
        ClusterEntry {
            state: ClusterState::Compressed {
                len: 5000,
                clusters: 4,
            },
            offset: 4096,
        },
        ClusterEntry {
            state: ClusterState::PartOfCompressed,
            offset: 4096,
        },
        ClusterEntry::free(20480),
    ];

    let buf = encode_entries(&entries);
    assert_eq!(buf.len(), entries.len() * CLUSTER_ENTRY_SIZE);

    let flag = |i: usize| u32::from_le_bytes(buf[i * 16..i * 16 + 4].try_into().unwrap());
    assert_eq!(flag(0), 1 << 29);
    assert_eq!(flag(1), (1 << 31) | 5000);
    assert_eq!(flag(2), 1 << 30);
    assert_eq!(flag(3), 0);

    assert_eq!(decode_entries(&buf).unwrap(), entries);
}

#[test]
fn test_cluster_entry_unknown_flags() {
    let mut buf = encode_entries(&[ClusterEntry::plain(0)]);
    buf[0..4].copy_from_slice(&((1u32 << 29) | (1 << 30)).to_le_bytes());

    let err = decode_entries(&buf).unwrap_err();
    assert!(matches!(err, PlexError::UnexpectedMetadata(_)));
}

#[test]
fn test_used_prefix() {
    let mut entries = vec![ClusterEntry::default(); 4];
    assert_eq!(used_prefix(&entries), 0);

    entries[0] = ClusterEntry::plain(0);
    entries[1] = ClusterEntry::plain(4096);
    assert_eq!(used_prefix(&entries), 2);

    for (i, entry) in entries.iter_mut().enumerate() {
        *entry = ClusterEntry::plain(i as u64 * 4096);
    }
    assert_eq!(used_prefix(&entries), 4);
}

// =============================================================================
// Name Validation Tests
// =============================================================================

#[test]
fn test_validate_name() {
    assert!(validate_name("data").is_ok());
    assert!(validate_name(&"x".repeat(63)).is_ok());

    assert!(matches!(
        validate_name(""),
        Err(PlexError::InvalidStreamName(_))
    ));
    assert!(matches!(
        validate_name(&"x".repeat(64)),
        Err(PlexError::InvalidStreamName(_))
    ));
    assert!(matches!(
        validate_name("a\0b"),
        Err(PlexError::InvalidStreamName(_))
    ));
}
