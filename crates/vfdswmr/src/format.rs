//! Binary layout of the shared metadata file: a fixed header followed by a
//! checksummed index, both little-endian, framed by hand the way the
//! workspace's write-ahead log frames its records rather than via a
//! general-purpose serializer — this wire format is read by independent
//! reader processes and its byte layout is part of the contract.

use common::{PbError, PbResult};

pub const HEADER_MAGIC: [u8; 4] = *b"VHDR";
pub const INDEX_MAGIC: [u8; 4] = *b"VIDX";

/// `magic(4) + page_size(4) + tick_num(8) + index_offset(8) + index_length(8) + checksum(4)`.
pub const HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 8 + 4;

const INDEX_ENTRY_SIZE: usize = 4 + 4 + 4 + 4;
/// `magic(4) + tick_num(8) + num_entries(4)`.
const INDEX_FIXED_PREFIX: usize = 4 + 8 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetadataHeader {
    pub page_size: u32,
    pub tick_num: u64,
    pub index_offset: u64,
    pub index_length: u64,
}

impl MetadataHeader {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let mut off = 0;
        buf[off..off + 4].copy_from_slice(&HEADER_MAGIC);
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.page_size.to_le_bytes());
        off += 4;
        buf[off..off + 8].copy_from_slice(&self.tick_num.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.index_offset.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.index_length.to_le_bytes());
        off += 8;
        let checksum = crc32fast::hash(&buf[..off]);
        buf[off..off + 4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> PbResult<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(PbError::Corrupt("header shorter than HEADER_SIZE".into()));
        }
        if buf[0..4] != HEADER_MAGIC {
            return Err(PbError::Corrupt("bad header magic".into()));
        }
        let page_size = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let tick_num = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let index_offset = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let index_length = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        let checksum = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        let expected = crc32fast::hash(&buf[..32]);
        if checksum != expected {
            return Err(PbError::Corrupt("header checksum mismatch".into()));
        }
        Ok(Self {
            page_size,
            tick_num,
            index_offset,
            index_length,
        })
    }
}

/// One page's location and integrity record within the persistent index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub hdf5_page_offset: u32,
    pub md_file_page_offset: u32,
    pub length: u32,
    pub checksum: u32,
}

/// The full per-tick index: every page currently published to readers.
/// `entries` is kept sorted ascending by `hdf5_page_offset` so the reader
/// can binary-search it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataIndex {
    pub tick_num: u64,
    pub entries: Vec<IndexEntry>,
}

impl MetadataIndex {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(INDEX_FIXED_PREFIX + self.entries.len() * INDEX_ENTRY_SIZE + 4);
        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&self.tick_num.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for e in &self.entries {
            buf.extend_from_slice(&e.hdf5_page_offset.to_le_bytes());
            buf.extend_from_slice(&e.md_file_page_offset.to_le_bytes());
            buf.extend_from_slice(&e.length.to_le_bytes());
            buf.extend_from_slice(&e.checksum.to_le_bytes());
        }
        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> PbResult<Self> {
        if buf.len() < INDEX_FIXED_PREFIX + 4 {
            return Err(PbError::Corrupt("index shorter than its fixed prefix".into()));
        }
        if buf[0..4] != INDEX_MAGIC {
            return Err(PbError::Corrupt("bad index magic".into()));
        }
        let tick_num = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let num_entries = u32::from_le_bytes(buf[12..16].try_into().unwrap()) as usize;
        let entries_end = INDEX_FIXED_PREFIX + num_entries * INDEX_ENTRY_SIZE;
        if buf.len() < entries_end + 4 {
            return Err(PbError::Corrupt("index truncated before its entries end".into()));
        }

        let mut entries = Vec::with_capacity(num_entries);
        let mut off = INDEX_FIXED_PREFIX;
        for _ in 0..num_entries {
            let hdf5_page_offset = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            let md_file_page_offset = u32::from_le_bytes(buf[off + 4..off + 8].try_into().unwrap());
            let length = u32::from_le_bytes(buf[off + 8..off + 12].try_into().unwrap());
            let checksum = u32::from_le_bytes(buf[off + 12..off + 16].try_into().unwrap());
            entries.push(IndexEntry {
                hdf5_page_offset,
                md_file_page_offset,
                length,
                checksum,
            });
            off += INDEX_ENTRY_SIZE;
        }

        let stored_checksum = u32::from_le_bytes(buf[entries_end..entries_end + 4].try_into().unwrap());
        let expected = crc32fast::hash(&buf[..entries_end]);
        if stored_checksum != expected {
            return Err(PbError::Corrupt("index checksum mismatch".into()));
        }

        Ok(Self { tick_num, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = MetadataHeader {
            page_size: 4096,
            tick_num: 7,
            index_offset: 4096,
            index_length: 128,
        };
        let decoded = MetadataHeader::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn header_rejects_flipped_byte() {
        let header = MetadataHeader {
            page_size: 4096,
            tick_num: 7,
            index_offset: 4096,
            index_length: 128,
        };
        let mut bytes = header.encode();
        bytes[8] ^= 0xff;
        assert!(MetadataHeader::decode(&bytes).is_err());
    }

    #[test]
    fn index_round_trips_with_entries() {
        let index = MetadataIndex {
            tick_num: 3,
            entries: vec![
                IndexEntry { hdf5_page_offset: 0, md_file_page_offset: 1, length: 4096, checksum: 0xdead },
                IndexEntry { hdf5_page_offset: 2, md_file_page_offset: 3, length: 4096, checksum: 0xbeef },
            ],
        };
        let decoded = MetadataIndex::decode(&index.encode()).unwrap();
        assert_eq!(index, decoded);
    }

    #[test]
    fn index_rejects_truncated_buffer() {
        let index = MetadataIndex {
            tick_num: 1,
            entries: vec![IndexEntry { hdf5_page_offset: 0, md_file_page_offset: 1, length: 4096, checksum: 1 }],
        };
        let bytes = index.encode();
        assert!(MetadataIndex::decode(&bytes[..bytes.len() - 8]).is_err());
    }
}
