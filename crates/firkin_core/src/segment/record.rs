//! Record codec for segment files.
//!
//! Every record is laid out as a fixed 20-byte header followed by the key,
//! value, and extra bytes:
//!
//! ```text
//! | crc32 (4) | key len (4) | value len (4) | extra len (4) | type (2) | op (2) | key | value | extra |
//! ```
//!
//! All integer fields are big-endian so files are byte-identical across
//! platforms. The checksum covers the value bytes only; key and length
//! corruption is not detected by it.

use crate::error::{CoreError, CoreResult};

/// Size of the fixed record header in bytes.
pub const HEADER_SIZE: u64 = 20;

/// Data domain of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    /// The string domain (raw byte keys and values).
    Str = 0,
}

impl RecordType {
    /// Parses a record type from its wire representation.
    pub fn from_u16(raw: u16) -> CoreResult<Self> {
        match raw {
            0 => Ok(Self::Str),
            other => Err(CoreError::invalid_record(format!(
                "unknown record type {other}"
            ))),
        }
    }
}

/// Operation a record applies within its domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Operation {
    /// Write a key-value pair.
    Set = 0,
    /// Tombstone: mark the key as removed.
    Remove = 1,
}

impl Operation {
    /// Parses an operation from its wire representation.
    pub fn from_u16(raw: u16) -> CoreResult<Self> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Remove),
            other => Err(CoreError::invalid_record(format!(
                "unknown operation {other}"
            ))),
        }
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key bytes. Never empty for a valid record.
    pub key: Vec<u8>,
    /// Value bytes. Empty for tombstones.
    pub value: Vec<u8>,
    /// Extra bytes carried alongside the value.
    pub extra: Vec<u8>,
    /// Data domain.
    pub record_type: RecordType,
    /// Operation within the domain.
    pub operation: Operation,
}

impl Record {
    /// Creates a string-domain set record.
    #[must_use]
    pub fn set(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            extra: Vec::new(),
            record_type: RecordType::Str,
            operation: Operation::Set,
        }
    }

    /// Creates a string-domain tombstone for `key`.
    #[must_use]
    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            extra: Vec::new(),
            record_type: RecordType::Str,
            operation: Operation::Remove,
        }
    }

    /// Returns whether this record is a tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.operation == Operation::Remove
    }

    /// Returns the total encoded size of this record in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> u64 {
        HEADER_SIZE + (self.key.len() + self.value.len() + self.extra.len()) as u64
    }

    /// Encodes the record, writing lengths and checksum into the header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the key is empty.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        if self.key.is_empty() {
            return Err(CoreError::invalid_record("record key is empty"));
        }

        let mut buf = Vec::with_capacity(self.encoded_size() as usize);

        let crc = crc32fast::hash(&self.value);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.extra.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.record_type as u16).to_be_bytes());
        buf.extend_from_slice(&(self.operation as u16).to_be_bytes());

        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(&self.extra);

        Ok(buf)
    }

    /// Verifies the stored checksum against the record's value bytes.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` if the recomputed checksum disagrees.
    pub fn verify_checksum(&self, stored: u32) -> CoreResult<()> {
        let actual = crc32fast::hash(&self.value);
        if actual != stored {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }
        Ok(())
    }
}

/// The parsed fixed header of a record.
///
/// The caller reads the key, value, and extra bytes using the parsed
/// lengths, then re-validates the checksum once the value is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Checksum over the value bytes.
    pub crc32: u32,
    /// Length of the key in bytes.
    pub key_size: u32,
    /// Length of the value in bytes.
    pub value_size: u32,
    /// Length of the extra bytes.
    pub extra_size: u32,
    /// Raw data domain tag.
    pub record_type: u16,
    /// Raw operation tag.
    pub operation: u16,
}

impl RecordHeader {
    /// Parses the 20-byte fixed header.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if `buf` is shorter than the header.
    pub fn decode(buf: &[u8]) -> CoreResult<Self> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(CoreError::invalid_record(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }

        let u32_at = |i: usize| u32::from_be_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let u16_at = |i: usize| u16::from_be_bytes([buf[i], buf[i + 1]]);

        Ok(Self {
            crc32: u32_at(0),
            key_size: u32_at(4),
            value_size: u32_at(8),
            extra_size: u32_at(12),
            record_type: u16_at(16),
            operation: u16_at(18),
        })
    }

    /// Returns the total encoded size of the record this header describes.
    #[must_use]
    pub fn record_size(&self) -> u64 {
        HEADER_SIZE + u64::from(self.key_size) + u64::from(self.value_size) + u64::from(self.extra_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_record_roundtrip() {
        let record = Record::set(b"answer".to_vec(), b"42".to_vec());
        let encoded = record.encode().unwrap();
        assert_eq!(encoded.len() as u64, record.encoded_size());

        let header = RecordHeader::decode(&encoded).unwrap();
        assert_eq!(header.key_size, 6);
        assert_eq!(header.value_size, 2);
        assert_eq!(header.extra_size, 0);
        assert_eq!(header.record_type, RecordType::Str as u16);
        assert_eq!(header.operation, Operation::Set as u16);
        assert_eq!(header.record_size(), record.encoded_size());

        let key = &encoded[20..26];
        let value = &encoded[26..28];
        assert_eq!(key, b"answer");
        assert_eq!(value, b"42");

        let rebuilt = Record {
            key: key.to_vec(),
            value: value.to_vec(),
            extra: Vec::new(),
            record_type: RecordType::from_u16(header.record_type).unwrap(),
            operation: Operation::from_u16(header.operation).unwrap(),
        };
        rebuilt.verify_checksum(header.crc32).unwrap();
        assert_eq!(rebuilt, record);
    }

    #[test]
    fn tombstone_has_empty_value() {
        let record = Record::tombstone(b"gone".to_vec());
        assert!(record.is_tombstone());

        let encoded = record.encode().unwrap();
        let header = RecordHeader::decode(&encoded).unwrap();
        assert_eq!(header.value_size, 0);
        assert_eq!(header.operation, Operation::Remove as u16);
    }

    #[test]
    fn empty_key_rejected() {
        let record = Record::set(Vec::new(), b"v".to_vec());
        assert!(matches!(
            record.encode(),
            Err(CoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn header_is_big_endian() {
        let record = Record::set(vec![0xAB], vec![0xCD; 258]);
        let encoded = record.encode().unwrap();

        // key len 1, value len 258 = 0x0102
        assert_eq!(&encoded[4..8], &[0, 0, 0, 1]);
        assert_eq!(&encoded[8..12], &[0, 0, 0x01, 0x02]);
    }

    #[test]
    fn checksum_covers_value_only() {
        let a = Record::set(b"k1".to_vec(), b"same".to_vec());
        let b = Record::set(b"another-key".to_vec(), b"same".to_vec());

        let ha = RecordHeader::decode(&a.encode().unwrap()).unwrap();
        let hb = RecordHeader::decode(&b.encode().unwrap()).unwrap();
        assert_eq!(ha.crc32, hb.crc32);
    }

    #[test]
    fn corrupted_value_detected() {
        let record = Record::set(b"k".to_vec(), b"payload".to_vec());
        let encoded = record.encode().unwrap();
        let header = RecordHeader::decode(&encoded).unwrap();

        let mut tampered = record.clone();
        tampered.value[0] ^= 0xFF;
        assert!(matches!(
            tampered.verify_checksum(header.crc32),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn short_header_rejected() {
        assert!(matches!(
            RecordHeader::decode(&[0u8; 10]),
            Err(CoreError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn unknown_tags_rejected() {
        assert!(RecordType::from_u16(7).is_err());
        assert!(Operation::from_u16(7).is_err());
    }
}
