use std::io::{Result as IoResult, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use serde::Serialize;

use crate::{Error, Result};

mod sealed {
    pub trait Sealed {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// Integer width of a database layout: `u32` for the classic 4-byte
/// variant, `u64` for the 64-bit variant that addresses files beyond
/// 4 GiB.
///
/// Every fixed-width field in the file (header entries, record length
/// prefixes, slot pairs) is a pair of `BYTES`-wide little-endian
/// unsigned integers. The variant is not recorded in the file; writer and
/// reader must agree on it out of band.
pub trait Width: sealed::Sealed + Copy + Send + Sync + 'static {
    /// Width in bytes of one integer field.
    const BYTES: usize;

    /// Width in bytes of one (first, second) pair.
    const PAIR_SIZE: usize = 2 * Self::BYTES;

    /// Size in bytes of the 256-entry header region at the start of the
    /// file.
    const HEADER_SIZE: usize = 256 * Self::PAIR_SIZE;

    /// Largest offset (and file size) this layout can address.
    const MAX_OFFSET: u64;

    /// Decodes a pair from the first `PAIR_SIZE` bytes of `buf`.
    fn read_pair(buf: &[u8]) -> (u64, u64);

    /// Encodes a pair. Values must fit the width; the builder guarantees
    /// this before any record is accepted.
    fn write_pair<W: Write>(out: &mut W, first: u64, second: u64) -> IoResult<()>;
}

impl Width for u32 {
    const BYTES: usize = 4;
    const MAX_OFFSET: u64 = u32::MAX as u64;

    fn read_pair(buf: &[u8]) -> (u64, u64) {
        let first = LittleEndian::read_u32(&buf[..4]);
        let second = LittleEndian::read_u32(&buf[4..8]);
        (u64::from(first), u64::from(second))
    }

    fn write_pair<W: Write>(out: &mut W, first: u64, second: u64) -> IoResult<()> {
        out.write_u32::<LittleEndian>(first as u32)?;
        out.write_u32::<LittleEndian>(second as u32)
    }
}

impl Width for u64 {
    const BYTES: usize = 8;
    const MAX_OFFSET: u64 = u64::MAX;

    fn read_pair(buf: &[u8]) -> (u64, u64) {
        let first = LittleEndian::read_u64(&buf[..8]);
        let second = LittleEndian::read_u64(&buf[8..16]);
        (first, second)
    }

    fn write_pair<W: Write>(out: &mut W, first: u64, second: u64) -> IoResult<()> {
        out.write_u64::<LittleEndian>(first)?;
        out.write_u64::<LittleEndian>(second)
    }
}

/// Location of one bucket's slot table inside the file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    /// Absolute file position of the table's first slot.
    pub position: u64,
    /// Table length in slots, always twice the bucket's record count.
    pub length: u64,
}

/// The 256-entry directory at the start of every database file, one
/// [`Table`] per bucket in bucket order.
#[derive(Debug, Clone)]
pub struct Header {
    pub(crate) tables: Box<[Table; 256]>,
}

impl Header {
    pub(crate) fn decode<W: Width>(buf: &[u8]) -> Self {
        let mut tables = Box::new([Table::default(); 256]);
        for (table, chunk) in tables.iter_mut().zip(buf.chunks_exact(W::PAIR_SIZE)) {
            let (position, length) = W::read_pair(chunk);
            *table = Table { position, length };
        }
        Header { tables }
    }

    pub(crate) fn encode<W: Width>(&self) -> IoResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(W::HEADER_SIZE);
        for table in self.tables.iter() {
            W::write_pair(&mut buf, table.position, table.length)?;
        }
        Ok(buf)
    }

    /// Checks that every non-empty slot table lies between the header and
    /// the end of the source, with overflow-safe arithmetic.
    pub(crate) fn validate<W: Width>(&self, source_size: u64) -> Result<()> {
        for table in self.tables.iter() {
            if table.length == 0 {
                continue;
            }
            if table.position < W::HEADER_SIZE as u64 {
                return Err(Error::Corrupt("slot table overlaps the header"));
            }
            let end = table
                .length
                .checked_mul(W::PAIR_SIZE as u64)
                .and_then(|bytes| table.position.checked_add(bytes))
                .ok_or(Error::Corrupt("slot table length overflows"))?;
            if end > source_size {
                return Err(Error::Corrupt("slot table extends past end of file"));
            }
        }
        Ok(())
    }

    /// End of the data section: the first slot table starts where the
    /// records stop. Files written by other implementations may store 0 as
    /// the position of an empty table, so only non-empty tables count.
    pub(crate) fn data_end<W: Width>(&self) -> u64 {
        self.tables
            .iter()
            .filter(|t| t.length > 0)
            .map(|t| t.position)
            .min()
            .unwrap_or(W::HEADER_SIZE as u64)
    }

    /// Number of records, recovered from the 2x table sizing.
    pub(crate) fn entry_count(&self) -> u64 {
        self.tables.iter().map(|t| t.length / 2).sum()
    }

    pub(crate) fn occupied_buckets(&self) -> usize {
        self.tables.iter().filter(|t| t.length > 0).count()
    }
}

/// Summary of a database file, returned by
/// [`ConstDbBuilder::finish`](crate::ConstDbBuilder::finish) and
/// [`ConstDb::info`](crate::ConstDb::info).
#[derive(Debug, Default, Serialize)]
pub struct ConstDbInfo {
    /// Total size of the database file in bytes.
    pub file_length: u64,
    /// Number of records stored, duplicates included.
    pub entry_count: u64,
    /// Number of the 256 buckets that hold no records.
    pub empty_buckets: usize,
    /// Integer width of the layout, 32 or 64.
    pub width_bits: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_codec() {
        let mut buf = Vec::new();
        u32::write_pair(&mut buf, 0xDEAD, 0xBEEF).unwrap();
        assert_eq!(buf.len(), u32::PAIR_SIZE);
        assert_eq!(u32::read_pair(&buf), (0xDEAD, 0xBEEF));

        let mut buf = Vec::new();
        u64::write_pair(&mut buf, u64::from(u32::MAX) + 17, 3).unwrap();
        assert_eq!(buf.len(), u64::PAIR_SIZE);
        assert_eq!(u64::read_pair(&buf), (u64::from(u32::MAX) + 17, 3));
    }

    #[test]
    fn test_layout_constants() {
        assert_eq!(u32::HEADER_SIZE, 2048);
        assert_eq!(u64::HEADER_SIZE, 4096);
        assert_eq!(u32::MAX_OFFSET, (1u64 << 32) - 1);
    }

    fn sample_header() -> Header {
        let mut tables = Box::new([Table::default(); 256]);
        tables[3] = Table {
            position: u64::HEADER_SIZE as u64 + 100,
            length: 4,
        };
        tables[200] = Table {
            position: u64::HEADER_SIZE as u64 + 164,
            length: 2,
        };
        Header { tables }
    }

    #[test]
    fn test_header_roundtrip() {
        let header = sample_header();
        let encoded = header.encode::<u64>().unwrap();
        assert_eq!(encoded.len(), u64::HEADER_SIZE);
        let decoded = Header::decode::<u64>(&encoded);
        assert_eq!(decoded.tables, header.tables);
        assert_eq!(decoded.entry_count(), 3);
        assert_eq!(decoded.occupied_buckets(), 2);
        assert_eq!(decoded.data_end::<u64>(), u64::HEADER_SIZE as u64 + 100);
    }

    #[test]
    fn test_validate_bounds() {
        let header = sample_header();
        // 100 bytes of records, then 6 slots of 16 bytes.
        let exact = u64::HEADER_SIZE as u64 + 100 + 6 * 16;
        header.validate::<u64>(exact).unwrap();
        assert!(matches!(
            header.validate::<u64>(exact - 1),
            Err(Error::Corrupt(_))
        ));

        let mut truncated = sample_header();
        truncated.tables[3].position = 10;
        assert!(matches!(
            truncated.validate::<u64>(exact),
            Err(Error::Corrupt(_))
        ));

        let mut overflowing = sample_header();
        overflowing.tables[3].length = u64::MAX;
        assert!(matches!(
            overflowing.validate::<u64>(exact),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_empty_header() {
        let header = Header {
            tables: Box::new([Table::default(); 256]),
        };
        header.validate::<u32>(u32::HEADER_SIZE as u64).unwrap();
        assert_eq!(header.data_end::<u32>(), u32::HEADER_SIZE as u64);
        assert_eq!(header.entry_count(), 0);
        assert_eq!(header.occupied_buckets(), 0);
    }
}
