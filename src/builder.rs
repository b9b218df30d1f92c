use std::io::{BufWriter, Write};
use std::marker::PhantomData;

use log::debug;

use crate::meta::{Header, Table};
use crate::{default_hash, ConstDbInfo, ConstDbWriter, Error, HashFn, Result, Width};

const DEFAULT_BUFFER_SIZE: usize = 64 << 10; // 64 KiB

#[derive(Debug, Default, Clone, Copy)]
struct SlotEntry {
    hash: u32,
    offset: u64,
}

/// Streaming writer for database files.
///
/// A builder borrows a positional sink (typically a file implementing
/// `FileExt`) and appends one record per [`put`](Self::put). Records go to
/// the data section immediately; only the per-bucket slot index, one
/// `(hash, offset)` pair per record, is held in memory. A single call to
/// [`finish`](Self::finish) consumes the builder, appends the 256 slot
/// tables, and backfills the header, after which the file is a valid
/// database. A builder that is dropped without finishing leaves the file
/// unusable.
///
/// The width parameter selects the layout: `u32` for the classic variant,
/// `u64` for files that may grow beyond 4 GiB.
///
/// ```
/// use constdb::ConstDbBuilder;
///
/// # fn main() -> constdb::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let file = std::fs::File::create(dir.path().join("fixture.cdb64"))?;
///
/// let mut builder = ConstDbBuilder::<u64, _>::new(&file);
/// builder.put("alpha", "first")?;
/// builder.put("duplicate", "v1")?;
/// builder.put("duplicate", "v2")?;
/// let info = builder.finish()?;
/// assert_eq!(info.entry_count, 3);
/// # Ok(())
/// # }
/// ```
pub struct ConstDbBuilder<'a, W: Width, S: ConstDbWriter> {
    stream: BufWriter<OffsetWriter<'a, S>>,
    buckets: Box<[Vec<SlotEntry>; 256]>,
    offset: u64,
    footer_size: u64,
    hash: HashFn,
    _width: PhantomData<W>,
}

impl<'a, W: Width, S: ConstDbWriter> ConstDbBuilder<'a, W, S> {
    /// Creates a builder that streams records into `sink`.
    ///
    /// Nothing is written to the header region until
    /// [`finish`](Self::finish).
    pub fn new(sink: &'a S) -> Self {
        Self::with_capacity(sink, DEFAULT_BUFFER_SIZE)
    }

    /// Creates a builder with a custom stream buffer capacity.
    pub fn with_capacity(sink: &'a S, capacity: usize) -> Self {
        Self {
            stream: BufWriter::with_capacity(
                capacity,
                OffsetWriter {
                    inner: sink,
                    position: W::HEADER_SIZE as u64,
                },
            ),
            buckets: Box::new(std::array::from_fn(|_| Vec::new())),
            offset: W::HEADER_SIZE as u64,
            footer_size: 0,
            hash: default_hash,
            _width: PhantomData,
        }
    }

    /// Overrides the hash function used to distribute keys.
    ///
    /// Must be set before the first [`put`](Self::put), and the same
    /// function has to be passed to
    /// [`ConstDb::load_with_hash`](crate::ConstDb::load_with_hash) when
    /// the file is read back.
    pub fn with_hash(mut self, hash: HashFn) -> Self {
        self.hash = hash;
        self
    }

    /// Appends one record.
    ///
    /// Keys are not required to be unique; every value stored under a key
    /// stays retrievable, in insertion order.
    ///
    /// # Errors
    ///
    /// [`Error::TooMuchData`] when the finished file would no longer fit
    /// the layout's integer width (nothing is written in that case), or
    /// [`Error::Io`] when the sink fails; after an I/O failure the output
    /// is unusable and should be discarded.
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        let record_size = W::PAIR_SIZE as u64 + key.len() as u64 + value.len() as u64;
        match Self::projected_size(self.offset, record_size, self.footer_size) {
            Some(total) if total <= W::MAX_OFFSET => {}
            _ => return Err(Error::TooMuchData),
        }

        let hash = (self.hash)(key);
        self.buckets[(hash & 0xff) as usize].push(SlotEntry {
            hash,
            offset: self.offset,
        });

        W::write_pair(&mut self.stream, key.len() as u64, value.len() as u64)?;
        self.stream.write_all(key)?;
        self.stream.write_all(value)?;

        self.offset += record_size;
        // Each record costs exactly two slots in its bucket's table.
        self.footer_size += 2 * W::PAIR_SIZE as u64;
        Ok(())
    }

    /// Size of the finished file if one more record of `record_size` bytes
    /// is accepted: data written so far, the record, the slot tables
    /// accumulated so far, and the record's own two slots.
    fn projected_size(offset: u64, record_size: u64, footer_size: u64) -> Option<u64> {
        offset
            .checked_add(record_size)?
            .checked_add(footer_size)?
            .checked_add(2 * W::PAIR_SIZE as u64)
    }

    /// Performs the second pass and seals the database.
    ///
    /// For each bucket in order: a table of `2 x record-count` zeroed
    /// slots is allocated, entries are placed in insertion order by linear
    /// probing from `(hash >> 8) % length`, and the table is appended to
    /// the stream. The 256-entry header is then backfilled at the start of
    /// the file. On error the output is unusable and should be discarded.
    pub fn finish(mut self) -> Result<ConstDbInfo> {
        let mut tables = Box::new([Table::default(); 256]);

        for (i, entries) in self.buckets.iter().enumerate() {
            let length = entries.len() as u64 * 2;
            tables[i] = Table {
                position: self.offset,
                length,
            };
            if length == 0 {
                continue;
            }

            // The table has twice as many slots as entries, so the probe
            // below always reaches a free slot, and lookups replaying the
            // same walk always reach an empty terminator. A free slot is
            // recognized by offset 0: no record can live inside the header
            // region, while a stored hash may legitimately be 0.
            let mut slots = vec![SlotEntry::default(); length as usize];
            for entry in entries {
                let mut slot = (u64::from(entry.hash) >> 8) % length;
                while slots[slot as usize].offset != 0 {
                    slot = (slot + 1) % length;
                }
                slots[slot as usize] = *entry;
            }

            for slot in &slots {
                W::write_pair(&mut self.stream, u64::from(slot.hash), slot.offset)?;
            }
            self.offset += length * W::PAIR_SIZE as u64;
        }

        self.stream.flush()?;
        let sink = self
            .stream
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?
            .inner;

        let header = Header { tables };
        sink.write_all_at(&header.encode::<W>()?, 0)?;

        let info = ConstDbInfo {
            file_length: self.offset,
            entry_count: header.entry_count(),
            empty_buckets: 256 - header.occupied_buckets(),
            width_bits: W::BYTES * 8,
        };
        debug!(
            "sealed database: {} records in {} bytes, {} empty buckets",
            info.entry_count, info.file_length, info.empty_buckets
        );
        Ok(info)
    }

    /// Builds a complete database from an iterator of key/value pairs.
    ///
    /// Convenience for the common write-everything-then-seal flow.
    pub fn build<K, V>(sink: &'a S, entries: impl IntoIterator<Item = (K, V)>) -> Result<ConstDbInfo>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut builder = Self::new(sink);
        for (key, value) in entries {
            builder.put(key, value)?;
        }
        builder.finish()
    }
}

/// Adapter implementing [`std::io::Write`] in terms of [`ConstDbWriter`].
///
/// Streams each write to the underlying sink at consecutive offsets,
/// starting just past the reserved header region.
struct OffsetWriter<'a, S: ConstDbWriter> {
    inner: &'a S,
    position: u64,
}

impl<S: ConstDbWriter> Write for OffsetWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write_all_at(buf, self.position)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::*;

    /// In-memory positional file with a hard size limit, for exercising
    /// short writes without touching disk.
    #[derive(Debug)]
    pub(crate) struct MemoryFile {
        data: std::sync::Mutex<Vec<u8>>,
        limit: u64,
    }

    impl MemoryFile {
        pub(crate) fn new(limit: u64) -> Self {
            Self {
                data: std::sync::Mutex::new(Vec::new()),
                limit,
            }
        }

        fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            let data = self.data.lock().unwrap();
            let available = data.len() - std::cmp::min(offset as usize, data.len());
            let to_read = std::cmp::min(buf.len(), available);
            buf[..to_read].copy_from_slice(&data[offset as usize..offset as usize + to_read]);
            Ok(to_read)
        }

        fn write_at(&self, mut buf: &[u8], offset: u64) -> std::io::Result<usize> {
            if offset > self.limit {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write exceeds limit",
                ));
            }
            if buf.len() as u64 + offset > self.limit {
                buf = &buf[..(self.limit - offset) as usize];
            }

            let mut data = self.data.lock().unwrap();
            if data.len() < offset as usize + buf.len() {
                data.resize(offset as usize + buf.len(), 0);
            }
            data[offset as usize..offset as usize + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[cfg(unix)]
    impl std::os::unix::fs::FileExt for MemoryFile {
        fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            self.read_at(buf, offset)
        }
        fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
            self.write_at(buf, offset)
        }
    }

    #[cfg(windows)]
    impl std::os::windows::fs::FileExt for MemoryFile {
        fn seek_read(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
            self.read_at(buf, offset)
        }
        fn seek_write(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
            self.write_at(buf, offset)
        }
    }

    impl ConstDbReader for MemoryFile {
        fn size(&self) -> std::io::Result<u64> {
            Ok(self.data.lock().unwrap().len() as u64)
        }

        fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> std::io::Result<R>
        where
            F: Fn(&[u8]) -> std::io::Result<R>,
        {
            let mut buffer = vec![0u8; length as usize];
            let read = self.read_at(&mut buffer, offset)?;
            if (read as u64) < length {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to read enough bytes",
                ));
            }
            f(&buffer)
        }
    }

    #[test]
    fn test_shorter_write() {
        const N: u64 = 100;
        let entries = || (0..N).map(|i| (i.to_string(), i.to_string()));

        let sink = MemoryFile::new(1 << 20);
        ConstDbBuilder::<u64, _>::build(&sink, entries()).unwrap();
        let db = ConstDb::<u64, _>::load(&sink).unwrap();
        for i in 0..N {
            let value = db.get(i.to_string().as_bytes()).unwrap().unwrap();
            assert_eq!(value, i.to_string().into_bytes());
        }

        // Too small for the data section, let alone the tables.
        let sink = MemoryFile::new(5000);
        let err = ConstDbBuilder::<u64, _>::build(&sink, entries()).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_width_limit() {
        let sink = MemoryFile::new(1 << 20);
        let mut builder = ConstDbBuilder::<u32, _>::new(&sink);
        builder.put("key", "value").unwrap();
        builder.offset = u64::from(u32::MAX) - 8;
        assert!(matches!(
            builder.put("key", "value").unwrap_err(),
            Error::TooMuchData
        ));

        // The same position is fine with 64-bit offsets.
        let mut builder = ConstDbBuilder::<u64, _>::new(&sink);
        builder.offset = u64::from(u32::MAX) - 8;
        builder.put("key", "value").unwrap();
    }

    #[test]
    fn test_projected_size() {
        type B<'a> = ConstDbBuilder<'a, u32, MemoryFile>;
        assert_eq!(B::projected_size(2048, 20, 16), Some(2048 + 20 + 16 + 16));
        assert_eq!(B::projected_size(u64::MAX - 8, 20, 16), None);
    }

    #[test]
    fn test_empty_build() {
        let sink = MemoryFile::new(1 << 20);
        let info = ConstDbBuilder::<u64, _>::build(
            &sink,
            std::iter::empty::<(&[u8], &[u8])>(),
        )
        .unwrap();
        assert_eq!(info.entry_count, 0);
        assert_eq!(info.file_length, 4096);
        assert_eq!(info.empty_buckets, 256);
        assert_eq!(info.width_bits, 64);
    }
}
