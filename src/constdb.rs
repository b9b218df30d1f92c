use std::marker::PhantomData;

use log::debug;

use crate::meta::{Header, Table};
use crate::{default_hash, ConstDbInfo, ConstDbReader, Error, HashFn, Result, Width};

/// Immutable key/value database backed by a positional source.
///
/// A `ConstDb` is created over a [`ConstDbReader`] (typically a file) and
/// serves exact-match lookups without loading the data set into memory:
/// only the 256-entry header is parsed up front, and each lookup reads the
/// probed slots and candidate records. Because all access goes through
/// positioned reads, one handle can serve lookups from multiple threads.
/// Dropping the handle releases the source.
///
/// The width parameter must match the one the file was written with; the
/// file itself does not record it.
///
/// # Type Parameters
/// - `W`: integer width of the layout, `u32` or `u64`.
/// - `R`: positional source implementing [`ConstDbReader`].
#[derive(Debug)]
pub struct ConstDb<W: Width, R: ConstDbReader> {
    reader: R,
    header: Header,
    data_end: u64,
    source_size: u64,
    hash: HashFn,
    _width: PhantomData<W>,
}

impl<W: Width, R: ConstDbReader> ConstDb<W, R> {
    /// Opens a database over `reader`.
    ///
    /// The 256-entry header is read and every table is validated against
    /// the source size before any lookup runs.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] when the source is shorter than the header or a
    /// table lies outside the file; [`Error::Io`] when the source fails.
    pub fn load(reader: R) -> Result<Self> {
        Self::load_with_hash(reader, default_hash)
    }

    /// Opens a database that was written with a custom hash function.
    pub fn load_with_hash(reader: R, hash: HashFn) -> Result<Self> {
        let source_size = reader.size()?;
        if source_size < W::HEADER_SIZE as u64 {
            return Err(Error::Corrupt("file too short for the header"));
        }

        let header = reader
            .read_exact_at(0, W::HEADER_SIZE as u64, |data| {
                Ok(Header::decode::<W>(data))
            })
            .map_err(Error::from_read)?;
        header.validate::<W>(source_size)?;
        let data_end = header.data_end::<W>();
        debug!(
            "loaded database: {} records in {} bytes",
            header.entry_count(),
            source_size
        );

        Ok(Self {
            reader,
            header,
            data_end,
            source_size,
            hash,
            _width: PhantomData,
        })
    }

    /// Returns the first value stored under `key`, or `None`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_all(key).next().transpose()
    }

    /// Returns a lazy iterator over every value stored under `key`, in
    /// insertion order.
    ///
    /// Each call starts a fresh probe walk, so repeated calls yield the
    /// same values. A missing key yields an empty iterator, not an error.
    pub fn get_all<'a>(&'a self, key: &'a [u8]) -> ValueIter<'a, W, R> {
        let hash = (self.hash)(key);
        let table = self.header.tables[(hash & 0xff) as usize];
        let slot = if table.length == 0 {
            0
        } else {
            (u64::from(hash) >> 8) % table.length
        };
        ValueIter {
            db: self,
            key,
            hash,
            table,
            slot,
            probed: 0,
            done: table.length == 0,
        }
    }

    /// Iterates over every record in the data section, in insertion order.
    pub fn iter(&self) -> RecordIter<'_, W, R> {
        RecordIter {
            db: self,
            position: W::HEADER_SIZE as u64,
            done: false,
        }
    }

    /// Number of records stored, duplicates included.
    pub fn len(&self) -> u64 {
        self.header.entry_count()
    }

    /// Returns `true` when the database holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Summary of the database layout.
    pub fn info(&self) -> ConstDbInfo {
        ConstDbInfo {
            file_length: self.source_size,
            entry_count: self.header.entry_count(),
            empty_buckets: 256 - self.header.occupied_buckets(),
            width_bits: W::BYTES * 8,
        }
    }

    /// Fetches the record at `offset` and returns its value when its key
    /// equals `expected_key`. Key lengths are compared before any key
    /// bytes are fetched.
    fn record_value_at(&self, offset: u64, expected_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let body = offset
            .checked_add(W::PAIR_SIZE as u64)
            .ok_or(Error::Corrupt("record offset out of bounds"))?;
        if offset < W::HEADER_SIZE as u64 || body > self.data_end {
            return Err(Error::Corrupt("record offset out of bounds"));
        }

        let (key_len, value_len) = self
            .reader
            .read_exact_at(offset, W::PAIR_SIZE as u64, |data| Ok(W::read_pair(data)))
            .map_err(Error::from_read)?;

        if key_len != expected_key.len() as u64 {
            return Ok(None);
        }

        let end = key_len
            .checked_add(value_len)
            .and_then(|n| body.checked_add(n))
            .ok_or(Error::Corrupt("record length out of bounds"))?;
        if end > self.data_end {
            return Err(Error::Corrupt("record length out of bounds"));
        }

        self.reader
            .read_exact_at(body, key_len + value_len, |data| {
                if &data[..key_len as usize] == expected_key {
                    Ok(Some(data[key_len as usize..].to_vec()))
                } else {
                    Ok(None)
                }
            })
            .map_err(Error::from_read)
    }
}

/// Lazy iterator over the values stored under one key.
///
/// Walks the bucket's probe sequence, stopping at the empty slot or after
/// one full pass over the table.
pub struct ValueIter<'a, W: Width, R: ConstDbReader> {
    db: &'a ConstDb<W, R>,
    key: &'a [u8],
    hash: u32,
    table: Table,
    slot: u64,
    probed: u64,
    done: bool,
}

impl<W: Width, R: ConstDbReader> Iterator for ValueIter<'_, W, R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if self.probed == self.table.length {
                self.done = true;
                break;
            }

            let slot_offset = self.table.position + self.slot * W::PAIR_SIZE as u64;
            self.slot = (self.slot + 1) % self.table.length;
            self.probed += 1;

            let pair = self
                .db
                .reader
                .read_exact_at(slot_offset, W::PAIR_SIZE as u64, |data| Ok(W::read_pair(data)))
                .map_err(Error::from_read);
            let (slot_hash, offset) = match pair {
                Ok(pair) => pair,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            // The all-zero slot terminates the walk. Offset 0 is the
            // authoritative empty marker: no record can live inside the
            // header region, while a real key may hash to 0.
            if offset == 0 {
                self.done = true;
                break;
            }
            if slot_hash != u64::from(self.hash) {
                continue;
            }

            match self.db.record_value_at(offset, self.key) {
                Ok(Some(value)) => return Some(Ok(value)),
                // A full hash collision with a different key; keep probing.
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Sequential iterator over every record in the data section.
pub struct RecordIter<'a, W: Width, R: ConstDbReader> {
    db: &'a ConstDb<W, R>,
    position: u64,
    done: bool,
}

impl<W: Width, R: ConstDbReader> Iterator for RecordIter<'_, W, R> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.position >= self.db.data_end {
            return None;
        }

        let record = self.read_record();
        if record.is_err() {
            self.done = true;
        }
        Some(record)
    }
}

impl<W: Width, R: ConstDbReader> RecordIter<'_, W, R> {
    fn read_record(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let body = self
            .position
            .checked_add(W::PAIR_SIZE as u64)
            .ok_or(Error::Corrupt("record offset out of bounds"))?;
        if body > self.db.data_end {
            return Err(Error::Corrupt("truncated record"));
        }

        let (key_len, value_len) = self
            .db
            .reader
            .read_exact_at(self.position, W::PAIR_SIZE as u64, |data| {
                Ok(W::read_pair(data))
            })
            .map_err(Error::from_read)?;

        let end = key_len
            .checked_add(value_len)
            .and_then(|n| body.checked_add(n))
            .ok_or(Error::Corrupt("record length out of bounds"))?;
        if end > self.db.data_end {
            return Err(Error::Corrupt("record length out of bounds"));
        }

        let record = self
            .db
            .reader
            .read_exact_at(body, key_len + value_len, |data| {
                Ok((
                    data[..key_len as usize].to_vec(),
                    data[key_len as usize..].to_vec(),
                ))
            })
            .map_err(Error::from_read)?;
        self.position = end;
        Ok(record)
    }
}
