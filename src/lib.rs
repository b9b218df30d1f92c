//! Write-once key/value database files with constant-time lookups.
//!
//! The `constdb` crate builds and queries immutable databases in the
//! classic cdb layout: a 256-entry header, a streamed data section of
//! length-prefixed records, and open-addressed slot tables, with either
//! 32-bit or 64-bit offsets (the latter for files beyond 4 GiB). Keys and
//! values are arbitrary bytes, duplicate keys are kept, and a lookup only
//! reads the slots and records it probes.
//!
//! Building streams records through a buffered positional writer and seals
//! the file in a single second pass; reading validates the header once and
//! serves lookups through positioned reads, so one handle can be shared
//! across threads.
//!
//! ```
//! use constdb::{ConstDb, ConstDbBuilder};
//!
//! # fn main() -> constdb::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("fruits.cdb64");
//!
//! let file = std::fs::File::create(&path)?;
//! ConstDbBuilder::<u64, _>::build(&file, [("apple", "1"), ("banana", "2")])?;
//!
//! let db = ConstDb::<u64, _>::load(std::fs::File::open(&path)?)?;
//! assert_eq!(db.get(b"banana")?, Some(b"2".to_vec()));
//! assert_eq!(db.get(b"cherry")?, None);
//! # Ok(())
//! # }
//! ```

mod error;
pub use error::{Error, Result};

mod hasher;
pub use hasher::{default_hash, HashFn};

mod meta;
pub use meta::{ConstDbInfo, Width};

mod reader;
pub use reader::ConstDbReader;

mod writer;
pub use writer::ConstDbWriter;

mod constdb;
pub use constdb::{ConstDb, RecordIter, ValueIter};

mod builder;
pub use builder::ConstDbBuilder;
