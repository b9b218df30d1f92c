use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while building or reading a database file.
///
/// Lookups that find no matching key are not errors; they return `None` or
/// an empty iterator.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying storage failed to read, write, or flush.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The source does not describe a well-formed database.
    #[error("corrupt database: {0}")]
    Corrupt(&'static str),

    /// Writing one more record would overflow the address width of the
    /// file layout.
    #[error("database would exceed the addressable file size")]
    TooMuchData,
}

impl Error {
    /// Classifies a failed read: running off the end of a region that the
    /// header declared in bounds means the file is corrupt, anything else
    /// is a storage failure.
    pub(crate) fn from_read(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Corrupt("unexpected end of file")
        } else {
            Error::Io(e)
        }
    }
}
