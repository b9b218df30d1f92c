use std::io::Result;

/// Trait abstracting positional read access to database files.
///
/// Implementations must satisfy reads at absolute offsets without shared
/// cursor state, so a single handle can serve concurrent lookups. The
/// header is validated against [`size`](Self::size) when a database is
/// opened.
pub trait ConstDbReader {
    /// Total length of the underlying source in bytes.
    fn size(&self) -> Result<u64>;

    /// Reads `length` bytes starting at `offset` and forwards them to `f`.
    ///
    /// Implementations must return `ErrorKind::UnexpectedEof` whenever the
    /// requested range cannot be satisfied in full.
    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: Fn(&[u8]) -> Result<R>;
}

impl<T: ConstDbReader + ?Sized> ConstDbReader for &T {
    fn size(&self) -> Result<u64> {
        (**self).size()
    }

    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: Fn(&[u8]) -> Result<R>,
    {
        (**self).read_exact_at(offset, length, f)
    }
}

#[cfg(unix)]
impl ConstDbReader for std::fs::File {
    fn size(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: Fn(&[u8]) -> Result<R>,
    {
        use std::os::unix::fs::FileExt;
        let mut buffer = vec![0u8; length as usize];
        FileExt::read_exact_at(self, &mut buffer, offset)?;
        f(&buffer)
    }
}

#[cfg(windows)]
impl ConstDbReader for std::fs::File {
    fn size(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn read_exact_at<F, R>(&self, offset: u64, length: u64, f: F) -> Result<R>
    where
        F: Fn(&[u8]) -> Result<R>,
    {
        use std::os::windows::fs::FileExt;
        let mut buffer = vec![0u8; length as usize];
        let mut read = 0;
        while read < buffer.len() {
            let n = self.seek_read(&mut buffer[read..], offset + read as u64)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to read enough bytes",
                ));
            }
            read += n;
        }
        f(&buffer)
    }
}
