use std::io::Result;

/// Trait representing positional writers suitable for database
/// serialization.
///
/// Writers must accept arbitrary byte slices at absolute offsets without
/// shared cursor state; this is satisfied by `FileExt` handles on both
/// Unix and Windows.
pub trait ConstDbWriter {
    /// Writes all of `data` at the given absolute `offset`.
    fn write_all_at(&self, data: &[u8], offset: u64) -> Result<()>;
}

#[cfg(unix)]
impl<T: std::os::unix::fs::FileExt> ConstDbWriter for T {
    fn write_all_at(&self, data: &[u8], offset: u64) -> Result<()> {
        std::os::unix::fs::FileExt::write_all_at(self, data, offset)
    }
}

#[cfg(windows)]
impl<T: std::os::windows::fs::FileExt> ConstDbWriter for T {
    fn write_all_at(&self, mut data: &[u8], mut offset: u64) -> Result<()> {
        while !data.is_empty() {
            let written = self.seek_write(data, offset)?;
            if written == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            data = &data[written..];
            offset += written as u64;
        }
        Ok(())
    }
}
