use crate::error::{Error, Result};

/// An offset within a seekable source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetFrom {
    /// Offset from the start of the source.
    Start(u64),
    /// Negative offset from the end of the source.
    End(i64),
}

/// Represents a seekable source of compressed data.
///
/// Anything that implements [`std::io::Read`] and [`std::io::Seek`] implements `Seekable`,
/// [`BytesWrapper`] adapts a plain byte slice.
pub trait Seekable {
    /// Moves the read position, returning the new absolute offset.
    ///
    /// # Errors
    ///
    /// Fails with a not-seekable error on sources that do not support seeking, e.g. pipes.
    fn set_offset(&mut self, offset: OffsetFrom) -> Result<u64>;

    /// Pull some bytes from this source into the specified buffer, returning how many bytes
    /// were read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// The current absolute read position.
    fn offset(&mut self) -> Result<u64>;

    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// Fails if the source ends before `buf` is full.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::format("unexpected end of stream"));
            }
            filled += n;
        }

        Ok(())
    }
}

/// A wrapper around a byte slice.
#[derive(Debug, Clone)]
pub struct BytesWrapper<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> BytesWrapper<'a> {
    /// Returns a new `BytesWrapper` around the given slice.
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }
}

impl Seekable for BytesWrapper<'_> {
    fn set_offset(&mut self, offset: OffsetFrom) -> Result<u64> {
        let pos = match offset {
            OffsetFrom::Start(n) => usize::try_from(n)?,
            OffsetFrom::End(n) => {
                let end = i64::try_from(self.src.len())?;
                usize::try_from(end.checked_add(n).ok_or_else(Error::offset_out_of_range)?)
                    .map_err(|_| Error::offset_out_of_range())?
            }
        };

        if pos > self.src.len() {
            return Err(Error::offset_out_of_range());
        }

        self.pos = pos;
        Ok(pos as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let limit = buf.len().min(self.src.len() - self.pos);
        buf[..limit].copy_from_slice(&self.src[self.pos..self.pos + limit]);
        self.pos += limit;

        Ok(limit)
    }

    fn offset(&mut self) -> Result<u64> {
        Ok(self.pos as u64)
    }
}

impl<T> Seekable for T
where
    T: std::io::Read + std::io::Seek,
{
    fn set_offset(&mut self, offset: OffsetFrom) -> Result<u64> {
        let pos = match offset {
            OffsetFrom::Start(n) => self.seek(std::io::SeekFrom::Start(n))?,
            OffsetFrom::End(n) => self.seek(std::io::SeekFrom::End(n))?,
        };

        Ok(pos)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(std::io::Read::read(self, buf)?)
    }

    fn offset(&mut self) -> Result<u64> {
        Ok(self.stream_position()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_wrapper_read_and_seek() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut wrapper = BytesWrapper::new(&data);

        let mut buf = [0u8; 3];
        wrapper.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(wrapper.offset().unwrap(), 3);

        wrapper.set_offset(OffsetFrom::End(-2)).unwrap();
        let n = wrapper.read(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], &[7, 8]);

        // Reads at the end succeed with zero bytes
        assert_eq!(wrapper.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn bytes_wrapper_offset_bounds() {
        let data = [0u8; 4];
        let mut wrapper = BytesWrapper::new(&data);

        assert!(wrapper.set_offset(OffsetFrom::Start(4)).is_ok());
        assert!(
            wrapper
                .set_offset(OffsetFrom::Start(5))
                .unwrap_err()
                .is_offset_out_of_range()
        );
        assert!(
            wrapper
                .set_offset(OffsetFrom::End(-5))
                .unwrap_err()
                .is_offset_out_of_range()
        );
    }

    #[test]
    fn read_exact_past_end() {
        let data = [0u8; 4];
        let mut wrapper = BytesWrapper::new(&data);
        let mut buf = [0u8; 8];
        assert!(wrapper.read_exact(&mut buf).unwrap_err().is_format());
    }
}
