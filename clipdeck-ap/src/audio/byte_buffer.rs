//! Seekable in-memory byte stream
//!
//! Backing store for streaming decode and for the WAV re-encode repair path.
//! The buffer never grows: reads and writes stop at the end of the buffer and
//! report short counts instead of failing.

use std::io::{self, Read, Seek, SeekFrom, Write};
use symphonia::core::io::MediaSource;

/// Reference point for [`ByteBufferIO::seek_to`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Start,
    Current,
    End,
}

/// Fixed-capacity read/write cursor over an owned byte vector
#[derive(Debug, Default, Clone)]
pub struct ByteBufferIO {
    data: Vec<u8>,
    pos: usize,
    /// Furthest byte ever written, used to trim a pre-sized buffer
    high_water: usize,
}

impl ByteBufferIO {
    /// Wrap existing bytes for reading, positioned at the start
    pub fn from_vec(data: Vec<u8>) -> Self {
        let high_water = data.len();
        Self {
            data,
            pos: 0,
            high_water,
        }
    }

    /// Zero-filled buffer of `len` bytes for writing
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0; len],
            pos: 0,
            high_water: 0,
        }
    }

    pub fn length(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor, clamped to `0..=length`, and return the new position
    pub fn seek_to(&mut self, offset: i64, origin: SeekOrigin) -> usize {
        let base = match origin {
            SeekOrigin::Start => 0i64,
            SeekOrigin::Current => self.pos as i64,
            SeekOrigin::End => self.data.len() as i64,
        };
        let target = base.saturating_add(offset).clamp(0, self.data.len() as i64);
        self.pos = target as usize;
        self.pos
    }

    /// Copy up to `dst.len()` bytes from the cursor; 0 at end of buffer
    pub fn read_bytes(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.data.len() - self.pos);
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    /// Copy up to the remaining capacity from `src`; short count when full
    pub fn write_bytes(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.data.len() - self.pos);
        self.data[self.pos..self.pos + n].copy_from_slice(&src[..n]);
        self.pos += n;
        self.high_water = self.high_water.max(self.pos);
        n
    }

    /// Bytes written so far (furthest write position)
    pub fn written_len(&self) -> usize {
        self.high_water
    }

    /// Drop the unused tail of a pre-sized buffer and rewind
    pub fn truncate_to_written(&mut self) {
        self.data.truncate(self.high_water);
        self.pos = 0;
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Read for ByteBufferIO {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf))
    }
}

impl Write for ByteBufferIO {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for ByteBufferIO {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => {
                self.seek_to(i64::try_from(offset).unwrap_or(i64::MAX), SeekOrigin::Start)
            }
            SeekFrom::Current(offset) => self.seek_to(offset, SeekOrigin::Current),
            SeekFrom::End(offset) => self.seek_to(offset, SeekOrigin::End),
        };
        Ok(new_pos as u64)
    }
}

impl MediaSource for ByteBufferIO {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_at_end() {
        let mut buf = ByteBufferIO::from_vec(vec![1, 2, 3, 4, 5]);
        let mut dst = [0u8; 3];
        assert_eq!(buf.read_bytes(&mut dst), 3);
        assert_eq!(dst, [1, 2, 3]);
        assert_eq!(buf.read_bytes(&mut dst), 2);
        assert_eq!(&dst[..2], &[4, 5]);
        assert_eq!(buf.read_bytes(&mut dst), 0);
    }

    #[test]
    fn test_short_write_when_full() {
        let mut buf = ByteBufferIO::with_len(4);
        assert_eq!(buf.write_bytes(&[9, 9, 9]), 3);
        assert_eq!(buf.write_bytes(&[7, 7, 7]), 1);
        assert_eq!(buf.write_bytes(&[7]), 0);
        assert_eq!(buf.into_inner(), vec![9, 9, 9, 7]);
    }

    #[test]
    fn test_seek_is_clamped() {
        let mut buf = ByteBufferIO::from_vec(vec![0; 10]);
        assert_eq!(buf.seek_to(-5, SeekOrigin::Start), 0);
        assert_eq!(buf.seek_to(4, SeekOrigin::Start), 4);
        assert_eq!(buf.seek_to(3, SeekOrigin::Current), 7);
        assert_eq!(buf.seek_to(100, SeekOrigin::Current), 10);
        assert_eq!(buf.seek_to(-2, SeekOrigin::End), 8);
        assert_eq!(buf.seek_to(1, SeekOrigin::End), 10);
        assert_eq!(buf.position(), 10);
    }

    #[test]
    fn test_truncate_to_written() {
        let mut buf = ByteBufferIO::with_len(64);
        buf.write_bytes(b"RIFF");
        buf.seek_to(0, SeekOrigin::Start);
        buf.write_bytes(b"RI");
        assert_eq!(buf.written_len(), 4);
        buf.truncate_to_written();
        assert_eq!(buf.length(), 4);
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_std_io_traits() {
        let mut buf = ByteBufferIO::with_len(8);
        buf.write_all(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buf.seek(SeekFrom::Current(-2)).unwrap(), 2);
        let mut two = [0u8; 2];
        buf.read_exact(&mut two).unwrap();
        assert_eq!(two, [3, 4]);

        // write_all past capacity reports WriteZero instead of panicking
        buf.seek(SeekFrom::End(-1)).unwrap();
        let err = buf.write_all(&[5, 6]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
