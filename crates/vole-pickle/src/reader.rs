use std::io::{self, Read};

use vole_core::{PickleError, Result};

/// Byte source for the pickle machine with protocol-4 framing.
///
/// A FRAME opcode announces how many bytes the following opcodes occupy. The
/// frame is read in one go and served from memory until exhausted; opening a
/// new frame while bytes of the current one remain is a `FrameBoundary`
/// error, and so is a read that would run past the end of the current frame.
///
/// Outside frames the reader never consumes more bytes than asked for, so a
/// stream holding several pickles back to back can be read one pickle at a
/// time.
pub(crate) struct FrameReader<R> {
    inner: R,
    frame: Vec<u8>,
    pos: usize,
}

impl<R: Read> FrameReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        FrameReader {
            inner,
            frame: Vec::new(),
            pos: 0,
        }
    }

    fn frame_remaining(&self) -> usize {
        self.frame.len() - self.pos
    }

    pub(crate) fn load_frame(&mut self, len: u64) -> Result<()> {
        if self.frame_remaining() > 0 {
            return Err(PickleError::FrameBoundary.into());
        }
        let mut frame = Vec::new();
        (&mut self.inner).take(len).read_to_end(&mut frame)?;
        if (frame.len() as u64) < len {
            return Err(eof().into());
        }
        self.frame = frame;
        self.pos = 0;
        Ok(())
    }

    pub(crate) fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let remaining = self.frame_remaining();
        if remaining > 0 {
            if n > remaining {
                return Err(PickleError::FrameBoundary.into());
            }
            let out = self.frame[self.pos..self.pos + n].to_vec();
            self.pos += n;
            return Ok(out);
        }
        // Lengths come from the stream; grow with the data instead of
        // trusting them for an up-front allocation.
        let mut out = Vec::new();
        (&mut self.inner).take(n as u64).read_to_end(&mut out)?;
        if out.len() < n {
            return Err(eof().into());
        }
        Ok(out)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Bytes up to and excluding the next `\n`.
    pub(crate) fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == b'\n' {
                return Ok(line);
            }
            line.push(b);
        }
    }

    /// A line that must be valid UTF-8, with a trailing `\r` removed.
    pub(crate) fn read_str_line(&mut self) -> Result<String> {
        let mut line = self.read_line()?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map_err(|_| PickleError::Malformed("line is not valid UTF-8".to_string()).into())
    }
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "pickle data was truncated")
}
