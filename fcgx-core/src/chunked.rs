use crate::error::{Error, Result};
use bytes::{Buf, Bytes};

// 16 hex digits already cover u64.
const MAX_CHUNK_SIZE_DIGITS: usize = 16;

/// Split off one `\n` terminated line, dropping the terminator and an optional `\r`.
///
/// Returns `None` without consuming anything when no complete line is buffered.
pub(crate) fn read_line(buf: &mut Bytes) -> Option<Bytes> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut line = buf.split_to(pos);
    buf.advance(1);
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    Some(line)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let size = size.trim_ascii();
    if size.is_empty() {
        return Err(Error::MalformedChunk("empty hex number for chunk length".into()));
    }
    if size.len() > MAX_CHUNK_SIZE_DIGITS {
        return Err(Error::MalformedChunk("chunk length too large".into()));
    }
    let mut n: u64 = 0;
    for &b in size {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => {
                return Err(Error::MalformedChunk(format!(
                    "invalid byte in chunk length: {:?}",
                    b as char
                )))
            }
        };
        n = (n << 4) | u64::from(digit);
    }
    usize::try_from(n).map_err(|_| Error::MalformedChunk("chunk length too large".into()))
}

/// Lazy decoder for a chunked transfer-encoded body held in memory.
///
/// Each call to [`ChunkedDecoder::next_chunk`] validates and yields one chunk.
/// The decoder is fused: after the terminating zero-size chunk or an error it
/// yields nothing further.
#[derive(Debug, Clone)]
pub struct ChunkedDecoder {
    buf: Bytes,
    done: bool,
}

impl ChunkedDecoder {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, done: false }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let res = self.decode_one();
        if !matches!(res, Ok(Some(_))) {
            self.done = true;
        }
        res
    }

    fn decode_one(&mut self) -> Result<Option<Bytes>> {
        let line = read_line(&mut self.buf).ok_or(Error::UnexpectedEof)?;
        let size = parse_chunk_size(&line)?;
        if size == 0 {
            self.skip_trailer();
            return Ok(None);
        }
        if self.buf.len() < size {
            return Err(Error::UnexpectedEof);
        }
        let data = self.buf.split_to(size);
        if self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
        } else if self.buf.starts_with(b"\n") {
            self.buf.advance(1);
        } else if self.buf.is_empty() || self.buf[..] == b"\r"[..] {
            return Err(Error::UnexpectedEof);
        } else {
            return Err(Error::MalformedChunk(
                "chunk data not followed by CRLF".into(),
            ));
        }
        Ok(Some(data))
    }

    // Trailer fields are not surfaced; a missing final blank line is tolerated.
    fn skip_trailer(&mut self) {
        while let Some(line) = read_line(&mut self.buf) {
            if line.is_empty() {
                break;
            }
        }
    }
}

impl Iterator for ChunkedDecoder {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}
