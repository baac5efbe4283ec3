use std::fmt;

use bytes::Bytes;

use crate::{parser::MAX_LINE, ParseError};

/// Maximum length of the hex digits in a chunk size line.
const MAX_CHUNK_SIZE_DIGITS: usize = 8;

/// How a request body is delimited on the wire, and how much of it has been checked so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Length(usize),
    /// `scanned` counts the bytes of complete data chunks already seen.
    Chunked { scanned: usize },
}

impl Framing {
    /// Number of bytes at the start of `input` making up the complete framed body.
    ///
    /// Returns `None` if the body hasn't been fully received yet. Fails once the framed body is
    /// known to exceed `limit` bytes. Chunks that were complete on an earlier call aren't parsed
    /// again, `input` must keep starting at the body.
    pub(crate) fn complete_len(
        &mut self,
        input: &[u8],
        limit: usize,
    ) -> Result<Option<usize>, ParseError> {
        match self {
            Framing::Length(len) => {
                if *len > limit {
                    return Err(ParseError::BodyTooLarge(limit));
                }
                Ok((input.len() >= *len).then_some(*len))
            }
            Framing::Chunked { scanned } => loop {
                let chunk = next_chunk(&input[*scanned..])?;
                let reached = match chunk {
                    Chunk::Incomplete { needed } => *scanned + needed,
                    Chunk::Data { consumed, .. } | Chunk::Last { consumed } => *scanned + consumed,
                };
                if reached > limit {
                    return Err(ParseError::BodyTooLarge(limit));
                }

                match chunk {
                    Chunk::Incomplete { .. } => return Ok(None),
                    Chunk::Data { consumed, .. } => *scanned += consumed,
                    Chunk::Last { consumed } => return Ok(Some(*scanned + consumed)),
                }
            },
        }
    }
}

#[derive(Clone, Copy)]
enum Chunk {
    /// `needed` is the least number of bytes the chunk is known to take up.
    Incomplete {
        needed: usize,
    },
    Data {
        start: usize,
        len: usize,
        consumed: usize,
    },
    Last {
        consumed: usize,
    },
}

/// Decode the chunk at the start of `input`.
fn next_chunk(input: &[u8]) -> Result<Chunk, ParseError> {
    let Some((line, mut offset)) = split_line(input)? else {
        return Ok(Chunk::Incomplete {
            needed: input.len() + 1,
        });
    };
    let size = parse_chunk_size(line)?;

    // The zero chunk is followed by optional trailers, up to a blank line
    if size == 0 {
        loop {
            let Some((line, consumed)) = split_line(&input[offset..])? else {
                return Ok(Chunk::Incomplete {
                    needed: input.len() + 1,
                });
            };
            offset += consumed;

            if line.is_empty() {
                return Ok(Chunk::Last { consumed: offset });
            }
        }
    }

    let end = offset + size;
    if input.len() < end + 2 {
        return Ok(Chunk::Incomplete { needed: end + 2 });
    }
    if &input[end..end + 2] != b"\r\n" {
        return Err(ParseError::InvalidChunkTerminator);
    }

    Ok(Chunk::Data {
        start: offset,
        len: size,
        consumed: end + 2,
    })
}

/// Split off one line, without its line ending, returning it with the bytes it took up.
fn split_line(input: &[u8]) -> Result<Option<(&[u8], usize)>, ParseError> {
    let Some(position) = input.iter().position(|b| *b == b'\n') else {
        if input.len() >= MAX_LINE {
            return Err(ParseError::LineTooLong(MAX_LINE));
        }
        return Ok(None);
    };

    if position >= MAX_LINE {
        return Err(ParseError::LineTooLong(MAX_LINE));
    }

    let line = &input[..position];
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    Ok(Some((line, position + 1)))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    // Chunk extensions are ignored
    let digits = match line.iter().position(|b| *b == b';') {
        Some(position) => &line[..position],
        None => line,
    };
    let digits = std::str::from_utf8(digits)
        .map_err(|_| ParseError::InvalidChunkSize)?
        .trim();

    let valid = digits.bytes().all(|b| b.is_ascii_hexdigit());
    if !valid || digits.is_empty() || digits.len() > MAX_CHUNK_SIZE_DIGITS {
        return Err(ParseError::InvalidChunkSize);
    }

    usize::from_str_radix(digits, 16).map_err(|_| ParseError::InvalidChunkSize)
}

/// Lazy decoder over a request body.
///
/// Iterating yields the body's chunks in order, as received. A content-length body is yielded as
/// a single chunk. The reader is forward-only, once a chunk has been yielded it's gone.
pub struct BodyReader {
    data: Bytes,
    chunked: bool,
    done: bool,
}

impl BodyReader {
    /// Reader over a body delimited by its content-length.
    pub fn sized(data: Bytes) -> Self {
        Self {
            data,
            chunked: false,
            done: false,
        }
    }

    /// Reader over a body in chunked transfer encoding, including its terminating zero chunk.
    pub fn chunked(data: Bytes) -> Self {
        Self {
            data,
            chunked: true,
            done: false,
        }
    }

    /// Read the remaining body into one buffer.
    pub fn read_to_end(self) -> Result<Vec<u8>, ParseError> {
        let mut body = Vec::new();
        for chunk in self {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }

    fn next_decoded(&mut self) -> Result<Option<Bytes>, ParseError> {
        if !self.chunked {
            self.done = true;
            let data = std::mem::take(&mut self.data);
            return Ok((!data.is_empty()).then_some(data));
        }

        match next_chunk(&self.data)? {
            Chunk::Incomplete { .. } => Err(ParseError::UnexpectedEof),
            Chunk::Data {
                start,
                len,
                consumed,
            } => {
                let chunk = self.data.slice(start..start + len);
                self.data = self.data.slice(consumed..);
                Ok(Some(chunk))
            }
            Chunk::Last { .. } => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

impl Iterator for BodyReader {
    type Item = Result<Bytes, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let result = self.next_decoded();
        if result.is_err() {
            self.done = true;
        }
        result.transpose()
    }
}

impl fmt::Debug for BodyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyReader")
            .field("remaining", &self.data.len())
            .field("chunked", &self.chunked)
            .finish()
    }
}
