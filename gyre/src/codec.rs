//! Endian- and word-width-aware binary primitives.
//!
//! Legacy round-robin database files are raw dumps of C structs, so their
//! layout depends on the machine that wrote them: byte order, the size of
//! `unsigned long`, and struct padding all vary. The writing architecture is
//! identified by an 8-byte floating point cookie near the start of the file:
//!
//! ```text
//! offset 0       4         9
//!        ┌───────┬─────────┬─ pad ─┬──────────────────┐
//!        │ "RRD" │ version │       │ 8.642135e130     │
//!        └───────┴─────────┴───────┴──────────────────┘
//!                            cookie at 12 -> 32-bit words, 4-byte alignment
//!                            cookie at 16 -> 64-bit words, 8-byte alignment
//! ```
//!
//! The cookie value survives a round trip through IEEE-754 exactly, so its
//! byte pattern doubles as an endianness probe. [`Format::detect`] scans for
//! it; [`Reader`] and [`Writer`] then decode and encode integers, doubles and
//! NUL-padded strings under the detected convention, including the alignment
//! padding the original compiler inserted.

use crate::error::{ImportError, Result};

/// Magic floating point constant written by every legacy file.
///
/// A file that decodes this value correctly was read with the right byte
/// order and a working float codec.
pub const FLOAT_COOKIE: f64 = 8.642135e130;

/// Shortest byte stream that can hold the magic and the cookie.
const MIN_HEADER_LEN: usize = 24;

/// Cookie offset written by 32-bit producers.
const COOKIE_OFFSET_32: usize = 12;

/// Cookie offset written by 64-bit producers.
const COOKIE_OFFSET_64: usize = 16;

/// Byte order of a legacy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Width of the producer's `unsigned long` counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordWidth {
    /// 4-byte counters, structs aligned to 4 bytes.
    W32,
    /// 8-byte counters, structs aligned to 8 bytes.
    W64,
}

impl WordWidth {
    /// Size of one counter in bytes.
    pub fn bytes(self) -> usize {
        match self {
            WordWidth::W32 => 4,
            WordWidth::W64 => 8,
        }
    }
}

/// The full binary convention of one legacy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Format {
    /// Byte order.
    pub endian: Endianness,
    /// Counter width and struct alignment.
    pub word: WordWidth,
}

impl Format {
    /// Identifies the binary convention of a legacy byte stream.
    ///
    /// Scans the header for the float cookie in both byte orders; the offset
    /// it lands on pins the word width.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::TruncatedFile`] for streams too short to hold
    /// a header, [`ImportError::UnsupportedArchitecture`] when the cookie
    /// sits at an offset matching no known producer, and
    /// [`ImportError::InvalidFormat`] when no cookie is present at all.
    pub fn detect(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_HEADER_LEN {
            return Err(ImportError::TruncatedFile {
                needed: MIN_HEADER_LEN,
                offset: 0,
                available: bytes.len(),
            }
            .into());
        }

        let patterns = [
            (Endianness::Big, FLOAT_COOKIE.to_be_bytes()),
            (Endianness::Little, FLOAT_COOKIE.to_le_bytes()),
        ];
        for (endian, pattern) in patterns {
            let window = &bytes[..MIN_HEADER_LEN];
            if let Some(offset) = window.windows(pattern.len()).position(|w| w == pattern) {
                let word = match offset {
                    COOKIE_OFFSET_32 => WordWidth::W32,
                    COOKIE_OFFSET_64 => WordWidth::W64,
                    _ => return Err(ImportError::UnsupportedArchitecture { offset }.into()),
                };
                return Ok(Self { endian, word });
            }
        }

        Err(ImportError::InvalidFormat {
            reason: "float cookie not found in header".to_string(),
        }
        .into())
    }

    /// The struct alignment boundary of this convention.
    pub fn alignment(self) -> usize {
        self.word.bytes()
    }
}

/// Cursor over a legacy byte stream.
///
/// Every read advances the position and fails with the exact shortfall when
/// the stream ends early, so error messages point at the corrupt field.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    format: Format,
}

impl<'a> Reader<'a> {
    /// Creates a reader over `buf` using the given convention.
    pub fn new(buf: &'a [u8], format: Format) -> Self {
        Self {
            buf,
            pos: 0,
            format,
        }
    }

    /// Current byte position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left in the stream.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// The convention this reader decodes under.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Reads a fixed-width field of `width` bytes holding a NUL-terminated
    /// string; bytes after the NUL are padding.
    pub fn read_string(&mut self, width: usize) -> Result<String> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// Reads one counter (4 or 8 bytes depending on the word width) and
    /// widens it to u64.
    pub fn read_uint(&mut self) -> Result<u64> {
        match self.format.word {
            WordWidth::W32 => {
                let raw = self.take(4)?;
                let value = match self.format.endian {
                    Endianness::Big => u32::from_be_bytes(raw.try_into().unwrap()),
                    Endianness::Little => u32::from_le_bytes(raw.try_into().unwrap()),
                };
                Ok(u64::from(value))
            }
            WordWidth::W64 => {
                let raw = self.take(8)?;
                Ok(match self.format.endian {
                    Endianness::Big => u64::from_be_bytes(raw.try_into().unwrap()),
                    Endianness::Little => u64::from_le_bytes(raw.try_into().unwrap()),
                })
            }
        }
    }

    /// Reads one IEEE-754 double.
    pub fn read_f64(&mut self) -> Result<f64> {
        let raw = self.take(8)?;
        Ok(match self.format.endian {
            Endianness::Big => f64::from_be_bytes(raw.try_into().unwrap()),
            Endianness::Little => f64::from_le_bytes(raw.try_into().unwrap()),
        })
    }

    /// Skips `n` bytes of padding or ignored fields.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    /// Advances to the next multiple of `boundary`, mirroring the padding a
    /// C compiler inserts before an aligned field.
    pub fn align(&mut self, boundary: usize) -> Result<()> {
        let rem = self.pos % boundary;
        if rem != 0 {
            self.skip(boundary - rem)?;
        }
        Ok(())
    }

    /// Takes the next `n` bytes, or reports the shortfall.
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if available < n {
            return Err(ImportError::TruncatedFile {
                needed: n,
                offset: self.pos,
                available,
            }
            .into());
        }
        let raw = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(raw)
    }
}

/// Growable buffer that encodes under a fixed convention.
///
/// The writer mirrors [`Reader`] field for field: strings are NUL-padded to
/// their fixed width and [`Writer::align`] inserts zero padding, so a stream
/// written here reads back byte-exactly.
#[derive(Debug)]
pub struct Writer {
    buf: Vec<u8>,
    format: Format,
}

impl Writer {
    /// Creates an empty writer for the given convention.
    pub fn new(format: Format) -> Self {
        Self {
            buf: Vec::new(),
            format,
        }
    }

    /// Current byte position.
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Consumes the writer and returns the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Writes `value` into a fixed-width field of `width` bytes, padded with
    /// NULs. Longer strings are truncated to `width - 1` bytes so the field
    /// always terminates.
    pub fn write_string(&mut self, value: &str, width: usize) {
        let raw = value.as_bytes();
        let len = raw.len().min(width.saturating_sub(1));
        self.buf.extend_from_slice(&raw[..len]);
        self.buf.extend(std::iter::repeat_n(0u8, width - len));
    }

    /// Writes one counter in the convention's word width.
    ///
    /// Values beyond a 32-bit producer's range are clamped to `u32::MAX`
    /// rather than silently wrapped.
    pub fn write_uint(&mut self, value: u64) {
        match self.format.word {
            WordWidth::W32 => {
                let narrowed = u32::try_from(value).unwrap_or(u32::MAX);
                match self.format.endian {
                    Endianness::Big => self.buf.extend_from_slice(&narrowed.to_be_bytes()),
                    Endianness::Little => self.buf.extend_from_slice(&narrowed.to_le_bytes()),
                }
            }
            WordWidth::W64 => match self.format.endian {
                Endianness::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
                Endianness::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
            },
        }
    }

    /// Writes one IEEE-754 double.
    pub fn write_f64(&mut self, value: f64) {
        match self.format.endian {
            Endianness::Big => self.buf.extend_from_slice(&value.to_be_bytes()),
            Endianness::Little => self.buf.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Writes `n` zero bytes.
    pub fn pad(&mut self, n: usize) {
        self.buf.extend(std::iter::repeat_n(0u8, n));
    }

    /// Zero-pads to the next multiple of `boundary`.
    pub fn align(&mut self, boundary: usize) {
        let rem = self.buf.len() % boundary;
        if rem != 0 {
            self.pad(boundary - rem);
        }
    }
}
