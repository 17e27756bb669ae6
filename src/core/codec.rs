//! Shared helpers for the canonical line-based codecs.

use super::error::DecodeError;
use super::identity::Sha256;

/// Cursor over newline-terminated lines of a canonical record.
pub(crate) struct Lines<'a> {
    rest: &'a [u8],
    line: usize,
}

impl<'a> Lines<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { rest: bytes, line: 0 }
    }

    /// 1-based number of the most recently consumed line.
    pub fn line_no(&self) -> usize {
        self.line
    }

    /// Consume the next line (without its terminator).
    pub fn next_line(&mut self) -> Result<&'a str, DecodeError> {
        let pos = self
            .rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(DecodeError::Truncated)?;
        let line = &self.rest[..pos];
        self.rest = &self.rest[pos + 1..];
        self.line += 1;
        std::str::from_utf8(line).map_err(|_| DecodeError::NotUtf8)
    }

    /// True if the next line starts with `prefix`.
    pub fn peek_starts_with(&self, prefix: &str) -> bool {
        let upto = self
            .rest
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(self.rest.len());
        self.rest[..upto].starts_with(prefix.as_bytes())
    }

    /// Everything after the consumed lines.
    pub fn remainder(self) -> &'a [u8] {
        self.rest
    }

    pub fn at_end(&self) -> bool {
        self.rest.is_empty()
    }
}

/// Strip `<tag> ` from a field line.
pub(crate) fn field<'a>(
    line: &'a str,
    tag: &'static str,
    line_no: usize,
) -> Result<&'a str, DecodeError> {
    line.strip_prefix(tag)
        .and_then(|rest| rest.strip_prefix(' '))
        .ok_or(DecodeError::ExpectedField {
            line: line_no,
            field: tag,
        })
}

/// Strict decimal: digits only, no leading zeros.
pub(crate) fn parse_decimal(s: &str, line: usize) -> Result<u64, DecodeError> {
    if s.is_empty()
        || !s.bytes().all(|b| b.is_ascii_digit())
        || (s.len() > 1 && s.starts_with('0'))
    {
        return Err(DecodeError::BadNumber { line });
    }
    s.parse().map_err(|_| DecodeError::BadNumber { line })
}

/// Positive strict decimal.
pub(crate) fn parse_positive(s: &str, line: usize) -> Result<u64, DecodeError> {
    match parse_decimal(s, line)? {
        0 => Err(DecodeError::BadNumber { line }),
        n => Ok(n),
    }
}

pub(crate) fn parse_hash(s: &str, line: usize) -> Result<Sha256, DecodeError> {
    Sha256::from_hex(s).map_err(|_| DecodeError::BadHash { line })
}
