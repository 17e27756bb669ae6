//! Jacket identity and content addressing.
//!
//! Every persistent item (history, entry, attachment) is addressed by a
//! SHA-256 id derived deterministically from the jacket's `id_hash` and the
//! item's coordinates, so the same logical object hashes to the same id
//! across stores and a single store can host multiple jackets without
//! collision.

use std::fmt;

use sha2::{Digest, Sha256 as Sha2};

use super::error::LimitViolation;
use super::limits::Limits;

/// A SHA-256 digest.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256(pub [u8; 32]);

impl Sha256 {
    /// The all-zero digest, used as `previous` of history #1.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in self.0 {
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0xf) as usize] as char);
        }
        out
    }

    /// Parse from exactly 64 lowercase hex characters.
    pub fn from_hex(s: &str) -> Result<Self, LimitViolation> {
        let bytes = s.as_bytes();
        if bytes.len() != 64 {
            return Err(LimitViolation::new(
                "sha-256 hex",
                format!("must be 64 hex chars (got {})", bytes.len()),
            ));
        }
        let mut out = [0u8; 32];
        for (i, pair) in bytes.chunks(2).enumerate() {
            let hi = hex_val(pair[0]);
            let lo = hex_val(pair[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => out[i] = (hi << 4) | lo,
                _ => {
                    return Err(LimitViolation::new(
                        "sha-256 hex",
                        "contains non-hex or uppercase character",
                    ));
                }
            }
        }
        Ok(Self(out))
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

impl fmt::Debug for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({})", self.to_hex())
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn sha256_bytes(data: &[u8]) -> Sha256 {
    let mut hasher = Sha2::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    Sha256(buf)
}

/// Kind of a stored item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemKind {
    History,
    Entry,
    File,
}

impl ItemKind {
    /// Single-character kind marker used by store layouts.
    pub fn as_char(self) -> char {
        match self {
            ItemKind::History => 'h',
            ItemKind::Entry => 'e',
            ItemKind::File => 'f',
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::History => write!(f, "history"),
            ItemKind::Entry => write!(f, "entry"),
            ItemKind::File => write!(f, "file"),
        }
    }
}

/// Jacket identity: a human-readable `id_text` and its derived `id_hash`.
///
/// `id_hash == SHA256(id_text)` is the only cryptographic binding between
/// the two. Both are immutable after creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JacketId {
    text: String,
    hash: Sha256,
}

impl JacketId {
    pub fn new(text: impl Into<String>) -> Result<Self, LimitViolation> {
        let text = text.into();
        Limits::default().check_id_text(&text)?;
        let hash = sha256_bytes(text.as_bytes());
        Ok(Self { text, hash })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn hash(&self) -> &Sha256 {
        &self.hash
    }
}

impl fmt::Display for JacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Id of history record `n` within the jacket identified by `jacket`.
pub fn history_id(jacket: &Sha256, n: u64) -> Sha256 {
    sha256_bytes(format!("{} history {}\n", jacket.to_hex(), n).as_bytes())
}

/// Id of entry `e` at revision `r`.
pub fn entry_id(jacket: &Sha256, e: u64, r: u64) -> Sha256 {
    sha256_bytes(format!("{} entry {} {}\n", jacket.to_hex(), e, r).as_bytes())
}

/// Id of attachment `a` of entry `e` as introduced in history `h`.
pub fn attach_id(jacket: &Sha256, e: u64, a: u64, h: u64) -> Sha256 {
    sha256_bytes(format!("{} attach {} {} {}\n", jacket.to_hex(), e, a, h).as_bytes())
}
