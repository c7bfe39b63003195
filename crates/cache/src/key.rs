//! Cache key encoding
//!
//! Raw binary cache keys are turned into names that are safe to use as
//! directory entries on the backing filesystem. Keys made of filename-safe
//! bytes are stored mostly verbatim; anything else is packed six bits per
//! character. Long keys are split into NUL-separated segments, each of which
//! becomes one path component.

use crate::errors::{CacheError, RecoveryHint, Result};
use std::path::PathBuf;

/// Shortest raw key accepted by [`encode_key`]
pub const MIN_KEY_LEN: usize = 2;

/// Longest raw key accepted by [`encode_key`]
pub const MAX_KEY_LEN: usize = 514;

/// Encoded bytes carried by one path segment
const SEGMENT_LEN: usize = 252;

/// The first printable segment leaves room for the type character
const FIRST_PRINTABLE_SEGMENT_LEN: usize = 250;

const CHARMAP: &[u8; 64] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_-";

/// Semantic category of a cached object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// A directory of further objects
    Index,
    /// A regular data file
    DataFile,
    /// Anything else
    Other,
}

impl KeyType {
    const fn tag(self, printable: bool) -> u8 {
        match (self, printable) {
            (Self::Index, true) => b'I',
            (Self::DataFile, true) => b'D',
            (Self::Other, true) => b'S',
            (Self::Index, false) => b'J',
            (Self::DataFile, false) => b'E',
            (Self::Other, false) => b'T',
        }
    }

    /// Numeric tag stored in the auxiliary data blob
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Index => 0,
            Self::DataFile => 1,
            Self::Other => 2,
        }
    }

    /// Inverse of [`KeyType::as_u8`]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Index),
            1 => Some(Self::DataFile),
            2 => Some(Self::Other),
            _ => None,
        }
    }
}

/// Filename-safe encoding of a raw key
///
/// Layout: `@`, two hex checksum digits, NUL, the body segments (separated by
/// NUL and a `+` continuation marker), the type character and a final NUL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncodedKey {
    bytes: Vec<u8>,
    checksum: u8,
    printable: bool,
    key_type: KeyType,
}

impl EncodedKey {
    /// The full encoding including NUL separators
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Additive checksum over the raw key
    pub fn checksum(&self) -> u8 {
        self.checksum
    }

    /// Whether the raw key was stored verbatim
    pub fn is_printable(&self) -> bool {
        self.printable
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Type character distinguishing both the object type and the encoding scheme
    pub fn type_char(&self) -> char {
        char::from(self.key_type.tag(self.printable))
    }

    /// Path components in walk order: the checksum fan-out directory first,
    /// then every body segment
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.bytes
            .split(|&b| b == 0)
            .filter(|segment| !segment.is_empty())
            .filter_map(|segment| std::str::from_utf8(segment).ok())
    }

    /// Relative path made of all segments
    pub fn to_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

fn is_filename_safe(byte: u8) -> bool {
    matches!(byte, b'!'..=b'.' | b'0'..=0x7f)
}

/// Encode `raw` into a filename-safe key of the given type
pub fn encode_key(raw: &[u8], key_type: KeyType) -> Result<EncodedKey> {
    if raw.len() < MIN_KEY_LEN || raw.len() > MAX_KEY_LEN {
        return Err(CacheError::InvalidKey {
            length: raw.len(),
            reason: format!("raw keys must be {MIN_KEY_LEN} to {MAX_KEY_LEN} bytes"),
            recovery_hint: RecoveryHint::FixCaller,
        });
    }

    let checksum = raw.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    let printable = raw[2..].iter().all(|&b| is_filename_safe(b));

    let body_len = if printable {
        raw.len()
    } else {
        raw.len().div_ceil(3) * 4
    };
    let capacity = 4 + body_len + 2 * (body_len / (SEGMENT_LEN - 4) + 1) + 2;

    let mut out = Vec::new();
    if out.try_reserve_exact(capacity).is_err() {
        return Err(CacheError::out_of_memory(capacity));
    }

    out.push(b'@');
    out.extend_from_slice(format!("{checksum:02x}").as_bytes());
    out.push(0);

    if printable {
        let acc = u16::from_le_bytes([raw[0], raw[1]]);
        out.push(CHARMAP[usize::from((acc >> 6) & 63)]);
        out.push(CHARMAP[usize::from(acc & 63)]);

        let mut room = FIRST_PRINTABLE_SEGMENT_LEN - 2;
        for &byte in &raw[2..] {
            if room == 0 {
                out.extend_from_slice(b"\0+");
                room = SEGMENT_LEN;
            }
            out.push(byte);
            room -= 1;
        }
    } else {
        let mut room = SEGMENT_LEN;
        for chunk in raw.chunks(3) {
            if room < 4 {
                out.extend_from_slice(b"\0+");
                room = SEGMENT_LEN;
            }
            let mut acc = chunk
                .iter()
                .enumerate()
                .fold(0u32, |acc, (i, &b)| acc | (u32::from(b) << (8 * i)));
            for _ in 0..4 {
                out.push(CHARMAP[(acc & 63) as usize]);
                acc >>= 6;
            }
            room -= 4;
        }
    }

    out.push(key_type.tag(printable));
    out.push(0);

    Ok(EncodedKey {
        bytes: out,
        checksum,
        printable,
        key_type,
    })
}
