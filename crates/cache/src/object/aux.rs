//! Auxiliary data stored with each backing entry
//!
//! The blob lives in an extended attribute: a little-endian `u16` payload
//! length, one byte of object type, then the payload. What the payload means
//! is up to the caller, which decides through an [`AuxValidator`] whether an
//! entry found on disk is still good.

use crate::errors::{CacheError, RecoveryHint, Result};
use crate::key::KeyType;

/// Name of the extended attribute holding the blob
pub const AUX_XATTR: &str = "CacheFiles.cache";

/// Verdict on an entry found on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxCheck {
    /// Use it as it is
    Okay,
    /// Use it, but store the new auxiliary data
    NeedsUpdate,
    /// Throw it away and start afresh
    Obsolete,
}

/// Decides whether stored auxiliary data still matches what is expected
pub trait AuxValidator: Send + Sync {
    fn check(&self, object_type: KeyType, stored: &[u8], expected: &[u8]) -> AuxCheck;
}

/// Accept only byte-identical auxiliary data
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactMatch;

impl AuxValidator for ExactMatch {
    fn check(&self, _object_type: KeyType, stored: &[u8], expected: &[u8]) -> AuxCheck {
        if stored == expected {
            AuxCheck::Okay
        } else {
            AuxCheck::Obsolete
        }
    }
}

pub fn encode_aux(object_type: KeyType, data: &[u8]) -> Result<Vec<u8>> {
    let Ok(len) = u16::try_from(data.len()) else {
        return Err(CacheError::InvalidKey {
            length: data.len(),
            reason: "auxiliary data longer than 65535 bytes".to_string(),
            recovery_hint: RecoveryHint::FixCaller,
        });
    };
    let mut blob = Vec::with_capacity(3 + data.len());
    blob.extend_from_slice(&len.to_le_bytes());
    blob.push(object_type.as_u8());
    blob.extend_from_slice(data);
    Ok(blob)
}

/// Split a stored blob; `None` if it is malformed
pub fn decode_aux(blob: &[u8]) -> Option<(KeyType, &[u8])> {
    if blob.len() < 3 {
        return None;
    }
    let len = usize::from(u16::from_le_bytes([blob[0], blob[1]]));
    let object_type = KeyType::from_u8(blob[2])?;
    let payload = &blob[3..];
    if payload.len() != len {
        return None;
    }
    Some((object_type, payload))
}
