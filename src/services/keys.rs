//! Storage key generation.
//!
//! Keys look like `landscape/<base64url id>.mp4`. The id is drawn from the OS
//! entropy source, so a key is never reused across uploads.

use crate::media::probe::AspectClass;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use thiserror::Error;

/// Fewer bytes than this would drop below 256 bits of entropy.
pub const MIN_KEY_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("entropy source unavailable: {0}")]
    Entropy(String),
}

/// Source of random bytes for storage keys.
pub trait KeySource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), KeyError>;
}

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsKeySource;

impl KeySource for OsKeySource {
    fn fill(&self, buf: &mut [u8]) -> Result<(), KeyError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|err| KeyError::Entropy(err.to_string()))
    }
}

/// URL-safe random identifier built from `len` bytes (at least 32).
pub fn random_id(source: &dyn KeySource, len: usize) -> Result<String, KeyError> {
    let mut buf = vec![0u8; len.max(MIN_KEY_BYTES)];
    source.fill(&mut buf)?;
    Ok(URL_SAFE_NO_PAD.encode(&buf))
}

/// `<aspect>/<random id>.<extension>`
pub fn storage_key(
    source: &dyn KeySource,
    aspect: AspectClass,
    key_bytes: usize,
    extension: &str,
) -> Result<String, KeyError> {
    let id = random_id(source, key_bytes)?;
    Ok(format!("{}/{}.{}", aspect.as_str(), id, extension))
}
