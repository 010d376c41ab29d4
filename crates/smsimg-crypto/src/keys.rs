//! The installation's symmetric key

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use secrecy::SecretString;
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A 256-bit AES key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Base64 form used by the secret backends.
    pub fn to_base64(&self) -> SecretString {
        SecretString::from(STANDARD.encode(self.bytes))
    }

    /// Parse a persisted key; anything other than 32 bytes of base64 is rejected.
    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let mut decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("persisted key is not base64: {e}"))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            anyhow::bail!("persisted key has wrong size: {len} bytes (expected {KEY_SIZE})");
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self { bytes })
    }

    /// Short, non-secret identifier for display: first 16 hex chars of BLAKE3(key).
    pub fn fingerprint(&self) -> String {
        let hash = blake3::hash(&self.bytes);
        hash.to_hex()[..16].to_string()
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Generate a random 256-bit key from the thread-local CSPRNG.
pub fn generate_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SymmetricKey::from_bytes(bytes)
}
