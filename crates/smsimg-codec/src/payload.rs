//! Text-safe form of a compressed image

use base64::{engine::general_purpose::STANDARD, Engine as _};
use smsimg_core::{SmsimgError, SmsimgResult};

/// Standard-alphabet, padded base64 of the compressed image bytes.
///
/// Always ASCII, so character and byte offsets coincide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload(String);

impl EncodedPayload {
    /// Encode binary image bytes.
    pub fn encode(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    /// Wrap text received from the far end (e.g. rejoined fragments).
    pub fn from_text(text: String) -> SmsimgResult<Self> {
        if !text.is_ascii() {
            return Err(SmsimgError::Decode(
                "encoded payload contains non-ASCII characters".into(),
            ));
        }
        Ok(Self(text))
    }

    /// Decode back to binary image bytes.
    pub fn decode(&self) -> SmsimgResult<Vec<u8>> {
        STANDARD
            .decode(self.0.as_bytes())
            .map_err(|e| SmsimgError::Decode(format!("base64 payload: {e}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decoded size as the budget search counts it: `len * 3 / 4`.
    pub fn decoded_size_estimate(&self) -> usize {
        self.0.len() * 3 / 4
    }
}
