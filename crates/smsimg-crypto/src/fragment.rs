//! Per-fragment AES-256-CBC encryption/decryption
//!
//! Wire format (text):
//! ```text
//! <base64 IV (16 bytes)>:<base64 ciphertext (PKCS#7 padded)>
//! ```
//!
//! Decryption never propagates a cipher error: every way a fragment can be
//! unusable is a [`CorruptFragment`] variant, and callers drop that fragment.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use thiserror::Error;

use crate::keys::SymmetricKey;
use crate::{IV_SIZE, WIRE_DELIMITER};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Why an encrypted fragment could not be turned back into plaintext
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorruptFragment {
    #[error("missing ':' delimiter")]
    MissingDelimiter,

    #[error("empty IV or ciphertext field")]
    EmptyField,

    #[error("invalid base64 in {field}: {reason}")]
    BadEncoding { field: &'static str, reason: String },

    #[error("IV is {0} bytes (expected 16)")]
    BadIvLength(usize),

    #[error("decryption failed: wrong key, tampered ciphertext, or bad padding")]
    DecryptFailed,

    #[error("plaintext is not valid UTF-8")]
    NotUtf8,

    #[error("plaintext is empty")]
    EmptyPlaintext,
}

/// Encrypt one plaintext fragment under a fresh random IV.
///
/// Returns `base64(iv):base64(ciphertext)`.
pub fn encrypt_fragment(key: &SymmetricKey, plaintext: &str) -> String {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    format!(
        "{}{WIRE_DELIMITER}{}",
        STANDARD.encode(iv),
        STANDARD.encode(ciphertext)
    )
}

/// Decrypt one wire fragment.
///
/// Splits on the first `:`; either half missing or empty, undecodable base64,
/// a padding/key failure, or an empty or non-UTF-8 plaintext is a
/// [`CorruptFragment`].
pub fn decrypt_fragment(key: &SymmetricKey, wire: &str) -> Result<String, CorruptFragment> {
    let (iv_b64, ct_b64) = wire
        .split_once(WIRE_DELIMITER)
        .ok_or(CorruptFragment::MissingDelimiter)?;
    if iv_b64.is_empty() || ct_b64.is_empty() {
        return Err(CorruptFragment::EmptyField);
    }

    let iv = STANDARD
        .decode(iv_b64)
        .map_err(|e| CorruptFragment::BadEncoding {
            field: "IV",
            reason: e.to_string(),
        })?;
    let iv: [u8; IV_SIZE] = iv
        .try_into()
        .map_err(|v: Vec<u8>| CorruptFragment::BadIvLength(v.len()))?;
    let ciphertext = STANDARD
        .decode(ct_b64)
        .map_err(|e| CorruptFragment::BadEncoding {
            field: "ciphertext",
            reason: e.to_string(),
        })?;

    let plaintext = Aes256CbcDec::new(key.as_bytes().into(), (&iv).into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CorruptFragment::DecryptFailed)?;

    if plaintext.is_empty() {
        return Err(CorruptFragment::EmptyPlaintext);
    }
    String::from_utf8(plaintext).map_err(|_| CorruptFragment::NotUtf8)
}
