//! smsimg-crypto: per-fragment symmetric encryption
//!
//! Every fragment is encrypted independently so loss, reordering, or
//! retransmission never reuses an IV and corruption stays within one fragment:
//!
//! ```text
//! SymmetricKey (256-bit, one per installation)
//!   └── Fragment: AES-256-CBC + PKCS#7, IV = random 128-bit per fragment
//!         wire = base64(IV) ":" base64(ciphertext)
//! ```

pub mod fragment;
pub mod keys;

pub use fragment::{decrypt_fragment, encrypt_fragment, CorruptFragment};
pub use keys::{generate_key, SymmetricKey};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a CBC initialization vector (128-bit)
pub const IV_SIZE: usize = 16;

/// Separates the IV from the ciphertext on the wire; outside the base64 alphabet
pub const WIRE_DELIMITER: char = ':';
