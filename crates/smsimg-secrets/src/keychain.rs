//! Platform keychain backend.
//!
//! Uses the `keyring` crate for cross-platform access:
//! - macOS: Keychain Services
//! - Linux: GNOME Keyring / Secret Service (D-Bus)
//! - Windows: Credential Manager (DPAPI)

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::backend::SecretBackend;

/// Secrets stored as keychain entries under one service name.
pub struct KeychainBackend {
    service: String,
}

impl KeychainBackend {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
            .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))
    }
}

impl SecretBackend for KeychainBackend {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn get(&self, name: &str) -> Result<Option<SecretString>> {
        match self.entry(name)?.get_password() {
            Ok(mut password) => {
                let secret = SecretString::from(password.clone());
                password.zeroize();
                Ok(Some(secret))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("keychain get for '{name}': {e}")),
        }
    }

    fn set(&self, name: &str, secret: &SecretString) -> Result<()> {
        self.entry(name)?
            .set_password(secret.expose_secret())
            .map_err(|e| anyhow::anyhow!("keychain store for '{name}': {e}"))?;
        tracing::debug!(key = name, service = %self.service, "stored secret in platform keychain");
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.entry(name)?.delete_credential() {
            Ok(()) => {
                tracing::debug!(key = name, "deleted secret from platform keychain");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("keychain delete for '{name}': {e}")),
        }
    }
}
