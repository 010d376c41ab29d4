//! smsimg-secrets: persistence and lifecycle of the installation's symmetric key
//!
//! Backends (selected by `[keystore] backend`):
//!   - `keychain`: platform keychain via the `keyring` crate
//!   - `file`: JSON map of entry → base64 key, mode 0600
//!   - `memory`: process-local map (tests, throwaway runs)
//!
//! [`KeyStore`] loads or creates the key exactly once per process and falls
//! back to an unpersisted key when the backend faults.

pub mod backend;
pub mod keychain;
pub mod keystore;

pub use backend::{FileBackend, MemoryBackend, SecretBackend};
pub use keychain::KeychainBackend;
pub use keystore::{KeySource, KeyStore, ResolvedKey};

use smsimg_core::config::{expand_tilde, KeyBackendKind, KeyStoreConfig};
use std::sync::Arc;

/// Build the backend named in the config.
pub fn build_backend(config: &KeyStoreConfig) -> anyhow::Result<Arc<dyn SecretBackend>> {
    let backend: Arc<dyn SecretBackend> = match config.backend {
        KeyBackendKind::Keychain => Arc::new(KeychainBackend::new(&config.service)),
        KeyBackendKind::File => {
            let path = config
                .key_file
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("keystore.key_file is required for the file backend"))?;
            Arc::new(FileBackend::new(expand_tilde(path)))
        }
        KeyBackendKind::Memory => Arc::new(MemoryBackend::default()),
    };
    tracing::debug!(backend = backend.name(), "selected key backend");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_file_backend_requires_path() {
        let config = KeyStoreConfig {
            backend: KeyBackendKind::File,
            ..Default::default()
        };
        assert!(build_backend(&config).is_err());
    }

    #[test]
    fn test_build_backends() {
        let memory = build_backend(&KeyStoreConfig {
            backend: KeyBackendKind::Memory,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(memory.name(), "memory");

        let file = build_backend(&KeyStoreConfig {
            backend: KeyBackendKind::File,
            key_file: Some("/tmp/smsimg-test.key".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(file.name(), "file");
    }
}
