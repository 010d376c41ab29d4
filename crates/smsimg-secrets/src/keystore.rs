//! One-shot load-or-create of the installation's symmetric key

use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use smsimg_core::config::KeyStoreConfig;
use smsimg_crypto::{generate_key, SymmetricKey};

use crate::backend::SecretBackend;

/// Where the process's key came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Read from the backend
    Loaded,
    /// Generated on first use and persisted
    Generated,
    /// Generated after a storage fault; lost when the process exits
    Ephemeral { reason: String },
}

impl KeySource {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, KeySource::Ephemeral { .. })
    }
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Loaded => write!(f, "loaded"),
            KeySource::Generated => write!(f, "generated"),
            KeySource::Ephemeral { reason } => write!(f, "ephemeral ({reason})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: SymmetricKey,
    pub source: KeySource,
}

/// Owns the installation key and its single initialization gate.
///
/// Concurrent first callers all await the same initialization, so at most
/// one key is generated and at most one write reaches the backend.
pub struct KeyStore {
    backend: Arc<dyn SecretBackend>,
    entry: String,
    cell: OnceCell<ResolvedKey>,
}

impl KeyStore {
    pub fn new(backend: Arc<dyn SecretBackend>, entry: impl Into<String>) -> Self {
        Self {
            backend,
            entry: entry.into(),
            cell: OnceCell::new(),
        }
    }

    pub fn from_config(config: &KeyStoreConfig) -> anyhow::Result<Self> {
        let backend = crate::build_backend(config)?;
        Ok(Self::new(backend, config.entry.clone()))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The installation key. Never fails: storage faults yield an
    /// unpersisted key for this process.
    pub async fn get_key(&self) -> SymmetricKey {
        self.resolve().await.key.clone()
    }

    /// The installation key together with its provenance.
    pub async fn resolve(&self) -> &ResolvedKey {
        self.cell
            .get_or_init(|| async {
                let backend = Arc::clone(&self.backend);
                let entry = self.entry.clone();
                match tokio::task::spawn_blocking(move || load_or_create(backend.as_ref(), &entry))
                    .await
                {
                    Ok(resolved) => resolved,
                    Err(e) => ephemeral(format!("key init task failed: {e}")),
                }
            })
            .await
    }

    /// Delete the persisted key and forget the cached one. The next
    /// `get_key` generates a new key; anything encrypted under the old one
    /// becomes undecryptable.
    pub async fn reset(&mut self) -> anyhow::Result<()> {
        let backend = Arc::clone(&self.backend);
        let entry = self.entry.clone();
        tokio::task::spawn_blocking(move || backend.delete(&entry)).await??;
        self.cell = OnceCell::new();
        info!(entry = %self.entry, backend = self.backend.name(), "deleted persisted key");
        Ok(())
    }
}

/// Blocking body of the initialization gate.
fn load_or_create(backend: &dyn SecretBackend, entry: &str) -> ResolvedKey {
    match backend.get(entry) {
        Ok(Some(stored)) => match SymmetricKey::from_base64(stored.expose_secret()) {
            Ok(key) => {
                info!(
                    entry,
                    backend = backend.name(),
                    fingerprint = %key.fingerprint(),
                    "loaded persisted key"
                );
                ResolvedKey {
                    key,
                    source: KeySource::Loaded,
                }
            }
            Err(e) => ephemeral(format!("persisted key unreadable: {e}")),
        },
        Ok(None) => {
            let key = generate_key();
            match backend.set(entry, &key.to_base64()) {
                Ok(()) => {
                    info!(
                        entry,
                        backend = backend.name(),
                        fingerprint = %key.fingerprint(),
                        "generated and persisted new key"
                    );
                    ResolvedKey {
                        key,
                        source: KeySource::Generated,
                    }
                }
                Err(e) => {
                    let reason = format!("key write failed: {e:#}");
                    warn!(entry, %reason, "using unpersisted key for this run");
                    ResolvedKey {
                        key,
                        source: KeySource::Ephemeral { reason },
                    }
                }
            }
        }
        Err(e) => ephemeral(format!("key read failed: {e:#}")),
    }
}

fn ephemeral(reason: String) -> ResolvedKey {
    warn!(%reason, "using unpersisted key for this run");
    ResolvedKey {
        key: generate_key(),
        source: KeySource::Ephemeral { reason },
    }
}
