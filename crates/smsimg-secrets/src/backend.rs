//! Named-secret storage backends

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A store of named string secrets.
///
/// Calls may block (keychain IPC, disk); async callers go through
/// `spawn_blocking`.
pub trait SecretBackend: Send + Sync {
    /// Short backend identifier for logs.
    fn name(&self) -> &'static str;
    /// Read a secret; `Ok(None)` when the entry does not exist.
    fn get(&self, entry: &str) -> Result<Option<SecretString>>;
    /// Create or overwrite a secret.
    fn set(&self, entry: &str, secret: &SecretString) -> Result<()>;
    /// Remove a secret; deleting a missing entry is not an error.
    fn delete(&self, entry: &str) -> Result<()>;
}

// ── In-memory backend ────────────────────────────────────────────────────────

/// Process-local secret map. Clones share the same map, so two stores built
/// from clones behave like two process runs over one persistent store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    entries: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    /// Make every subsequent `get` fault.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `set` fault.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Store a raw value, bypassing fault injection.
    pub fn insert_raw(&self, entry: &str, value: &str) {
        if let Ok(mut map) = self.inner.entries.lock() {
            map.insert(entry.to_string(), value.to_string());
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.inner
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory secret store poisoned"))
    }
}

impl SecretBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, entry: &str) -> Result<Option<SecretString>> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            anyhow::bail!("memory store read fault for '{entry}'");
        }
        Ok(self.entries()?.get(entry).cloned().map(SecretString::from))
    }

    fn set(&self, entry: &str, secret: &SecretString) -> Result<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("memory store write fault for '{entry}'");
        }
        self.entries()?
            .insert(entry.to_string(), secret.expose_secret().to_string());
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, entry: &str) -> Result<()> {
        self.entries()?.remove(entry);
        Ok(())
    }
}

// ── Key file backend ─────────────────────────────────────────────────────────

/// JSON object of `entry → secret` in a single file (mode 0600 on Unix).
///
/// Writes go to a sibling temp file and are renamed into place.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading key file: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing key file: {}", self.path.display()))
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating key dir: {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("writing key file: {}", tmp.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("chmod 600: {}", tmp.display()))?;
        }

        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing key file: {}", self.path.display()))?;
        Ok(())
    }
}

impl SecretBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, entry: &str) -> Result<Option<SecretString>> {
        Ok(self.load()?.remove(entry).map(SecretString::from))
    }

    fn set(&self, entry: &str, secret: &SecretString) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(entry.to_string(), secret.expose_secret().to_string());
        self.store(&entries)?;
        tracing::debug!(key = entry, path = %self.path.display(), "stored secret in key file");
        Ok(())
    }

    fn delete(&self, entry: &str) -> Result<()> {
        let mut entries = self.load()?;
        if entries.remove(entry).is_some() {
            self.store(&entries)?;
        }
        Ok(())
    }
}
