//! Reconstructed-image persistence via OpenDAL.
//!
//! Artifacts are named `reconstructed_<unix-millis>.<ext>`. Each store hands
//! out strictly increasing timestamps, and a name already present in the
//! backend is skipped, so concurrent transfers never share an artifact.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use opendal::{ErrorKind, Operator};
use serde::Serialize;
use tracing::{debug, info};

use smsimg_core::config::{expand_tilde, OutputConfig};
use smsimg_core::{SmsimgError, SmsimgResult};

const ARTIFACT_PREFIX: &str = "reconstructed_";

/// A persisted reconstructed image
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    /// Object name inside the store
    pub name: String,
    /// Filesystem path when the store is directory-backed
    pub path: Option<PathBuf>,
    pub bytes: usize,
}

#[derive(Clone)]
pub struct ArtifactStore {
    op: Operator,
    root: Option<PathBuf>,
    extension: String,
    /// Last timestamp handed out, shared by clones
    last_millis: Arc<AtomicU64>,
}

impl ArtifactStore {
    /// Directory-backed store; the directory is created if missing.
    pub fn fs(dir: &Path, extension: &str) -> SmsimgResult<Self> {
        let root = expand_tilde(dir);
        let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
        let op = Operator::new(builder)
            .map_err(|e| SmsimgError::Storage(format!("opening {}: {e}", root.display())))?
            .layer(opendal::layers::LoggingLayer::default())
            .finish();
        Ok(Self {
            op,
            root: Some(root),
            extension: extension.to_string(),
            last_millis: Arc::default(),
        })
    }

    /// In-memory store (tests, dry runs).
    pub fn memory(extension: &str) -> SmsimgResult<Self> {
        let op = Operator::new(opendal::services::Memory::default())
            .map_err(|e| SmsimgError::Storage(format!("opening memory store: {e}")))?
            .finish();
        Ok(Self {
            op,
            root: None,
            extension: extension.to_string(),
            last_millis: Arc::default(),
        })
    }

    pub fn from_config(config: &OutputConfig) -> SmsimgResult<Self> {
        Self::fs(&config.dir, &config.extension)
    }

    /// Next timestamp for a name: the wall clock, or one past the last
    /// issued value when the clock has not moved on.
    fn next_millis(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let prev = self
            .last_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    /// Write `bytes` under a fresh artifact name. Existing artifacts are
    /// never overwritten.
    pub async fn persist(&self, bytes: Vec<u8>) -> SmsimgResult<Artifact> {
        let conditional = self.op.info().full_capability().write_with_if_not_exists;
        let len = bytes.len();
        let buf = opendal::Buffer::from(bytes);

        let name = loop {
            let candidate = format!("{ARTIFACT_PREFIX}{}.{}", self.next_millis(), self.extension);
            let taken = self
                .op
                .exists(&candidate)
                .await
                .map_err(|e| SmsimgError::Storage(format!("checking {candidate}: {e}")))?;
            if taken {
                debug!(name = %candidate, "artifact name taken, bumping timestamp");
                continue;
            }

            // Another process may claim the name between the check and the
            // write; backends with conditional writes catch that here.
            match self
                .op
                .write_with(&candidate, buf.clone())
                .if_not_exists(conditional)
                .await
            {
                Ok(_) => break candidate,
                Err(e) if matches!(e.kind(), ErrorKind::ConditionNotMatch | ErrorKind::AlreadyExists) => {
                    debug!(name = %candidate, "artifact name claimed concurrently, retrying");
                }
                Err(e) => {
                    return Err(SmsimgError::Storage(format!("writing {candidate}: {e}")));
                }
            }
        };

        let path = self.root.as_ref().map(|r| r.join(&name));
        info!(name = %name, bytes = len, "persisted reconstructed image");
        Ok(Artifact {
            name,
            path,
            bytes: len,
        })
    }

    /// Read an artifact back.
    pub async fn read(&self, name: &str) -> SmsimgResult<Vec<u8>> {
        let buf = self
            .op
            .read(name)
            .await
            .map_err(|e| SmsimgError::Storage(format!("reading {name}: {e}")))?;
        Ok(buf.to_vec())
    }
}
