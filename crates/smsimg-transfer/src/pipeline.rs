//! End-to-end transfer: compress → fragment → encrypt → transmit → reassemble.
//!
//! One [`TransferPipeline`] can run many transfers; each run owns its own
//! [`StateTracker`] and either returns a [`TransferReport`] (possibly with
//! caveats) or a [`TransferFailure`] naming the stage that failed.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use smsimg_codec::{compress_to_budget, split_payload, Compressed};
use smsimg_core::config::{CompressConfig, FragmentConfig, SmsimgConfig};
use smsimg_core::{Caveat, FailureKind, SmsimgError, SmsimgResult, TransferState};
use smsimg_secrets::KeyStore;

use crate::reassembly::{encrypt_all, reassemble, Reassembled};
use crate::state::StateTracker;
use crate::store::{Artifact, ArtifactStore};
use crate::transport::Transport;

/// Something observable that happened during a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The transfer entered a new stage.
    Stage(TransferState),
    FragmentSent { index: usize, total: usize },
    /// `received` wire fragments have arrived so far.
    FragmentReceived { received: usize },
    FragmentDropped { position: usize, reason: String },
}

/// Observer callback, called synchronously on the transfer's task
pub type EventFn = Box<dyn Fn(&TransferEvent) + Send + Sync>;

/// A completed transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub artifact: Artifact,
    /// Decoded size of the compressed image in bytes
    pub compressed_size: usize,
    /// base64 characters sent
    pub payload_len: usize,
    pub width: u32,
    pub quality: f64,
    pub fragments: usize,
    pub key_fingerprint: String,
    pub caveats: Vec<Caveat>,
    /// Stages entered, `Idle` through `Done`
    #[serde(skip)]
    pub stages: Vec<TransferState>,
}

/// A transfer that ended in `Failed`
#[derive(Debug, Clone, Error)]
#[error("transfer failed while {stage}: {message}")]
pub struct TransferFailure {
    pub kind: FailureKind,
    /// Stage that was active when the failure happened
    pub stage: TransferState,
    pub message: String,
}

/// Where the image to transfer comes from
enum Source<'a> {
    Bytes(Vec<u8>),
    File(&'a Path),
}

pub struct TransferPipeline {
    keystore: Arc<KeyStore>,
    store: ArtifactStore,
    compress: CompressConfig,
    fragments: FragmentConfig,
    observer: Option<EventFn>,
    cancel: CancellationToken,
}

impl TransferPipeline {
    pub fn new(keystore: Arc<KeyStore>, store: ArtifactStore, config: &SmsimgConfig) -> Self {
        Self {
            keystore,
            store,
            compress: config.compress.clone(),
            fragments: config.fragments.clone(),
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: EventFn) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Cancellation is checked between stages and between fragment sends.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Transfer the image file at `path`. An unreadable file is a decode fault.
    pub async fn send_file<T: Transport>(
        &self,
        path: &Path,
        transport: T,
    ) -> Result<TransferReport, TransferFailure> {
        self.run(Source::File(path), transport).await
    }

    /// Transfer raw image bytes.
    pub async fn send_bytes<T: Transport>(
        &self,
        source: Vec<u8>,
        transport: T,
    ) -> Result<TransferReport, TransferFailure> {
        self.run(Source::Bytes(source), transport).await
    }

    async fn run<T: Transport>(
        &self,
        source: Source<'_>,
        transport: T,
    ) -> Result<TransferReport, TransferFailure> {
        let mut tracker = StateTracker::default();
        match self.stages(&mut tracker, source, transport).await {
            Ok(report) => Ok(report),
            Err(e) => Err(self.fail(&mut tracker, e)),
        }
    }

    async fn stages<T: Transport>(
        &self,
        tracker: &mut StateTracker,
        source: Source<'_>,
        mut transport: T,
    ) -> SmsimgResult<TransferReport> {
        let mut caveats = Vec::new();

        // ── Compress ────────────────────────────────────────────────────────
        self.enter(tracker, TransferState::Compressing)?;
        let source = match source {
            Source::Bytes(bytes) => bytes,
            // Reading the selection is part of the compress stage.
            Source::File(path) => tokio::fs::read(path)
                .await
                .map_err(|e| SmsimgError::Decode(format!("reading {}: {e}", path.display())))?,
        };
        let cfg = self.compress.clone();
        let compressed: Compressed =
            tokio::task::spawn_blocking(move || compress_to_budget(&source, &cfg))
                .await
                .map_err(|e| SmsimgError::Other(anyhow::anyhow!("compress task failed: {e}")))??;
        caveats.extend(compressed.caveat());

        // ── Fragment + encrypt ──────────────────────────────────────────────
        self.enter(tracker, TransferState::Encrypting)?;
        let resolved = self.keystore.resolve().await;
        if resolved.source.is_ephemeral() {
            caveats.push(Caveat::EphemeralKey);
        }
        let key = resolved.key.clone();

        let fragments = split_payload(
            &compressed.payload,
            self.fragments.chunk_size,
            self.fragments.max_fragments,
        );
        let total = fragments.len();
        if total > self.fragments.max_fragments {
            caveats.push(Caveat::TooManyFragments {
                count: total,
                max: self.fragments.max_fragments,
            });
        }

        let parallel = self.fragments.parallel;
        let encrypt_key = key.clone();
        let wires = tokio::task::spawn_blocking(move || encrypt_all(&encrypt_key, &fragments, parallel))
            .await
            .map_err(|e| SmsimgError::Other(anyhow::anyhow!("encrypt task failed: {e}")))?;

        // ── Transmit ────────────────────────────────────────────────────────
        self.enter(tracker, TransferState::Transmitting { sent: 0, total })?;
        let mut received = Vec::with_capacity(total);
        for (index, wire) in wires.into_iter().enumerate() {
            self.check_cancelled()?;
            transport.send(wire).await?;
            self.emit(TransferEvent::FragmentSent { index, total });
            while let Some(wire) = transport.try_recv() {
                self.receive(&mut received, wire);
            }
            tracker.advance(TransferState::Transmitting {
                sent: index + 1,
                total,
            })?;
        }
        transport.finish();

        while let Some(wire) = transport.recv().await {
            self.receive(&mut received, wire);
        }
        info!(sent = total, received = received.len(), "transmission complete");

        // ── Reconstruct ─────────────────────────────────────────────────────
        self.enter(tracker, TransferState::Reconstructing)?;
        let Reassembled {
            artifact,
            dropped,
            missing,
            ..
        } = reassemble(
            &key,
            received,
            self.fragments.reassembly,
            parallel,
            &self.store,
        )
        .await?;

        for d in &dropped {
            self.emit(TransferEvent::FragmentDropped {
                position: d.position,
                reason: d.reason.clone(),
            });
        }
        if !dropped.is_empty() {
            caveats.push(Caveat::FragmentsDropped {
                count: dropped.len(),
            });
        }
        if !missing.is_empty() {
            caveats.push(Caveat::GapsTolerated { missing });
        }

        self.enter(tracker, TransferState::Done)?;
        for caveat in &caveats {
            warn!(%caveat, "transfer completed with caveat");
        }
        info!(
            artifact = %artifact.name,
            fragments = total,
            caveats = caveats.len(),
            "transfer done"
        );

        Ok(TransferReport {
            artifact,
            compressed_size: compressed.decoded_size(),
            payload_len: compressed.payload.len(),
            width: compressed.width,
            quality: compressed.quality,
            fragments: total,
            key_fingerprint: key.fingerprint(),
            caveats,
            stages: tracker.history().to_vec(),
        })
    }

    fn enter(&self, tracker: &mut StateTracker, next: TransferState) -> SmsimgResult<()> {
        self.check_cancelled()?;
        tracker.advance(next.clone())?;
        self.emit(TransferEvent::Stage(next));
        Ok(())
    }

    fn receive(&self, received: &mut Vec<String>, wire: String) {
        received.push(wire);
        self.emit(TransferEvent::FragmentReceived {
            received: received.len(),
        });
    }

    fn check_cancelled(&self) -> SmsimgResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SmsimgError::Cancelled);
        }
        Ok(())
    }

    fn fail(&self, tracker: &mut StateTracker, err: SmsimgError) -> TransferFailure {
        let kind = err.kind();
        let stage = tracker.fail(kind);
        warn!(stage = %stage, kind = %kind, error = %err, "transfer failed");
        self.emit(TransferEvent::Stage(tracker.current().clone()));
        TransferFailure {
            kind,
            stage,
            message: err.to_string(),
        }
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(cb) = &self.observer {
            cb(&event);
        }
    }
}
