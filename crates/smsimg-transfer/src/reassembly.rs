//! Receiver side: decrypt, order, rejoin, decode, persist.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use smsimg_codec::{join_fragments, Fragment, Joined};
use smsimg_core::config::ReassemblyMode;
use smsimg_core::{SmsimgError, SmsimgResult};
use smsimg_crypto::{decrypt_fragment, encrypt_fragment, SymmetricKey};

use crate::store::{Artifact, ArtifactStore};

/// A received wire fragment that could not be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedFragment {
    /// Position in the received list
    pub position: usize,
    pub reason: String,
}

/// Outcome of a successful reassembly
#[derive(Debug, Clone)]
pub struct Reassembled {
    pub artifact: Artifact,
    pub total: usize,
    pub dropped: Vec<DroppedFragment>,
    /// Indices concatenated around (best-effort mode only)
    pub missing: Vec<usize>,
    pub duplicates: usize,
}

/// Encrypt every frame in order, on the rayon pool when `parallel`.
pub fn encrypt_all(key: &SymmetricKey, fragments: &[Fragment], parallel: bool) -> Vec<String> {
    if parallel {
        fragments
            .par_iter()
            .map(|f| encrypt_fragment(key, &f.to_frame()))
            .collect()
    } else {
        fragments
            .iter()
            .map(|f| encrypt_fragment(key, &f.to_frame()))
            .collect()
    }
}

/// Decrypt and parse every received wire fragment.
///
/// Unusable fragments are logged and returned separately instead of failing
/// the batch.
pub fn decrypt_all(
    key: &SymmetricKey,
    wires: &[String],
    parallel: bool,
) -> (Vec<Fragment>, Vec<DroppedFragment>) {
    let open = |(position, wire): (usize, &String)| {
        decrypt_fragment(key, wire)
            .map_err(|e| e.to_string())
            .and_then(|frame| Fragment::parse_frame(&frame).map_err(|e| e.to_string()))
            .map_err(|reason| DroppedFragment { position, reason })
    };
    let results: Vec<Result<Fragment, DroppedFragment>> = if parallel {
        wires.par_iter().enumerate().map(open).collect()
    } else {
        wires.iter().enumerate().map(open).collect()
    };

    let mut fragments = Vec::with_capacity(results.len());
    let mut dropped = Vec::new();
    for r in results {
        match r {
            Ok(f) => fragments.push(f),
            Err(d) => {
                warn!(position = d.position, reason = %d.reason, "dropping unusable fragment");
                dropped.push(d);
            }
        }
    }
    (fragments, dropped)
}

/// Turn received wire fragments back into a persisted image.
///
/// Fails with `NoUsableFragments` when nothing decrypts, `MissingFragments`
/// on gaps in strict mode, `Decode` when the rejoined text is not base64, and
/// `Storage` when the write faults. No file is written on failure.
pub async fn reassemble(
    key: &SymmetricKey,
    wires: Vec<String>,
    mode: ReassemblyMode,
    parallel: bool,
    store: &ArtifactStore,
) -> SmsimgResult<Reassembled> {
    let received = wires.len();
    let key = key.clone();
    let (fragments, dropped) =
        tokio::task::spawn_blocking(move || decrypt_all(&key, &wires, parallel))
            .await
            .map_err(|e| SmsimgError::Other(anyhow::anyhow!("decrypt task failed: {e}")))?;

    if fragments.is_empty() {
        return Err(SmsimgError::NoUsableFragments {
            dropped: dropped.len(),
        });
    }
    debug!(received, usable = fragments.len(), "decrypted fragments");

    let Joined {
        payload,
        total,
        missing,
        duplicates,
        ..
    } = join_fragments(fragments, mode)?;
    if !missing.is_empty() {
        warn!(?missing, total, "reassembling around missing fragments");
    }

    let bytes = payload.decode()?;
    let artifact = store.persist(bytes).await?;
    info!(
        name = %artifact.name,
        total,
        dropped = dropped.len(),
        "reassembled image"
    );

    Ok(Reassembled {
        artifact,
        total,
        dropped,
        missing,
        duplicates,
    })
}
