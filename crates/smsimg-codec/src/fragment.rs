//! Fixed-size fragmentation of an encoded payload
//!
//! Fragment `i` covers `[i·S, min((i+1)·S, L))` of the payload. Before
//! encryption each fragment is framed with its position:
//!
//! ```text
//! <index>/<total>#<payload text>
//! ```
//!
//! `#` is outside the base64 alphabet, so the header ends at the first `#`.
//! The receiver orders by `index` instead of trusting delivery order.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

use smsimg_core::config::ReassemblyMode;
use smsimg_core::{SmsimgError, SmsimgResult};

use crate::payload::EncodedPayload;

const HEADER_END: char = '#';
const INDEX_SEP: char = '/';

/// One bounded slice of an [`EncodedPayload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Zero-based position within the payload
    pub index: usize,
    /// Number of fragments the payload was split into
    pub total: usize,
    pub text: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no '#' header terminator")]
    MissingHeader,

    #[error("malformed frame header {0:?}")]
    BadHeader(String),

    #[error("fragment index {index} out of range for total {total}")]
    IndexOutOfRange { index: usize, total: usize },
}

impl Fragment {
    /// Plaintext frame handed to the cipher.
    pub fn to_frame(&self) -> String {
        format!("{}{INDEX_SEP}{}{HEADER_END}{}", self.index, self.total, self.text)
    }

    /// Parse a decrypted frame back into a fragment.
    pub fn parse_frame(frame: &str) -> Result<Self, FrameError> {
        let (header, text) = frame
            .split_once(HEADER_END)
            .ok_or(FrameError::MissingHeader)?;
        let (index, total) = header
            .split_once(INDEX_SEP)
            .ok_or_else(|| FrameError::BadHeader(header.to_string()))?;
        let index: usize = index
            .parse()
            .map_err(|_| FrameError::BadHeader(header.to_string()))?;
        let total: usize = total
            .parse()
            .map_err(|_| FrameError::BadHeader(header.to_string()))?;
        if index >= total {
            return Err(FrameError::IndexOutOfRange { index, total });
        }
        Ok(Self {
            index,
            total,
            text: text.to_string(),
        })
    }
}

/// Split `payload` into `ceil(len / chunk_size)` fragments, left to right.
///
/// Exceeding `max_fragments` is advisory: it is logged and every fragment is
/// still returned.
pub fn split_payload(
    payload: &EncodedPayload,
    chunk_size: usize,
    max_fragments: usize,
) -> Vec<Fragment> {
    let text = payload.as_str();
    let chunk_size = chunk_size.max(1);
    let total = text.len().div_ceil(chunk_size);

    let fragments: Vec<Fragment> = (0..total)
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(text.len());
            Fragment {
                index,
                total,
                text: text[start..end].to_string(),
            }
        })
        .collect();

    if fragments.len() > max_fragments {
        warn!(
            count = fragments.len(),
            max = max_fragments,
            "too many fragments, exceeds SMS limit"
        );
    }
    debug!(count = fragments.len(), chunk_size, "split payload");
    fragments
}

/// A rejoined payload plus what was wrong with the input set
#[derive(Debug, Clone)]
pub struct Joined {
    pub payload: EncodedPayload,
    pub total: usize,
    /// Indices in `0..total` that never arrived (always empty in strict mode)
    pub missing: Vec<usize>,
    /// Repeated indices; the first occurrence was kept
    pub duplicates: usize,
    /// Fragments whose `total` disagreed with the rest and were discarded
    pub inconsistent: usize,
}

/// Order fragments by index and concatenate them.
///
/// The transfer's `total` is the value most fragments agree on. In
/// [`ReassemblyMode::Strict`] any gap fails with
/// [`SmsimgError::MissingFragments`]; in `BestEffort` the present fragments
/// are concatenated around the gaps.
pub fn join_fragments(fragments: Vec<Fragment>, mode: ReassemblyMode) -> SmsimgResult<Joined> {
    if fragments.is_empty() {
        return Err(SmsimgError::NoUsableFragments { dropped: 0 });
    }

    let total = majority_total(&fragments);
    let mut by_index: BTreeMap<usize, String> = BTreeMap::new();
    let mut duplicates = 0;
    let mut inconsistent = 0;

    for fragment in fragments {
        if fragment.total != total {
            warn!(
                index = fragment.index,
                total = fragment.total,
                expected = total,
                "discarding fragment with inconsistent total"
            );
            inconsistent += 1;
            continue;
        }
        if by_index.contains_key(&fragment.index) {
            debug!(index = fragment.index, "duplicate fragment ignored");
            duplicates += 1;
            continue;
        }
        by_index.insert(fragment.index, fragment.text);
    }

    let missing: Vec<usize> = (0..total).filter(|i| !by_index.contains_key(i)).collect();
    if !missing.is_empty() && mode == ReassemblyMode::Strict {
        return Err(SmsimgError::MissingFragments { missing, total });
    }

    let text: String = by_index.into_values().collect();
    Ok(Joined {
        payload: EncodedPayload::from_text(text)?,
        total,
        missing,
        duplicates,
        inconsistent,
    })
}

/// Most common `total`; ties go to the larger value.
fn majority_total(fragments: &[Fragment]) -> usize {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for f in fragments {
        *counts.entry(f.total).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|&(total, count)| (count, total))
        .map(|(total, _)| total)
        .unwrap_or(0)
}
