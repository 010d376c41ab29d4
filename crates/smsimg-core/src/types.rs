use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage a single transfer has reached.
///
/// ```text
/// Idle → Compressing → Encrypting → Transmitting(0..=N of N) → Reconstructing → Done
///            └──────────────┴───────────────┴────────────────────────┴────────→ Failed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Idle,
    Compressing,
    /// Splitting into fragments and encrypting every fragment.
    Encrypting,
    /// `sent` fragments of `total` delivered so far
    Transmitting { sent: usize, total: usize },
    Reconstructing,
    Done,
    Failed(FailureKind),
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Done | TransferState::Failed(_))
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Stages are never skipped or re-entered; `Failed` is reachable from any
    /// non-terminal state.
    pub fn can_advance_to(&self, next: &TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Idle, Compressing) => true,
            (Compressing, Encrypting) => true,
            (Encrypting, Transmitting { sent: 0, .. }) => true,
            (Transmitting { sent: a, total: t }, Transmitting { sent: b, total: u }) => {
                t == u && *b == a + 1 && b <= u
            }
            (Transmitting { sent, total }, Reconstructing) => sent == total,
            (Reconstructing, Done) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Short stage label used in failure reports.
    pub fn label(&self) -> &'static str {
        match self {
            TransferState::Idle => "idle",
            TransferState::Compressing => "compressing",
            TransferState::Encrypting => "chunking+encrypting",
            TransferState::Transmitting { .. } => "transmitting",
            TransferState::Reconstructing => "reconstructing",
            TransferState::Done => "done",
            TransferState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Transmitting { sent, total } => {
                write!(f, "transmitting ({sent} of {total})")
            }
            TransferState::Failed(kind) => write!(f, "failed ({kind})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Why a transfer (or one of its stages) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    DecodeFault,
    StorageFault,
    CorruptFragment,
    NoUsableFragments,
    MissingFragments,
    Cancelled,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::DecodeFault => "decode-fault",
            FailureKind::StorageFault => "storage-fault",
            FailureKind::CorruptFragment => "corrupt-fragment",
            FailureKind::NoUsableFragments => "no-usable-fragments",
            FailureKind::MissingFragments => "missing-fragments",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A condition the transfer survived but the caller should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "caveat", rename_all = "kebab-case")]
pub enum Caveat {
    /// Compressor could not reach the byte budget; the smallest payload was sent.
    BudgetExceeded { decoded_size: usize, target: usize },
    /// Key storage faulted; the key lives only in this process.
    EphemeralKey,
    /// Fragments that failed to decrypt or parse and were skipped.
    FragmentsDropped { count: usize },
    /// Best-effort reassembly concatenated around missing indices.
    GapsTolerated { missing: Vec<usize> },
    /// Fragment count is above the advisory maximum.
    TooManyFragments { count: usize, max: usize },
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caveat::BudgetExceeded {
                decoded_size,
                target,
            } => write!(f, "payload {decoded_size} bytes exceeds budget of {target}"),
            Caveat::EphemeralKey => f.write_str("encryption key is not persisted"),
            Caveat::FragmentsDropped { count } => write!(f, "{count} fragment(s) dropped"),
            Caveat::GapsTolerated { missing } => {
                write!(f, "reassembled around missing fragments {missing:?}")
            }
            Caveat::TooManyFragments { count, max } => {
                write!(f, "{count} fragments exceeds the advisory limit of {max}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            TransferState::Idle,
            TransferState::Compressing,
            TransferState::Encrypting,
            TransferState::Transmitting { sent: 0, total: 2 },
            TransferState::Transmitting { sent: 1, total: 2 },
            TransferState::Transmitting { sent: 2, total: 2 },
            TransferState::Reconstructing,
            TransferState::Done,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_advance_to(&pair[1]),
                "{} -> {} must be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        assert!(!TransferState::Idle.can_advance_to(&TransferState::Encrypting));
        assert!(!TransferState::Compressing.can_advance_to(&TransferState::Reconstructing));
        assert!(!TransferState::Transmitting { sent: 1, total: 3 }
            .can_advance_to(&TransferState::Reconstructing));
        assert!(!TransferState::Transmitting { sent: 0, total: 3 }
            .can_advance_to(&TransferState::Transmitting { sent: 2, total: 3 }));
        assert!(!TransferState::Reconstructing.can_advance_to(&TransferState::Compressing));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let failed = TransferState::Failed(FailureKind::DecodeFault);
        assert!(!TransferState::Done.can_advance_to(&failed));
        assert!(!failed.can_advance_to(&TransferState::Idle));
        assert!(!failed.can_advance_to(&TransferState::Failed(FailureKind::Cancelled)));
    }

    #[test]
    fn test_failure_reachable_from_every_active_stage() {
        let fail = TransferState::Failed(FailureKind::StorageFault);
        for s in [
            TransferState::Compressing,
            TransferState::Encrypting,
            TransferState::Transmitting { sent: 1, total: 4 },
            TransferState::Reconstructing,
        ] {
            assert!(s.can_advance_to(&fail), "{s} -> failed");
        }
    }

    #[test]
    fn test_empty_transfer_reaches_reconstructing() {
        let t = TransferState::Transmitting { sent: 0, total: 0 };
        assert!(TransferState::Encrypting.can_advance_to(&t));
        assert!(t.can_advance_to(&TransferState::Reconstructing));
    }

    #[test]
    fn test_caveat_serializes_tagged() {
        let out = toml::to_string(&Caveat::FragmentsDropped { count: 2 }).unwrap();
        assert!(out.contains("caveat = \"fragments-dropped\""));
        assert!(out.contains("count = 2"));
    }
}
