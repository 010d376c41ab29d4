use thiserror::Error;

use crate::types::FailureKind;

pub type SmsimgResult<T> = Result<T, SmsimgError>;

#[derive(Debug, Error)]
pub enum SmsimgError {
    #[error("image decode/encode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("corrupt fragment: {0}")]
    CorruptFragment(String),

    #[error("no fragment could be decrypted ({dropped} dropped)")]
    NoUsableFragments { dropped: usize },

    #[error("missing fragments {missing:?} of {total}")]
    MissingFragments { missing: Vec<usize>, total: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SmsimgError {
    /// Coarse failure class reported to pipeline callers.
    pub fn kind(&self) -> FailureKind {
        match self {
            SmsimgError::Decode(_) => FailureKind::DecodeFault,
            SmsimgError::Storage(_) | SmsimgError::Io(_) => FailureKind::StorageFault,
            SmsimgError::CorruptFragment(_) => FailureKind::CorruptFragment,
            SmsimgError::NoUsableFragments { .. } => FailureKind::NoUsableFragments,
            SmsimgError::MissingFragments { .. } => FailureKind::MissingFragments,
            SmsimgError::Cancelled => FailureKind::Cancelled,
            SmsimgError::Config(_) | SmsimgError::Other(_) => FailureKind::Internal,
        }
    }
}
