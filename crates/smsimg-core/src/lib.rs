pub mod config;
pub mod error;
pub mod types;

pub use config::SmsimgConfig;
pub use error::{SmsimgError, SmsimgResult};
pub use types::{Caveat, FailureKind, TransferState};
