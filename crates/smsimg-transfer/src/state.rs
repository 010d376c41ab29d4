//! Per-transfer stage tracking.
//!
//! Wraps a [`TransferState`] and refuses any transition
//! [`TransferState::can_advance_to`] does not allow, so the pipeline cannot
//! skip or re-enter a stage.

use smsimg_core::{FailureKind, SmsimgError, SmsimgResult, TransferState};

#[derive(Debug)]
pub struct StateTracker {
    current: TransferState,
    history: Vec<TransferState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            current: TransferState::Idle,
            history: vec![TransferState::Idle],
        }
    }
}

impl StateTracker {
    pub fn current(&self) -> &TransferState {
        &self.current
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[TransferState] {
        &self.history
    }

    pub fn advance(&mut self, next: TransferState) -> SmsimgResult<()> {
        if !self.current.can_advance_to(&next) {
            return Err(SmsimgError::Other(anyhow::anyhow!(
                "illegal transfer transition: {} -> {}",
                self.current,
                next
            )));
        }
        self.history.push(next.clone());
        self.current = next;
        Ok(())
    }

    /// Move to `Failed(kind)` and return the stage that failed.
    ///
    /// A tracker that is already terminal keeps its state.
    pub fn fail(&mut self, kind: FailureKind) -> TransferState {
        let stage = self.current.clone();
        if !stage.is_terminal() {
            let failed = TransferState::Failed(kind);
            self.history.push(failed.clone());
            self.current = failed;
        }
        stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_run() {
        let mut t = StateTracker::default();
        t.advance(TransferState::Compressing).unwrap();
        t.advance(TransferState::Encrypting).unwrap();
        t.advance(TransferState::Transmitting { sent: 0, total: 2 })
            .unwrap();
        t.advance(TransferState::Transmitting { sent: 1, total: 2 })
            .unwrap();
        t.advance(TransferState::Transmitting { sent: 2, total: 2 })
            .unwrap();
        t.advance(TransferState::Reconstructing).unwrap();
        t.advance(TransferState::Done).unwrap();
        assert_eq!(t.history().len(), 8);
        assert!(t.current().is_terminal());
    }

    #[test]
    fn test_rejects_skipped_stage() {
        let mut t = StateTracker::default();
        t.advance(TransferState::Compressing).unwrap();
        assert!(t.advance(TransferState::Reconstructing).is_err());
        assert_eq!(t.current(), &TransferState::Compressing);
    }

    #[test]
    fn test_fail_records_stage() {
        let mut t = StateTracker::default();
        t.advance(TransferState::Compressing).unwrap();
        let stage = t.fail(FailureKind::DecodeFault);
        assert_eq!(stage, TransferState::Compressing);
        assert_eq!(
            t.current(),
            &TransferState::Failed(FailureKind::DecodeFault)
        );
        assert!(t.advance(TransferState::Encrypting).is_err());
    }
}
