use thiserror::Error;

use crate::models::{DisposalItemId, DisposalStatus, PickupId, PickupStatus};

// Every error here is `Clone` so a single in-flight result can be handed to
// all callers waiting on it.

/// QR identity errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QrError {
    #[error("QR generation failed for disposal item {item_id}: {reason}")]
    GenerationFailed {
        item_id: DisposalItemId,
        reason: String,
    },

    #[error("Invalid QR request: {0}")]
    InvalidRequest(String),
}

/// Disposal item lifecycle errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("State conflict on disposal item {item_id}: expected {expected}, found {actual}")]
    StateConflict {
        item_id: DisposalItemId,
        expected: DisposalStatus,
        actual: DisposalStatus,
    },

    #[error("Disposal item {0} is being included in another pickup request")]
    ItemBusy(DisposalItemId),

    #[error("Unknown disposal item {0}")]
    UnknownItem(DisposalItemId),
}

/// What the scanning view should do after a failed confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Show a transient message and resume scanning right away
    ResumeImmediately,
    /// Show a blocking alert; resume once the operator acknowledges it
    AwaitAcknowledgement,
}

/// Scan confirmation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    #[error("Code does not belong to any known disposal item: {0}")]
    UnknownCode(String),

    #[error("Code has already been processed")]
    AlreadyProcessed { disposal_item_id: Option<DisposalItemId> },

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Malformed response: {0}")]
    ProtocolError(String),

    #[error("Disposal item state conflict: {0}")]
    StateConflict(String),
}

impl ConfirmError {
    /// Only transport failures are worth rescanning the same code for
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConfirmError::NetworkFailure(_))
    }

    pub fn resume_policy(&self) -> ResumePolicy {
        if self.is_retryable() {
            ResumePolicy::ResumeImmediately
        } else {
            ResumePolicy::AwaitAcknowledgement
        }
    }
}

/// Pickup request errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PickupError {
    #[error("Invalid transition for pickup {pickup_id}: {from} -> {to}")]
    InvalidTransition {
        pickup_id: PickupId,
        from: PickupStatus,
        to: PickupStatus,
    },

    #[error("Unknown pickup request {0}")]
    UnknownPickup(PickupId),

    #[error("Invalid pickup request: {0}")]
    InvalidRequest(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Malformed response: {0}")]
    ProtocolError(String),

    #[error("Rejected by server: {0}")]
    Rejected(String),
}

impl PickupError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PickupError::NetworkFailure(_))
    }
}

impl From<LifecycleError> for PickupError {
    fn from(err: LifecycleError) -> Self {
        PickupError::StateConflict(err.to_string())
    }
}

impl From<LifecycleError> for ConfirmError {
    fn from(err: LifecycleError) -> Self {
        ConfirmError::StateConflict(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_error_classification() {
        assert!(ConfirmError::NetworkFailure("timeout".into()).is_retryable());
        assert_eq!(
            ConfirmError::NetworkFailure("timeout".into()).resume_policy(),
            ResumePolicy::ResumeImmediately
        );

        for terminal in [
            ConfirmError::UnknownCode("x".into()),
            ConfirmError::AlreadyProcessed {
                disposal_item_id: Some(1),
            },
            ConfirmError::ProtocolError("bad".into()),
            ConfirmError::StateConflict("conflict".into()),
        ] {
            assert!(!terminal.is_retryable());
            assert_eq!(terminal.resume_policy(), ResumePolicy::AwaitAcknowledgement);
        }
    }
}
