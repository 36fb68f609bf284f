//! Error taxonomy for the synchronization core.
//!
//! Three kinds of failure exist and each one travels differently:
//!
//! | Kind | Who hears about it |
//! |------|--------------------|
//! | [`SyncError::ValidationFailed`] | the caller, via an `error` event |
//! | [`SyncError::MirrorUnavailable`] | the log only |
//! | [`SyncError::InternalFault`] | the caller, as a generic `error` event |

use thiserror::Error;

use crate::storage::MirrorError;

/// Caller-visible validation messages.
pub const USERNAME_REQUIRED: &str = "Username is required";
pub const USERNAME_TOO_LONG: &str = "Username must be at most 20 characters";
pub const ROOM_ID_REQUIRED: &str = "Room ID is required";
pub const ALREADY_IN_ROOM: &str = "Already in a room";
pub const NOT_IN_ROOM: &str = "Not in a room";
pub const MALFORMED_MESSAGE: &str = "Malformed message";

/// Generic messages substituted for internal faults.
pub const CREATE_FAILED: &str = "Failed to create room";
pub const JOIN_FAILED: &str = "Failed to join room";

/// Errors raised while handling participant actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Missing or empty username / room id. No state was changed.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The durable mirror could not be reached or rejected a write.
    #[error("mirror unavailable: {0}")]
    MirrorUnavailable(String),

    /// Unexpected failure during room or user bookkeeping.
    #[error("internal fault: {0}")]
    InternalFault(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalFault(message.into())
    }

    /// Text sent to the caller in an `error` event.
    ///
    /// Validation messages pass through verbatim; internal faults are
    /// replaced by `fallback` so bookkeeping details never leak.
    pub fn caller_message(&self, fallback: &str) -> String {
        match self {
            SyncError::ValidationFailed(message) => message.clone(),
            SyncError::MirrorUnavailable(_) | SyncError::InternalFault(_) => fallback.to_string(),
        }
    }
}

impl From<MirrorError> for SyncError {
    fn from(e: MirrorError) -> Self {
        Self::MirrorUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_passes_through() {
        let err = SyncError::validation(USERNAME_REQUIRED);
        assert_eq!(err.caller_message(JOIN_FAILED), USERNAME_REQUIRED);
    }

    #[test]
    fn test_internal_fault_is_masked() {
        let err = SyncError::internal("member map out of sync");
        assert_eq!(err.caller_message(JOIN_FAILED), "Failed to join room");
        assert_eq!(err.to_string(), "internal fault: member map out of sync");
    }

    #[test]
    fn test_mirror_errors_stay_out_of_caller_messages() {
        let err = SyncError::from(MirrorError::Unavailable("connection refused".into()));
        assert!(matches!(err, SyncError::MirrorUnavailable(_)));
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(err.caller_message(JOIN_FAILED), JOIN_FAILED);
    }
}
