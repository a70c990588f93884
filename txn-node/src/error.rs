//! Per-request failures and their Maelstrom error codes.

use thiserror::Error;

use crate::message::{DecodeError, Payload};

/// Maelstrom's standard error codes used by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout = 0,
    NotSupported = 10,
    TemporarilyUnavailable = 11,
    MalformedRequest = 12,
    Abort = 14,
    KeyDoesNotExist = 20,
    PreconditionFailed = 22,
    TxnConflict = 30,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether the checker may assume the operation had no effect.
    pub fn is_definite(self) -> bool {
        self != ErrorCode::Timeout
    }
}

/// Everything that can go wrong while serving one request.
///
/// None of these are fatal to the node; each becomes an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("node is not initialized yet")]
    NotInitialized,

    #[error("malformed request: {0}")]
    MalformedMessage(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("key {0} does not exist")]
    KeyNotFound(String),

    #[error("expected value {expected}, but had {actual}")]
    CasMismatch { expected: String, actual: String },

    #[error("account {account} has balance {balance}, cannot transfer {amount}")]
    InsufficientFunds {
        account: String,
        balance: i64,
        amount: i64,
    },

    #[error("transaction conflicted on all {attempts} attempts")]
    TxnConflictExhausted { attempts: u32 },

    #[error("commit outcome unknown: {0}")]
    Indeterminate(String),

    #[error("storage engine failure: {0}")]
    Storage(String),
}

impl NodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::NotInitialized => ErrorCode::TemporarilyUnavailable,
            NodeError::MalformedMessage(_) => ErrorCode::MalformedRequest,
            NodeError::UnsupportedOperation(_) => ErrorCode::NotSupported,
            NodeError::KeyNotFound(_) => ErrorCode::KeyDoesNotExist,
            NodeError::CasMismatch { .. } => ErrorCode::PreconditionFailed,
            NodeError::InsufficientFunds { .. } => ErrorCode::Abort,
            NodeError::TxnConflictExhausted { .. } => ErrorCode::TxnConflict,
            NodeError::Indeterminate(_) => ErrorCode::Timeout,
            NodeError::Storage(_) => ErrorCode::Abort,
        }
    }

    pub fn is_definite(&self) -> bool {
        self.code().is_definite()
    }

    pub fn into_payload(self) -> Payload {
        Payload::Error {
            code: self.code().as_u32(),
            text: self.to_string(),
        }
    }
}

impl From<DecodeError> for NodeError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Malformed { reason, .. } => NodeError::MalformedMessage(reason),
            DecodeError::Unsupported { kind, .. } => NodeError::UnsupportedOperation(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_maelstrom_numbering() {
        assert_eq!(NodeError::NotInitialized.code().as_u32(), 11);
        assert_eq!(NodeError::UnsupportedOperation("echo".into()).code().as_u32(), 10);
        assert_eq!(NodeError::KeyNotFound("x".into()).code().as_u32(), 20);
        assert_eq!(
            NodeError::TxnConflictExhausted { attempts: 5 }.code().as_u32(),
            30
        );
        assert_eq!(NodeError::Indeterminate("lost".into()).code().as_u32(), 0);
    }

    #[test]
    fn only_unknown_outcomes_are_indefinite() {
        assert!(!NodeError::Indeterminate("timeout".into()).is_definite());
        assert!(NodeError::TxnConflictExhausted { attempts: 3 }.is_definite());
        assert!(NodeError::CasMismatch {
            expected: "5".into(),
            actual: "6".into()
        }
        .is_definite());
    }

    #[test]
    fn error_payload_carries_code_and_text() {
        let payload = NodeError::KeyNotFound("x".into()).into_payload();
        assert_eq!(
            payload,
            Payload::Error {
                code: 20,
                text: "key x does not exist".into()
            }
        );
    }
}
