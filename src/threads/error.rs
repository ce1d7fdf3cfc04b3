//! Typed failures of a reconciliation pass.
//!
//! Every variant aborts the batch's transaction; none of them leaves partial
//! writes behind. Callers branch on [`ReconcileError::kind`].

use thiserror::Error;

/// Coarse classification used by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Referential,
    Consistency,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Referential => "referential",
            ErrorKind::Consistency => "consistency",
            ErrorKind::Storage => "storage",
        }
    }
}

/// The proposal is malformed or internally inconsistent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proposal is not valid JSON: {0}")]
    MalformedProposal(String),

    #[error("expected {expected} assignments, got {actual}")]
    AssignmentCountMismatch { expected: usize, actual: usize },

    #[error("assignment index {index} is out of range for {len} nodes")]
    AssignmentIndexOutOfRange { index: usize, len: usize },

    #[error("node {index} is assigned more than once")]
    DuplicateAssignment { index: usize },

    #[error("node {index} has no assignment")]
    MissingAssignment { index: usize },

    #[error("new thread #{thread} lists no nodes")]
    EmptyNewThread { thread: usize },

    #[error("new thread #{thread} references node {index}, out of range for {len} nodes")]
    NewThreadIndexOutOfRange { thread: usize, index: usize, len: usize },

    #[error("node {index} is claimed more than once by new thread definitions")]
    NodeClaimedTwice { index: usize },

    #[error("node {index} is assigned NEW but no new thread lists it")]
    NewAssignmentWithoutThread { index: usize },

    #[error("node {index} is listed by a new thread but assigned to {thread_id}")]
    ListedNodeNotAssignedNew { index: usize, thread_id: String },
}

/// The proposal names something that does not exist
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferentialError {
    #[error("unknown batch {0}")]
    UnknownBatch(String),

    #[error("unknown thread {0}")]
    UnknownThread(String),
}

/// Resolved state disagrees with what is already committed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("batch {batch_id} is not fully assigned ({assigned}/{total} nodes)")]
    PartiallyAssigned {
        batch_id: String,
        assigned: usize,
        total: usize,
    },

    #[error("node {node_id} is already in thread {persisted}, proposal resolves it to {resolved}")]
    AssignmentConflict {
        node_id: String,
        persisted: String,
        resolved: String,
    },

    #[error("thread with origin key {0} missing right after insert")]
    OriginKeyVanished(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("connection lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("referential error: {0}")]
    Referential(#[from] ReferentialError),

    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Validation(_) => ErrorKind::Validation,
            ReconcileError::Referential(_) => ErrorKind::Referential,
            ReconcileError::Consistency(_) => ErrorKind::Consistency,
            ReconcileError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Consistency errors point at a logic bug; retrying cannot fix them.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileError::Consistency(_))
    }
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(err: rusqlite::Error) -> Self {
        ReconcileError::Storage(StorageError::Sqlite(err))
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> Self {
        ReconcileError::Storage(StorageError::Serialization(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_retryability() {
        let validation: ReconcileError = ValidationError::MissingAssignment { index: 2 }.into();
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert!(validation.is_retryable());

        let conflict: ReconcileError = ConsistencyError::AssignmentConflict {
            node_id: "n1".into(),
            persisted: "thr_a".into(),
            resolved: "thr_b".into(),
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Consistency);
        assert!(!conflict.is_retryable());

        let storage: ReconcileError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(storage.kind(), ErrorKind::Storage);
        assert!(storage.is_retryable());
    }

    #[test]
    fn test_messages_name_the_offender() {
        let err: ReconcileError = ReferentialError::UnknownThread("thr_missing".into()).into();
        assert_eq!(err.to_string(), "referential error: unknown thread thr_missing");
    }
}
