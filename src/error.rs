//! Error taxonomy for battle operations.
//!
//! Unique-constraint collisions are an expected consequence of many clients
//! acting on the same battle, so they get their own variants and are never
//! reported as generic failures.

use thiserror::Error;

/// Result type for battle engine operations.
pub type Result<T> = std::result::Result<T, BattleError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BattleError {
    /// A battle, group, question or membership id/code does not resolve.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// The (question, group) pair already has an answer.
    #[error("group {group_id} already answered question {question_id}")]
    AlreadyAnswered { question_id: u64, group_id: u64 },

    /// A join code collided with an existing one.
    #[error("join code taken: {0}")]
    CodeTaken(String),

    /// The student already has a membership row in this battle.
    #[error("student {student_id} already joined battle {battle_id}")]
    AlreadyJoined { battle_id: u64, student_id: String },

    /// No group can take another member.
    #[error("no room: {0}")]
    Full(String),

    /// The battle or group is in a state that does not allow the request.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed request data (bad question JSON, zero groups, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl BattleError {
    pub(crate) fn not_found(entity: &'static str, key: impl ToString) -> Self {
        BattleError::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Conflicts and stale transitions: the client re-reads state and carries on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BattleError::AlreadyAnswered { .. }
                | BattleError::CodeTaken(_)
                | BattleError::AlreadyJoined { .. }
                | BattleError::InvalidTransition(_)
        )
    }
}

impl From<BattleError> for String {
    fn from(err: BattleError) -> Self {
        err.to_string()
    }
}
