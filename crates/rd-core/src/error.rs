//! # DiscussError
//!
//! Centralized error handling for the rusty-discuss core.
//! Every failure is recoverable at the call boundary; the caller maps it to a
//! user-facing message.

use thiserror::Error;

/// The primary error type for all rd-core operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscussError {
    /// Vote input referenced both or neither of post/comment.
    #[error("invalid vote target: {0}")]
    InvalidTarget(String),

    /// A reply named a parent comment that lives under a different post.
    #[error("parent comment {parent} belongs to post {parent_post}, not {post}")]
    CrossPostParent {
        parent: String,
        parent_post: String,
        post: String,
    },

    /// Resource not found (e.g. post, comment, user), usually a race with deletion.
    #[error("{0} not found with ID {1}")]
    TargetNotFound(&'static str, String),

    /// The voter authored the target and the active policy rejects self-votes.
    #[error("users may not vote on their own content")]
    SelfVote,

    /// A concurrent insert won the (user, target) uniqueness constraint.
    #[error("concurrent vote on the same target: {0}")]
    DuplicateVoteRace(String),

    /// Validation failure (e.g. blank comment, title too long, duplicate handle).
    #[error("validation error: {0}")]
    Validation(String),

    /// The acting user is neither the author nor staff.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Infrastructure failure (e.g. database unavailable).
    #[error("internal service error: {0}")]
    Internal(String),
}

impl DiscussError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::TargetNotFound(kind, id.to_string())
    }

    /// True for races the caller may retry as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DuplicateVoteRace(_))
    }
}

/// A specialized Result type for rusty-discuss logic.
pub type Result<T> = std::result::Result<T, DiscussError>;
