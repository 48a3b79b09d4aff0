//! Error types for the echoline core library.
//!
//! All failures are local and synchronous; nothing is retried internally
//! and no invalid operation is silently swallowed — doing so would corrupt
//! the deterministic-replay guarantee.

use thiserror::Error;

use crate::types::{CommitmentId, CompanionId, EntityId};

/// Top-level error type for all engine operations.
#[derive(Error, Debug)]
pub enum EchoError {
    /// Caller passed an argument outside the documented domain
    /// (e.g. a zero-turn advance).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A beneficiary already has an active commitment; it must resolve
    /// before a new promise can be made to them.
    #[error("Duplicate commitment for beneficiary: {beneficiary}")]
    DuplicateCommitment {
        /// The beneficiary with the existing active commitment.
        beneficiary: EntityId,
    },

    /// An operation was attempted from a state that does not permit it
    /// (terminal commitment, non-waiting companion, ...).
    #[error("Invalid transition: {reason}")]
    InvalidTransition {
        /// What made the transition illegal.
        reason: String,
    },

    /// Two companions with an unresolved conflict would be co-located.
    #[error("Unresolved conflict between companions {a} and {b}")]
    ConflictUnresolved {
        /// One party of the conflict.
        a: CompanionId,
        /// The other party.
        b: CompanionId,
    },

    /// Entity not known to the subsystem being addressed.
    #[error("Unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// Companion not registered.
    #[error("Unknown companion: {0}")]
    UnknownCompanion(CompanionId),

    /// Commitment id not known to the tracker.
    #[error("Unknown commitment: {0}")]
    UnknownCommitment(CommitmentId),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, EchoError>;
