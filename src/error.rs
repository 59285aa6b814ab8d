//! Error types shared by the queue tree and the call queue manager.
//!
//! Scheduling attempts that find nothing eligible are not errors: they return an empty
//! [`Resource`](crate::resource::Resource) or `None`. The variants below cover configuration
//! mistakes, backing queue construction failures and shutdown.

use thiserror::Error;

/// Main error type for fairshare-queue operations
#[derive(Error, Debug)]
pub enum Error {
    /// No backing queue constructor is registered under the requested key
    #[error("no call queue registered under '{kind}'")]
    UnknownQueueKind {
        /// Registry key that was looked up
        kind: String,
    },

    /// A registered constructor failed to build the backing queue
    #[error("failed to construct call queue '{kind}': {reason}")]
    QueueConstruction {
        /// Registry key of the failing constructor
        kind: String,
        /// Reason reported by the constructor
        reason: String,
    },

    /// Policy name does not match any known scheduling policy
    #[error("unknown scheduling policy '{name}'")]
    UnknownPolicy {
        /// Policy name from configuration
        name: String,
    },

    /// Policy cannot be used at the depth the queue sits at
    #[error("policy '{policy}' is not applicable to queue '{queue}'")]
    PolicyNotApplicable {
        /// Policy name
        policy: String,
        /// Full name of the queue the policy was set on
        queue: String,
    },

    /// Queue name is malformed (empty component, wrong root, ...)
    #[error("invalid queue name '{name}': {reason}")]
    InvalidQueueName {
        /// Offending name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Queue does not exist and was not allowed to be created
    #[error("queue '{name}' not found")]
    QueueNotFound {
        /// Full queue name
        name: String,
    },

    /// A queue exists under the name but with the other kind (leaf vs parent)
    #[error("queue '{name}' is not a {expected} queue")]
    WrongQueueType {
        /// Full queue name
        name: String,
        /// Kind the caller needed
        expected: &'static str,
    },

    /// Application id is unknown to the scheduler
    #[error("application '{app}' not found")]
    AppNotFound {
        /// Application id
        app: String,
    },

    /// User holds no submit ACL on the target queue
    #[error("user '{user}' cannot submit to queue '{queue}'")]
    AccessDenied {
        /// Submitting user
        user: String,
        /// Target queue
        queue: String,
    },

    /// Call rejected because the backing queue is full and client backoff is on
    #[error("call queue is full")]
    QueueOverflow,

    /// The manager was shut down while the caller was waiting
    #[error("call queue manager shut down")]
    Shutdown,

    /// Configuration value is out of range
    #[error("invalid configuration '{field}': {reason}")]
    InvalidConfig {
        /// Setting that was rejected
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Configuration file could not be read
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenient result type alias
pub type Result<T> = std::result::Result<T, Error>;
