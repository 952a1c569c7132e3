//! Error types for fs-snapshot

use thiserror::Error;

/// Result type used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while listing, creating or serving snapshots
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested path exists but is not a directory
    #[error("only able to snapshot directories: {0}")]
    NotADirectory(String),

    /// The mount point already failed once in this session and is never retried
    #[error("snapshot failed in previous attempt")]
    SnapshotFailedInPreviousAttempt,

    /// No provider, set or snapshot matches the id
    #[error("unknown {kind} ID: {id}")]
    UnknownId { kind: &'static str, id: String },

    /// A shortened id matches more than one entity
    #[error("found {count} {kind}s with ID {id} - please use full ID")]
    AmbiguousId {
        kind: &'static str,
        id: String,
        count: usize,
    },

    /// A phase of the native protocol ran out of its time budget
    #[error("timeout occurred in {0}")]
    Timeout(String),

    /// A native snapshot API call returned a failure code
    #[error("VSS error: {call}: {name} ({code:#x})")]
    Native {
        call: String,
        name: &'static str,
        code: u32,
    },

    /// Snapshots are not supported on the given volume(s)
    #[error("snapshots not supported in volume {0}")]
    VolumeNotSupported(String),

    /// Snapshots are not supported on this platform or configuration
    #[error("not supported: {0}")]
    Unsupported(String),

    /// An external tool exited with a failure
    #[error("error running {program}: {output}")]
    Process { program: String, output: String },

    /// Connection to the snapshot server failed
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer sent something that does not follow the wire protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported a failure
    #[error("server error: {0}")]
    Remote(String),

    /// The server has no backup session with this id
    #[error("unknown backuper: {0}")]
    UnknownSession(u32),

    /// The backup session was already closed
    #[error("backup session already closed")]
    SessionClosed,

    /// Configuration file could not be read or written
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration values are invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Wire encoding failure
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an error from any displayable message
    pub fn custom(msg: impl std::fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }

    /// Whether the error means the server could not be reached at all
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
