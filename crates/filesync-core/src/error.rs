//! Error types for filesync-core

use std::path::PathBuf;

use crate::remote::RemoteError;
use crate::subscription::SubscriptionError;

/// Result type for filesync-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in filesync-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reconciliation kept finding new differences
    #[error("Failed to sync after {attempts} attempts")]
    TooManySyncAttempts { attempts: u32 },

    /// A remote batch would move the recorded version backwards
    #[error("Refusing to apply files version {received}, already at {recorded}")]
    VersionRegression { recorded: u64, received: u64 },

    /// The user declined a conflict resolution or confirmation
    #[error("Sync cancelled")]
    Cancelled,

    /// No state file and the directory already holds files
    #[error("{path} is not empty and has never been synced")]
    UnknownDirectory { path: PathBuf },

    /// The state file belongs to a different application
    #[error("Directory is synced with application {found}, not {requested}")]
    DifferentApplication { found: String, requested: String },

    /// File content that could not be decoded from its wire encoding
    #[error("Invalid content for {path}: {message}")]
    InvalidPayload { path: String, message: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Filesystem error from filesync-fs
    #[error(transparent)]
    Fs(#[from] filesync_fs::Error),
}
