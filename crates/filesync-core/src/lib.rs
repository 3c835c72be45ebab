//! Bidirectional sync engine for filesync
//!
//! This crate keeps a local project directory and a remote project
//! filesystem consistent while both may be edited at once:
//!
//! - **Changes**: path-keyed change sets and hash snapshot diffs
//! - **SyncState**: the persisted application/environment binding and the
//!   last remote files version the local tree reflects
//! - **FileSync**: three-way reconciliation, conflict handling, local apply
//!   and remote publish, plus the live loop
//! - **SubscriptionClient**: a streaming subscription that survives
//!   disconnects and feeds remote change batches to the engine
//!
//! # Architecture
//!
//! ```text
//!        watcher --FsEvent--> FileSync::run_live --publish--> RemoteFiles
//!                                   ^
//!   SubscriptionTransport --> SubscriptionClient --batches--+
//!                                   |
//!                              filesync-fs (Directory, I/O)
//! ```
//!
//! The network transport and the prompt UI are collaborators: they plug in
//! through [`RemoteFiles`], [`SubscriptionTransport`] and [`Prompter`].

pub mod backup;
pub mod changes;
pub mod config;
pub mod conflicts;
pub mod engine;
pub mod error;
pub mod install;
pub mod prompt;
pub mod recent;
pub mod remote;
pub mod state;
pub mod subscription;
pub mod watch;

pub use backup::BackupStore;
pub use changes::{Change, Changes, changes_needed, diff};
pub use config::SyncConfig;
pub use conflicts::{Conflict, Conflicts};
pub use engine::{
    FileSync, NoHooks, PullOptions, PushOptions, RemoteHooks, RemoteSubscription, SyncOptions,
    SyncStatus,
};
pub use error::{Error, Result};
pub use prompt::{ConflictChoice, NonInteractive, Prompter};
pub use recent::RecentWrites;
pub use remote::{Encoding, FilePayload, RemoteChangeBatch, RemoteError, RemoteFiles};
pub use state::{StateOptions, SyncState};
pub use subscription::{
    ConnectionState, RetryPolicy, SubscriptionClient, SubscriptionError, SubscriptionHandle,
    SubscriptionMessage, SubscriptionTransport, SubscriptionVariables, TransportEvent,
    VariablesProvider,
};
pub use watch::FsEvent;
