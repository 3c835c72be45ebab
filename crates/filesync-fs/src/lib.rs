//! Filesystem abstraction for filesync
//!
//! Provides canonical path handling, gitignore-style ignore rules, content
//! fingerprints and safe I/O for a synchronized project directory.

pub mod checksum;
pub mod config;
pub mod constants;
pub mod directory;
pub mod error;
pub mod ignore;
pub mod io;
pub mod path;

pub use checksum::{DIRECTORY_FINGERPRINT, HashSnapshot};
pub use config::ConfigStore;
pub use constants::ProjectPath;
pub use directory::Directory;
pub use error::{Error, Result};
pub use ignore::IgnoreRules;
pub use path::{NormalizedPath, is_within, parent_dirs};
