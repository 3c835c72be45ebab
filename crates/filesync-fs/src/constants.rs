//! Well-known project paths.

/// Standard project filesystem markers and paths, in canonical
/// project-relative form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectPath {
    /// The `.gadget/` directory, owned by the remote side
    ReservedDir,
    /// The `.gadget/sync.json` state file
    StateFile,
    /// The `.gadget/backup/` directory for displaced local files
    BackupDir,
    /// The `.ignore` file with project ignore patterns
    IgnoreFile,
    /// The `yarn.lock` dependency lock file
    LockFile,
}

impl ProjectPath {
    /// Get the string representation of the path.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReservedDir => ".gadget/",
            Self::StateFile => ".gadget/sync.json",
            Self::BackupDir => ".gadget/backup/",
            Self::IgnoreFile => ".ignore",
            Self::LockFile => "yarn.lock",
        }
    }
}

/// Entries that are never synchronized, whatever the ignore file says.
pub const ALWAYS_IGNORED: &[&str] = &[
    ".git/",
    "node_modules/",
    ".yarn/cache/",
    ".DS_Store",
    "/.gadget/sync.json",
    "/.gadget/backup/",
];

impl AsRef<str> for ProjectPath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
