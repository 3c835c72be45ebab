//! Human decisions the engine cannot make on its own

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conflicts::Conflicts;

/// How to resolve paths both sides changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictChoice {
    #[serde(rename = "cancel")]
    Cancel,
    /// Keep the local version and overwrite the remote one
    #[serde(rename = "local")]
    KeepLocal,
    /// Keep the remote version and overwrite the local one
    #[serde(rename = "gadget")]
    KeepRemote,
}

/// Asks the user to settle conflicts and confirm destructive operations.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Present `conflicts` and pick a resolution.
    async fn resolve_conflicts(&self, conflicts: &Conflicts) -> ConflictChoice;

    /// Ask a yes/no question; `false` aborts the operation.
    async fn confirm(&self, message: &str) -> bool;
}

/// Prompter for unattended runs: applies a fixed choice and declines every
/// confirmation.
#[derive(Debug, Clone, Copy)]
pub struct NonInteractive {
    pub choice: ConflictChoice,
}

impl Default for NonInteractive {
    fn default() -> Self {
        Self {
            choice: ConflictChoice::Cancel,
        }
    }
}

#[async_trait]
impl Prompter for NonInteractive {
    async fn resolve_conflicts(&self, conflicts: &Conflicts) -> ConflictChoice {
        tracing::warn!(
            conflicts = conflicts.len(),
            choice = ?self.choice,
            "resolving conflicts without a prompt"
        );
        self.choice
    }

    async fn confirm(&self, message: &str) -> bool {
        tracing::warn!(%message, "declining confirmation without a prompt");
        false
    }
}
