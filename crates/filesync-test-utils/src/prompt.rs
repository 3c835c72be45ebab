//! [`ScriptedPrompter`]: canned answers for engine prompts.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use filesync_core::{ConflictChoice, Conflicts, Prompter};

#[derive(Debug, Default)]
struct Script {
    choices: VecDeque<ConflictChoice>,
    confirmations: VecDeque<bool>,
    conflict_prompts: Vec<Vec<String>>,
    confirm_prompts: Vec<String>,
}

/// Answers prompts from queues filled up front and records what was asked.
///
/// Running out of answers panics, so an unexpected prompt fails the test.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    script: Mutex<Script>,
}

impl ScriptedPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an answer for the next conflict prompt.
    pub fn choose(self, choice: ConflictChoice) -> Self {
        self.script.lock().unwrap().choices.push_back(choice);
        self
    }

    /// Queue an answer for the next yes/no prompt.
    pub fn confirm_with(self, answer: bool) -> Self {
        self.script.lock().unwrap().confirmations.push_back(answer);
        self
    }

    /// Conflicting paths of every conflict prompt, in order.
    pub fn conflict_prompts(&self) -> Vec<Vec<String>> {
        self.script.lock().unwrap().conflict_prompts.clone()
    }

    pub fn confirm_prompts(&self) -> Vec<String> {
        self.script.lock().unwrap().confirm_prompts.clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn resolve_conflicts(&self, conflicts: &Conflicts) -> ConflictChoice {
        let mut script = self.script.lock().unwrap();
        let paths: Vec<String> = conflicts.paths().map(str::to_string).collect();
        script.conflict_prompts.push(paths.clone());
        script
            .choices
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedPrompter: unexpected conflict prompt for {paths:?}"))
    }

    async fn confirm(&self, message: &str) -> bool {
        let mut script = self.script.lock().unwrap();
        script.confirm_prompts.push(message.to_string());
        script
            .confirmations
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedPrompter: unexpected confirmation {message:?}"))
    }
}
