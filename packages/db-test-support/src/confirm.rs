use std::collections::VecDeque;

use async_trait::async_trait;
use db_infra::Confirm;

/// Answers from a script, in order; "no" once the script runs out. Keeps every
/// prompt it was shown.
#[derive(Debug, Default)]
pub struct ScriptedConfirm {
    answers: VecDeque<bool>,
    pub prompts: Vec<String>,
}

impl ScriptedConfirm {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            prompts: Vec::new(),
        }
    }

    pub fn yes() -> Self {
        Self::new([true])
    }

    pub fn no() -> Self {
        Self::new([false])
    }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
    async fn confirm(&mut self, prompt: &str) -> bool {
        self.prompts.push(prompt.to_string());
        self.answers.pop_front().unwrap_or(false)
    }
}
