//! Operator confirmation for the one irreversible step.

use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A yes/no decision. Anything but an explicit yes is no.
#[async_trait]
pub trait Confirm: Send {
    async fn confirm(&mut self, prompt: &str) -> bool;
}

#[async_trait]
impl<F> Confirm for F
where
    F: FnMut(&str) -> bool + Send,
{
    async fn confirm(&mut self, prompt: &str) -> bool {
        self(prompt)
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("yes")
}

/// One line from `reader`. EOF or a read error is no.
pub fn read_answer(mut reader: impl BufRead) -> bool {
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) | Err(_) => false,
        Ok(_) => is_affirmative(&line),
    }
}

/// Asks on stderr and reads one line from stdin on a blocking thread.
///
/// Cancelling the token abandons the wait and answers no; the read itself
/// stays parked until the process exits.
#[derive(Debug, Clone, Default)]
pub struct TerminalConfirm {
    cancel: CancellationToken,
}

impl TerminalConfirm {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl Confirm for TerminalConfirm {
    async fn confirm(&mut self, prompt: &str) -> bool {
        let prompt = prompt.to_string();
        let ask = tokio::task::spawn_blocking(move || {
            let mut stderr = io::stderr();
            let _ = write!(stderr, "{prompt} (yes/no): ");
            let _ = stderr.flush();
            read_answer(io::stdin().lock())
        });

        tokio::select! {
            answer = ask => answer.unwrap_or(false),
            _ = self.cancel.cancelled() => false,
        }
    }
}

/// Answer fixed ahead of time, e.g. from a command-line flag.
#[derive(Debug, Clone, Copy)]
pub struct Preset(pub bool);

#[async_trait]
impl Confirm for Preset {
    async fn confirm(&mut self, _prompt: &str) -> bool {
        self.0
    }
}
