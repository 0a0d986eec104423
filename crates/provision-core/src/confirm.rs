//! Confirmation gate for destructive actions.

use async_trait::async_trait;
use std::io::{BufRead, IsTerminal, Write};

/// A destructive action awaiting operator approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestructiveAction {
    pub step: String,
    pub target: String,
}

/// Asks whether a destructive action may proceed.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, action: &DestructiveAction) -> bool;
}

/// Approves everything (`--yes`).
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeYes;

#[async_trait]
impl Confirm for AssumeYes {
    async fn confirm(&self, _action: &DestructiveAction) -> bool {
        true
    }
}

/// Declines everything; used when nobody can be asked.
#[derive(Debug, Default, Clone, Copy)]
pub struct Decline;

#[async_trait]
impl Confirm for Decline {
    async fn confirm(&self, _action: &DestructiveAction) -> bool {
        false
    }
}

/// Interactive `[y/N]` prompt on stderr, answer read from stdin.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

#[async_trait]
impl Confirm for TerminalPrompt {
    async fn confirm(&self, action: &DestructiveAction) -> bool {
        let prompt = format!(
            "Step '{}' will DELETE {} and rebuild it. Continue? [y/N] ",
            action.step, action.target
        );
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{}", prompt);
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) => is_affirmative(&line),
            _ => false,
        }
    }
}

/// Prompt when attached to a terminal, otherwise decline.
pub fn default_confirmer(assume_yes: bool) -> Box<dyn Confirm> {
    if assume_yes {
        Box::new(AssumeYes)
    } else if std::io::stdin().is_terminal() {
        Box::new(TerminalPrompt)
    } else {
        Box::new(Decline)
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
