// Terminal prompts for the interactive setup wizard
//
// The wizard talks to a `Prompter` so the re-prompt loops can be driven by scripted answers in
// tests. The real implementation is a thin wrapper over dialoguer.

use dialoguer::{Confirm, Input, Password};
use std::io;
use thiserror::Error;

use crate::error::SetupError;

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Prompt interrupted")]
    Interrupted,

    #[error("Terminal I/O failed: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for PromptError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::Interrupted {
            PromptError::Interrupted
        } else {
            PromptError::Io(err)
        }
    }
}

impl From<dialoguer::Error> for PromptError {
    #[allow(unreachable_patterns)]
    fn from(err: dialoguer::Error) -> Self {
        match err {
            dialoguer::Error::IO(e) => PromptError::from(e),
            other => PromptError::Io(io::Error::other(other.to_string())),
        }
    }
}

impl From<PromptError> for SetupError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::Interrupted => SetupError::Cancelled,
            PromptError::Io(e) => SetupError::from(e),
        }
    }
}

pub trait Prompter {
    /// Free-text answer. With `allow_empty`, a bare Enter yields `""`.
    fn input(&mut self, prompt: &str, allow_empty: bool) -> Result<String, PromptError>;

    /// Hidden answer (never echoed).
    fn password(&mut self, prompt: &str) -> Result<String, PromptError>;

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, PromptError>;
}

/// Prompts on the controlling terminal.
#[derive(Debug, Default)]
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn input(&mut self, prompt: &str, allow_empty: bool) -> Result<String, PromptError> {
        let value: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(allow_empty)
            .interact_text()?;
        Ok(value)
    }

    fn password(&mut self, prompt: &str) -> Result<String, PromptError> {
        Ok(Password::new().with_prompt(prompt).interact()?)
    }

    fn confirm(&mut self, prompt: &str, default: bool) -> Result<bool, PromptError> {
        Ok(Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()?)
    }
}
