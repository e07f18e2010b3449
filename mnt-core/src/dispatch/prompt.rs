use super::dispatcher::{DispatcherHandle, Dispatched};
use crate::error::PromptError;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// Hardware wallet PIN, entered on the scrambled matrix
    Pin,
    Passphrase,
    /// Recovery seed word
    Word,
}

/// Dialog shown to the user. Only ever called on the owning thread.
pub trait InteractivePrompt: Send + Sync {
    /// `None` when the user dismissed the dialog.
    fn ask(&self, kind: PromptKind, message: &str) -> Option<String>;
}

pub type InteractivePromptRef = Arc<dyn InteractivePrompt>;

/// Ask the user for input from any thread. A worker blocks until the owning thread has shown
/// the dialog and the user answered or dismissed it.
pub fn request_input(
    dispatcher: &DispatcherHandle,
    prompt: &InteractivePromptRef,
    kind: PromptKind,
    message: &str,
) -> Result<String, PromptError> {
    let prompt = prompt.clone();
    let message = message.to_string();

    match dispatcher.call_on_owning_thread(move || Dispatched::from(prompt.ask(kind, &message))) {
        Dispatched::Done(value) => Ok(value),
        Dispatched::Cancelled => {
            info!("{:?} prompt cancelled by the user", kind);
            Err(PromptError::Cancelled)
        }
        Dispatched::Failed(e) => Err(PromptError::Failed(e)),
    }
}
