mod dispatcher;
mod prompt;

pub use dispatcher::{DispatcherHandle, Dispatched, MainThreadDispatcher};
pub use prompt::{InteractivePrompt, InteractivePromptRef, PromptKind, request_input};
