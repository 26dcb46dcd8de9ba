//! CLI commands

mod action;
mod completions;
mod graph;
mod validate;
mod watcher;

pub use action::ActionCommand;
pub use completions::CompletionsCommand;
pub use graph::GraphCommand;
pub use validate::ValidateCommand;
