pub mod orchestrator;
pub mod prompt;
pub mod tools;
pub mod transcript;

pub use orchestrator::{ChatModel, RunSummary};
