//! chatling — terminal LLM chat with tool calling.
//!
//! The core is [`chat::ChatModel`], a bounded conversation loop that turns one
//! user prompt into a sequence of model-request / tool-execution cycles while
//! emitting lifecycle events on [`bus::queue::EventBus`].

pub mod bus;
pub mod chat;
pub mod cli;
pub mod config;
pub mod errors;
pub mod providers;
pub mod utils;
