pub mod events;
pub mod queue;
