//! Message types and the listeners that feed them to the writer.

pub mod events;
pub mod listeners;
