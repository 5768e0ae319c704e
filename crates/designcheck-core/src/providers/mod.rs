//! Concrete [`crate::gateway::CompletionClient`] implementations.

pub mod openai;
pub mod scripted;

pub use openai::OpenAiClient;
pub use scripted::{ScriptedClient, ScriptedReply};
