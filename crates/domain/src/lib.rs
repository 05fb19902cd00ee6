//! `fg-domain` — shared types for the frevaGPT backend.
//!
//! This crate provides:
//! - The stream-variant event model (`variant`): the typed, ordered event
//!   stream that makes up a conversation, plus its normalization rules and
//!   the conversion to chat-completion messages.
//! - The chat-completion message model (`chat`) spoken to the LLM proxy.
//! - Provider-agnostic completion stream events (`stream`).
//! - Environment-driven server configuration (`config`).
//! - The shared error type (`error`).

pub mod chat;
pub mod config;
pub mod error;
pub mod stream;
pub mod variant;

// Re-exports for convenience.
pub use chat::{ChatContent, ChatMessage, ContentPart, FunctionCall, Role, ToolCallSpec};
pub use config::Settings;
pub use error::{Error, Result};
pub use variant::{Conversation, StreamVariant};
