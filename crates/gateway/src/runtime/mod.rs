//! Runtime core: conversation registry, streaming orchestrator, and
//! tool-result parsing.

pub mod orchestrator;
pub mod registry;
pub mod tool_results;

pub use orchestrator::{prepare_for_stream, run_stream, PrepareError, StreamRequest};
pub use registry::{ConversationRegistry, ConversationState};
