//! Booking conversation — LLM-driven chat with callable tools.

pub mod approval;
pub mod cache;
pub mod orchestrator;
pub mod tools;

pub use approval::ApprovalService;
pub use cache::ChatSessionCache;
pub use orchestrator::{BookingConversation, OrchestratorConfig};
