//! Per-phone-number conversation state.

pub mod memory;
pub mod model;
pub mod store;

pub use memory::MemorySessionStore;
pub use model::{ConversationSession, RegStep, SessionMode, SessionPatch};
pub use store::SessionStore;
