//! Conversation state and the orchestrator that drives it.

pub mod conversation;
pub mod state;

pub use conversation::{Conversation, ConversationSettings};
pub use state::{
    reduce, AbortHandle, ChatStatus, ConversationAction, ConversationState, ConversationStore,
    RequestOptions,
};
