//! Disa is a streaming chat client for OpenAI-compatible completion APIs.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core::chat_stream`] issues requests and decodes event-stream or
//!   newline-delimited JSON bodies into deltas, honoring cancellation at
//!   every await.
//! - [`core::errors`] normalizes every failure into the closed [`ApiError`]
//!   hierarchy.
//! - [`core::app`] holds the conversation state, its reducer, and the
//!   [`Conversation`] orchestrator behind send, stop, reload, edit and retry.
//! - [`core::presenter`] turns typed errors into user-facing text.
//! - [`api`] defines the wire payloads.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].
//!
//! [`ApiError`]: crate::core::errors::ApiError
//! [`Conversation`]: crate::core::app::Conversation

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
