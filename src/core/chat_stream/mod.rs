//! Streaming transport for OpenAI-compatible chat completion endpoints.
//!
//! [`ChatClient`] issues the request and hands the body to
//! [`consume_stream`], which turns bytes into frames and frames into observer
//! callbacks. The orchestrator only sees the [`ChatTransport`] trait, so tests
//! can script a transport without a server.

mod client;
pub mod frame;
mod reader;
mod service;

pub use client::{ChatClient, ChatOnceResponse, ClientOptions};
pub use reader::consume_stream;
pub use service::{ChatStreamService, StreamEvent, StreamParams};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::{ChatRequest, MessageMeta};
use crate::core::errors::ApiError;

/// Receives the three-phase protocol of one streamed reply.
///
/// `on_start` fires at most once, right before the first non-empty delta.
/// `on_done` fires at most once, on the terminator or on a graceful end.
pub trait StreamObserver: Send {
    fn on_start(&mut self) {}

    fn on_delta(&mut self, text: &str, meta: Option<&MessageMeta>);

    /// Metadata carried by a frame without content.
    fn on_metadata(&mut self, _meta: &MessageMeta) {}

    fn on_done(&mut self, _full_text: &str) {}
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError>;
}
