use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ChatTransport, StreamObserver};
use crate::api::{ChatRequest, MessageMeta};
use crate::core::errors::ApiError;

#[derive(Clone, Debug)]
pub enum StreamEvent {
    Started,
    Delta {
        text: String,
        meta: Option<MessageMeta>,
    },
    Metadata(MessageMeta),
    Done(String),
    Failed(ApiError),
}

pub struct StreamParams {
    pub transport: Arc<dyn ChatTransport>,
    pub request: ChatRequest,
    pub cancel_token: CancellationToken,
    pub stream_id: u64,
}

/// Forwards observer callbacks as tagged channel events.
struct ChannelObserver {
    tx: mpsc::UnboundedSender<(StreamEvent, u64)>,
    stream_id: u64,
    text: String,
    finished: bool,
}

impl ChannelObserver {
    fn send(&self, event: StreamEvent) {
        let _ = self.tx.send((event, self.stream_id));
    }
}

impl StreamObserver for ChannelObserver {
    fn on_start(&mut self) {
        self.send(StreamEvent::Started);
    }

    fn on_delta(&mut self, text: &str, meta: Option<&MessageMeta>) {
        self.text.push_str(text);
        self.send(StreamEvent::Delta {
            text: text.to_string(),
            meta: meta.cloned(),
        });
    }

    fn on_metadata(&mut self, meta: &MessageMeta) {
        self.send(StreamEvent::Metadata(meta.clone()));
    }

    fn on_done(&mut self, full_text: &str) {
        self.finished = true;
        self.send(StreamEvent::Done(full_text.to_string()));
    }
}

/// Runs streams on tokio tasks and reports their events over one channel.
///
/// Every event carries the stream id it belongs to so a UI loop can drop
/// events from streams it has already abandoned. Cancelled streams go quiet
/// without a terminal event.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamEvent, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamEvent, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                transport,
                request,
                cancel_token,
                stream_id,
            } = params;

            let mut observer = ChannelObserver {
                tx,
                stream_id,
                text: String::new(),
                finished: false,
            };

            match transport
                .stream_chat(&request, &mut observer, &cancel_token)
                .await
            {
                Ok(()) => {
                    if !observer.finished {
                        let text = std::mem::take(&mut observer.text);
                        observer.send(StreamEvent::Done(text));
                    }
                }
                Err(err) if err.is_abort() => {
                    debug!(stream_id, "stream cancelled");
                }
                Err(err) => {
                    debug!(stream_id, error = %err, "stream failed");
                    observer.send(StreamEvent::Failed(err));
                }
            }
        })
    }

    #[cfg(test)]
    pub fn send_for_test(&self, event: StreamEvent, stream_id: u64) {
        let _ = self.tx.send((event, stream_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Scripted {
        deltas: Vec<&'static str>,
        fail_with: Option<ApiError>,
    }

    #[async_trait]
    impl ChatTransport for Scripted {
        async fn stream_chat(
            &self,
            _request: &ChatRequest,
            observer: &mut dyn StreamObserver,
            cancel: &CancellationToken,
        ) -> Result<(), ApiError> {
            if cancel.is_cancelled() {
                return Err(ApiError::abort());
            }
            if !self.deltas.is_empty() {
                observer.on_start();
            }
            for delta in &self.deltas {
                observer.on_delta(delta, None);
            }
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    fn params(transport: Scripted, cancel_token: CancellationToken, stream_id: u64) -> StreamParams {
        StreamParams {
            transport: Arc::new(transport),
            request: ChatRequest::new("m", Vec::new()),
            cancel_token,
            stream_id,
        }
    }

    #[tokio::test]
    async fn events_are_tagged_and_terminated() {
        let (service, mut rx) = ChatStreamService::new();
        let transport = Scripted {
            deltas: vec!["Hal", "lo"],
            fail_with: None,
        };
        service
            .spawn_stream(params(transport, CancellationToken::new(), 7))
            .await
            .expect("task");

        let mut events = Vec::new();
        while let Ok((event, id)) = rx.try_recv() {
            assert_eq!(id, 7);
            events.push(event);
        }
        assert!(matches!(events[0], StreamEvent::Started));
        assert!(matches!(&events[1], StreamEvent::Delta { text, .. } if text == "Hal"));
        assert!(matches!(&events[2], StreamEvent::Delta { text, .. } if text == "lo"));
        assert!(matches!(&events[3], StreamEvent::Done(text) if text == "Hallo"));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn failures_are_reported_and_cancellation_is_silent() {
        let (service, mut rx) = ChatStreamService::new();
        let failing = Scripted {
            deltas: Vec::new(),
            fail_with: Some(ApiError::network("down", None)),
        };
        service
            .spawn_stream(params(failing, CancellationToken::new(), 1))
            .await
            .expect("task");
        let (event, id) = rx.try_recv().expect("failure event");
        assert_eq!(id, 1);
        assert!(matches!(event, StreamEvent::Failed(err) if err.name() == "NetworkError"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let quiet = Scripted {
            deltas: vec!["x"],
            fail_with: None,
        };
        service.spawn_stream(params(quiet, cancel, 2)).await.expect("task");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_events_can_be_injected() {
        let (service, mut rx) = ChatStreamService::new();
        service.send_for_test(StreamEvent::Done(String::new()), 3);
        let (event, id) = rx.try_recv().expect("event");
        assert_eq!(id, 3);
        assert!(matches!(event, StreamEvent::Done(text) if text.is_empty()));
    }
}
