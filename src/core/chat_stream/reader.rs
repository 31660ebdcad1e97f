//! Cancellable body read loop.
//!
//! The loop owns the byte stream and the accumulator for the lifetime of a
//! single call. Cancellation is raced against every read and re-checked before
//! each frame is delivered.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::frame::{parse_frame, Frame, FrameDecoder};
use super::StreamObserver;
use crate::api::MessageMeta;
use crate::core::errors::{normalize, ApiError, RawError, ABORT_MESSAGE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamPhase {
    NotStarted,
    Started,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Finished,
}

/// Phase tracker plus the full text built from every delivered delta.
struct Accumulator {
    phase: StreamPhase,
    saw_frame: bool,
    full_text: String,
}

impl Accumulator {
    fn new() -> Self {
        Self {
            phase: StreamPhase::NotStarted,
            saw_frame: false,
            full_text: String::new(),
        }
    }

    fn handle(&mut self, frame: Frame, observer: &mut dyn StreamObserver) -> Flow {
        match frame {
            Frame::Skip => Flow::Continue,
            Frame::Done => {
                self.saw_frame = true;
                self.finish(observer);
                Flow::Finished
            }
            Frame::Content { text, meta } => {
                self.saw_frame = true;
                self.deliver(&text, meta.as_ref(), observer);
                Flow::Continue
            }
            Frame::Metadata(meta) => {
                self.saw_frame = true;
                observer.on_metadata(&meta);
                Flow::Continue
            }
        }
    }

    fn deliver(
        &mut self,
        text: &str,
        meta: Option<&MessageMeta>,
        observer: &mut dyn StreamObserver,
    ) {
        if text.is_empty() {
            return;
        }
        if self.phase == StreamPhase::NotStarted {
            self.phase = StreamPhase::Started;
            trace!("first delta received");
            observer.on_start();
        }
        self.full_text.push_str(text);
        observer.on_delta(text, meta);
    }

    fn finish(&mut self, observer: &mut dyn StreamObserver) {
        if self.phase == StreamPhase::Done || !self.saw_frame {
            return;
        }
        self.phase = StreamPhase::Done;
        observer.on_done(&self.full_text);
    }
}

/// Exclusive owner of the response body. Releasing twice is harmless.
struct BodyReader<S> {
    body: Option<Pin<Box<S>>>,
}

impl<S: Stream> BodyReader<S> {
    fn new(body: S) -> Self {
        Self {
            body: Some(Box::pin(body)),
        }
    }

    async fn next(&mut self, read_timeout: Option<Duration>) -> Result<Option<S::Item>, Elapsed> {
        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };
        match read_timeout {
            Some(limit) => tokio::time::timeout(limit, body.next()).await,
            None => Ok(body.next().await),
        }
    }

    /// Drops the body, which cancels the underlying transfer.
    fn release(&mut self) {
        if self.body.take().is_some() {
            trace!("stream body released");
        }
    }
}

impl<S> Drop for BodyReader<S> {
    fn drop(&mut self) {
        self.body.take();
    }
}

pub(super) fn cancelled() -> ApiError {
    normalize(RawError::Cancelled {
        message: ABORT_MESSAGE.to_string(),
        cause: None,
    })
}

/// Read `body` to completion, delivering frames to `observer` in arrival order.
///
/// Returns the accumulated text. Cancellation surfaces as an abort error and
/// no observer call happens after the token fires.
pub async fn consume_stream<S, B, E>(
    body: S,
    observer: &mut dyn StreamObserver,
    cancel: &CancellationToken,
    read_timeout: Option<Duration>,
) -> Result<String, ApiError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<RawError>,
{
    let mut reader = BodyReader::new(body);
    let result = read_frames(&mut reader, observer, cancel, read_timeout).await;
    reader.release();
    result
}

async fn read_frames<S, B, E>(
    reader: &mut BodyReader<S>,
    observer: &mut dyn StreamObserver,
    cancel: &CancellationToken,
    read_timeout: Option<Duration>,
) -> Result<String, ApiError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<RawError>,
{
    let mut decoder = FrameDecoder::new();
    let mut acc = Accumulator::new();

    loop {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            next = reader.next(read_timeout) => next,
        };

        let chunk = match next {
            Err(elapsed) => {
                debug!("stream read timed out");
                return Err(normalize(elapsed));
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => return Err(normalize(err)),
            Ok(Some(Ok(chunk))) => chunk,
        };

        decoder.push(chunk.as_ref());
        while let Some(line) = decoder.next_line() {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            if acc.handle(parse_frame(&line)?, observer) == Flow::Finished {
                return Ok(acc.full_text);
            }
        }
    }

    if let Some(line) = decoder.finish() {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        if acc.handle(parse_frame(&line)?, observer) == Flow::Finished {
            return Ok(acc.full_text);
        }
    }

    acc.finish(observer);
    Ok(acc.full_text)
}
