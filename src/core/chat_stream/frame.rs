//! Line framing and per-frame decoding for streamed completions.
//!
//! Both wire formats share one rule: a frame is one newline-terminated line.
//! Event-stream lines carry a `data:` prefix, NDJSON lines are bare objects,
//! and either may be the literal `[DONE]` terminator.

use std::sync::Arc;

use memchr::memchr;
use serde_json::Value;

use crate::api::{ChatChunk, MessageMeta};
use crate::core::errors::{from_response, ApiError, ResponseParts};

/// Fallback for in-stream error objects without a message.
pub const STREAM_ERROR_FALLBACK: &str = "Unbekannter API-Fehler";

/// Growable byte buffer that yields complete lines.
///
/// Bytes are only decoded once a full line is present, so multi-byte UTF-8
/// sequences split across network chunks survive intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    pub fn next_line(&mut self) -> Option<String> {
        let newline_pos = memchr(b'\n', &self.buffer)?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever remains once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim_end_matches('\r');
        (!text.trim().is_empty()).then(|| text.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Blank lines, comments, non-data fields and provider status lines.
    Skip,
    Done,
    Content {
        text: String,
        meta: Option<MessageMeta>,
    },
    /// Metadata without any content.
    Metadata(MessageMeta),
}

/// Decode one line. Malformed JSON and in-stream error objects are errors.
pub fn parse_frame(line: &str) -> Result<Frame, ApiError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Ok(Frame::Skip);
    }
    if is_ignored_field(trimmed) {
        return Ok(Frame::Skip);
    }

    let payload = match line.trim_start().strip_prefix("data:") {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    };
    let payload_trimmed = payload.trim();

    if payload_trimmed.is_empty() || is_provider_status(payload_trimmed) {
        return Ok(Frame::Skip);
    }
    if payload_trimmed == "[DONE]" {
        return Ok(Frame::Done);
    }
    if payload_trimmed.starts_with('{') {
        return parse_json_frame(payload_trimmed);
    }

    Ok(Frame::Content {
        text: payload.to_string(),
        meta: None,
    })
}

fn is_ignored_field(line: &str) -> bool {
    ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
}

fn is_provider_status(payload: &str) -> bool {
    payload
        .get(..10)
        .is_some_and(|head| head.eq_ignore_ascii_case("OPENROUTER"))
}

fn parse_json_frame(payload: &str) -> Result<Frame, ApiError> {
    let chunk: ChatChunk = serde_json::from_str(payload).map_err(|err| {
        ApiError::unknown_with(format!("invalid stream frame: {err}"), Some(Arc::new(err)))
    })?;

    if let Some(error) = chunk.error.as_ref().filter(|value| !value.is_null()) {
        return Err(error_from_frame(error));
    }

    let Some(choice) = chunk.choices.first() else {
        return Ok(Frame::Skip);
    };

    let meta = choice
        .message
        .as_ref()
        .map(MessageMeta::from)
        .filter(|meta| !meta.is_empty());

    // `message.content` only counts when the frame has no delta at all.
    let text = match &choice.delta {
        Some(delta) => delta.content.clone(),
        None => choice
            .message
            .as_ref()
            .and_then(|message| message.content.clone()),
    }
    .unwrap_or_default();

    if !text.is_empty() {
        return Ok(Frame::Content { text, meta });
    }
    Ok(meta.map(Frame::Metadata).unwrap_or(Frame::Skip))
}

/// Maps a provider `error` object to an [`ApiError`]. An HTTP-range `code`
/// goes through [`from_response`] so it classifies like a real status.
pub(super) fn error_from_frame(error: &Value) -> ApiError {
    let message = error_summary(&serde_json::json!({ "error": error }))
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| STREAM_ERROR_FALLBACK.to_string());

    let code = error
        .get("code")
        .and_then(|code| {
            code.as_u64()
                .or_else(|| code.as_str().and_then(|s| s.parse().ok()))
        })
        .and_then(|code| u16::try_from(code).ok())
        .filter(|code| (400..600).contains(code));

    match code {
        Some(status) => {
            let reason = reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|status| status.canonical_reason())
                .unwrap_or_default();
            from_response(&ResponseParts::new(status, reason).with_detail(message))
        }
        None => ApiError::unknown(message),
    }
}

/// Best-effort one-line summary of a provider error body.
pub fn error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(frame: Frame) -> String {
        match frame {
            Frame::Content { text, .. } => text,
            other => panic!("expected content frame, got {other:?}"),
        }
    }

    #[test]
    fn decoder_splits_lines_and_keeps_partial_tail() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"data: one\r\ndata: tw");
        assert_eq!(decoder.next_line().as_deref(), Some("data: one"));
        assert_eq!(decoder.next_line(), None);
        decoder.push(b"o\n");
        assert_eq!(decoder.next_line().as_deref(), Some("data: two"));
        assert!(decoder.is_empty());
    }

    #[test]
    fn decoder_joins_split_utf8_sequences() {
        let bytes = "Grüße\n".as_bytes();
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..3]);
        assert_eq!(decoder.next_line(), None);
        decoder.push(&bytes[3..]);
        assert_eq!(decoder.next_line().as_deref(), Some("Grüße"));
    }

    #[test]
    fn finish_returns_unterminated_remainder() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"[DONE]");
        assert_eq!(decoder.next_line(), None);
        assert_eq!(decoder.finish().as_deref(), Some("[DONE]"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn event_stream_and_ndjson_frames_decode_alike() {
        let sse = parse_frame(r#"data: {"choices":[{"delta":{"content":"Hal"}}]}"#).unwrap();
        let tight = parse_frame(r#"data:{"choices":[{"delta":{"content":"Hal"}}]}"#).unwrap();
        let ndjson = parse_frame(r#"{"choices":[{"delta":{"content":"Hal"}}]}"#).unwrap();
        assert_eq!(content(sse), "Hal");
        assert_eq!(content(tight), "Hal");
        assert_eq!(content(ndjson), "Hal");
        assert_eq!(parse_frame("data: [DONE]").unwrap(), Frame::Done);
        assert_eq!(parse_frame("[DONE]").unwrap(), Frame::Done);
    }

    #[test]
    fn keepalives_and_fields_are_skipped() {
        for line in [
            "",
            "   ",
            ": keep-alive",
            "event: message",
            "id: 42",
            "retry: 1000",
            "data: OPENROUTER PROCESSING",
            ": OPENROUTER PROCESSING",
            "data: ",
        ] {
            assert_eq!(parse_frame(line).unwrap(), Frame::Skip, "line {line:?}");
        }
    }

    #[test]
    fn plain_text_frames_are_raw_tokens() {
        assert_eq!(content(parse_frame("data:  world").unwrap()), " world");
        assert_eq!(content(parse_frame("Hallo").unwrap()), "Hallo");
    }

    #[test]
    fn malformed_json_fails_loudly() {
        let err = parse_frame(r#"data: {"choices": [ "#).unwrap_err();
        assert_eq!(err.name(), "UnknownError");
        assert!(err.message().starts_with("invalid stream frame"));
        assert!(err.cause().is_some());
    }

    #[test]
    fn error_frames_map_to_typed_errors() {
        let err = parse_frame(r#"data: {"error":{"message":"internal   server error"}}"#)
            .unwrap_err();
        assert_eq!(err.name(), "UnknownError");
        assert_eq!(err.message(), "internal server error");

        let err = parse_frame(r#"{"error":{"code":429,"message":"slow down"}}"#).unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(err.message(), "HTTP 429: Too Many Requests - slow down");

        let err = parse_frame(r#"{"error":{}}"#).unwrap_err();
        assert_eq!(err.message(), STREAM_ERROR_FALLBACK);
    }

    #[test]
    fn metadata_rides_along_or_stands_alone() {
        let frame = parse_frame(
            r#"data: {"choices":[{"delta":{"content":"Hi"},"message":{"id":"srv-1","model":"m"}}]}"#,
        )
        .unwrap();
        match frame {
            Frame::Content { text, meta } => {
                assert_eq!(text, "Hi");
                assert_eq!(meta.and_then(|m| m.id).as_deref(), Some("srv-1"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let frame =
            parse_frame(r#"data: {"choices":[{"delta":{"content":""},"message":{"id":"srv-2"}}]}"#)
                .unwrap();
        assert!(matches!(frame, Frame::Metadata(meta) if meta.id.as_deref() == Some("srv-2")));
    }

    #[test]
    fn message_content_counts_only_without_delta() {
        let frame =
            parse_frame(r#"{"choices":[{"message":{"content":"full reply"}}]}"#).unwrap();
        assert_eq!(content(frame), "full reply");

        let frame = parse_frame(
            r#"{"choices":[{"delta":{"content":"a"},"message":{"content":"ignored"}}]}"#,
        )
        .unwrap();
        assert_eq!(content(frame), "a");
    }

    #[test]
    fn error_summary_collapses_whitespace() {
        let value = serde_json::json!({"error": {"message": "model\n  overloaded"}});
        assert_eq!(error_summary(&value).as_deref(), Some("model overloaded"));
        let value = serde_json::json!({"error": "plain"});
        assert_eq!(error_summary(&value).as_deref(), Some("plain"));
        let value = serde_json::json!({"status": "failed"});
        assert_eq!(error_summary(&value), None);
    }
}
