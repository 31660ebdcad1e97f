use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::frame::{error_from_frame, error_summary};
use super::reader::{cancelled, consume_stream};
use super::{ChatTransport, StreamObserver};
use crate::api::{completion_text, ChatRequest};
use crate::core::credentials::Credentials;
use crate::core::errors::{from_response, normalize, ApiError, ResponseParts};
use crate::utils::auth::{add_attribution_headers, add_auth_headers, Attribution};
use crate::utils::url::construct_api_url;

/// Longest provider error detail appended to an HTTP error message.
const MAX_ERROR_DETAIL_CHARS: usize = 400;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub credentials: Credentials,
    /// Longest wait for the next body chunk before failing with a timeout.
    pub read_timeout: Option<Duration>,
    pub attribution: Attribution,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            read_timeout: None,
            attribution: Attribution::default(),
        }
    }
}

/// Result of a non-streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOnceResponse {
    pub text: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    options: ClientOptions,
}

impl ChatClient {
    pub fn new(options: ClientOptions) -> Self {
        Self::with_http(reqwest::Client::new(), options)
    }

    pub fn with_http(http: reqwest::Client, options: ClientOptions) -> Self {
        Self { http, options }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn api_key(&self) -> Result<String, ApiError> {
        self.options
            .credentials
            .resolve()
            .ok_or_else(ApiError::missing_key)
    }

    fn build_request(
        &self,
        api_key: &str,
        request: &ChatRequest,
        accept: &str,
    ) -> reqwest::RequestBuilder {
        let url = construct_api_url(&self.options.base_url, "chat/completions");
        let builder = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", accept);
        let builder = add_auth_headers(builder, api_key);
        add_attribution_headers(builder, &self.options.attribution).json(request)
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ApiError> {
        let response = until_cancelled(cancel, builder.send())
            .await?
            .map_err(normalize)?;
        ensure_success(response, cancel).await
    }

    /// Stream one completion into `observer` and return the accumulated text.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<String, ApiError> {
        let api_key = self.api_key()?;
        let request = request.streaming(true);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "starting chat stream"
        );

        let builder = self.build_request(&api_key, &request, "text/event-stream");
        let response = self.send(builder, cancel).await?;
        let text = consume_stream(
            response.bytes_stream(),
            observer,
            cancel,
            self.options.read_timeout,
        )
        .await?;

        debug!(chars = text.len(), "chat stream finished");
        Ok(text)
    }

    /// Non-streaming variant: one request, one JSON completion.
    pub async fn chat_once(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatOnceResponse, ApiError> {
        let api_key = self.api_key()?;
        let request = request.streaming(false);
        debug!(model = %request.model, messages = request.messages.len(), "sending chat request");

        let builder = self.build_request(&api_key, &request, "application/json");
        let response = self.send(builder, cancel).await?;
        let body = until_cancelled(cancel, response.bytes())
            .await?
            .map_err(normalize)?;
        let raw: Value = serde_json::from_slice(&body).map_err(normalize)?;

        if let Some(error) = raw.get("error").filter(|value| !value.is_null()) {
            return Err(error_from_frame(error));
        }

        Ok(ChatOnceResponse {
            text: completion_text(&raw),
            raw,
        })
    }
}

#[async_trait]
impl ChatTransport for ChatClient {
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        observer: &mut dyn StreamObserver,
        cancel: &CancellationToken,
    ) -> Result<(), ApiError> {
        ChatClient::stream_chat(self, request, observer, cancel)
            .await
            .map(|_| ())
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, ApiError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        output = future => Ok(output),
    }
}

/// Map a non-2xx response to a typed error; the body is read best effort.
async fn ensure_success(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, ApiError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let mut parts = ResponseParts::from_reqwest(&response);
    let body = until_cancelled(cancel, response.text())
        .await?
        .unwrap_or_default();
    parts.detail = error_detail(&body);
    let err = from_response(&parts);
    debug!(status = parts.status, error = %err, "request rejected");
    Err(err)
}

fn error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return error_summary(&value).filter(|summary| !summary.is_empty());
    }
    if trimmed.starts_with('<') {
        return None;
    }
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    Some(collapsed.chars().take(MAX_ERROR_DETAIL_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiMessage;
    use crate::api::MessageMeta;
    use crate::utils::test_utils::{json_reply, spawn_http_server, sse_head};

    #[derive(Default)]
    struct Collect {
        started: usize,
        deltas: Vec<String>,
        done: Vec<String>,
    }

    impl StreamObserver for Collect {
        fn on_start(&mut self) {
            self.started += 1;
        }

        fn on_delta(&mut self, text: &str, _meta: Option<&MessageMeta>) {
            self.deltas.push(text.to_string());
        }

        fn on_done(&mut self, full_text: &str) {
            self.done.push(full_text.to_string());
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("test-model", vec![ApiMessage::new("user", "Hallo?")])
    }

    fn client(base_url: String) -> ChatClient {
        let mut options = ClientOptions::new(base_url, Credentials::from_key("sk-test"));
        options.attribution = Attribution::new(
            Some("https://disaai.local".into()),
            Some("Disa AI".into()),
        );
        ChatClient::new(options)
    }

    #[tokio::test]
    async fn streams_event_stream_reply_end_to_end() {
        let (base_url, server) = spawn_http_server(vec![vec![
            sse_head(),
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hal\"}}]}\n\n".into(),
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n".into(),
        ]])
        .await;

        let mut observer = Collect::default();
        let text = client(base_url)
            .stream_chat(&request(), &mut observer, &CancellationToken::new())
            .await
            .expect("stream should succeed");

        assert_eq!(text, "Hallo");
        assert_eq!(observer.started, 1);
        assert_eq!(observer.deltas, ["Hal", "lo"]);
        assert_eq!(observer.done, ["Hallo"]);

        let captured = server.await.expect("server task");
        let sent = &captured[0];
        assert_eq!(sent.request_line, "POST /api/v1/chat/completions HTTP/1.1");
        assert_eq!(sent.header("authorization"), Some("Bearer sk-test"));
        assert_eq!(sent.header("accept"), Some("text/event-stream"));
        assert_eq!(sent.header("http-referer"), Some("https://disaai.local"));
        assert_eq!(sent.header("x-title"), Some("Disa AI"));
        let body = sent.json();
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "Hallo?");
    }

    #[tokio::test]
    async fn rejected_requests_emit_no_deltas() {
        let (base_url, _server) = spawn_http_server(vec![vec![json_reply(
            "401 Unauthorized",
            &[],
            r#"{"error":{"message":"No auth credentials found"}}"#,
        )]])
        .await;

        let mut observer = Collect::default();
        let err = client(base_url)
            .stream_chat(&request(), &mut observer, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_authentication());
        assert_eq!(
            err.message(),
            "HTTP 401: Unauthorized - No auth credentials found"
        );
        assert!(observer.deltas.is_empty());
        assert_eq!(observer.started, 0);
    }

    #[tokio::test]
    async fn rate_limits_carry_retry_after() {
        let (base_url, _server) = spawn_http_server(vec![vec![json_reply(
            "429 Too Many Requests",
            &[("Retry-After", "5")],
            "{}",
        )]])
        .await;

        let err = client(base_url)
            .stream_chat(
                &request(),
                &mut Collect::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(err.retry_after_seconds(), Some(5));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let client = ChatClient::new(ClientOptions::new(
            "http://127.0.0.1:9/api/v1",
            Credentials::none(),
        ));
        let err = client
            .stream_chat(
                &request(),
                &mut Collect::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_missing_key());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_send() {
        let (base_url, _server) = spawn_http_server(vec![vec![sse_head()]]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client(base_url)
            .stream_chat(&request(), &mut Collect::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn chat_once_returns_text_and_raw() {
        let body = r#"{"id":"gen-1","choices":[{"message":{"role":"assistant","content":"Hallo"}}]}"#;
        let (base_url, server) =
            spawn_http_server(vec![vec![json_reply("200 OK", &[], body)]]).await;

        let response = client(base_url)
            .chat_once(&request(), &CancellationToken::new())
            .await
            .expect("completion");
        assert_eq!(response.text, "Hallo");
        assert_eq!(response.raw["id"], "gen-1");

        let captured = server.await.expect("server task");
        assert_eq!(captured[0].json()["stream"], false);
    }

    #[tokio::test]
    async fn chat_once_classifies_error_body_by_code() {
        let body = r#"{"error":{"code":429,"message":"slow down"}}"#;
        let (base_url, _server) =
            spawn_http_server(vec![vec![json_reply("200 OK", &[], body)]]).await;

        let err = client(base_url)
            .chat_once(&request(), &CancellationToken::new())
            .await
            .expect_err("error body fails the call");
        assert!(err.is_rate_limit());
        assert_eq!(err.message(), "HTTP 429: Too Many Requests - slow down");
    }

    #[tokio::test]
    async fn chat_once_error_body_without_code_is_unknown() {
        let body = r#"{"error":{"message":"model overloaded"}}"#;
        let (base_url, _server) =
            spawn_http_server(vec![vec![json_reply("200 OK", &[], body)]]).await;

        let err = client(base_url)
            .chat_once(&request(), &CancellationToken::new())
            .await
            .expect_err("error body fails the call");
        assert_eq!(err.name(), "UnknownError");
        assert_eq!(err.message(), "model overloaded");
    }

    #[test]
    fn error_detail_prefers_json_summary() {
        assert_eq!(
            error_detail(r#"{"error":{"message":"bad key"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(error_detail("upstream   down").as_deref(), Some("upstream down"));
        assert_eq!(error_detail("<html>502</html>"), None);
        assert_eq!(error_detail("  "), None);
    }
}
