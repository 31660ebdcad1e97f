use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::state::{
    AbortHandle, ChatStatus, ConversationAction, ConversationState, ConversationStore,
    RequestOptions,
};
use crate::api::{ApiMessage, ChatRequest, MessageMeta, SamplingParams};
use crate::core::chat_stream::{ChatTransport, StreamObserver};
use crate::core::constants::{DEFAULT_RATE_LIMIT_COOLDOWN_SECS, MIN_RATE_LIMIT_COOLDOWN_SECS};
use crate::core::errors::{ApiError, HttpErrorKind};
use crate::core::message::{ChatMessage, NewMessage, Role};

#[derive(Debug, Clone)]
pub struct ConversationSettings {
    pub model: String,
    pub sampling: SamplingParams,
    /// Cooldown after a rate limit that named no retry delay.
    pub default_cooldown: Duration,
    /// Lower bound for any rate-limit cooldown.
    pub min_cooldown: Duration,
}

impl ConversationSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            sampling: SamplingParams::default(),
            default_cooldown: Duration::from_secs(DEFAULT_RATE_LIMIT_COOLDOWN_SECS),
            min_cooldown: Duration::from_secs(MIN_RATE_LIMIT_COOLDOWN_SECS),
        }
    }
}

/// History plus the turn to send on top of it.
struct PreparedTurn {
    history: Vec<ChatMessage>,
    message: NewMessage,
    /// Replace the transcript with `history` before appending.
    truncate: bool,
}

struct Inner {
    store: ConversationStore,
    transport: Arc<dyn ChatTransport>,
    settings: ConversationSettings,
    next_stream_id: AtomicU64,
    cooldown_until: Mutex<Option<Instant>>,
}

/// Drives turns against a [`ChatTransport`] and folds the results into a
/// [`ConversationStore`].
///
/// Every send uses the message list captured at the moment it was invoked;
/// later changes to the store never leak into an in-flight request. Only one
/// turn streams at a time: starting another stops the previous one first.
#[derive(Clone)]
pub struct Conversation {
    inner: Arc<Inner>,
}

impl Conversation {
    pub fn new(transport: Arc<dyn ChatTransport>, settings: ConversationSettings) -> Self {
        Self::with_store(transport, settings, ConversationStore::default())
    }

    pub fn with_store(
        transport: Arc<dyn ChatTransport>,
        settings: ConversationSettings,
        store: ConversationStore,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                settings,
                next_stream_id: AtomicU64::new(1),
                cooldown_until: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.inner.store
    }

    pub fn state(&self) -> ConversationState {
        self.inner.store.snapshot()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<ConversationState> {
        self.inner.store.subscribe()
    }

    pub fn set_input(&self, input: impl Into<String>) {
        self.inner
            .store
            .dispatch(ConversationAction::SetInput(input.into()));
    }

    pub fn set_system_prompt(&self, prompt: Option<String>) {
        self.inner
            .store
            .dispatch(ConversationAction::SetSystemPrompt(prompt));
    }

    pub fn set_request_options(&self, options: RequestOptions) {
        self.inner
            .store
            .dispatch(ConversationAction::SetRequestOptions(options));
    }

    /// Replace the transcript, e.g. with history loaded from an external store.
    pub fn set_messages(&self, messages: Vec<ChatMessage>) {
        self.inner
            .store
            .dispatch(ConversationAction::SetMessages(messages));
    }

    /// Send a new turn on top of the current transcript.
    ///
    /// Resolves to the finished assistant message, `None` when the turn was
    /// stopped, or the typed error that ended it.
    pub async fn append(
        &self,
        message: impl Into<NewMessage>,
    ) -> Result<Option<ChatMessage>, ApiError> {
        let message = message.into();
        self.run_turn(move |state| {
            Some(PreparedTurn {
                history: state.messages.clone(),
                message,
                truncate: false,
            })
        })
        .await
    }

    /// Send a turn on top of a caller-supplied history instead of the transcript.
    pub async fn append_with_history(
        &self,
        message: impl Into<NewMessage>,
        history: Vec<ChatMessage>,
    ) -> Result<Option<ChatMessage>, ApiError> {
        let message = message.into();
        self.run_turn(move |_| {
            Some(PreparedTurn {
                history,
                message,
                truncate: false,
            })
        })
        .await
    }

    /// Fire the held cancellation token. No-op when nothing is in flight.
    pub fn stop(&self) {
        let handle = self
            .inner
            .store
            .read(|state| state.abort_handle.clone());
        if let Some(handle) = handle {
            debug!(stream_id = handle.stream_id, "stopping stream");
            handle.token.cancel();
        }
    }

    /// Stop any stream and start a fresh conversation.
    pub fn reset(&self) {
        self.stop();
        self.inner.store.dispatch(ConversationAction::Reset);
    }

    /// Re-send the most recent user turn, dropping everything after it.
    pub async fn reload(&self) -> Result<Option<ChatMessage>, ApiError> {
        self.run_turn(|state| {
            let index = state.last_user_index()?;
            Some(resend_from(state, index, None))
        })
        .await
    }

    /// Edit a message. A user turn is truncated and re-sent with the new
    /// content; any other message is rewritten in place.
    pub async fn edit(
        &self,
        id: &str,
        content: impl Into<String>,
    ) -> Result<Option<ChatMessage>, ApiError> {
        let content = content.into();
        let target = self
            .inner
            .store
            .read(|state| state.message(id).map(|message| message.role));

        match target {
            None => Ok(None),
            Some(Role::User) => {
                self.run_turn(|state| {
                    let index = state.position_of(id)?;
                    Some(resend_from(state, index, Some(content)))
                })
                .await
            }
            Some(_) => {
                let store = &self.inner.store;
                store.dispatch(ConversationAction::UpdateMessage {
                    id: id.to_string(),
                    content,
                });
                Ok(store.read(|state| state.message(id).cloned()))
            }
        }
    }

    /// Re-send the user turn that produced `id` (or `id` itself if it is a
    /// user turn), dropping everything after it.
    pub async fn retry(&self, id: &str) -> Result<Option<ChatMessage>, ApiError> {
        self.run_turn(|state| {
            let target = state.position_of(id)?;
            let index = state.messages[..=target]
                .iter()
                .rposition(ChatMessage::is_user)?;
            Some(resend_from(state, index, None))
        })
        .await
    }

    /// Time left before another send is allowed after a rate limit.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = (*self.cooldown_slot())?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    fn cooldown_slot(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.inner
            .cooldown_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_stream_id(&self) -> u64 {
        self.inner.next_stream_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn run_turn<P>(&self, prepare: P) -> Result<Option<ChatMessage>, ApiError>
    where
        P: FnOnce(&ConversationState) -> Option<PreparedTurn>,
    {
        if let Some(remaining) = self.cooldown_remaining() {
            let seconds = ceil_secs(remaining);
            let err = ApiError::rate_limited(cooldown_message(seconds), Some(seconds));
            self.inner.store.dispatch_all([
                ConversationAction::SetStatus(ChatStatus::RateLimited),
                ConversationAction::SetError(Some(err.clone())),
            ]);
            debug!(seconds, "send blocked by rate-limit cooldown");
            return Err(err);
        }

        let handle = AbortHandle::new(self.next_stream_id());
        let stream_id = handle.stream_id;
        let token = handle.token.clone();
        let settings = &self.inner.settings;

        let started = self.inner.store.transact(|state| {
            let Some(turn) = prepare(state) else {
                return (Vec::new(), None);
            };
            if let Some(previous) = &state.abort_handle {
                debug!(stream_id = previous.stream_id, "superseding stream");
                previous.token.cancel();
            }

            let model = state
                .request_options
                .model
                .clone()
                .unwrap_or_else(|| settings.model.clone());
            let sampling = state.request_options.sampling_over(&settings.sampling);

            let user = ChatMessage::new(turn.message.role, turn.message.content);
            let mut assistant = ChatMessage::provisional_assistant();
            assistant.model = Some(model.clone());

            let request = build_request(
                &model,
                sampling,
                state.system_prompt.as_deref(),
                &turn.history,
                &user,
            );

            let mut actions = Vec::with_capacity(7);
            if turn.truncate && turn.history != state.messages {
                actions.push(ConversationAction::SetMessages(turn.history));
            }
            actions.extend([
                ConversationAction::AddMessage(user),
                ConversationAction::AddMessage(assistant.clone()),
                ConversationAction::SetInput(String::new()),
                ConversationAction::SetError(None),
                ConversationAction::SetStatus(ChatStatus::Streaming),
                ConversationAction::SetAbortHandle(Some(handle)),
            ]);
            (actions, Some((request, assistant.id)))
        });

        let Some((request, provisional_id)) = started else {
            return Ok(None);
        };

        debug!(
            stream_id,
            model = %request.model,
            messages = request.messages.len(),
            "turn started"
        );

        let mut observer = TurnObserver::new(self.inner.store.clone(), provisional_id);
        let result = self
            .inner
            .transport
            .stream_chat(&request, &mut observer, &token)
            .await;
        let assistant_id = observer.current_id;

        match result {
            Ok(()) => Ok(self.finish_turn(stream_id, &assistant_id)),
            Err(err) => self.fail_turn(stream_id, &assistant_id, err),
        }
    }

    fn finish_turn(&self, stream_id: u64, assistant_id: &str) -> Option<ChatMessage> {
        debug!(stream_id, "turn completed");
        self.inner.store.transact(|state| {
            let mut actions = Vec::new();
            if state.current_stream_id() == Some(stream_id) {
                actions.push(ConversationAction::SetStatus(ChatStatus::Ok));
                actions.push(ConversationAction::SetAbortHandle(None));
            }
            (actions, state.message(assistant_id).cloned())
        })
    }

    fn fail_turn(
        &self,
        stream_id: u64,
        assistant_id: &str,
        err: ApiError,
    ) -> Result<Option<ChatMessage>, ApiError> {
        if err.is_abort() {
            debug!(stream_id, "turn aborted");
            self.inner.store.transact(|state| {
                let mut actions = Vec::new();
                if let Some(index) = state.position_of(assistant_id) {
                    actions.push(ConversationAction::SetMessages(without(
                        &state.messages,
                        index,
                    )));
                }
                if state.current_stream_id() == Some(stream_id) {
                    actions.push(ConversationAction::SetStatus(ChatStatus::Idle));
                    actions.push(ConversationAction::SetAbortHandle(None));
                }
                (actions, ())
            });
            return Ok(None);
        }

        let (status, err) = if err.is_authentication() || err.is_missing_key() {
            (ChatStatus::MissingKey, err)
        } else if err.is_rate_limit() {
            (ChatStatus::RateLimited, self.start_cooldown(err))
        } else {
            (ChatStatus::Error, err)
        };
        warn!(stream_id, error = %err, status = status.as_str(), "turn failed");

        self.inner.store.transact(|state| {
            let mut actions = Vec::new();
            let empty = state
                .position_of(assistant_id)
                .filter(|index| state.messages[*index].content.is_empty());
            if let Some(index) = empty {
                actions.push(ConversationAction::SetMessages(without(
                    &state.messages,
                    index,
                )));
            }
            if state.current_stream_id() == Some(stream_id) {
                actions.push(ConversationAction::SetStatus(status));
                actions.push(ConversationAction::SetError(Some(err.clone())));
                actions.push(ConversationAction::SetAbortHandle(None));
            }
            (actions, ())
        });
        Err(err)
    }

    /// Store the cooldown and rewrite the error for display.
    fn start_cooldown(&self, err: ApiError) -> ApiError {
        let settings = &self.inner.settings;
        let wait = err
            .retry_after_seconds()
            .map(Duration::from_secs)
            .unwrap_or(settings.default_cooldown)
            .max(settings.min_cooldown);
        let seconds = ceil_secs(wait);
        *self.cooldown_slot() = Some(Instant::now() + wait);

        match err {
            ApiError::Http(mut http) => {
                http.message = cooldown_message(seconds);
                http.kind = HttpErrorKind::RateLimit {
                    retry_after_seconds: Some(seconds),
                };
                ApiError::Http(http)
            }
            other => other,
        }
    }
}

fn resend_from(
    state: &ConversationState,
    index: usize,
    content: Option<String>,
) -> PreparedTurn {
    let original = &state.messages[index];
    PreparedTurn {
        history: state.messages[..index].to_vec(),
        message: NewMessage {
            role: original.role,
            content: content.unwrap_or_else(|| original.content.clone()),
        },
        truncate: true,
    }
}

/// The transcript minus the message at `index`. Earlier messages may share
/// its id when a provider reuses ids across turns; they stay.
fn without(messages: &[ChatMessage], index: usize) -> Vec<ChatMessage> {
    let mut kept = messages.to_vec();
    kept.remove(index);
    kept
}

fn build_request(
    model: &str,
    sampling: SamplingParams,
    system_prompt: Option<&str>,
    history: &[ChatMessage],
    user: &ChatMessage,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    let has_system = history
        .first()
        .is_some_and(|message| message.role == Role::System);
    if let (Some(prompt), false) = (system_prompt, has_system) {
        messages.push(ApiMessage::new(Role::System.as_str(), prompt));
    }
    messages.extend(history.iter().map(ChatMessage::to_api));
    messages.push(user.to_api());
    ChatRequest::new(model, messages).with_params(sampling)
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

fn cooldown_message(seconds: u64) -> String {
    if seconds > 1 {
        format!("Rate-Limit aktiv. Bitte warte {seconds} Sekunden.")
    } else {
        "Rate-Limit aktiv. Einen Moment bitte …".to_string()
    }
}

/// Folds one turn's stream into the store.
struct TurnObserver {
    store: ConversationStore,
    current_id: String,
    reconciled: bool,
    content: String,
}

impl TurnObserver {
    fn new(store: ConversationStore, provisional_id: String) -> Self {
        Self {
            store,
            current_id: provisional_id,
            reconciled: false,
            content: String::new(),
        }
    }

    /// Adopt the first server id seen; later ids are ignored.
    fn reconcile(&mut self, meta: &MessageMeta) {
        if self.reconciled {
            return;
        }
        let Some(server_id) = meta.id.as_ref() else {
            return;
        };
        self.reconciled = true;
        if *server_id == self.current_id {
            return;
        }
        debug!(
            provisional_id = %self.current_id,
            server_id = %server_id,
            "reconciled assistant message id"
        );
        self.store.dispatch(ConversationAction::ReconcileMessage {
            provisional_id: self.current_id.clone(),
            server_id: server_id.clone(),
            timestamp: meta.timestamp,
            model: meta.model.clone(),
        });
        self.current_id = server_id.clone();
    }

    fn publish(&self) {
        self.store.dispatch(ConversationAction::UpdateMessage {
            id: self.current_id.clone(),
            content: self.content.clone(),
        });
    }
}

impl StreamObserver for TurnObserver {
    fn on_delta(&mut self, text: &str, meta: Option<&MessageMeta>) {
        if let Some(meta) = meta {
            self.reconcile(meta);
        }
        self.content.push_str(text);
        self.publish();
    }

    fn on_metadata(&mut self, meta: &MessageMeta) {
        self.reconcile(meta);
    }

    fn on_done(&mut self, full_text: &str) {
        if self.content != full_text {
            self.content = full_text.to_string();
            self.publish();
        }
    }
}
