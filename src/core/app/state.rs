//! Conversation state and the reducer that mutates it.
//!
//! [`ConversationState`] only changes through [`ConversationAction`]s. The
//! reducer performs no I/O and never reads the clock; timestamps are stamped
//! by whoever builds the message.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::SamplingParams;
use crate::core::errors::ApiError;
use crate::core::message::ChatMessage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChatStatus {
    #[default]
    Idle,
    Streaming,
    Ok,
    Error,
    RateLimited,
    MissingKey,
}

impl ChatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatStatus::Idle => "idle",
            ChatStatus::Streaming => "streaming",
            ChatStatus::Ok => "ok",
            ChatStatus::Error => "error",
            ChatStatus::RateLimited => "rate_limited",
            ChatStatus::MissingKey => "missing_key",
        }
    }
}

/// The cancellation token of the in-flight turn, tagged with its stream id.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    pub stream_id: u64,
    pub token: CancellationToken,
}

impl AbortHandle {
    pub fn new(stream_id: u64) -> Self {
        Self {
            stream_id,
            token: CancellationToken::new(),
        }
    }
}

impl PartialEq for AbortHandle {
    fn eq(&self, other: &Self) -> bool {
        self.stream_id == other.stream_id
    }
}

/// Per-conversation overrides for the outgoing request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl RequestOptions {
    /// Layer these options over `base`; set values win.
    pub fn sampling_over(&self, base: &SamplingParams) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature.or(base.temperature),
            top_p: self.top_p.or(base.top_p),
            presence_penalty: self.presence_penalty.or(base.presence_penalty),
            max_tokens: self.max_tokens.or(base.max_tokens),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub input: String,
    pub status: ChatStatus,
    pub error: Option<ApiError>,
    pub abort_handle: Option<AbortHandle>,
    pub system_prompt: Option<String>,
    pub request_options: RequestOptions,
}

#[derive(Debug, Clone)]
pub enum ConversationAction {
    AddMessage(ChatMessage),
    UpdateMessage {
        id: String,
        content: String,
    },
    /// Replace a provisional id with the id the server assigned.
    ReconcileMessage {
        provisional_id: String,
        server_id: String,
        timestamp: Option<i64>,
        model: Option<String>,
    },
    SetMessages(Vec<ChatMessage>),
    SetInput(String),
    SetStatus(ChatStatus),
    SetError(Option<ApiError>),
    SetAbortHandle(Option<AbortHandle>),
    SetSystemPrompt(Option<String>),
    SetRequestOptions(RequestOptions),
    Reset,
}

impl ConversationState {
    pub fn is_streaming(&self) -> bool {
        self.status == ChatStatus::Streaming
    }

    /// Position of the most recent message with `id`.
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().rposition(|message| message.id == id)
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.position_of(id).map(|index| &self.messages[index])
    }

    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(ChatMessage::is_user)
    }

    pub fn current_stream_id(&self) -> Option<u64> {
        self.abort_handle.as_ref().map(|handle| handle.stream_id)
    }

    /// Apply one action in place. Returns whether anything changed.
    pub fn apply(&mut self, action: ConversationAction) -> bool {
        match action {
            ConversationAction::AddMessage(message) => {
                self.messages.push(message);
                true
            }
            ConversationAction::UpdateMessage { id, content } => {
                let Some(index) = self.position_of(&id) else {
                    return false;
                };
                let message = &mut self.messages[index];
                if message.content == content {
                    return false;
                }
                message.content = content;
                true
            }
            ConversationAction::ReconcileMessage {
                provisional_id,
                server_id,
                timestamp,
                model,
            } => {
                let Some(index) = self.position_of(&provisional_id) else {
                    return false;
                };
                let message = &mut self.messages[index];
                message.id = server_id;
                if let Some(timestamp) = timestamp {
                    message.timestamp = timestamp;
                }
                if model.is_some() {
                    message.model = model;
                }
                true
            }
            ConversationAction::SetMessages(messages) => {
                if self.messages == messages {
                    return false;
                }
                self.messages = messages;
                true
            }
            ConversationAction::SetInput(input) => replace(&mut self.input, input),
            ConversationAction::SetStatus(status) => replace(&mut self.status, status),
            ConversationAction::SetError(error) => {
                if self.error.is_none() && error.is_none() {
                    return false;
                }
                self.error = error;
                true
            }
            ConversationAction::SetAbortHandle(handle) => {
                replace(&mut self.abort_handle, handle)
            }
            ConversationAction::SetSystemPrompt(prompt) => {
                let prompt = prompt.filter(|prompt| !prompt.trim().is_empty());
                replace(&mut self.system_prompt, prompt)
            }
            ConversationAction::SetRequestOptions(options) => {
                replace(&mut self.request_options, options)
            }
            ConversationAction::Reset => {
                let changed = !self.messages.is_empty()
                    || !self.input.is_empty()
                    || self.status != ChatStatus::Idle
                    || self.error.is_some()
                    || self.abort_handle.is_some();
                self.messages.clear();
                self.input.clear();
                self.status = ChatStatus::Idle;
                self.error = None;
                self.abort_handle = None;
                changed
            }
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Pure form of [`ConversationState::apply`].
pub fn reduce(mut state: ConversationState, action: ConversationAction) -> ConversationState {
    state.apply(action);
    state
}

/// Shared, observable home of one [`ConversationState`].
///
/// Subscribers are only notified when an action actually changed something.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    tx: Arc<watch::Sender<ConversationState>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(ConversationState::default())
    }
}

impl ConversationStore {
    pub fn new(initial: ConversationState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn dispatch(&self, action: ConversationAction) -> bool {
        self.tx.send_if_modified(|state| state.apply(action))
    }

    /// Apply several actions as one update.
    pub fn dispatch_all<I>(&self, actions: I) -> bool
    where
        I: IntoIterator<Item = ConversationAction>,
    {
        self.tx.send_if_modified(|state| {
            actions
                .into_iter()
                .fold(false, |changed, action| state.apply(action) | changed)
        })
    }

    /// Read the current state and apply the actions derived from it without
    /// any other update slipping in between.
    pub fn transact<R, F>(&self, f: F) -> R
    where
        R: Default,
        F: FnOnce(&ConversationState) -> (Vec<ConversationAction>, R),
    {
        let mut output = R::default();
        self.tx.send_if_modified(|state| {
            let (actions, result) = f(state);
            output = result;
            actions
                .into_iter()
                .fold(false, |changed, action| state.apply(action) | changed)
        });
        output
    }

    pub fn read<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        f(&self.tx.borrow())
    }

    pub fn snapshot(&self) -> ConversationState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use crate::utils::test_utils::{create_test_message, create_test_messages};

    fn state_with_messages() -> ConversationState {
        ConversationState {
            messages: create_test_messages(),
            ..ConversationState::default()
        }
    }

    #[test]
    fn updates_keep_position_and_only_touch_content() {
        let mut state = state_with_messages();
        let before: Vec<_> = state.messages.iter().map(|m| m.id.clone()).collect();
        for content in ["D", "Da", "Das", "Das ist neu."] {
            assert!(state.apply(ConversationAction::UpdateMessage {
                id: "a1".into(),
                content: content.into(),
            }));
            let after: Vec<_> = state.messages.iter().map(|m| m.id.clone()).collect();
            assert_eq!(after, before);
        }
        assert_eq!(state.messages[1].content, "Das ist neu.");
        assert_eq!(state.messages[1].role, Role::Assistant);
    }

    #[test]
    fn update_searches_from_tail_and_ignores_unknown_ids() {
        let mut state = state_with_messages();
        state
            .messages
            .push(create_test_message("a1", Role::Assistant, "zweite"));
        state.apply(ConversationAction::UpdateMessage {
            id: "a1".into(),
            content: "neu".into(),
        });
        assert_eq!(state.messages[1].content, "Hi! Wie kann ich helfen?");
        assert_eq!(state.messages[4].content, "neu");

        assert!(!state.apply(ConversationAction::UpdateMessage {
            id: "missing".into(),
            content: "x".into(),
        }));
        assert!(!state.apply(ConversationAction::UpdateMessage {
            id: "a1".into(),
            content: "neu".into(),
        }));
    }

    #[test]
    fn add_message_does_not_deduplicate() {
        let state = reduce(
            ConversationState::default(),
            ConversationAction::AddMessage(create_test_message("x", Role::User, "1")),
        );
        let state = reduce(
            state,
            ConversationAction::AddMessage(create_test_message("x", Role::User, "2")),
        );
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn reconcile_replaces_id_in_place() {
        let mut state = state_with_messages();
        state.apply(ConversationAction::ReconcileMessage {
            provisional_id: "a2".into(),
            server_id: "gen-42".into(),
            timestamp: Some(1_700_000_000_000),
            model: Some("m".into()),
        });
        assert_eq!(state.messages[3].id, "gen-42");
        assert_eq!(state.messages[3].timestamp, 1_700_000_000_000);
        assert_eq!(state.messages[3].model.as_deref(), Some("m"));
        assert_eq!(state.position_of("a2"), None);
    }

    #[test]
    fn reset_clears_everything_but_settings() {
        let mut state = state_with_messages();
        state.input = "draft".into();
        state.status = ChatStatus::Streaming;
        state.abort_handle = Some(AbortHandle::new(1));
        state.error = Some(ApiError::abort());
        state.system_prompt = Some("Sei nett.".into());

        assert!(state.apply(ConversationAction::Reset));
        assert!(state.messages.is_empty());
        assert!(state.input.is_empty());
        assert_eq!(state.status, ChatStatus::Idle);
        assert!(state.error.is_none());
        assert!(state.abort_handle.is_none());
        assert_eq!(state.system_prompt.as_deref(), Some("Sei nett."));
        assert!(!state.apply(ConversationAction::Reset));
    }

    #[test]
    fn request_options_override_base_sampling() {
        let options = RequestOptions {
            temperature: Some(0.2),
            ..RequestOptions::default()
        };
        let base = SamplingParams {
            temperature: Some(0.9),
            top_p: Some(0.5),
            ..SamplingParams::default()
        };
        let merged = options.sampling_over(&base);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.top_p, Some(0.5));
    }

    #[tokio::test]
    async fn store_notifies_only_on_change() {
        let store = ConversationStore::default();
        let mut rx = store.subscribe();

        assert!(!store.dispatch(ConversationAction::SetStatus(ChatStatus::Idle)));
        assert!(!rx.has_changed().expect("sender alive"));

        assert!(store.dispatch(ConversationAction::SetStatus(ChatStatus::Ok)));
        assert!(rx.has_changed().expect("sender alive"));
        assert_eq!(rx.borrow_and_update().status, ChatStatus::Ok);
    }

    #[test]
    fn transact_reads_and_writes_atomically() {
        let store = ConversationStore::new(state_with_messages());
        let truncated_len = store.transact(|state| {
            let index = state.last_user_index().expect("user turn");
            let kept = state.messages[..index].to_vec();
            let len = kept.len();
            (vec![ConversationAction::SetMessages(kept)], len)
        });
        assert_eq!(truncated_len, 2);
        assert_eq!(store.read(|state| state.messages.len()), 2);
    }

    #[test]
    fn transact_without_actions_returns_result_silently() {
        let store = ConversationStore::new(state_with_messages());
        let mut rx = store.subscribe();
        let found = store.transact(|state| (Vec::new(), state.message("a1").cloned()));
        assert_eq!(
            found.map(|message| message.content).as_deref(),
            Some("Hi! Wie kann ich helfen?")
        );
        assert!(!rx.has_changed().expect("sender alive"));
    }
}
