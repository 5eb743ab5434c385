//! Chat session state: the message log and the one request allowed in flight.
//!
//! A turn is split in two so the host can run the model call wherever it
//! likes (a spawned task in the TUI) without sharing the session:
//!
//! 1. [`ChatSession::append_user_message`] validates the text, appends it and
//!    hands back a [`PendingTurn`].
//! 2. [`PendingTurn::send_to_model`] performs the call and yields a
//!    [`CompletedTurn`], which goes back through
//!    [`ChatSession::complete_turn`].
//!
//! Every change is published as a [`SessionSnapshot`] on a watch channel.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::ai::GeminiClient;
use crate::config::Config;
use crate::error::{ChatError, ChatResult};
use crate::model::{ChatModel, ContextMode, GenerationConfig, ModelRequest};
use crate::state::ChatMessage;

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub context: ContextMode,
    pub generation: GenerationConfig,
}

/// Immutable view of the session at one point in time
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub messages: Arc<Vec<ChatMessage>>,
    pub pending: bool,
    pub last_error: Option<ChatError>,
    /// Increases by one with every published change
    pub revision: u64,
}

enum Backend {
    Ready(Arc<dyn ChatModel>),
    Unconfigured(ChatError),
}

pub struct ChatSession {
    backend: Backend,
    options: SessionOptions,
    messages: Arc<Vec<ChatMessage>>,
    pending: Option<u64>,
    next_turn: u64,
    last_error: Option<ChatError>,
    revision: u64,
    updates: watch::Sender<SessionSnapshot>,
}

/// A submitted turn waiting for its model call
pub struct PendingTurn {
    id: u64,
    model: Arc<dyn ChatModel>,
    request: ModelRequest,
}

/// The outcome of a model call, to be applied with [`ChatSession::complete_turn`]
#[derive(Debug)]
pub struct CompletedTurn {
    id: u64,
    result: ChatResult<String>,
}

impl ChatSession {
    pub fn new(model: Arc<dyn ChatModel>, options: SessionOptions) -> Self {
        Self::with_backend(Backend::Ready(model), options)
    }

    /// A session that renders but refuses to send until [`configure`](Self::configure) is called.
    pub fn unconfigured(error: ChatError, options: SessionOptions) -> Self {
        Self::with_backend(Backend::Unconfigured(error), options)
    }

    /// Build a Gemini-backed session from the user's config.
    ///
    /// A missing key is logged and carried by the session rather than
    /// returned, so the view can still come up and report it.
    pub fn from_config(config: &Config) -> Self {
        Self::from_key(config, config.api_key())
    }

    fn from_key(config: &Config, api_key: ChatResult<String>) -> Self {
        let options = SessionOptions {
            context: config.context_mode(),
            generation: GenerationConfig::default(),
        };

        let client = api_key.and_then(|key| {
            GeminiClient::new(&key, config.model_name(), config.timeout_secs())
                .map_err(into_configuration)
        });

        match client {
            Ok(client) => {
                info!(
                    model = config.model_name(),
                    context = options.context.as_str(),
                    "chat session ready"
                );
                Self::new(Arc::new(client), options)
            }
            Err(err) => {
                error!(error = %err, "chat session has no usable model");
                Self::unconfigured(err, options)
            }
        }
    }

    fn with_backend(backend: Backend, options: SessionOptions) -> Self {
        let (updates, _) = watch::channel(SessionSnapshot::default());
        Self {
            backend,
            options,
            messages: Arc::new(Vec::new()),
            pending: None,
            next_turn: 1,
            last_error: None,
            revision: 0,
            updates,
        }
    }

    /// Install a model, clearing any configuration error.
    pub fn configure(&mut self, model: Arc<dyn ChatModel>) {
        info!(model = model.name(), "chat session reconfigured");
        self.backend = Backend::Ready(model);
        if matches!(self.last_error, Some(ChatError::Configuration(_))) {
            self.last_error = None;
        }
        self.publish();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn config_error(&self) -> Option<&ChatError> {
        match &self.backend {
            Backend::Unconfigured(err) => Some(err),
            Backend::Ready(_) => None,
        }
    }

    pub fn model_name(&self) -> Option<&str> {
        match &self.backend {
            Backend::Ready(model) => Some(model.name()),
            Backend::Unconfigured(_) => None,
        }
    }

    pub fn context_mode(&self) -> ContextMode {
        self.options.context
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: Arc::clone(&self.messages),
            pending: self.is_pending(),
            last_error: self.last_error.clone(),
            revision: self.revision,
        }
    }

    /// Receive a fresh snapshot after every change to the session.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    /// Validate and append a user message, starting a turn.
    ///
    /// Nothing is appended when this returns an error.
    pub fn append_user_message(&mut self, text: &str) -> ChatResult<PendingTurn> {
        let model = match &self.backend {
            Backend::Ready(model) => Arc::clone(model),
            Backend::Unconfigured(err) => return Err(err.clone()),
        };
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }
        if let Some(id) = self.pending {
            debug!(pending = id, "submission rejected while a reply is pending");
            return Err(ChatError::Busy);
        }

        let history = match self.options.context {
            ContextMode::Isolated => Vec::new(),
            ContextMode::Replay => self.messages.to_vec(),
        };

        let id = self.next_turn;
        self.next_turn += 1;
        self.pending = Some(id);
        self.last_error = None;
        Arc::make_mut(&mut self.messages).push(ChatMessage::user(text));

        info!(
            turn = id,
            context = self.options.context.as_str(),
            history = history.len(),
            "turn started"
        );
        self.publish();

        Ok(PendingTurn {
            id,
            model,
            request: ModelRequest {
                history,
                text: text.to_string(),
                generation: self.options.generation.clone(),
            },
        })
    }

    /// Apply the result of a model call.
    ///
    /// Returns the appended reply, `Ok(None)` for a turn that was cancelled
    /// or reset in the meantime, or the call's error.
    pub fn complete_turn(&mut self, turn: CompletedTurn) -> ChatResult<Option<ChatMessage>> {
        if self.pending != Some(turn.id) {
            debug!(turn = turn.id, "discarding reply for a cancelled turn");
            return Ok(None);
        }
        self.pending = None;

        match turn.result {
            Ok(text) => {
                let reply = ChatMessage::model(text);
                Arc::make_mut(&mut self.messages).push(reply.clone());
                info!(turn = turn.id, chars = reply.content().len(), "turn completed");
                self.publish();
                Ok(Some(reply))
            }
            Err(err) => {
                warn!(turn = turn.id, error = %err, "turn failed");
                self.last_error = Some(err.clone());
                self.publish();
                Err(err)
            }
        }
    }

    /// Run a whole turn in place: append, call the model, apply the reply.
    pub async fn submit(&mut self, text: &str) -> ChatResult<ChatMessage> {
        let turn = self.append_user_message(text)?;
        let done = turn.send_to_model().await;
        match self.complete_turn(done)? {
            Some(reply) => Ok(reply),
            None => Err(ChatError::Transport("turn was cancelled".to_string())),
        }
    }

    /// Forget the in-flight turn; its reply will be discarded when it arrives.
    pub fn cancel_pending(&mut self) -> bool {
        match self.pending.take() {
            Some(id) => {
                info!(turn = id, "pending turn cancelled");
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Clear the log. An in-flight turn is cancelled so its reply cannot
    /// land in the emptied conversation.
    pub fn reset(&mut self) {
        if let Some(id) = self.pending.take() {
            info!(turn = id, "pending turn cancelled by reset");
        }
        self.messages = Arc::new(Vec::new());
        self.last_error = None;
        info!("conversation reset");
        self.publish();
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.updates.send_replace(self.snapshot());
    }
}

/// A client that cannot be built blocks sending the same way a missing key does
fn into_configuration(err: ChatError) -> ChatError {
    match err {
        ChatError::Configuration(_) => err,
        other => ChatError::Configuration(format!("could not create Gemini client: {}", other)),
    }
}

impl PendingTurn {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn request(&self) -> &ModelRequest {
        &self.request
    }

    /// Issue exactly one model call for this turn.
    pub async fn send_to_model(self) -> CompletedTurn {
        let result = self.model.send_message(&self.request).await;
        CompletedTurn {
            id: self.id,
            result,
        }
    }
}

impl CompletedTurn {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ChatRole;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replies from a script and records every request it sees
    struct ScriptedModel {
        replies: Mutex<VecDeque<ChatResult<String>>>,
        requests: Mutex<Vec<ModelRequest>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(replies: Vec<ChatResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send_message(&self, request: &ModelRequest) -> ChatResult<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    fn session(model: Arc<ScriptedModel>) -> ChatSession {
        ChatSession::new(model, SessionOptions::default())
    }

    fn roles(session: &ChatSession) -> Vec<ChatRole> {
        session.messages().iter().map(|m| m.role()).collect()
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let model = ScriptedModel::new(vec![Ok("Hi there".to_string())]);
        let mut session = session(model.clone());

        let reply = session.submit("Hello").await.unwrap();

        assert_eq!(reply, ChatMessage::model("Hi there"));
        assert_eq!(
            session.messages(),
            &[ChatMessage::user("Hello"), ChatMessage::model("Hi there")]
        );
        assert!(!session.is_pending());
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_hello_failure_scenario() {
        let model = ScriptedModel::new(vec![Err(ChatError::Transport("offline".to_string()))]);
        let mut session = session(model);

        let err = session.submit("Hello").await.unwrap_err();

        assert_eq!(err, ChatError::Transport("offline".to_string()));
        assert_eq!(session.messages(), &[ChatMessage::user("Hello")]);
        assert!(!session.is_pending());
        assert_eq!(session.last_error(), Some(&err));
    }

    #[tokio::test]
    async fn test_successful_sends_alternate_roles() {
        let model = ScriptedModel::new(Vec::new());
        let mut session = session(model);

        for i in 0..4 {
            session.submit(&format!("message {}", i)).await.unwrap();
        }

        assert_eq!(session.messages().len(), 8);
        let expected: Vec<ChatRole> = (0..8)
            .map(|i| if i % 2 == 0 { ChatRole::User } else { ChatRole::Model })
            .collect();
        assert_eq!(roles(&session), expected);
    }

    #[tokio::test]
    async fn test_content_policy_failure_leaves_session_usable() {
        let model = ScriptedModel::new(vec![
            Err(ChatError::ContentPolicy("SAFETY".to_string())),
            Ok("fine".to_string()),
        ]);
        let mut session = session(model);

        assert!(session.submit("bad").await.is_err());
        assert_eq!(session.messages().len(), 1);

        session.submit("good").await.unwrap();
        assert_eq!(roles(&session), vec![ChatRole::User, ChatRole::User, ChatRole::Model]);
        assert!(session.last_error().is_none());
    }

    #[test]
    fn test_blank_input_is_rejected_without_mutation() {
        let model = ScriptedModel::new(Vec::new());
        let mut session = session(model.clone());

        for text in ["", "   ", "\n\t "] {
            assert_eq!(session.append_user_message(text).err(), Some(ChatError::EmptyInput));
        }

        assert!(session.messages().is_empty());
        assert!(!session.is_pending());
        assert_eq!(session.snapshot().revision, 0);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_submission_while_pending_is_rejected() {
        let model = ScriptedModel::new(vec![Ok("first".to_string())]);
        let mut session = session(model.clone());

        let turn = session.append_user_message("one").unwrap();
        assert_eq!(session.append_user_message("two").err(), Some(ChatError::Busy));
        assert_eq!(session.messages().len(), 1);

        let done = turn.send_to_model().await;
        session.complete_turn(done).unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(model.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_log_and_pending() {
        let model = ScriptedModel::new(Vec::new());
        let mut session = session(model);

        session.submit("Hello").await.unwrap();
        session.reset();
        assert!(session.messages().is_empty());
        assert!(!session.is_pending());

        session.reset();
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_reset_during_pending_discards_late_reply() {
        let model = ScriptedModel::new(vec![Ok("late".to_string())]);
        let mut session = session(model);

        let turn = session.append_user_message("Hello").unwrap();
        session.reset();
        assert!(session.messages().is_empty());
        assert!(!session.is_pending());

        let done = turn.send_to_model().await;
        assert_eq!(session.complete_turn(done).unwrap(), None);
        assert!(session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_turn_reply_is_discarded() {
        let model = ScriptedModel::new(vec![Ok("late".to_string())]);
        let mut session = session(model);

        let turn = session.append_user_message("Hello").unwrap();
        assert!(session.cancel_pending());
        assert!(!session.cancel_pending());

        let done = turn.send_to_model().await;
        assert_eq!(session.complete_turn(done).unwrap(), None);
        assert_eq!(session.messages(), &[ChatMessage::user("Hello")]);
    }

    #[tokio::test]
    async fn test_isolated_mode_sends_no_history() {
        let model = ScriptedModel::new(Vec::new());
        let mut session = session(model.clone());

        session.submit("first").await.unwrap();
        session.submit("second").await.unwrap();

        let requests = model.requests.lock().unwrap();
        assert!(requests.iter().all(|r| r.history.is_empty()));
        assert_eq!(requests[1].text, "second");
        assert_eq!(requests[1].generation, GenerationConfig::default());
    }

    #[tokio::test]
    async fn test_replay_mode_sends_prior_turns() {
        let model = ScriptedModel::new(vec![Ok("Hi there".to_string())]);
        let options = SessionOptions {
            context: ContextMode::Replay,
            ..SessionOptions::default()
        };
        let mut session = ChatSession::new(model.clone(), options);

        session.submit("Hello").await.unwrap();
        session.submit("And again").await.unwrap();

        let requests = model.requests.lock().unwrap();
        assert!(requests[0].history.is_empty());
        assert_eq!(
            requests[1].history,
            vec![ChatMessage::user("Hello"), ChatMessage::model("Hi there")]
        );
        assert_eq!(requests[1].text, "And again");
    }

    #[tokio::test]
    async fn test_unconfigured_session_blocks_sends() {
        let err = ChatError::Configuration("GEMINI_API_KEY is not defined".to_string());
        let mut session = ChatSession::unconfigured(err.clone(), SessionOptions::default());

        assert_eq!(session.config_error(), Some(&err));
        assert_eq!(session.append_user_message("Hello").err(), Some(err));
        assert!(session.messages().is_empty());

        let model = ScriptedModel::new(vec![Ok("configured".to_string())]);
        session.configure(model);
        assert!(session.config_error().is_none());
        assert_eq!(session.submit("Hello").await.unwrap().content(), "configured");
    }

    #[tokio::test]
    async fn test_subscribers_see_each_change() {
        let model = ScriptedModel::new(vec![Ok("Hi there".to_string())]);
        let mut session = session(model);
        let mut updates = session.subscribe();

        let turn = session.append_user_message("Hello").unwrap();
        assert!(updates.has_changed().unwrap());
        let snapshot = updates.borrow_and_update().clone();
        assert!(snapshot.pending);
        assert_eq!(snapshot.messages.len(), 1);

        session.complete_turn(turn.send_to_model().await).unwrap();
        let snapshot = updates.borrow_and_update().clone();
        assert!(!snapshot.pending);
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.revision, 2);
    }

    #[tokio::test]
    async fn test_snapshots_are_not_affected_by_later_changes() {
        let model = ScriptedModel::new(Vec::new());
        let mut session = session(model);

        session.submit("Hello").await.unwrap();
        let before = session.snapshot();
        session.reset();

        assert_eq!(before.messages.len(), 2);
        assert!(session.snapshot().messages.is_empty());
    }

    #[test]
    fn test_missing_key_yields_unconfigured_session() {
        let config = Config::new();
        let session = ChatSession::from_key(&config, Config::pick_api_key(None, None));
        assert!(matches!(session.config_error(), Some(ChatError::Configuration(_))));
        assert!(session.model_name().is_none());
    }

    #[test]
    fn test_key_from_file_yields_gemini_session() {
        let config = Config {
            gemini_api_key: Some("file-key".to_string()),
            replay_history: Some(true),
            ..Config::new()
        };
        let key = Config::pick_api_key(None, config.gemini_api_key.clone());
        let session = ChatSession::from_key(&config, key);
        assert!(session.config_error().is_none());
        assert_eq!(session.model_name(), Some("gemini-1.5-flash"));
        assert_eq!(session.context_mode(), ContextMode::Replay);
    }

    #[test]
    fn test_client_build_failures_are_configuration_errors() {
        let err = into_configuration(ChatError::Transport("no TLS backend".to_string()));
        match err {
            ChatError::Configuration(msg) => assert!(msg.contains("no TLS backend")),
            other => panic!("expected a configuration error, got {:?}", other),
        }

        let kept = into_configuration(ChatError::Configuration("empty key".to_string()));
        assert_eq!(kept, ChatError::Configuration("empty key".to_string()));
    }

    #[tokio::test]
    async fn test_turns_carry_ids_and_requests() {
        let model = ScriptedModel::new(vec![Err(ChatError::Transport("offline".to_string()))]);
        let mut session = session(model);

        let first = session.append_user_message("Hello").unwrap();
        assert_eq!(first.request().text, "Hello");
        assert!(first.request().history.is_empty());
        let first_id = first.id();

        let done = first.send_to_model().await;
        assert_eq!(done.id(), first_id);
        assert!(!done.is_ok());
        assert!(session.complete_turn(done).is_err());
        assert_eq!(
            session.snapshot().last_error,
            Some(ChatError::Transport("offline".to_string()))
        );

        let second = session.append_user_message("Again").unwrap();
        assert!(second.id() > first_id);
        assert!(session.snapshot().last_error.is_none());
        assert!(second.send_to_model().await.is_ok());
    }
}
