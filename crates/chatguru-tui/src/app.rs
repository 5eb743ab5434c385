use std::path::PathBuf;
use std::sync::Arc;

use ratatui::layout::Rect;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use chatguru_core::{ChatError, ChatSession, CompletedTurn, Config, GeminiClient, SessionSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Warning,
    Error,
}

/// A status-line message that fades after a few ticks
#[derive(Debug, Clone)]
pub struct Notice {
    pub text: String,
    pub kind: NoticeKind,
    /// `None` keeps the notice until replaced
    ticks_left: Option<u16>,
}

/// Ticks a transient notice stays on screen (~4s at the tick rate)
const NOTICE_TICKS: u16 = 35;

pub struct App {
    pub should_quit: bool,
    pub input_mode: InputMode,

    pub session: ChatSession,
    pub updates: watch::Receiver<SessionSnapshot>,
    /// What the view renders; refreshed from `updates`
    pub snapshot: SessionSnapshot,
    pub turn_task: Option<JoinHandle<CompletedTurn>>,

    // Input box
    pub input: String,
    pub cursor: usize,

    // Chat scrolling
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub max_scroll: u16,
    pub follow_latest: bool,
    pub chat_area: Option<Rect>,

    pub spinner_frame: usize,
    pub notice: Option<Notice>,

    // API key popup
    pub show_api_key_input: bool,
    pub api_key_input: String,
    pub api_key_input_cursor: usize,

    pub config: Config,
    config_path: Option<PathBuf>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let session = ChatSession::from_config(&config);
        let config_path = Config::config_path().ok();
        Self::with_session(session, config, config_path)
    }

    pub fn with_session(
        session: ChatSession,
        config: Config,
        config_path: Option<PathBuf>,
    ) -> Self {
        let updates = session.subscribe();
        let snapshot = session.snapshot();
        let notice = session.config_error().map(|err| Notice {
            text: err.user_message(),
            kind: NoticeKind::Error,
            ticks_left: None,
        });

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            session,
            updates,
            snapshot,
            turn_task: None,

            input: String::new(),
            cursor: 0,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            max_scroll: 0,
            follow_latest: true,
            chat_area: None,

            spinner_frame: 0,
            notice,

            show_api_key_input: false,
            api_key_input: String::new(),
            api_key_input_cursor: 0,

            config,
            config_path,
        }
    }

    pub fn model_label(&self) -> &str {
        self.session.model_name().unwrap_or("not configured")
    }

    pub fn is_pending(&self) -> bool {
        self.snapshot.pending
    }

    /// Take the typed text and start a turn for it.
    pub fn submit_input(&mut self) {
        match self.session.append_user_message(&self.input) {
            Ok(turn) => {
                debug!(turn = turn.id(), "spawning model call");
                self.input.clear();
                self.cursor = 0;
                self.turn_task = Some(tokio::spawn(turn.send_to_model()));
            }
            // Blank input is ignored silently, like tapping send on an empty box
            Err(ChatError::EmptyInput) => {}
            Err(err) => self.show_error(&err),
        }
    }

    /// Apply the result of the background model call.
    pub fn finish_turn(&mut self, joined: Result<CompletedTurn, JoinError>) {
        self.turn_task = None;
        match joined {
            Ok(done) => {
                debug!(turn = done.id(), ok = done.is_ok(), "model call returned");
                if let Err(err) = self.session.complete_turn(done) {
                    self.show_error(&err);
                }
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                error!(error = %err, "model task failed");
                self.session.cancel_pending();
                self.set_notice("The request failed unexpectedly", NoticeKind::Error);
            }
        }
    }

    /// Pull the latest session snapshot if it changed. Returns whether it did.
    pub fn sync_session(&mut self) -> bool {
        if !self.updates.has_changed().unwrap_or(false) {
            return false;
        }
        self.on_session_update();
        true
    }

    /// Called whenever the session publishes a change
    pub fn on_session_update(&mut self) {
        let snapshot = self.updates.borrow_and_update().clone();
        if snapshot.messages.len() != self.snapshot.messages.len()
            || snapshot.pending != self.snapshot.pending
        {
            self.follow_latest = true;
        }
        self.snapshot = snapshot;
    }

    pub fn reset_conversation(&mut self) {
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
        self.session.reset();
        self.chat_scroll = 0;
        self.set_notice("Conversation cleared", NoticeKind::Info);
    }

    /// Stop any in-flight request before the view goes away.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.turn_task.take() {
            task.abort();
        }
        self.session.cancel_pending();
    }

    pub fn tick(&mut self) {
        if self.snapshot.pending {
            self.spinner_frame = self.spinner_frame.wrapping_add(1);
        }

        let expired = match self.notice.as_mut().and_then(|n| n.ticks_left.as_mut()) {
            Some(ticks) => {
                *ticks = ticks.saturating_sub(1);
                *ticks == 0
            }
            None => false,
        };
        if expired {
            self.notice = None;
        }
    }

    pub fn set_notice(&mut self, text: impl Into<String>, kind: NoticeKind) {
        self.notice = Some(Notice {
            text: text.into(),
            kind,
            ticks_left: Some(NOTICE_TICKS),
        });
    }

    fn show_error(&mut self, err: &ChatError) {
        let kind = if err.is_recoverable() {
            NoticeKind::Warning
        } else {
            NoticeKind::Error
        };
        self.notice = Some(Notice {
            text: err.user_message(),
            kind,
            ticks_left: if err.is_recoverable() { Some(NOTICE_TICKS) } else { None },
        });
    }

    // Chat scrolling
    pub fn scroll_up(&mut self, lines: u16) {
        self.follow_latest = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines).min(self.max_scroll);
        if self.chat_scroll >= self.max_scroll {
            self.follow_latest = true;
        }
    }

    pub fn scroll_half_page_up(&mut self) {
        self.scroll_up((self.chat_height / 2).max(1));
    }

    pub fn scroll_half_page_down(&mut self) {
        self.scroll_down((self.chat_height / 2).max(1));
    }

    pub fn scroll_to_top(&mut self) {
        self.follow_latest = false;
        self.chat_scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.follow_latest = true;
    }

    // API key popup
    pub fn open_api_key_input(&mut self) {
        self.show_api_key_input = true;
        self.api_key_input.clear();
        self.api_key_input_cursor = 0;
    }

    pub fn close_api_key_input(&mut self) {
        self.show_api_key_input = false;
        self.api_key_input.clear();
        self.api_key_input_cursor = 0;
    }

    /// Use the entered key for this session and remember it in the config file.
    pub fn save_api_key(&mut self) {
        let key = self.api_key_input.trim().to_string();
        if key.is_empty() {
            self.close_api_key_input();
            return;
        }

        match GeminiClient::new(&key, self.config.model_name(), self.config.timeout_secs()) {
            Ok(client) => {
                self.session.configure(Arc::new(client));
                self.config.gemini_api_key = Some(key);
                match &self.config_path {
                    Some(path) => match self.config.save_to(path) {
                        Ok(()) => {
                            info!(path = %path.display(), "API key saved");
                            self.set_notice("API key saved", NoticeKind::Info);
                        }
                        Err(err) => {
                            warn!(error = %err, "could not save config");
                            self.set_notice(
                                "API key set for this session (could not save config)",
                                NoticeKind::Warning,
                            );
                        }
                    },
                    None => self.set_notice("API key set for this session", NoticeKind::Info),
                }
            }
            Err(err) => self.show_error(&err),
        }

        self.close_api_key_input();
    }
}

/// Resolve the in-flight turn, or wait forever when there is none.
pub async fn next_turn(
    task: &mut Option<JoinHandle<CompletedTurn>>,
) -> Result<CompletedTurn, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
