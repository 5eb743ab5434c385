//! Shared test doubles for the view tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chatguru_core::{
    ChatError, ChatModel, ChatResult, ChatSession, Config, ModelRequest, SessionOptions,
};

use crate::app::App;

/// Replies with the request text, or refuses every message when `fail` is set
pub struct EchoModel {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl ChatModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn send_message(&self, request: &ModelRequest) -> ChatResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(ChatError::ContentPolicy("SAFETY".to_string()))
        } else {
            Ok(format!("echo: {}", request.text))
        }
    }
}

pub fn test_app(fail: bool) -> (App, Arc<EchoModel>) {
    let model = Arc::new(EchoModel {
        calls: AtomicUsize::new(0),
        fail,
    });
    let session = ChatSession::new(model.clone(), SessionOptions::default());
    (App::with_session(session, Config::new(), None), model)
}
