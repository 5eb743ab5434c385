use thiserror::Error;

/// Everything that can go wrong between a submission and a reply.
///
/// All variants are caught at the session boundary. Only `Configuration`
/// blocks further sends; the rest leave the session idle and usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("model declined to respond: {0}")]
    ContentPolicy(String),

    #[error("message is empty")]
    EmptyInput,

    #[error("a reply is still pending")]
    Busy,
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// Text suitable for showing to the user in a status line
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Configuration(msg) => msg.clone(),
            ChatError::Transport(msg) => format!("Could not get a reply: {}", msg),
            ChatError::ContentPolicy(_) => "Inappropriate Content Warning!".to_string(),
            ChatError::EmptyInput => "Type a message first".to_string(),
            ChatError::Busy => "Still waiting for the last reply".to_string(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ChatError::Configuration(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Transport("request timed out".to_string())
        } else {
            ChatError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Transport(format!("malformed response: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_policy_has_distinct_user_message() {
        let err = ChatError::ContentPolicy("SAFETY".to_string());
        assert_eq!(err.user_message(), "Inappropriate Content Warning!");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_configuration_is_not_recoverable() {
        let err = ChatError::Configuration("GEMINI_API_KEY is not defined".to_string());
        assert!(!err.is_recoverable());
        assert_eq!(err.user_message(), "GEMINI_API_KEY is not defined");
    }

    #[test]
    fn test_json_errors_map_to_transport() {
        let err: ChatError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, ChatError::Transport(_)));
    }
}
