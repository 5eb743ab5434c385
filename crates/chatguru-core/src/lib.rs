pub mod ai;
pub mod config;
pub mod error;
pub mod model;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use ai::GeminiClient;
pub use config::Config;
pub use error::{ChatError, ChatResult};
pub use model::{ChatModel, ContextMode, GenerationConfig, ModelRequest};
pub use session::{ChatSession, CompletedTurn, PendingTurn, SessionOptions, SessionSnapshot};
pub use state::{ChatMessage, ChatRole};
