pub mod client;
pub mod config;
pub mod openai;
pub mod retry;

pub use client::{ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{build_llm_client, BoundedClient, LlmConfig};
pub use openai::OpenAiCompatibleClient;
pub use retry::RetryingClient;
