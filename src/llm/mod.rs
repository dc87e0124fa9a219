//! LLM integration for batch-eval.
//!
//! Provides the [`LlmProvider`] trait used by the default task executor and
//! an OpenRouter-compatible implementation.
//!
//! ```ignore
//! use batch_eval::llm::{GenerationRequest, LlmProvider, Message, OpenRouterProvider};
//!
//! let provider = OpenRouterProvider::new(api_key, "o1")?;
//! let request = GenerationRequest::new("", vec![Message::user("What is 2 + 2?")]);
//! let response = provider.generate(request).await?;
//! ```

pub mod providers;
pub mod types;

pub use providers::{OpenRouterProvider, RetryPolicy, OPENROUTER_BASE_URL};
pub use types::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
