//! Concrete LLM provider implementations.

pub mod openrouter;

pub use openrouter::{OpenRouterProvider, RetryPolicy, OPENROUTER_BASE_URL};
