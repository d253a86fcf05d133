//! Subconsciousness boundary: implicit capture and the LLM interface.
//!
//! These components sit at the edge of the core. The implicit-capture store
//! is fully functional; LLM providers themselves are external collaborators
//! behind [`LlmClient`], and the core contributes only the resilience
//! envelope (breaker, rate limiting, prompt filtering).

mod llm;
mod store;

pub use llm::{
    LlmClient, LlmRequest, LlmResilienceConfig, LlmResponse, ResilientLlmClient, TokenBucket,
    parse_retry_after,
};
pub use store::{ImplicitCaptureStore, PendingCapture};
