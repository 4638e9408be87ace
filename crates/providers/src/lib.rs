//! LLM Provider implementations for RepoLens.
//!
//! All providers implement the `repolens_core::Provider` trait.
//! The router selects the provider a request names; the retry module wraps
//! individual calls with timeouts and bounded exponential backoff.

pub mod openai_compat;
pub mod retry;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, call_with_retry};
pub use router::{ProviderRouter, build_from_config};
