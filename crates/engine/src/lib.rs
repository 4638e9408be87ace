//! RepoLens query engine.
//!
//! Turns a [`QueryRequest`] into a [`QueryResponse`] (or a stream of
//! [`StreamEvent`]s): cache lookup, system prompt assembly, history
//! trimming, the provider/tool loop and response assembly.

pub mod assembler;
pub mod cache;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod prompt;
pub mod stream;
pub mod token;
pub mod types;

pub use cache::{CacheStore, SweeperHandle};
pub use error::{ErrorBody, QueryError};
pub use history::HistoryOptimizer;
pub use orchestrator::{EngineSettings, QueryOrchestrator};
pub use prompt::SystemPromptBuilder;
pub use stream::{QueryStream, StreamCoordinator};
pub use types::{QueryOptions, QueryRequest, QueryResponse, StreamEvent};
