//! # RepoLens Core
//!
//! Domain types, traits, and error definitions for the RepoLens query engine.
//! This crate has **zero framework dependencies**; it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here. Implementations live
//! in their respective crates. This enables:
//! - Swapping LLM backends and Git hosts via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod document;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use document::{DocumentSource, RepositoryContext};
pub use error::{DocumentError, ProviderError, ToolError};
pub use message::{Message, Role};
pub use provider::{
    Provider, ProviderReply, ProviderRequest, ProviderStream, RawToolCall, StreamChunk,
    ToolCallFragment, ToolChoice, Usage,
};
pub use tool::{
    ParamKind, ParameterSchema, ParameterSpec, SchemaDialect, ToolCall, ToolDefinition,
    ToolExecutionResult, ToolHandler,
};
