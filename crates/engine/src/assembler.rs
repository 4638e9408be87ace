//! Response assembly: raw provider output to the canonical response shape.
//!
//! Providers report tool calls "raw": ids may be missing or repeated and
//! arguments are unparsed JSON text, possibly split across stream chunks.
//! This module normalizes them into [`ToolCall`]s with request-unique ids
//! and accumulates usage and tool results across rounds.

use std::collections::{BTreeMap, HashSet};

use repolens_core::provider::{RawToolCall, ToolCallFragment, Usage};
use repolens_core::tool::{ToolCall, ToolExecutionResult};
use tracing::warn;

use crate::types::QueryResponse;

/// Parse tool-call argument text. Empty text means no arguments; malformed
/// JSON is kept as a string so schema validation rejects the call.
pub fn parse_arguments(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|e| {
        warn!(error = %e, "Tool call arguments are not valid JSON");
        serde_json::Value::String(raw.to_string())
    })
}

/// Accumulates everything one request produces across provider rounds.
#[derive(Debug)]
pub struct ResponseAssembler {
    provider: String,
    model: String,
    usage: Usage,
    content: String,
    tool_calls: Vec<ToolCall>,
    results: Vec<ToolExecutionResult>,
    seen_ids: HashSet<String>,
    iterations: u32,
}

impl ResponseAssembler {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            usage: Usage::default(),
            content: String::new(),
            tool_calls: Vec::new(),
            results: Vec::new(),
            seen_ids: HashSet::new(),
            iterations: 0,
        }
    }

    /// Record one provider round. The latest non-empty text wins as the
    /// answer; the provider-reported model replaces the requested one.
    pub fn record_turn(&mut self, content: &str, usage: Option<Usage>, model: Option<&str>) {
        self.iterations += 1;
        if let Some(usage) = usage {
            self.usage.accumulate(&usage);
        }
        if !content.trim().is_empty() {
            self.content = content.to_string();
        }
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            self.model = model.to_string();
        }
    }

    /// Normalize one round's raw tool calls. Missing ids are synthesized as
    /// `call_<n>`; an id already used in this request gets a numeric suffix.
    pub fn normalize_tool_calls(&mut self, raw: Vec<RawToolCall>) -> Vec<ToolCall> {
        let calls: Vec<ToolCall> = raw
            .into_iter()
            .map(|rc| {
                let base = rc
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("call_{}", self.seen_ids.len()));
                let id = self.unique_id(base);
                ToolCall {
                    id,
                    function_name: rc.name,
                    arguments: parse_arguments(&rc.arguments),
                }
            })
            .collect();
        self.tool_calls.extend(calls.iter().cloned());
        calls
    }

    fn unique_id(&mut self, base: String) -> String {
        let mut id = base.clone();
        let mut suffix = 1;
        while self.seen_ids.contains(&id) {
            id = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.seen_ids.insert(id.clone());
        id
    }

    pub fn record_results(&mut self, results: Vec<ToolExecutionResult>) {
        self.results.extend(results);
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn finish(self, iteration_limit_reached: bool) -> QueryResponse {
        QueryResponse {
            content: self.content,
            model: self.model,
            provider: self.provider,
            usage: self.usage,
            tool_calls: self.tool_calls,
            tool_execution_results: self.results,
            cached: false,
            iterations: self.iterations,
            iteration_limit_reached,
        }
    }
}

/// Reassembles streamed tool-call fragments, keyed by index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    by_index: BTreeMap<u32, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    pub fn merge(&mut self, fragment: ToolCallFragment) {
        let entry = self.by_index.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            entry.id = Some(id);
        }
        if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
            entry.name = Some(name);
        }
        if let Some(arguments) = fragment.arguments {
            entry.arguments.push_str(&arguments);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Complete calls in index order. A call that never received a name is
    /// kept with an empty one so it still gets an (error) result.
    pub fn finish(self) -> Vec<RawToolCall> {
        self.by_index
            .into_iter()
            .map(|(index, partial)| {
                if partial.name.is_none() {
                    warn!(index, "Streamed tool call has no function name");
                }
                RawToolCall {
                    id: partial.id,
                    name: partial.name.unwrap_or_default(),
                    arguments: partial.arguments,
                }
            })
            .collect()
    }
}
