//! History optimizer: fit conversation history into a token budget.
//!
//! Sliding window from newest to oldest: system messages and the latest turn
//! (the last user message plus every reply and tool exchange after it) are
//! always kept, older turns fill whatever budget remains and the oldest are
//! dropped first. If the mandatory messages alone exceed the budget they are
//! truncated (largest first) with an explicit marker. An assistant tool-call
//! turn is kept together with its results or dropped with them. The output
//! never exceeds the budget.

use std::collections::HashSet;

use repolens_core::message::{Message, Role};
use tracing::debug;

use crate::token::{MESSAGE_OVERHEAD, estimate_message_tokens, estimate_tokens, estimate_tool_call_tokens};

pub const TRUNCATION_MARKER: &str = "[... truncated to fit token budget ...]";

/// Trims conversation history to a default token budget.
#[derive(Debug, Clone)]
pub struct HistoryOptimizer {
    budget: usize,
}

impl HistoryOptimizer {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Optimize with the default budget, or `budget_override` when given.
    pub fn optimize(&self, history: &[Message], budget_override: Option<usize>) -> Vec<Message> {
        optimize(history, budget_override.unwrap_or(self.budget))
    }
}

impl Default for HistoryOptimizer {
    fn default() -> Self {
        Self::new(4000)
    }
}

/// Return the subset of `history` that fits `budget` estimated tokens,
/// chronological order preserved. Never fails.
pub fn optimize(history: &[Message], budget: usize) -> Vec<Message> {
    if history.is_empty() || budget == 0 {
        return Vec::new();
    }

    let tokens: Vec<usize> = history.iter().map(estimate_message_tokens).collect();
    let total: usize = tokens.iter().sum();
    if total <= budget {
        return history.to_vec();
    }

    let non_system: Vec<usize> = (0..history.len())
        .filter(|&i| history[i].role != Role::System)
        .collect();

    let mut keep = vec![false; history.len()];
    let mut used = 0;
    for (i, msg) in history.iter().enumerate() {
        if msg.role == Role::System {
            keep[i] = true;
            used += tokens[i];
        }
    }
    let tail_start = latest_turn_start(history);
    let (pinned, older): (Vec<usize>, Vec<usize>) =
        non_system.iter().partition(|&&i| i >= tail_start);
    for &i in &pinned {
        keep[i] = true;
        used += tokens[i];
    }

    // Fill newest → oldest; stop at the first turn that does not fit so the
    // kept window stays contiguous.
    for &i in older.iter().rev() {
        if used + tokens[i] > budget {
            break;
        }
        keep[i] = true;
        used += tokens[i];
    }

    let mut kept: Vec<Message> = history
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(m, _)| m.clone())
        .collect();

    drop_orphan_tool_results(&mut kept);

    if estimate_total(&kept) > budget {
        shrink_to_budget(&mut kept, budget);
    }

    debug!(
        original = history.len(),
        kept = kept.len(),
        original_tokens = total,
        kept_tokens = estimate_total(&kept),
        budget,
        "Optimized conversation history"
    );
    kept
}

/// Index where the latest turn begins: the last user message, or the last
/// non-system message when there is no user message.
fn latest_turn_start(history: &[Message]) -> usize {
    history
        .iter()
        .rposition(|m| m.role == Role::User)
        .or_else(|| history.iter().rposition(|m| m.role != Role::System))
        .unwrap_or(history.len())
}

fn estimate_total(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Providers reject tool results without their assistant turn and tool
/// calls without results: keep each exchange whole or drop it entirely.
fn drop_orphan_tool_results(messages: &mut Vec<Message>) {
    let answered: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    messages.retain(|m| {
        m.tool_calls.is_empty() || m.tool_calls.iter().all(|tc| answered.contains(&tc.id))
    });

    let issued: HashSet<String> = messages
        .iter()
        .flat_map(|m| m.tool_calls.iter().map(|tc| tc.id.clone()))
        .collect();
    messages.retain(|m| match (&m.role, &m.tool_call_id) {
        (Role::Tool, Some(id)) => issued.contains(id),
        _ => true,
    });
}

/// Truncate (largest non-system first, then system) until within budget.
/// Once nothing can shrink further, drop the oldest non-system message other
/// than the latest user message, then system messages, then that user
/// message last.
fn shrink_to_budget(messages: &mut Vec<Message>, budget: usize) {
    loop {
        let total = estimate_total(messages);
        if total <= budget || messages.is_empty() {
            return;
        }
        let excess = total - budget;

        let largest_shrinkable = |system: bool| {
            messages
                .iter()
                .enumerate()
                .filter(|(_, m)| (m.role == Role::System) == system)
                .filter(|(_, m)| estimate_message_tokens(m) > min_message_tokens(m))
                .max_by_key(|(i, m)| (estimate_message_tokens(m), *i))
                .map(|(i, _)| i)
        };

        if let Some(target) = largest_shrinkable(false).or_else(|| largest_shrinkable(true)) {
            let msg = &messages[target];
            let goal = estimate_message_tokens(msg)
                .saturating_sub(excess)
                .max(min_message_tokens(msg));
            if let Some(truncated) = truncate_message(msg, goal) {
                messages[target] = truncated;
                continue;
            }
        }

        let last_user = messages.iter().rposition(|m| m.role == Role::User);
        let victim = messages
            .iter()
            .enumerate()
            .position(|(i, m)| m.role != Role::System && Some(i) != last_user)
            .or_else(|| messages.iter().position(|m| m.role == Role::System))
            .unwrap_or(0);
        messages.remove(victim);
        drop_orphan_tool_results(messages);
    }
}

/// Smallest a message can get: overhead, tool calls and the bare marker.
fn min_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tool_call_tokens(message) + estimate_tokens(TRUNCATION_MARKER)
}

/// Cut a message's content so the whole message estimates to at most
/// `max_tokens`, appending [`TRUNCATION_MARKER`]. `None` if even the bare
/// marker does not fit.
pub fn truncate_message(message: &Message, max_tokens: usize) -> Option<Message> {
    if max_tokens < min_message_tokens(message) {
        return None;
    }
    let fixed = MESSAGE_OVERHEAD + estimate_tool_call_tokens(message);

    let content_bytes = (max_tokens - fixed) * 4;
    let keep_bytes = content_bytes.saturating_sub(TRUNCATION_MARKER.len() + 1);
    let prefix = floor_char_boundary(&message.content, keep_bytes);

    let mut truncated = message.clone();
    truncated.content = if prefix.is_empty() {
        TRUNCATION_MARKER.to_string()
    } else {
        format!("{prefix}\n{TRUNCATION_MARKER}")
    };
    Some(truncated)
}

fn floor_char_boundary(s: &str, max_bytes: usize) -> &str {
    if max_bytes >= s.len() {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
