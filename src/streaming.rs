//! Reassembly of tool calls split across streaming chunks.
//!
//! OpenAI-family backends stream a tool call as a series of deltas keyed
//! by an integer `index`: the id and function name usually arrive in the
//! first fragment, the JSON `arguments` string dribbles in over many.
//! Nothing may be emitted until the chunk carrying a `finish_reason`
//! arrives, at which point every accumulated entry drains into the single
//! terminal chunk.
//!
//! The accumulator is a plain value owned by the stream that created it,
//! not by the adapter, so concurrent streams from one adapter cannot see
//! each other's fragments.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::warn;

use crate::canonical::FunctionCall;

/// Parse a raw tool-call `arguments` string into an argument map.
///
/// The empty string means "no arguments". Anything that is not a JSON
/// object (including invalid JSON) also degrades to an empty map, logged;
/// the call itself is still emitted so the chat loop can surface the tool
/// invocation rather than dropping it silently.
pub(crate) fn parse_tool_arguments(raw: &str, tool_name: &str) -> serde_json::Map<String, JsonValue> {
    if raw.is_empty() {
        return serde_json::Map::new();
    }
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Object(map)) => map,
        Ok(other) => {
            warn!(
                tool = tool_name,
                got = %other,
                "tool arguments are valid JSON but not an object; using empty args"
            );
            serde_json::Map::new()
        }
        Err(e) => {
            warn!(
                tool = tool_name,
                error = %e,
                raw = raw,
                "tool arguments are not valid JSON; using empty args"
            );
            serde_json::Map::new()
        }
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Per-stream state mapping wire `index` to a partially assembled call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    entries: BTreeMap<usize, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one `tool_calls` delta entry into the state.
    ///
    /// `id` and `name` overwrite when present; `arguments` fragments
    /// always append, never replace.
    pub fn absorb(
        &mut self,
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let entry = self.entries.entry(index).or_default();
        if let Some(id) = id {
            entry.id = Some(id.to_string());
        }
        if let Some(name) = name {
            entry.name = Some(name.to_string());
        }
        if let Some(fragment) = arguments {
            entry.arguments.push_str(fragment);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct indices observed so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Finalize every accumulated entry, in index order, clearing the
    /// state. Each index yields exactly one call; a backend that omitted
    /// the id gets a synthesized `call_<index>`.
    pub fn drain(&mut self) -> Vec<FunctionCall> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(index, entry)| {
                let name = entry.name.unwrap_or_default();
                let args = parse_tool_arguments(&entry.arguments, &name);
                FunctionCall {
                    id: entry.id.or_else(|| Some(format!("call_{index}"))),
                    name,
                    args,
                }
            })
            .collect()
    }

    /// Drop all pending state, e.g. when the stream reader fails.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
