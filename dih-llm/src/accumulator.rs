//! Tool-call fragment accumulation.

use crate::types::{FunctionCall, ToolCall, default_tool_type};
use std::collections::HashMap;

/// A partial, streamed piece of a tool invocation.
///
/// Providers usually send the id and name only on the first fragment of a call;
/// continuation fragments carry an index (OpenAI `tool_calls[].index`, Anthropic
/// content block index) or nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub id: Option<String>,
    pub index: Option<u32>,
    pub r#type: Option<String>,
    pub function_name: Option<String>,
    pub arguments_fragment: String,
}

impl ToolCallFragment {
    pub fn start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            function_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn arguments(fragment: impl Into<String>) -> Self {
        Self {
            arguments_fragment: fragment.into(),
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_arguments(mut self, fragment: impl Into<String>) -> Self {
        self.arguments_fragment = fragment.into();
        self
    }
}

/// Ordered set of in-progress tool calls for one stream.
#[derive(Debug, Default, Clone)]
pub struct ToolCallAccumulator {
    calls: Vec<ToolCall>,
    by_id: HashMap<String, usize>,
    by_index: HashMap<u32, usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment. Arguments are concatenated verbatim; nothing is parsed.
    pub fn apply(&mut self, fragment: ToolCallFragment) {
        let ToolCallFragment {
            id,
            index,
            r#type,
            function_name,
            arguments_fragment,
        } = fragment;
        let id = id.filter(|s| !s.is_empty());
        let function_name = function_name.filter(|s| !s.is_empty());

        let slot = match self.find(id.as_deref(), index) {
            Some(slot) => slot,
            None => {
                let slot = self.calls.len();
                self.calls.push(ToolCall {
                    id: id.clone().unwrap_or_default(),
                    r#type: r#type
                        .filter(|s| !s.is_empty())
                        .unwrap_or_else(default_tool_type),
                    function: FunctionCall {
                        name: String::new(),
                        arguments: String::new(),
                    },
                });
                if let Some(id) = id.as_ref() {
                    self.by_id.insert(id.clone(), slot);
                }
                tracing::debug!(
                    tool_call_id = %self.calls[slot].id,
                    tool_call_index = ?index,
                    "tool call started"
                );
                slot
            }
        };

        if let Some(index) = index {
            self.by_index.entry(index).or_insert(slot);
        }

        let call = &mut self.calls[slot];
        if call.function.name.is_empty() {
            if let Some(name) = function_name {
                call.function.name = name;
            }
        }
        call.function.arguments.push_str(&arguments_fragment);
    }

    fn find(&self, id: Option<&str>, index: Option<u32>) -> Option<usize> {
        if let Some(id) = id {
            return self.by_id.get(id).copied();
        }
        if let Some(slot) = index.and_then(|i| self.by_index.get(&i)) {
            return Some(*slot);
        }
        self.calls.len().checked_sub(1)
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
        self.by_id.clear();
        self.by_index.clear();
    }

    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }
}
