//! Fragments: the transient unit produced by one streaming event

use serde::{Deserialize, Serialize};

use crate::types::message::{Citation, Document, Opaque};
use crate::types::tool::ToolCall;
use crate::types::usage::UsageUpdate;

/// One incremental unit of streamed model output.
///
/// A fragment is never part of a conversation; it is folded into one by the accumulator.
/// Several fields may be set at once, they are applied in declaration order.
/// A fragment with no field set is discarded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fragment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opaque: Option<Opaque>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallFragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageUpdate>,
}

/// The tool call part of a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ToolCallFragment {
    /// A call starts; its arguments follow as deltas.
    Start { id: String, name: String },
    /// A piece of the pending call's serialized arguments.
    Delta { arguments: String },
    /// The pending call is closed.
    End,
    /// A call delivered in one piece.
    Complete { call: ToolCall },
}

impl Fragment {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            text: s.into(),
            ..Self::default()
        }
    }

    pub fn thinking(s: impl Into<String>) -> Self {
        Self {
            thinking: s.into(),
            ..Self::default()
        }
    }

    pub fn tool_call_start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::tool(ToolCallFragment::Start {
            id: id.into(),
            name: name.into(),
        })
    }

    pub fn tool_call_delta(arguments: impl Into<String>) -> Self {
        Self::tool(ToolCallFragment::Delta {
            arguments: arguments.into(),
        })
    }

    pub fn tool_call_end() -> Self {
        Self::tool(ToolCallFragment::End)
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self::tool(ToolCallFragment::Complete { call })
    }

    pub fn usage(usage: UsageUpdate) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    fn tool(t: ToolCallFragment) -> Self {
        Self {
            tool_call: Some(t),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.thinking.is_empty()
            && self.opaque.is_none()
            && self.text.is_empty()
            && self.citation.is_none()
            && self.document.is_none()
            && self.tool_call.is_none()
            && self.usage.as_ref().map_or(true, UsageUpdate::is_empty)
    }

    /// Whether the fragment carries model output, as opposed to metadata only.
    pub fn has_output(&self) -> bool {
        !self.thinking.is_empty()
            || self.opaque.is_some()
            || !self.text.is_empty()
            || self.citation.is_some()
            || self.document.is_some()
            || self.tool_call.is_some()
    }
}
