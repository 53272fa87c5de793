//! Tool calling types of the canonical model

use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};

/// A tool call the model requested to make.
///
/// `arguments` is the serialized JSON object sent by the model. It is built incrementally
/// while streaming and is only guaranteed to parse once the call is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCall {
    /// Unique identifier for the call. Some vendors (e.g. Gemini) don't set one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty() && self.arguments.is_empty()
    }

    /// Ensures the call is identifiable and carries well-formed JSON arguments.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() && self.name.is_empty() {
            return Err(Error::validation_with_context(
                "at least one of id or name is required",
                ErrorContext::new().with_source("tool_call"),
            ));
        }
        serde_json::from_str::<serde_json::Value>(&self.arguments).map_err(|e| {
            Error::validation_with_context(
                format!("arguments are not valid JSON: {}", e),
                ErrorContext::new()
                    .with_field_path("arguments")
                    .with_details(self.arguments.clone())
                    .with_source("tool_call"),
            )
        })?;
        Ok(())
    }

    /// Whether a result with this id/name pair answers this call.
    pub fn matches(&self, result: &ToolCallResult) -> bool {
        if !self.id.is_empty() && !result.id.is_empty() {
            return self.id == result.id;
        }
        !self.name.is_empty() && self.name == result.name
    }
}

/// The result of a tool call, sent back to the model on a user turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCallResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub result: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(call: &ToolCall, result: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            result: result.into(),
            is_error: false,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            result: error.into(),
            is_error: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() && self.name.is_empty() {
            return Err(Error::validation_with_context(
                "at least one of id or name is required",
                ErrorContext::new().with_source("tool_call_result"),
            ));
        }
        if self.result.is_empty() {
            return Err(Error::validation_with_context(
                "result is required",
                ErrorContext::new()
                    .with_field_path("result")
                    .with_source("tool_call_result"),
            ));
        }
        Ok(())
    }
}
