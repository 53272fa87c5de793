//! Dispatching completed tool calls to their callbacks

use tracing::{debug, warn};

use crate::tools::{ToolDef, ToolFailure};
use crate::types::message::Message;
use crate::types::tool::{ToolCall, ToolCallResult};
use crate::Result;

/// Tool lookup and registration failures. Callback failures are not errors: they are
/// reported to the model through [`ToolCallResult::is_error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("unknown tool {name:?}")]
    UnknownTool { name: String },

    #[error("ambiguous tool {name:?}: {count} definitions share the name")]
    AmbiguousTool { name: String, count: usize },

    #[error("tool {name:?} is already registered")]
    DuplicateTool { name: String },

    #[error("invalid tool definition {name:?}: {reason}")]
    InvalidDefinition { name: String, reason: String },
}

/// Runs the callback of the tool `call` names.
///
/// Arguments that don't decode into the tool's input type produce an error result
/// without running the callback. Unknown fields are rejected whatever the input type.
/// A failing callback produces an error result too, keeping any output it returned
/// through [`PartialOutput`](crate::tools::PartialOutput) ahead of the error text.
pub async fn invoke(
    call: &ToolCall,
    tools: &[ToolDef],
) -> std::result::Result<ToolCallResult, InvokeError> {
    let mut matching = tools.iter().filter(|t| t.name == call.name);
    let def = match (matching.next(), matching.next()) {
        (Some(def), None) => def,
        (None, _) => {
            return Err(InvokeError::UnknownTool {
                name: call.name.clone(),
            })
        }
        (Some(_), Some(_)) => {
            return Err(InvokeError::AmbiguousTool {
                name: call.name.clone(),
                count: tools.iter().filter(|t| t.name == call.name).count(),
            })
        }
    };

    debug!(tool = %call.name, id = %call.id, "invoking tool");
    let result = match def.call(&call.arguments).await {
        Ok(output) => ToolCallResult::success(call, output),
        Err(ToolFailure::InvalidArguments(reason)) => {
            warn!(tool = %call.name, error = %reason, "tool call arguments rejected");
            ToolCallResult::failure(
                call,
                format!(
                    "failed to decode tool call arguments: {}; arguments: {:?}",
                    reason, call.arguments
                ),
            )
        }
        Err(ToolFailure::Failed { output, error }) => {
            debug!(tool = %call.name, error = %error, partial = output.len(), "tool callback failed");
            if output.is_empty() {
                ToolCallResult::failure(call, format!("{:#}", error))
            } else {
                ToolCallResult::failure(call, format!("{}\n\nerror: {:#}", output, error))
            }
        }
    };
    Ok(result)
}

impl Message {
    /// Runs every tool call of this message, one after the other, and returns the user
    /// message carrying their results. `None` when the message calls no tool.
    ///
    /// Stops at the first call naming an unknown or ambiguous tool.
    pub async fn do_tool_calls(&self, tools: &[ToolDef]) -> Result<Option<Message>> {
        if self.tool_calls.is_empty() {
            return Ok(None);
        }
        let mut results = Vec::with_capacity(self.tool_calls.len());
        for call in &self.tool_calls {
            results.push(invoke(call, tools).await?);
        }
        Ok(Some(Message::tool_results(results)))
    }
}
