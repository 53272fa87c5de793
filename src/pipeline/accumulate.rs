//! Fragment accumulation (Fragment -> Conversation)
//!
//! Folds the fragments of one assistant turn into the last message of a [`Conversation`].
//! Text and thinking are appended byte-exact to the last block of the same kind. Tool call
//! arguments are assembled on a single pending call, so vendors that interleave several
//! tool calls by index are flushed one call at a time.

use tracing::{debug, trace, warn};

use crate::types::conversation::{Conversation, TurnState};
use crate::types::fragment::{Fragment, ToolCallFragment};
use crate::types::message::{Content, Document, DocumentSource, Message, MessageRole, Opaque};
use crate::types::tool::ToolCall;
use crate::types::usage::{FinishReason, Usage};

/// Errors folding fragments into a conversation. All of them end the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccumulationError {
    #[error("tool call arguments {arguments:?} received without a pending tool call")]
    NoPendingToolCall { arguments: String },

    #[error("tool call {name} ({id}) closed with invalid JSON arguments {arguments:?}: {reason}")]
    InvalidToolArguments {
        id: String,
        name: String,
        arguments: String,
        reason: String,
    },

    #[error("stream ended with tool call {name} still pending and no id to flush it with (arguments {arguments:?})")]
    UnterminatedToolCall { name: String, arguments: String },

    #[error("the assistant turn is already finalized")]
    TurnClosed,

    #[error("invalid assistant message: {0}")]
    Validation(String),
}

/// Folds one fragment into `prior` and returns the updated conversation.
pub fn accumulate(
    mut prior: Conversation,
    fragment: &Fragment,
) -> Result<Conversation, AccumulationError> {
    prior.accumulate(fragment)?;
    Ok(prior)
}

impl Conversation {
    /// Folds one fragment into the assistant turn being streamed.
    ///
    /// The first fragment of a turn appends an empty assistant message unless the last
    /// message already is one. Empty fragments are ignored.
    pub fn accumulate(&mut self, fragment: &Fragment) -> Result<(), AccumulationError> {
        if self.state == TurnState::Sealed {
            return Err(AccumulationError::TurnClosed);
        }
        if fragment.is_empty() {
            trace!("empty fragment discarded");
            return Ok(());
        }
        if self.state == TurnState::Idle {
            debug!(messages = self.messages.len(), "assistant turn started");
            self.state = TurnState::Open;
        }

        let Conversation {
            messages,
            pending,
            usage,
            ..
        } = self;
        let msg = open_assistant(messages);

        if !fragment.thinking.is_empty() {
            match msg.contents.last_mut() {
                Some(Content::Thinking { thinking, .. }) => thinking.push_str(&fragment.thinking),
                _ => msg.contents.push(Content::thinking(fragment.thinking.as_str())),
            }
        }
        if let Some(opaque) = &fragment.opaque {
            apply_opaque(msg, opaque);
        }
        if !fragment.text.is_empty() {
            match msg.contents.last_mut() {
                Some(Content::Text { text, .. }) => text.push_str(&fragment.text),
                _ => msg.contents.push(Content::text(fragment.text.as_str())),
            }
        }
        if let Some(citation) = &fragment.citation {
            match msg.contents.last_mut() {
                Some(Content::Text { citations, .. }) => citations.push(citation.clone()),
                _ => msg.contents.push(Content::Text {
                    text: String::new(),
                    citations: vec![citation.clone()],
                }),
            }
        }
        if let Some(doc) = &fragment.document {
            apply_document(msg, doc);
        }
        if let Some(tc) = &fragment.tool_call {
            apply_tool_call(msg, pending, tc)?;
        }
        if let Some(update) = &fragment.usage {
            usage.apply(update);
        }
        trace!(contents = msg.contents.len(), tool_calls = msg.tool_calls.len(), "fragment accumulated");
        Ok(())
    }

    /// Finalizes the assistant turn and returns its usage.
    ///
    /// A pending tool call with an id is flushed, an empty trailing assistant message is
    /// dropped, and a `Stop` finish reason is reported as `ToolCalls` when the turn called
    /// tools. Once finalized, the turn rejects further fragments until the next user message.
    pub fn finish_turn(&mut self) -> Result<Usage, AccumulationError> {
        match self.state {
            TurnState::Sealed => return Err(AccumulationError::TurnClosed),
            TurnState::Idle => {
                self.state = TurnState::Sealed;
                return Ok(self.usage.clone());
            }
            TurnState::Open => {}
        }

        if let Some(call) = self.pending.take() {
            if call.id.is_empty() {
                return Err(AccumulationError::UnterminatedToolCall {
                    name: call.name,
                    arguments: call.arguments,
                });
            }
            warn!(id = %call.id, tool = %call.name, "flushing tool call left pending at end of stream");
            close_tool_call(open_assistant(&mut self.messages), call)?;
        }

        if matches!(self.messages.last(), Some(m) if m.role == MessageRole::Assistant && m.is_empty())
        {
            self.messages.pop();
        } else if let Some(m) = self.messages.last() {
            if !m.tool_calls.is_empty() && self.usage.finish_reason == Some(FinishReason::Stop) {
                self.usage.finish_reason = Some(FinishReason::ToolCalls);
            }
            m.validate()
                .map_err(|e| AccumulationError::Validation(e.to_string()))?;
        }

        self.state = TurnState::Sealed;
        debug!(
            messages = self.messages.len(),
            input_tokens = self.usage.input_tokens,
            output_tokens = self.usage.output_tokens,
            finish_reason = ?self.usage.finish_reason,
            "assistant turn finished"
        );
        Ok(self.usage.clone())
    }
}

fn open_assistant(messages: &mut Vec<Message>) -> &mut Message {
    let reuse = matches!(messages.last(), Some(m) if m.role == MessageRole::Assistant);
    if !reuse {
        messages.push(Message::new(MessageRole::Assistant));
    }
    let last = messages.len() - 1;
    &mut messages[last]
}

fn apply_opaque(msg: &mut Message, opaque: &Opaque) {
    if let Opaque::Signature { signature: sig } = opaque {
        if let Some(Content::Thinking { signature, .. }) = msg.contents.last_mut() {
            signature.get_or_insert_with(String::new).push_str(sig);
            return;
        }
    }
    msg.contents.push(Content::Opaque(opaque.clone()));
}

fn apply_document(msg: &mut Message, doc: &Document) {
    if let DocumentSource::Inline(chunk) = &doc.source {
        if let Some(Content::Document(Document {
            filename,
            source: DocumentSource::Inline(data),
        })) = msg.contents.last_mut()
        {
            if *filename == doc.filename {
                data.extend_from_slice(chunk);
                return;
            }
        }
    }
    msg.contents.push(Content::Document(doc.clone()));
}

fn apply_tool_call(
    msg: &mut Message,
    pending: &mut Option<ToolCall>,
    tc: &ToolCallFragment,
) -> Result<(), AccumulationError> {
    match tc {
        ToolCallFragment::Start { id, name } => {
            if let Some(prev) = pending.take() {
                warn!(
                    previous = %prev.name,
                    next = %name,
                    "tool call started while another was pending, flushing the previous one"
                );
                close_tool_call(msg, prev)?;
            }
            trace!(id = %id, tool = %name, "tool call started");
            *pending = Some(ToolCall::new(id.as_str(), name.as_str(), ""));
        }
        ToolCallFragment::Delta { arguments } => match pending.as_mut() {
            Some(call) => call.arguments.push_str(arguments),
            None => {
                return Err(AccumulationError::NoPendingToolCall {
                    arguments: arguments.clone(),
                })
            }
        },
        ToolCallFragment::End => match pending.take() {
            Some(call) => close_tool_call(msg, call)?,
            None => {
                return Err(AccumulationError::NoPendingToolCall {
                    arguments: String::new(),
                })
            }
        },
        ToolCallFragment::Complete { call } => {
            if let Some(prev) = pending.take() {
                if prev.id.is_empty() || prev.id != call.id {
                    close_tool_call(msg, prev)?;
                }
            }
            close_tool_call(msg, call.clone())?;
        }
    }
    Ok(())
}

fn close_tool_call(msg: &mut Message, mut call: ToolCall) -> Result<(), AccumulationError> {
    if call.id.is_empty() && call.name.is_empty() {
        return Err(AccumulationError::Validation(
            "tool call has neither id nor name".to_string(),
        ));
    }
    if call.arguments.trim().is_empty() {
        call.arguments = "{}".to_string();
    }
    if let Err(e) = serde_json::from_str::<serde_json::Value>(&call.arguments) {
        return Err(AccumulationError::InvalidToolArguments {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
            reason: e.to_string(),
        });
    }
    debug!(id = %call.id, tool = %call.name, "tool call closed");
    msg.tool_calls.push(call);
    Ok(())
}
