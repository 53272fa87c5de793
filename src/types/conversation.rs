//! The ordered, append-only message history of one exchange

use serde::{Deserialize, Serialize};

use crate::types::message::{Message, MessageRole};
use crate::types::tool::ToolCall;
use crate::types::usage::Usage;
use crate::{Error, ErrorContext, Result};

/// Where the conversation stands relative to the current assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum TurnState {
    /// No fragment received since the last user turn.
    #[default]
    Idle,
    /// Fragments are being folded into the last assistant message.
    Open,
    /// The turn was finalized; more fragments are rejected until the next user turn.
    Sealed,
}

/// A conversation: the messages exchanged so far plus the state of the assistant turn
/// being streamed, if any.
///
/// Fragments are folded in with [`Conversation::accumulate`] and the turn is closed with
/// [`Conversation::finish_turn`]. Serialized, a conversation is just its list of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Message>", into = "Vec<Message>")]
pub struct Conversation {
    pub(crate) messages: Vec<Message>,
    pub(crate) pending: Option<ToolCall>,
    pub(crate) usage: Usage,
    pub(crate) state: TurnState,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a conversation from an existing history, validating it.
    pub fn try_from_messages(messages: Vec<Message>) -> Result<Self> {
        let c = Self {
            messages,
            ..Self::default()
        };
        c.validate()?;
        Ok(c)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Usage reported for the current (or last finished) assistant turn.
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// The tool call currently being assembled from deltas.
    pub fn pending_tool_call(&self) -> Option<&ToolCall> {
        self.pending.as_ref()
    }

    /// Whether an assistant turn is being streamed.
    pub fn is_streaming(&self) -> bool {
        self.state == TurnState::Open
    }

    /// Appends a user turn.
    pub fn push_user(&mut self, text: impl Into<String>) -> Result<()> {
        self.push(Message::user(text))
    }

    /// Appends a complete message submitted by the application.
    ///
    /// The message is validated, and tool call results must answer a tool call made
    /// earlier in the conversation. A user message starts a new turn.
    pub fn push(&mut self, message: Message) -> Result<()> {
        if self.state == TurnState::Open {
            return Err(Error::validation_with_context(
                "an assistant turn is still streaming, finish it first",
                ErrorContext::new().with_source("conversation"),
            ));
        }
        let idx = self.messages.len();
        message
            .validate()
            .map_err(|e| prefix_index(e, idx))?;
        self.check_results_resolve(&message, idx)?;
        if message.role == MessageRole::User {
            self.state = TurnState::Idle;
            self.usage = Usage::default();
        }
        self.messages.push(message);
        Ok(())
    }

    /// Validates every message and the tool call / result pairing.
    pub fn validate(&self) -> Result<()> {
        for (i, m) in self.messages.iter().enumerate() {
            m.validate().map_err(|e| prefix_index(e, i))?;
        }
        let mut prior = Conversation::new();
        for (i, m) in self.messages.iter().enumerate() {
            prior.check_results_resolve(m, i)?;
            prior.messages.push(m.clone());
        }
        Ok(())
    }

    fn check_results_resolve(&self, message: &Message, idx: usize) -> Result<()> {
        for (j, r) in message.tool_call_results.iter().enumerate() {
            let found = self
                .messages
                .iter()
                .flat_map(|m| m.tool_calls.iter())
                .any(|c| c.matches(r));
            if !found {
                return Err(Error::validation_with_context(
                    format!(
                        "tool call result (id {:?}, name {:?}) does not answer any prior tool call",
                        r.id, r.name
                    ),
                    ErrorContext::new()
                        .with_field_path(format!("messages[{}].tool_call_results[{}]", idx, j))
                        .with_source("conversation"),
                ));
            }
        }
        Ok(())
    }
}

fn prefix_index(err: Error, idx: usize) -> Error {
    match err {
        Error::Validation {
            message,
            mut context,
        } => {
            let prefix = format!("messages[{}]", idx);
            context.field_path = Some(match context.field_path.take() {
                Some(inner) => format!("{}.{}", prefix, inner),
                None => prefix,
            });
            context.source.get_or_insert_with(|| "conversation".to_string());
            Error::Validation { message, context }
        }
        other => other,
    }
}

impl TryFrom<Vec<Message>> for Conversation {
    type Error = Error;

    fn try_from(messages: Vec<Message>) -> Result<Self> {
        Self::try_from_messages(messages)
    }
}

impl From<Conversation> for Vec<Message> {
    fn from(c: Conversation) -> Self {
        c.messages
    }
}
