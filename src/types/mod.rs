//! # Types Module
//!
//! The canonical, vendor neutral data model.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | One turn of the conversation, with role, content blocks and tool traffic |
//! | [`Content`] | A content block: text, thinking, opaque continuity data or a document |
//! | [`ToolCall`] | A tool call requested by the model |
//! | [`ToolCallResult`] | The answer to a tool call |
//! | [`Fragment`] | One incremental unit of streamed output, never stored |
//! | [`Conversation`] | Ordered message history plus the assistant turn being streamed |
//! | [`Usage`] | Token counters and finish reason of an assistant turn |
//!
//! ## Example
//!
//! ```rust
//! use ai_chat_core::types::{Content, Message, MessageRole};
//!
//! let user = Message::user("What's the weather?");
//! assert!(user.validate().is_ok());
//!
//! let reply = Message::with_contents(
//!     MessageRole::Assistant,
//!     vec![Content::thinking("the user wants weather"), Content::text("Sunny.")],
//! );
//! assert_eq!(reply.as_text(), "Sunny.");
//! ```

pub mod conversation;
pub mod fragment;
pub mod message;
pub mod tool;
pub mod usage;

pub use conversation::Conversation;
pub use fragment::{Fragment, ToolCallFragment};
pub use message::{
    Citation, CitationKind, CitationSource, Content, Document, DocumentSource, Message,
    MessageRole, Opaque,
};
pub use tool::{ToolCall, ToolCallResult};
pub use usage::{FinishReason, Usage, UsageMode, UsageUpdate};
