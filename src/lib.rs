//! # ai-chat-core
//!
//! Streaming core for multi-vendor chat completion APIs.
//!
//! Vendor streams are Server-Sent Events carrying small JSON events. This crate turns those
//! events into a single vendor neutral [`Fragment`](types::Fragment) vocabulary and folds the
//! fragments into a [`Conversation`](types::Conversation), so callers see the same message
//! shape whether the turn came from OpenAI or Anthropic.
//!
//! ## Layers
//!
//! - **Decode**: [`pipeline::SseDecoder`] splits a byte stream into `data:` frames and
//!   decodes each frame into a typed vendor event, or into a vendor error.
//! - **Normalize**: a [`pipeline::Normalizer`] per vendor (see [`drivers`]) maps events
//!   to fragments.
//! - **Accumulate**: [`pipeline::accumulate`] applies fragments to a conversation,
//!   assembling streamed tool calls as they go.
//! - **Invoke**: [`tools::invoke`] runs completed tool calls against registered
//!   [`tools::ToolDef`]s.
//!
//! [`pipeline::stream_turn`] wires the first three together on a tokio task with
//! cancellation, and [`transport::HttpTransport`] feeds it from a `reqwest` response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_chat_core::drivers::OpenAiNormalizer;
//! use ai_chat_core::transport::HttpTransport;
//! use ai_chat_core::types::Conversation;
//! use ai_chat_core::StreamConfig;
//! use futures::StreamExt;
//! use reqwest::header::HeaderMap;
//!
//! #[tokio::main]
//! async fn main() -> ai_chat_core::Result<()> {
//!     let transport = HttpTransport::new("https://api.openai.com/v1", StreamConfig::from_env())?;
//!
//!     let mut conversation = Conversation::new();
//!     conversation.push_user("Hello!")?;
//!
//!     let body = serde_json::json!({
//!         "model": "gpt-4o-mini",
//!         "stream": true,
//!         "messages": [{"role": "user", "content": "Hello!"}],
//!     });
//!     let mut turn = transport
//!         .stream_turn(conversation, "/chat/completions", HeaderMap::new(), &body, OpenAiNormalizer::new())
//!         .await?;
//!
//!     while let Some(fragment) = turn.next().await {
//!         print!("{}", fragment?.text);
//!     }
//!     let (conversation, usage) = turn.finish().await?;
//!     println!("\n{} messages, {} tokens", conversation.len(), usage.total_tokens());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Messages, fragments, tool calls, usage and the conversation |
//! | [`pipeline`] | SSE decoding, normalization and accumulation |
//! | [`drivers`] | OpenAI and Anthropic normalizers |
//! | [`tools`] | Tool definitions and invocation |
//! | [`transport`] | HTTP streaming transport |
//! | [`config`] | Stream configuration with environment overrides |

pub mod config;
pub mod drivers;
pub mod pipeline;
pub mod tools;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::StreamConfig;
pub use pipeline::{stream_turn, CancelHandle, TurnStream};
pub use tools::{ToolDef, ToolRegistry};
pub use types::{
    conversation::Conversation,
    fragment::Fragment,
    message::{Message, MessageRole},
    tool::{ToolCall, ToolCallResult},
    usage::Usage,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, VendorError};
