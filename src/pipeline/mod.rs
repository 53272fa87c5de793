//! # Streaming Pipeline
//!
//! Turns a vendor's raw response body into an updated [`Conversation`](crate::types::Conversation).
//!
//! ```text
//! Raw Bytes → SseDecoder → vendor events → Normalizer → Fragments → accumulate → Conversation
//!                 │                           │                          │
//!           data: lines,                one vendor,               text / thinking,
//!           [DONE], errors              no I/O                    tool calls, usage
//! ```
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`SseDecoder`] | Line based SSE decoder yielding typed payloads |
//! | [`Normalizer`] | Vendor event to fragment translation |
//! | [`accumulate`](accumulate::accumulate) | Folds fragments into the conversation |
//! | [`TurnStream`] | Producer task plus consumer side accumulation of one assistant turn |

pub mod accumulate;
pub mod decode;
pub mod normalize;
pub mod stream;


pub use accumulate::{accumulate, AccumulationError};
pub use decode::SseDecoder;
pub use normalize::{ErrorEnvelope, NoEnvelope, Normalizer};
pub use stream::{stream_turn, CancelHandle, TurnStream};

/// Protocol errors: the body does not follow the SSE framing, or a frame can't be decoded.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("unexpected line. expected \"data: \", got {line:?}")]
    UnexpectedLine { line: String },

    #[error("failed to decode server response {line:?}: {reason}")]
    MalformedFrame { line: String, reason: String },

    #[error("invalid UTF-8 in stream at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("SSE line longer than {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("{vendor} normalizer: {reason}{}", .hint.as_ref().map(|h| format!("\n💡 Hint: {}", h)).unwrap_or_default())]
    Normalizer {
        vendor: String,
        reason: String,
        hint: Option<String>,
    },

    #[error("stream aborted: {reason}")]
    Aborted { reason: String },
}

impl PipelineError {
    pub fn normalizer(vendor: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Normalizer {
            vendor: vendor.into(),
            reason: reason.into(),
            hint: None,
        }
    }

    /// Attach an actionable hint to the error
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        let hint_val = Some(hint.into());
        if let PipelineError::Normalizer { ref mut hint, .. } = self {
            *hint = hint_val;
        }
        self
    }
}
