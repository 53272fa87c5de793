//! Vendor stream normalizers.
//!
//! Each vendor gets its own event types, error envelope and [`Normalizer`](crate::pipeline::Normalizer).
//! Nothing is shared between them: decoding and accumulation are generic, everything
//! vendor specific lives here.

pub mod anthropic;
pub mod openai;

pub use anthropic::{AnthropicErrorEnvelope, AnthropicNormalizer};
pub use openai::{OpenAiErrorEnvelope, OpenAiNormalizer};
