//! Anthropic Messages API stream normalizer
//!
//! Handles the key differences from OpenAI:
//! - Events are typed (`message_start`, `content_block_delta`, ...) and blocks are explicitly
//!   opened and closed, so a tool call ends on `content_block_stop`.
//! - Thinking blocks carry a signature that must be sent back verbatim.
//! - Input tokens come with `message_start`, output tokens and the stop reason with
//!   `message_delta`.
//! - Errors can arrive mid-stream as an `error` event.

use serde::Deserialize;

use crate::error::VendorError;
use crate::pipeline::normalize::{ErrorEnvelope, Normalizer};
use crate::pipeline::PipelineError;
use crate::types::fragment::Fragment;
use crate::types::message::{Citation, CitationKind, CitationSource, Opaque};
use crate::types::usage::{FinishReason, UsageUpdate};
use crate::{Error, Result};

const VENDOR: &str = "anthropic";

/// One `data:` payload of a Messages API stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: AnthropicErrorBody,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStart {
    pub role: String,
    #[serde(default)]
    pub usage: Option<AnthropicUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
    CitationsDelta { citation: AnthropicCitation },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicCitation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub cited_text: String,
    #[serde(default)]
    pub document_title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl AnthropicErrorBody {
    fn into_vendor_error(self) -> VendorError {
        VendorError {
            vendor: VENDOR.to_string(),
            code: Some(self.kind),
            message: self.message,
        }
    }
}

/// `{"type": "error", "error": {"type": "overloaded_error", "message": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicErrorEnvelope {
    pub error: AnthropicErrorBody,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ErrorEnvelope for AnthropicErrorEnvelope {
    fn into_vendor_error(self) -> VendorError {
        let mut v = self.error.into_vendor_error();
        if let Some(id) = self.request_id {
            v.message = format!("{} (request {})", v.message, id);
        }
        v
    }
}

fn finish_reason(s: &str) -> FinishReason {
    match s {
        "end_turn" | "stop_sequence" => FinishReason::Stop,
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolCalls,
        "refusal" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

fn usage_update(u: &AnthropicUsage) -> UsageUpdate {
    UsageUpdate {
        input_tokens: u.input_tokens,
        cached_input_tokens: u.cache_read_input_tokens,
        output_tokens: u.output_tokens,
        ..Default::default()
    }
}

impl From<AnthropicCitation> for Citation {
    fn from(c: AnthropicCitation) -> Self {
        let mut sources = Vec::new();
        if c.kind == "web_search_result_location" {
            sources.push(CitationSource {
                kind: CitationKind::Web,
                url: c.url,
                title: c.title,
            });
        }
        if c.document_title.is_some() {
            sources.push(CitationSource {
                kind: CitationKind::Document,
                url: None,
                title: c.document_title,
            });
        }
        // Source offsets index the cited document, not the reply text.
        Citation {
            start_index: 0,
            end_index: 0,
            cited_text: c.cited_text,
            sources,
        }
    }
}

/// Normalizer for one Anthropic Messages API stream.
#[derive(Debug, Default)]
pub struct AnthropicNormalizer {
    /// Index of the `tool_use` block being streamed.
    tool_block: Option<u32>,
}

impl AnthropicNormalizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Normalizer for AnthropicNormalizer {
    type Event = StreamEvent;
    type Envelope = AnthropicErrorEnvelope;

    fn vendor(&self) -> &'static str {
        VENDOR
    }

    fn normalize(&mut self, event: StreamEvent) -> Result<Vec<Fragment>> {
        let f = match event {
            StreamEvent::MessageStart { message } => {
                if message.role != "assistant" {
                    return Err(PipelineError::normalizer(
                        VENDOR,
                        format!("unexpected role {:?}", message.role),
                    )
                    .into());
                }
                match &message.usage {
                    Some(u) => Fragment::usage(usage_update(u)),
                    None => return Ok(Vec::new()),
                }
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::Text { text } => Fragment::text(text),
                ContentBlock::Thinking { thinking } => Fragment::thinking(thinking),
                ContentBlock::RedactedThinking { data } => Fragment {
                    opaque: Some(Opaque::RedactedThinking { data }),
                    ..Default::default()
                },
                ContentBlock::ToolUse { id, name } => {
                    self.tool_block = Some(index);
                    Fragment::tool_call_start(id, name)
                }
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => Fragment::text(text),
                BlockDelta::ThinkingDelta { thinking } => Fragment::thinking(thinking),
                BlockDelta::SignatureDelta { signature } => Fragment {
                    opaque: Some(Opaque::Signature { signature }),
                    ..Default::default()
                },
                BlockDelta::InputJsonDelta { partial_json } => {
                    if self.tool_block != Some(index) {
                        return Err(PipelineError::normalizer(
                            VENDOR,
                            format!("input_json_delta for block {} which is not a tool call", index),
                        )
                        .with_hint("interleaved content blocks are not supported")
                        .into());
                    }
                    Fragment::tool_call_delta(partial_json)
                }
                BlockDelta::CitationsDelta { citation } => Fragment {
                    citation: Some(citation.into()),
                    ..Default::default()
                },
            },
            StreamEvent::ContentBlockStop { index } => {
                if self.tool_block != Some(index) {
                    return Ok(Vec::new());
                }
                self.tool_block = None;
                Fragment::tool_call_end()
            }
            StreamEvent::MessageDelta { delta, usage } => {
                let mut update = usage.as_ref().map(usage_update).unwrap_or_default();
                update.finish_reason = delta.stop_reason.as_deref().map(finish_reason);
                Fragment::usage(update)
            }
            StreamEvent::MessageStop | StreamEvent::Ping => return Ok(Vec::new()),
            StreamEvent::Error { error } => return Err(Error::Vendor(error.into_vendor_error())),
        };
        Ok(vec![f])
    }
}
