//! OpenAI chat completions stream normalizer
//!
//! Handles the parts of the `chat.completion.chunk` stream that differ from Anthropic:
//! - Tool calls are keyed by `index`; only the first delta of a call carries its `id`.
//! - A call ends implicitly, when another call starts or a chunk without tool calls arrives.
//! - Usage comes in a trailing chunk with empty `choices` when `stream_options.include_usage`
//!   is set.

use serde::Deserialize;

use crate::error::VendorError;
use crate::pipeline::normalize::{ErrorEnvelope, Normalizer};
use crate::pipeline::PipelineError;
use crate::types::fragment::Fragment;
use crate::types::message::{Citation, CitationKind, CitationSource};
use crate::types::usage::{FinishReason, UsageUpdate};
use crate::Result;

const VENDOR: &str = "openai";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<ChunkUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub refusal: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    #[serde(default)]
    pub annotations: Option<Vec<Annotation>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: FunctionDelta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    UrlCitation { url_citation: UrlCitation },
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrlCitation {
    pub start_index: usize,
    pub end_index: usize,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

/// `{"error": {"message": ..., "type": ..., "code": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiErrorEnvelope {
    pub error: OpenAiErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiErrorBody {
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
    #[serde(default)]
    pub param: Option<String>,
}

impl ErrorEnvelope for OpenAiErrorEnvelope {
    fn into_vendor_error(self) -> VendorError {
        let code = match self.error.code {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Null) | None => self.error.kind,
            Some(other) => Some(other.to_string()),
        };
        let message = match self.error.param {
            Some(p) => format!("{} (param {})", self.error.message, p),
            None => self.error.message,
        };
        VendorError {
            vendor: VENDOR.to_string(),
            code,
            message,
        }
    }
}

fn finish_reason(s: &str) -> FinishReason {
    match s {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        other => FinishReason::Other(other.to_string()),
    }
}

/// Normalizer for one OpenAI compatible chat completions stream.
#[derive(Debug, Default)]
pub struct OpenAiNormalizer {
    call_open: bool,
}

impl OpenAiNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn close_call(&mut self, out: &mut Vec<Fragment>) {
        if self.call_open {
            self.call_open = false;
            out.push(Fragment::tool_call_end());
        }
    }
}

impl Normalizer for OpenAiNormalizer {
    type Event = ChatCompletionChunk;
    type Envelope = OpenAiErrorEnvelope;

    fn vendor(&self) -> &'static str {
        VENDOR
    }

    fn normalize(&mut self, chunk: ChatCompletionChunk) -> Result<Vec<Fragment>> {
        let mut out = Vec::new();

        // Several choices only happen with n > 1, which a single conversation can't hold.
        if let [choice] = chunk.choices.as_slice() {
            let delta = &choice.delta;
            match delta.role.as_deref() {
                None | Some("assistant") => {}
                Some(role) => {
                    return Err(PipelineError::normalizer(VENDOR, format!("unexpected role {:?}", role)).into())
                }
            }
            if let Some(refusal) = delta.refusal.as_deref().filter(|r| !r.is_empty()) {
                return Err(PipelineError::normalizer(VENDOR, format!("refused: {:?}", refusal))
                    .with_hint("the request was declined by the model's safety system")
                    .into());
            }

            for Annotation::UrlCitation { url_citation: c } in delta.annotations.iter().flatten() {
                out.push(Fragment {
                    citation: Some(Citation {
                        start_index: c.start_index,
                        end_index: c.end_index,
                        cited_text: String::new(),
                        sources: vec![CitationSource {
                            kind: CitationKind::Web,
                            url: Some(c.url.clone()),
                            title: c.title.clone(),
                        }],
                    }),
                    ..Default::default()
                });
            }

            if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
                out.push(Fragment::text(text));
            }

            match delta.tool_calls.as_deref() {
                Some(calls) if !calls.is_empty() => {
                    for tc in calls {
                        if let Some(id) = tc.id.as_deref().filter(|id| !id.is_empty()) {
                            self.close_call(&mut out);
                            let name = tc.function.name.clone().unwrap_or_default();
                            out.push(Fragment::tool_call_start(id, name));
                            self.call_open = true;
                        }
                        if let Some(args) = tc.function.arguments.as_deref().filter(|a| !a.is_empty()) {
                            out.push(Fragment::tool_call_delta(args));
                        }
                    }
                }
                _ => self.close_call(&mut out),
            }

            if let Some(reason) = choice.finish_reason.as_deref().filter(|r| !r.is_empty()) {
                self.close_call(&mut out);
                out.push(Fragment::usage(UsageUpdate::finish(finish_reason(reason))));
            }
        }

        if let Some(u) = chunk.usage.filter(|u| u.prompt_tokens != 0) {
            out.push(Fragment::usage(UsageUpdate {
                input_tokens: Some(u.prompt_tokens),
                cached_input_tokens: u.prompt_tokens_details.map(|d| d.cached_tokens),
                output_tokens: Some(u.completion_tokens),
                ..Default::default()
            }));
        }
        Ok(out)
    }

    fn finish(&mut self) -> Result<Vec<Fragment>> {
        let mut out = Vec::new();
        self.close_call(&mut out);
        Ok(out)
    }
}
