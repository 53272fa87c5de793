//! Canonical message format shared by every vendor integration

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::tool::{ToolCall, ToolCallResult};
use crate::{Error, ErrorContext, Result};

/// A message exchanged with the model.
///
/// At least one of `contents`, `tool_calls` or `tool_call_results` must be non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_results: Vec<ToolCallResult>,
}

impl Message {
    pub fn new(role: MessageRole) -> Self {
        Self {
            role,
            contents: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_results: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_contents(MessageRole::User, vec![Content::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_contents(MessageRole::Assistant, vec![Content::text(text)])
    }

    pub fn with_contents(role: MessageRole, contents: Vec<Content>) -> Self {
        Self {
            contents,
            ..Self::new(role)
        }
    }

    /// A user turn answering tool calls.
    pub fn tool_results(results: Vec<ToolCallResult>) -> Self {
        Self {
            tool_call_results: results,
            ..Self::new(MessageRole::User)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty() && self.tool_calls.is_empty() && self.tool_call_results.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::validation_with_context(
                "at least one of contents, tool_calls or tool_call_results is required",
                ErrorContext::new().with_source("message"),
            ));
        }
        for (i, c) in self.contents.iter().enumerate() {
            c.validate()
                .map_err(|e| prefix_field(e, &format!("contents[{}]", i)))?;
        }
        if !self.tool_calls.is_empty() && self.role != MessageRole::Assistant {
            return Err(Error::validation_with_context(
                "only role assistant can call tools",
                ErrorContext::new().with_field_path("tool_calls"),
            ));
        }
        for (i, t) in self.tool_calls.iter().enumerate() {
            t.validate()
                .map_err(|e| prefix_field(e, &format!("tool_calls[{}]", i)))?;
        }
        if !self.tool_call_results.is_empty() && self.role != MessageRole::User {
            return Err(Error::validation_with_context(
                "only role user can provide tool call results",
                ErrorContext::new().with_field_path("tool_call_results"),
            ));
        }
        for (i, r) in self.tool_call_results.iter().enumerate() {
            r.validate()
                .map_err(|e| prefix_field(e, &format!("tool_call_results[{}]", i)))?;
        }
        Ok(())
    }

    /// The text blocks joined by newlines. Thinking and documents are ignored.
    pub fn as_text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|c| match c {
                Content::Text { text, .. } if !text.is_empty() => Some(text.trim_end()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Strictly decodes the text of the message as JSON into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let s = self.as_text();
        if s.is_empty() {
            return Err(Error::validation_with_context(
                "only text messages can be decoded as JSON",
                ErrorContext::new().with_source("message"),
            ));
        }
        serde_json::from_str(&s).map_err(|e| {
            Error::validation_with_context(
                format!("failed to decode message text as JSON: {}", e),
                ErrorContext::new().with_details(s.clone()),
            )
        })
    }
}

fn prefix_field(err: Error, prefix: &str) -> Error {
    match err {
        Error::Validation {
            message,
            mut context,
        } => {
            context.field_path = Some(match context.field_path.take() {
                Some(inner) => format!("{}.{}", prefix, inner),
                None => prefix.to_string(),
            });
            Error::Validation { message, context }
        }
        other => other,
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One block of a message.
///
/// Exactly one kind is populated per block. On the wire the block is a flat object
/// (`{"text": ...}`, `{"thinking": ...}`, `{"opaque": ...}`, `{"filename": ..., "url": ...}`)
/// and mixing kinds is rejected while decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ContentRepr", into = "ContentRepr")]
pub enum Content {
    Text {
        text: String,
        citations: Vec<Citation>,
    },
    Thinking {
        thinking: String,
        /// Continuity signature some vendors require to be sent back verbatim.
        signature: Option<String>,
    },
    Opaque(Opaque),
    Document(Document),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    pub fn thinking(thinking: impl Into<String>) -> Self {
        Content::Thinking {
            thinking: thinking.into(),
            signature: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn as_thinking(&self) -> Option<&str> {
        match self {
            Content::Thinking { thinking, .. } => Some(thinking),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Content::Text { text, citations } => {
                if text.is_empty() {
                    let msg = if citations.is_empty() {
                        "no content"
                    } else {
                        "citations must reference non-empty text"
                    };
                    return Err(Error::validation_with_context(
                        msg,
                        ErrorContext::new().with_field_path("text"),
                    ));
                }
                for (i, c) in citations.iter().enumerate() {
                    c.validate(text.len())
                        .map_err(|e| prefix_field(e, &format!("citations[{}]", i)))?;
                }
                Ok(())
            }
            Content::Thinking {
                thinking,
                signature,
            } => {
                if thinking.is_empty() && signature.is_none() {
                    return Err(Error::validation_with_context(
                        "no content",
                        ErrorContext::new().with_field_path("thinking"),
                    ));
                }
                Ok(())
            }
            Content::Opaque(_) => Ok(()),
            Content::Document(d) => d.validate(),
        }
    }
}

/// Vendor continuity data that must be kept verbatim during an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Opaque {
    /// A signature that arrived without a thinking block to attach to.
    Signature { signature: String },
    /// Encrypted reasoning the vendor refuses to show.
    RedactedThinking { data: String },
    /// Anything not modeled yet, kept as received.
    Raw { value: serde_json::Value },
}

/// A source reference backing a span of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Citation {
    /// Byte offsets into the text block.
    pub start_index: usize,
    pub end_index: usize,
    /// The quoted source text, when the vendor reports it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cited_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<CitationSource>,
}

impl Citation {
    fn validate(&self, text_len: usize) -> Result<()> {
        if self.end_index < self.start_index {
            return Err(Error::validation_with_context(
                format!(
                    "end_index {} is before start_index {}",
                    self.end_index, self.start_index
                ),
                ErrorContext::new().with_field_path("end_index"),
            ));
        }
        if self.end_index > text_len {
            return Err(Error::validation_with_context(
                format!("end_index {} is past the text ({} bytes)", self.end_index, text_len),
                ErrorContext::new().with_field_path("end_index"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CitationSource {
    pub kind: CitationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CitationKind {
    Web,
    Document,
}

/// A document attached to a message, inline or by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DocumentRepr", into = "DocumentRepr")]
pub struct Document {
    /// For most vendors only the extension matters, to derive the mime type.
    pub filename: Option<String>,
    pub source: DocumentSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Url(String),
    Inline(Vec<u8>),
}

impl Document {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            filename: None,
            source: DocumentSource::Url(url.into()),
        }
    }

    pub fn inline(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: Some(filename.into()),
            source: DocumentSource::Inline(data),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .and_then(|s| s.to_str())
            .map(String::from);
        Ok(Self {
            filename,
            source: DocumentSource::Inline(data),
        })
    }

    /// Mime type derived from the filename, or from the URL path.
    pub fn media_type(&self) -> Option<String> {
        if let Some(name) = &self.filename {
            if let Some(mt) = guess_media_type(Path::new(name)) {
                return Some(mt);
            }
        }
        match &self.source {
            DocumentSource::Url(u) => {
                let path = u.split(['?', '#']).next().unwrap_or(u);
                guess_media_type(Path::new(path))
            }
            DocumentSource::Inline(_) => None,
        }
    }

    fn validate(&self) -> Result<()> {
        match &self.source {
            DocumentSource::Url(u) if u.is_empty() => Err(Error::validation_with_context(
                "url is empty",
                ErrorContext::new().with_field_path("url"),
            )),
            DocumentSource::Inline(data) => {
                if self.filename.as_deref().unwrap_or("").is_empty() {
                    return Err(Error::validation_with_context(
                        "filename is required with an inline document",
                        ErrorContext::new().with_field_path("filename"),
                    ));
                }
                if data.is_empty() {
                    return Err(Error::validation_with_context(
                        "empty data",
                        ErrorContext::new().with_field_path("document"),
                    ));
                }
                Ok(())
            }
            DocumentSource::Url(_) => Ok(()),
        }
    }
}

fn guess_media_type(path: &Path) -> Option<String> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_lowercase();
    let mt = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        _ => return None,
    };
    Some(mt.to_string())
}

/// Flat wire representation of a content block.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContentRepr {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opaque: Option<Opaque>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    /// base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

/// Which content kind a set of flat fields belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Text,
    Thinking,
    Opaque,
    Document,
}

impl ContentKind {
    fn field(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Thinking => "thinking",
            ContentKind::Opaque => "opaque",
            ContentKind::Document => "document",
        }
    }
}

impl TryFrom<ContentRepr> for Content {
    type Error = String;

    fn try_from(r: ContentRepr) -> std::result::Result<Self, Self::Error> {
        let mut kinds = Vec::new();
        if !r.text.is_empty() || !r.citations.is_empty() {
            kinds.push(ContentKind::Text);
        }
        if !r.thinking.is_empty() || r.signature.is_some() {
            kinds.push(ContentKind::Thinking);
        }
        if r.opaque.is_some() {
            kinds.push(ContentKind::Opaque);
        }
        if r.filename.is_some() || r.document.is_some() || r.url.is_some() {
            kinds.push(ContentKind::Document);
        }
        match kinds.as_slice() {
            [] => Err("no content".to_string()),
            [ContentKind::Text] => Ok(Content::Text {
                text: r.text,
                citations: r.citations,
            }),
            [ContentKind::Thinking] => Ok(Content::Thinking {
                thinking: r.thinking,
                signature: r.signature,
            }),
            [ContentKind::Opaque] => Ok(Content::Opaque(r.opaque.unwrap_or(Opaque::Raw {
                value: serde_json::Value::Null,
            }))),
            [ContentKind::Document] => Ok(Content::Document(Document::try_from(DocumentRepr {
                filename: r.filename,
                document: r.document,
                url: r.url,
            })?)),
            [first, second, ..] => Err(format!(
                "field {} can't be used along {}",
                second.field(),
                first.field()
            )),
        }
    }
}

impl From<Content> for ContentRepr {
    fn from(c: Content) -> Self {
        match c {
            Content::Text { text, citations } => ContentRepr {
                text,
                citations,
                ..Default::default()
            },
            Content::Thinking {
                thinking,
                signature,
            } => ContentRepr {
                thinking,
                signature,
                ..Default::default()
            },
            Content::Opaque(opaque) => ContentRepr {
                opaque: Some(opaque),
                ..Default::default()
            },
            Content::Document(doc) => {
                let d = DocumentRepr::from(doc);
                ContentRepr {
                    filename: d.filename,
                    document: d.document,
                    url: d.url,
                    ..Default::default()
                }
            }
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    /// base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

impl TryFrom<DocumentRepr> for Document {
    type Error = String;

    fn try_from(r: DocumentRepr) -> std::result::Result<Self, Self::Error> {
        let source = match (r.document, r.url) {
            (Some(_), Some(_)) => {
                return Err("fields document and url are mutually exclusive".to_string())
            }
            (Some(b64), None) => DocumentSource::Inline(
                base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .map_err(|e| format!("field document: {}", e))?,
            ),
            (None, Some(url)) => DocumentSource::Url(url),
            (None, None) => {
                return Err("field document or url is required with filename".to_string())
            }
        };
        Ok(Document {
            filename: r.filename,
            source,
        })
    }
}

impl From<Document> for DocumentRepr {
    fn from(d: Document) -> Self {
        match d.source {
            DocumentSource::Url(url) => DocumentRepr {
                filename: d.filename,
                url: Some(url),
                ..Default::default()
            },
            DocumentSource::Inline(data) => DocumentRepr {
                filename: d.filename,
                document: Some(base64::engine::general_purpose::STANDARD.encode(data)),
                ..Default::default()
            },
        }
    }
}
