use crate::pipeline::{AccumulationError, PipelineError};
use crate::tools::InvokeError;
use crate::transport::TransportError;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "messages[1].tool_call_results[0]")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "conversation", "stream_config")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A structured error reported by the vendor itself, decoded from its error envelope.
///
/// This is data the server sent on purpose, not a local decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{vendor} error{}: {message}", .code.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default())]
pub struct VendorError {
    pub vendor: String,
    pub code: Option<String>,
    pub message: String,
}

/// Unified error type for the streaming core.
///
/// Transport, pipeline, vendor and accumulation errors are fatal to the current stream.
/// Tool callback failures never show up here: they are folded into a `ToolCallResult`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Stream protocol error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Vendor error: {0}")]
    Vendor(#[from] VendorError),

    #[error("Accumulation error: {0}")]
    Accumulation(#[from] AccumulationError),

    #[error("Tool invocation error: {0}")]
    Tool(#[from] InvokeError),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Remote error: HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// Whether the error ends the current stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Validation { .. } | Error::Configuration { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The vendor-reported error, if this error came from an error envelope.
    pub fn as_vendor(&self) -> Option<&VendorError> {
        match self {
            Error::Vendor(v) => Some(v),
            _ => None,
        }
    }
}
