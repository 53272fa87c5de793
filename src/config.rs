//! Runtime knobs of the streaming core.
//!
//! Defaults work for every supported vendor. Values can be loaded from YAML and are
//! overridable from the environment:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AI_STREAM_CHANNEL_CAPACITY` | `channel_capacity` |
//! | `AI_STREAM_MAX_LINE_BYTES` | `max_line_bytes` |
//! | `AI_HTTP_TIMEOUT_SECS` | `http_timeout_secs` |

use serde::{Deserialize, Serialize};
use std::env;

use crate::{Error, ErrorContext, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Fragments buffered between the decoding task and the consumer.
    pub channel_capacity: usize,
    /// Longest SSE line accepted before the stream is failed.
    pub max_line_bytes: usize,
    /// Payload of the `data:` line that ends the stream.
    pub done_signal: String,
    /// Read the rest of the body when the stream ends early, so the connection can be reused.
    pub drain_on_close: bool,
    pub http_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 16,
            max_line_bytes: 8 * 1024 * 1024,
            done_signal: "[DONE]".to_string(),
            drain_on_close: true,
            http_timeout_secs: 300,
        }
    }
}

impl StreamConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid stream config: {}", e),
                ErrorContext::new().with_source("stream_config"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("AI_STREAM_CHANNEL_CAPACITY") {
            self.channel_capacity = v;
        }
        if let Some(v) = env_parse("AI_STREAM_MAX_LINE_BYTES") {
            self.max_line_bytes = v;
        }
        if let Some(v) = env_parse("AI_HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::configuration_with_context(
                "channel_capacity must be at least 1",
                ErrorContext::new()
                    .with_field_path("channel_capacity")
                    .with_source("stream_config"),
            ));
        }
        if self.max_line_bytes < 1024 {
            return Err(Error::configuration_with_context(
                format!("max_line_bytes {} is too small", self.max_line_bytes),
                ErrorContext::new()
                    .with_field_path("max_line_bytes")
                    .with_details("expected at least 1024")
                    .with_source("stream_config"),
            ));
        }
        if self.done_signal.trim().is_empty() {
            return Err(Error::configuration_with_context(
                "done_signal is empty",
                ErrorContext::new()
                    .with_field_path("done_signal")
                    .with_source("stream_config"),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_fills_defaults() {
        let cfg = StreamConfig::from_yaml_str("channel_capacity: 4\n").unwrap();
        assert_eq!(cfg.channel_capacity, 4);
        assert_eq!(cfg.done_signal, "[DONE]");
        assert!(cfg.drain_on_close);
    }

    #[test]
    fn test_yaml_rejects_unknown_and_invalid() {
        assert!(StreamConfig::from_yaml_str("chanel_capacity: 4\n").is_err());
        let err = StreamConfig::from_yaml_str("channel_capacity: 0\n").unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("channel_capacity")
        );
    }

    #[test]
    fn test_env_override() {
        env::set_var("AI_STREAM_MAX_LINE_BYTES", "4096");
        let cfg = StreamConfig::from_env();
        env::remove_var("AI_STREAM_MAX_LINE_BYTES");
        assert_eq!(cfg.max_line_bytes, 4096);
    }
}
