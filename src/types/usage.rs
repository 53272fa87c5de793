//! Token usage and finish reason reporting

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the model stopped generating tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FinishReason {
    /// The assistant was done for the turn, or hit a stop sequence.
    Stop,
    /// The token limit was reached.
    Length,
    /// The model called one or more tools and needs their results to continue.
    ToolCalls,
    /// The reply got caught by a content filter.
    ContentFilter,
    /// Anything a vendor reports that has no canonical equivalent.
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(s) => s,
        }
    }
}

impl From<String> for FinishReason {
    fn from(s: String) -> Self {
        match s.as_str() {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::Length,
            "tool_calls" => FinishReason::ToolCalls,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other(s),
        }
    }
}

impl From<FinishReason> for String {
    fn from(r: FinishReason) -> Self {
        r.as_str().to_string()
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running usage counters for one assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// How a usage report combines with what was reported before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMode {
    /// The report is authoritative: reported fields overwrite the running values.
    #[default]
    Replace,
    /// The vendor reports per-chunk deltas: reported fields are added.
    Add,
}

/// A usage report carried by a fragment. Unreported fields leave the running value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub mode: UsageMode,
}

impl UsageUpdate {
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none()
            && self.cached_input_tokens.is_none()
            && self.output_tokens.is_none()
            && self.finish_reason.is_none()
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self {
            finish_reason: Some(reason),
            ..Self::default()
        }
    }
}

impl Usage {
    /// Fold a usage report into the running counters.
    pub fn apply(&mut self, update: &UsageUpdate) {
        fn merge(slot: &mut u64, value: Option<u64>, mode: UsageMode) {
            if let Some(v) = value {
                match mode {
                    UsageMode::Replace => *slot = v,
                    UsageMode::Add => *slot = slot.saturating_add(v),
                }
            }
        }
        merge(&mut self.input_tokens, update.input_tokens, update.mode);
        merge(
            &mut self.cached_input_tokens,
            update.cached_input_tokens,
            update.mode,
        );
        merge(&mut self.output_tokens, update.output_tokens, update.mode);
        if let Some(reason) = &update.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.cached_input_tokens)
            .saturating_add(self.output_tokens)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in: {} (cached {}), out: {}",
            self.input_tokens, self.cached_input_tokens, self.output_tokens
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_rejects_unknown_fields() {
        let u: Usage = serde_json::from_str(r#"{"input_tokens":3,"finish_reason":"stop"}"#).unwrap();
        assert_eq!(u.input_tokens, 3);
        assert_eq!(u.finish_reason, Some(FinishReason::Stop));

        let err = serde_json::from_str::<Usage>(r#"{"input_tokens":3,"total_tokens":9}"#).unwrap_err();
        assert!(err.to_string().contains("unknown field `total_tokens`"), "{}", err);
    }

    #[test]
    fn test_replace_keeps_unreported_fields() {
        let mut u = Usage::default();
        u.apply(&UsageUpdate {
            input_tokens: Some(12),
            output_tokens: Some(1),
            ..Default::default()
        });
        u.apply(&UsageUpdate {
            output_tokens: Some(40),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        });
        assert_eq!(u.input_tokens, 12);
        assert_eq!(u.output_tokens, 40);
        assert_eq!(u.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn test_add_mode_sums() {
        let mut u = Usage::default();
        for _ in 0..3 {
            u.apply(&UsageUpdate {
                output_tokens: Some(2),
                mode: UsageMode::Add,
                ..Default::default()
            });
        }
        assert_eq!(u.output_tokens, 6);
    }

    #[test]
    fn test_finish_reason_wire_names() {
        assert_eq!(FinishReason::from("tool_calls".to_string()), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from("pause_turn".to_string()),
            FinishReason::Other("pause_turn".into())
        );
        assert_eq!(serde_json::to_string(&FinishReason::Length).unwrap(), "\"length\"");
    }
}
