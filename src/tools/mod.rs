//! # Tools
//!
//! Tool definitions offered to the model and the invoker running the calls it makes.
//!
//! ```rust
//! use ai_chat_core::tools::{invoke, ToolDef, ToolRegistry};
//! use ai_chat_core::types::ToolCall;
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, JsonSchema)]
//! #[serde(deny_unknown_fields)]
//! struct Add {
//!     a: i64,
//!     b: i64,
//! }
//!
//! # tokio_test::block_on(async {
//! let mut registry = ToolRegistry::new();
//! registry
//!     .register(ToolDef::new("add", "Adds two integers", |args: Add| async move {
//!         Ok::<_, anyhow::Error>((args.a + args.b).to_string())
//!     }))
//!     .unwrap();
//!
//! let call = ToolCall::new("call_1", "add", r#"{"a": 2, "b": 3}"#);
//! let result = invoke(&call, registry.defs()).await.unwrap();
//! assert_eq!(result.result, "5");
//! # });
//! ```

pub mod invoke;

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::Result;

pub use invoke::{invoke, InvokeError};

/// Why a tool call failed.
#[derive(Debug)]
pub enum ToolFailure {
    /// The arguments did not decode into the tool's input type. The callback did not run.
    InvalidArguments(String),
    /// The callback ran and failed, possibly after producing some output.
    Failed { output: String, error: anyhow::Error },
}

/// An error carrying the output a callback produced before failing.
///
/// Return it through `anyhow` from a tool callback to keep the partial output:
///
/// ```rust
/// use ai_chat_core::tools::PartialOutput;
///
/// fn lookup() -> anyhow::Result<String> {
///     let found = "3 of 5 pages".to_string();
///     Err(PartialOutput::new(found, anyhow::anyhow!("page 4 timed out")).into())
/// }
/// # assert!(lookup().is_err());
/// ```
#[derive(Debug)]
pub struct PartialOutput {
    pub output: String,
    pub error: anyhow::Error,
}

impl PartialOutput {
    pub fn new(output: impl Into<String>, error: impl Into<anyhow::Error>) -> Self {
        Self {
            output: output.into(),
            error: error.into(),
        }
    }
}

impl fmt::Display for PartialOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.error)
    }
}

impl std::error::Error for PartialOutput {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.error)
    }
}

impl From<anyhow::Error> for ToolFailure {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<PartialOutput>() {
            Ok(partial) => ToolFailure::Failed {
                output: partial.output,
                error: partial.error,
            },
            Err(error) => ToolFailure::Failed {
                output: String::new(),
                error,
            },
        }
    }
}

/// The callback behind a tool. Receives the raw JSON arguments sent by the model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: &str) -> std::result::Result<String, ToolFailure>;
}

/// Decodes tool arguments into `T`, rejecting unknown fields at any depth and trailing data.
///
/// Strictness doesn't depend on `T` carrying `#[serde(deny_unknown_fields)]`.
pub fn decode_arguments<T: DeserializeOwned>(arguments: &str) -> std::result::Result<T, String> {
    let mut de = serde_json::Deserializer::from_str(arguments);
    let mut unknown = Vec::new();
    let input: T = serde_ignored::deserialize(&mut de, |path| unknown.push(path.to_string()))
        .map_err(|e| e.to_string())?;
    de.end().map_err(|e| e.to_string())?;
    if !unknown.is_empty() {
        return Err(format!("unknown field(s) {}", unknown.join(", ")));
    }
    Ok(input)
}

/// Adapts a closure taking a typed input into a [`ToolHandler`].
struct TypedHandler<T, F> {
    f: F,
    _input: PhantomData<fn(T)>,
}

#[async_trait]
impl<T, F, Fut> ToolHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    async fn call(&self, arguments: &str) -> std::result::Result<String, ToolFailure> {
        let input: T = decode_arguments(arguments).map_err(ToolFailure::InvalidArguments)?;
        (self.f)(input).await.map_err(ToolFailure::from)
    }
}

/// A tool the model may call.
#[derive(Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub input_schema: Value,
    #[serde(skip)]
    handler: Arc<dyn ToolHandler>,
}

impl ToolDef {
    /// A tool whose arguments schema is derived from the callback's input type.
    pub fn new<T, F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json_schema_from_type::<T>(),
            handler: Arc::new(TypedHandler {
                f,
                _input: PhantomData,
            }),
        }
    }

    /// A tool backed by a custom handler, with an explicit schema.
    pub fn from_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
        }
    }

    /// Replaces the derived schema, e.g. to document fields further.
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub async fn call(&self, arguments: &str) -> std::result::Result<String, ToolFailure> {
        self.handler.call(arguments).await
    }

    pub fn validate(&self) -> std::result::Result<(), InvokeError> {
        let invalid = |reason: &str| InvokeError::InvalidDefinition {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is required"));
        }
        if self.description.trim().is_empty() {
            return Err(invalid("description is required"));
        }
        if !self.input_schema.is_object() {
            return Err(invalid("input_schema must be a JSON object"));
        }
        Ok(())
    }
}

impl fmt::Debug for ToolDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDef")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish_non_exhaustive()
    }
}

pub fn json_schema_from_type<T: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
    }
    value
}

/// The set of tools offered in a conversation. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ToolDef) -> Result<()> {
        def.validate()?;
        if self.get(&def.name).is_some() {
            return Err(InvokeError::DuplicateTool { name: def.name }.into());
        }
        self.tools.push(def);
        Ok(())
    }

    pub fn with(mut self, def: ToolDef) -> Result<Self> {
        self.register(def)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn defs(&self) -> &[ToolDef] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{Message, MessageRole};
    use crate::types::tool::ToolCall;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct Weather {
        /// City name
        city: String,
    }

    fn weather_tool(calls: Arc<AtomicUsize>) -> ToolDef {
        ToolDef::new("get_weather", "Current weather for a city", move |w: Weather| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if w.city == "Atlantis" {
                    anyhow::bail!("no station in {}", w.city);
                }
                Ok(format!("sunny in {}", w.city))
            }
        })
    }

    #[test]
    fn test_schema_is_derived() {
        let def = weather_tool(Arc::default());
        assert_eq!(def.input_schema["type"], "object");
        assert_eq!(def.input_schema["properties"]["city"]["type"], "string");
        assert!(def.input_schema.get("$schema").is_none());
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["name"], "get_weather");
    }

    #[test]
    fn test_registry_rejects_duplicates_and_blank_fields() {
        let mut reg = ToolRegistry::new();
        reg.register(weather_tool(Arc::default())).unwrap();
        let err = reg.register(weather_tool(Arc::default())).unwrap_err();
        assert!(err.to_string().contains("already registered"), "{}", err);

        let blank = ToolDef::new("x", " ", |w: Weather| async move { anyhow::Ok(w.city) });
        assert!(reg.register(blank).is_err());
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_success_and_callback_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tools = vec![weather_tool(calls.clone())];

        let ok = invoke(&ToolCall::new("1", "get_weather", r#"{"city":"Paris"}"#), &tools)
            .await
            .unwrap();
        assert_eq!(ok.result, "sunny in Paris");
        assert!(!ok.is_error);
        assert_eq!(ok.id, "1");

        let failed = invoke(&ToolCall::new("2", "get_weather", r#"{"city":"Atlantis"}"#), &tools)
            .await
            .unwrap();
        assert!(failed.is_error);
        assert_eq!(failed.result, "no station in Atlantis");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_arguments_skip_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tools = vec![weather_tool(calls.clone())];
        for args in [r#"{"town":"Paris"}"#, r#"{"city":"Paris"} trailing"#, "not json"] {
            let res = invoke(&ToolCall::new("1", "get_weather", args), &tools)
                .await
                .unwrap();
            assert!(res.is_error);
            assert!(res.result.starts_with("failed to decode tool call arguments"), "{}", res.result);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Loose {
        a: i64,
        #[serde(default)]
        inner: Option<Inner>,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Inner {
        b: i64,
    }

    #[tokio::test]
    async fn test_unknown_fields_rejected_without_deny_attribute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let tools = vec![ToolDef::new("sum", "Sums a and b", move |l: Loose| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok((l.a + l.inner.map_or(0, |i| i.b)).to_string())
            }
        })];

        for (args, field) in [
            (r#"{"a":1,"extra":2}"#, "extra"),
            (r#"{"a":1,"inner":{"b":2,"c":3}}"#, "inner.c"),
        ] {
            let res = invoke(&ToolCall::new("1", "sum", args), &tools).await.unwrap();
            assert!(res.is_error, "{}", args);
            assert!(res.result.starts_with("failed to decode tool call arguments"), "{}", res.result);
            assert!(res.result.contains(field), "{}", res.result);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ok = invoke(&ToolCall::new("2", "sum", r#"{"a":1,"inner":{"b":2}}"#), &tools)
            .await
            .unwrap();
        assert!(!ok.is_error);
        assert_eq!(ok.result, "3");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_output_kept_with_error() {
        let tools = vec![ToolDef::new("pages", "Fetches pages", |w: Weather| async move {
            let fetched = format!("page 1 of {}", w.city);
            Err::<String, anyhow::Error>(PartialOutput::new(fetched, anyhow::anyhow!("page 2 timed out")).into())
        })];
        let res = invoke(&ToolCall::new("1", "pages", r#"{"city":"Oslo"}"#), &tools)
            .await
            .unwrap();
        assert!(res.is_error);
        assert_eq!(res.result, "page 1 of Oslo\n\nerror: page 2 timed out");

        let failure = ToolFailure::from(anyhow::Error::from(PartialOutput::new("", anyhow::anyhow!("x"))));
        assert!(matches!(failure, ToolFailure::Failed { ref output, .. } if output.is_empty()));
    }

    #[test]
    fn test_decode_arguments_rejects_trailing_data() {
        assert_eq!(decode_arguments::<Inner>(r#"{"b":4}"#).unwrap().b, 4);
        assert!(decode_arguments::<Inner>(r#"{"b":4}{"b":5}"#).is_err());
        let err = decode_arguments::<Inner>(r#"{"b":4,"z":0}"#).unwrap_err();
        assert!(err.contains('z'), "{}", err);
    }

    #[tokio::test]
    async fn test_unknown_and_ambiguous_tools() {
        let calls = Arc::new(AtomicUsize::new(0));
        let call = ToolCall::new("1", "get_weather", r#"{"city":"Paris"}"#);

        let err = invoke(&call, &[]).await.unwrap_err();
        assert_eq!(
            err,
            InvokeError::UnknownTool {
                name: "get_weather".into()
            }
        );

        let dup = vec![weather_tool(calls.clone()), weather_tool(calls.clone())];
        let err = invoke(&call, &dup).await.unwrap_err();
        assert!(matches!(err, InvokeError::AmbiguousTool { count: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_do_tool_calls_sequential() {
        let tools = vec![weather_tool(Arc::default())];
        let mut msg = Message::new(MessageRole::Assistant);
        msg.tool_calls = vec![
            ToolCall::new("a", "get_weather", r#"{"city":"Paris"}"#),
            ToolCall::new("b", "get_weather", r#"{"city":"Rome"}"#),
        ];
        let reply = msg.do_tool_calls(&tools).await.unwrap().unwrap();
        assert_eq!(reply.role, MessageRole::User);
        let ids: Vec<_> = reply.tool_call_results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(reply.validate().is_ok());

        assert!(Message::user("hi").do_tool_calls(&tools).await.unwrap().is_none());
    }
}
