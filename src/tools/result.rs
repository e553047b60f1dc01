//! Tool results and the single-value / stream output variant.

use std::fmt;

use futures::Stream;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use crate::tools::error::ToolFailure;

/// One result (final or intermediate) produced by a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Structured payload for the caller.
    pub data: Value,
    /// Text handed back to the model.
    pub for_llm: String,
}

impl ToolResult {
    #[inline]
    pub fn new(data: Value, for_llm: impl Into<String>) -> Self {
        Self {
            data,
            for_llm: for_llm.into(),
        }
    }

    /// Plain text result: `data` is the same string.
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            data: Value::String(text.clone()),
            for_llm: text,
        }
    }

    /// Structured result rendered as compact JSON for the model.
    #[inline]
    pub fn json(data: Value) -> Self {
        let for_llm = data.to_string();
        Self { data, for_llm }
    }
}

/// Lazy, finite, non-restartable sequence of progress items; the last item is the result.
pub type ProgressStream = BoxStream<'static, Result<ToolResult, ToolFailure>>;

/// What a tool body returns.
pub enum ToolOutput {
    Single(ToolResult),
    Stream(ProgressStream),
}

impl ToolOutput {
    #[inline]
    pub fn single(result: ToolResult) -> Self {
        Self::Single(result)
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<ToolResult, ToolFailure>> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }
}

impl fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(r) => f.debug_tuple("Single").field(r).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}
