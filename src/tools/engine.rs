//! Execution engine: resolve → validate → authorize → execute → collapse output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::tools::context::ToolUseContext;
use crate::tools::error::{FieldError, ToolError, ToolFailure};
use crate::tools::permission::{PermissionGate, PermissionState};
use crate::tools::registry::{Tool, ToolRegistry};
use crate::tools::result::{ProgressStream, ToolOutput, ToolResult};

/// How long a cancelled tool body gets to notice the token before it is abandoned.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Drives single tool invocations. Cheap to share; holds no per-invocation state.
pub struct ExecutionEngine {
    registry: Arc<ToolRegistry>,
    gate: PermissionGate,
    cancel_grace: Duration,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            gate: PermissionGate::new(),
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_gate(mut self, gate: PermissionGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    #[inline]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Invoke `tool_name` with `raw_input`. Validation and permission failures happen before
    /// any tool code runs; tool failures are never retried here.
    pub async fn invoke(
        &self,
        tool_name: &str,
        raw_input: Value,
        ctx: &ToolUseContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .registry
            .find(tool_name)
            .ok_or_else(|| ToolError::ToolNotFound(tool_name.to_string()))?;
        let started = Instant::now();

        let input = validate(tool.as_ref(), &raw_input, ctx)?;

        match self.gate.authorize(tool.as_ref(), &input, ctx).await {
            state if state.is_allowed() => {}
            PermissionState::Denied { cancelled } => {
                return Err(ToolError::PermissionDenied {
                    tool: tool_name.to_string(),
                    cancelled,
                });
            }
            state => {
                warn!(tool = tool_name, ?state, "permission gate stopped in a non-terminal state");
                return Err(ToolError::PermissionDenied {
                    tool: tool_name.to_string(),
                    cancelled: false,
                });
            }
        }

        let result = match self.run_body(tool.as_ref(), input, ctx).await? {
            ToolOutput::Single(result) => Ok(result),
            ToolOutput::Stream(stream) => self.drain(tool_name, stream, ctx).await,
        };
        match &result {
            Ok(_) => debug!(tool = tool_name, elapsed_ms = started.elapsed().as_millis() as u64, "tool finished"),
            Err(e) if e.is_cancelled() => debug!(tool = tool_name, "tool cancelled"),
            Err(e) => warn!(tool = tool_name, error = %e, "tool failed"),
        }
        result
    }

    /// Run the body future, racing it against cancellation.
    async fn run_body(
        &self,
        tool: &dyn Tool,
        input: Value,
        ctx: &ToolUseContext,
    ) -> Result<ToolOutput, ToolError> {
        let name = tool.name();
        if ctx.cancel.is_cancelled() {
            return Err(cancelled(name));
        }
        let body = tool.execute(input, ctx);
        tokio::pin!(body);
        tokio::select! {
            biased;
            res = &mut body => res.map_err(|e| ToolError::from_failure(name, e)),
            _ = ctx.cancel.cancelled() => {
                if tokio::time::timeout(self.cancel_grace, &mut body).await.is_err() {
                    warn!(
                        tool = name,
                        grace_ms = self.cancel_grace.as_millis() as u64,
                        "tool did not observe cancellation within the grace period"
                    );
                }
                Err(cancelled(name))
            }
        }
    }

    /// Drain a progress stream: forward every item, keep only the last.
    async fn drain(
        &self,
        name: &str,
        mut stream: ProgressStream,
        ctx: &ToolUseContext,
    ) -> Result<ToolResult, ToolError> {
        let mut last = None;
        let mut seq = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(cancelled(name)),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(item)) => {
                    ctx.emit_progress(name, seq, &item);
                    seq += 1;
                    last = Some(item);
                }
                Some(Err(e)) => return Err(ToolError::from_failure(name, e)),
                None => break,
            }
        }
        last.ok_or_else(|| {
            ToolError::from_failure(name, ToolFailure::msg("stream ended without a result"))
        })
    }
}

/// Schema first, then the tool's own checks.
fn validate(tool: &dyn Tool, raw: &Value, ctx: &ToolUseContext) -> Result<Value, ToolError> {
    let input = tool
        .input_schema()
        .validate(raw)
        .map_err(|errors| invalid(tool.name(), errors))?;
    tool.validate_input(&input, ctx)
        .map_err(|e| invalid(tool.name(), vec![e]))?;
    Ok(input)
}

fn invalid(tool: &str, errors: Vec<FieldError>) -> ToolError {
    debug!(tool, errors = errors.len(), "invalid tool input");
    ToolError::InvalidInput {
        tool: tool.to_string(),
        errors,
    }
}

#[inline]
fn cancelled(tool: &str) -> ToolError {
    ToolError::Cancelled {
        tool: tool.to_string(),
    }
}
