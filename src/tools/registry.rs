//! Tool contract and registry: unique names, registration order, enabled-only lookup.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;

use crate::session::RunEnv;
use crate::tools::bash::BashTool;
use crate::tools::context::{ToolOptions, ToolUseContext};
use crate::tools::error::{FieldError, RegistryError, ToolFailure};
use crate::tools::file::{FileReadTool, FileWriteTool};
use crate::tools::memory::{MemoryReadTool, MemoryWriteTool};
use crate::tools::notebook::NotebookReadTool;
use crate::tools::result::ToolOutput;
use crate::tools::schema::InputSchema;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A single tool. One instance per registered tool; immutable once registered.
pub trait Tool: Send + Sync {
    /// Registry key; stable across restarts.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Long-form description for the model; may depend on run options.
    fn prompt<'a>(&'a self, _options: &'a ToolOptions) -> BoxFuture<'a, String> {
        Box::pin(async move { self.description().to_string() })
    }

    fn input_schema(&self) -> &dyn InputSchema;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Read-only tools never prompt for permission.
    fn is_read_only(&self) -> bool;

    /// Semantic checks on schema-valid input; runs before any permission prompt.
    fn validate_input(&self, _input: &Value, _ctx: &ToolUseContext) -> Result<(), FieldError> {
        Ok(())
    }

    /// Operation class an approval covers for the rest of the session, if any.
    fn approval_scope(&self, _input: &Value) -> Option<String> {
        None
    }

    /// Whether this invocation needs interactive approval. By default: yes, unless its
    /// approval scope was already granted this session.
    fn needs_permission(&self, input: &Value, ctx: &ToolUseContext) -> bool {
        match self.approval_scope(input) {
            Some(scope) => !ctx.session_approvals.contains(&scope),
            None => true,
        }
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a ToolUseContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolFailure>>;
}

/// Tool definition handed to the model caller.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Default)]
struct Inner {
    order: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

/// Registry of tools. Thread-safe; process lifetime.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A name collision fails and keeps the first registration.
    pub fn register<T: Tool + 'static>(&self, tool: T) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let name = tool.name().to_string();
        if inner.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        let idx = inner.order.len();
        inner.order.push(tool);
        inner.by_name.insert(name, idx);
        Ok(())
    }

    /// Enabled tools in registration order.
    pub fn list(&self) -> Vec<Arc<dyn Tool>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter(|t| t.is_enabled())
            .cloned()
            .collect()
    }

    /// Enabled tool by name. Disabled tools are not found.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_name
            .get(name)
            .map(|&idx| Arc::clone(&inner.order[idx]))
            .filter(|t| t.is_enabled())
    }

    /// Names of enabled tools in registration order.
    pub fn names(&self) -> Vec<String> {
        self.list().iter().map(|t| t.name().to_string()).collect()
    }

    /// "name - description" per enabled tool.
    pub fn summaries(&self) -> Vec<String> {
        self.list()
            .iter()
            .map(|t| format!("{} - {}", t.name(), t.description()))
            .collect()
    }

    /// Definitions for the model, with prompts resolved against `options`.
    pub async fn tool_defs(&self, options: &ToolOptions) -> Vec<ToolDef> {
        let mut defs = Vec::new();
        for tool in self.list() {
            defs.push(ToolDef {
                name: tool.name().to_string(),
                description: tool.prompt(options).await,
                input_schema: tool.input_schema().to_json_schema(),
            });
        }
        defs
    }
}

/// Built-in tool set. Memory tools are present but only enabled when `env` allows them.
pub fn build_default_registry(env: &RunEnv) -> Result<ToolRegistry, RegistryError> {
    let reg = ToolRegistry::new();
    reg.register(FileReadTool::new()?)?;
    reg.register(FileWriteTool::new()?)?;
    reg.register(NotebookReadTool::new()?)?;
    reg.register(BashTool::new()?)?;
    let memory = env.memory_enabled();
    reg.register(MemoryReadTool::new(memory)?)?;
    reg.register(MemoryWriteTool::new(memory)?)?;
    Ok(reg)
}
