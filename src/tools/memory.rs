//! memory_read, memory_write: persistent notes under the memory directory.

use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tools::context::{ToolOptions, ToolUseContext};
use crate::tools::error::{FieldError, SchemaError, ToolFailure};
use crate::tools::file::{check_path, resolve_path};
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::{ToolOutput, ToolResult};
use crate::tools::schema::{InputSchema, TypedSchema, parse_input};

const READ_PROMPT: &str = "Read from persistent memory, which survives across runs. \
Pass file_path to get one memory file's content; omit it to list every stored memory file \
(paths relative to the memory directory).";

const WRITE_PROMPT: &str = "Store text in persistent memory at file_path (relative to the \
memory directory). An existing file at that path is replaced. Use distinct paths for \
unrelated data so they can be read back independently with memory_read.";

/// All files under `root`, as sorted `/`-separated paths relative to it. Missing root → empty.
pub async fn list_memory_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut out = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(rel) = path.strip_prefix(root) {
                let parts: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(parts.join("/"));
            }
        }
    }
    out.sort();
    Ok(out)
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct MemoryReadInput {
    /// Memory file to read; omit to list all memory files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct MemoryWriteInput {
    /// Where to store the data
    pub file_path: String,
    /// Text to store
    pub content: String,
}

/// memory_read tool.
pub struct MemoryReadTool {
    enabled: bool,
    schema: TypedSchema<MemoryReadInput>,
}

impl MemoryReadTool {
    pub fn new(enabled: bool) -> Result<Self, SchemaError> {
        Ok(Self {
            enabled,
            schema: TypedSchema::compile()?,
        })
    }
}

impl Tool for MemoryReadTool {
    fn name(&self) -> &str {
        "memory_read"
    }

    fn description(&self) -> &str {
        "Read data from memory storage."
    }

    fn prompt<'a>(&'a self, _options: &'a ToolOptions) -> BoxFuture<'a, String> {
        Box::pin(async { READ_PROMPT.to_string() })
    }

    fn input_schema(&self) -> &dyn InputSchema {
        &self.schema
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn validate_input(&self, input: &Value, ctx: &ToolUseContext) -> Result<(), FieldError> {
        let input: MemoryReadInput = parse_input(input)?;
        match input.file_path {
            Some(p) => check_path(&p, "file_path", &ctx.memory_dir),
            None => Ok(()),
        }
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a ToolUseContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolFailure>> {
        Box::pin(async move {
            let input: MemoryReadInput = serde_json::from_value(input)?;
            if let Some(file_path) = input.file_path {
                let resolved =
                    resolve_path(&file_path, &ctx.memory_dir).map_err(ToolFailure::Message)?;
                let content = match tokio::fs::read_to_string(&resolved).await {
                    Ok(c) => c,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(ToolFailure::msg(format!(
                            "memory file '{file_path}' does not exist"
                        )));
                    }
                    Err(e) => return Err(e.into()),
                };
                ctx.read_file_timestamps.record_from_disk(&resolved).await?;
                return Ok(ToolOutput::single(ToolResult::text(content)));
            }

            let files = list_memory_files(&ctx.memory_dir).await?;
            let for_llm = if files.is_empty() {
                "No memory files stored.".to_string()
            } else {
                files.join("\n")
            };
            Ok(ToolOutput::single(ToolResult::new(json!(files), for_llm)))
        })
    }
}

/// memory_write tool. Writes only inside the memory directory, so it never prompts.
pub struct MemoryWriteTool {
    enabled: bool,
    schema: TypedSchema<MemoryWriteInput>,
}

impl MemoryWriteTool {
    pub fn new(enabled: bool) -> Result<Self, SchemaError> {
        Ok(Self {
            enabled,
            schema: TypedSchema::compile()?,
        })
    }
}

impl Tool for MemoryWriteTool {
    fn name(&self) -> &str {
        "memory_write"
    }

    fn description(&self) -> &str {
        "Write data to memory storage."
    }

    fn prompt<'a>(&'a self, _options: &'a ToolOptions) -> BoxFuture<'a, String> {
        Box::pin(async { WRITE_PROMPT.to_string() })
    }

    fn input_schema(&self) -> &dyn InputSchema {
        &self.schema
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn needs_permission(&self, _input: &Value, _ctx: &ToolUseContext) -> bool {
        false
    }

    fn validate_input(&self, input: &Value, ctx: &ToolUseContext) -> Result<(), FieldError> {
        let input: MemoryWriteInput = parse_input(input)?;
        check_path(&input.file_path, "file_path", &ctx.memory_dir)
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a ToolUseContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolFailure>> {
        Box::pin(async move {
            let MemoryWriteInput { file_path, content } = serde_json::from_value(input)?;
            let resolved =
                resolve_path(&file_path, &ctx.memory_dir).map_err(ToolFailure::Message)?;
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&resolved, content).await?;
            ctx.read_file_timestamps.record_from_disk(&resolved).await?;
            Ok(ToolOutput::single(ToolResult::text("Saved")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_recursive_and_sorted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        std::fs::create_dir_all(root.join("prefs")).unwrap();
        std::fs::write(root.join("zeta"), "z").unwrap();
        std::fs::write(root.join("prefs").join("theme"), "dark").unwrap();
        std::fs::write(root.join("alpha"), "a").unwrap();
        let files = list_memory_files(root).await.unwrap();
        assert_eq!(files, vec!["alpha", "prefs/theme", "zeta"]);
    }

    #[tokio::test]
    async fn list_missing_dir_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let files = list_memory_files(&tmp.path().join("nope")).await.unwrap();
        assert!(files.is_empty());
    }
}
