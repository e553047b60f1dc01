//! file_read, file_write: paths relative to the session cwd, stale-write protection.

use std::path::{Component, Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::tools::context::ToolUseContext;
use crate::tools::error::{FieldError, SchemaError, ToolFailure};
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::{ToolOutput, ToolResult};
use crate::tools::schema::{InputSchema, TypedSchema, parse_input};

/// Resolve `path` under `root`; reject absolute paths and `..` escapes.
/// Does not require the path to exist (for writes).
pub fn resolve_path(path: &str, root: &Path) -> Result<PathBuf, String> {
    let path = path.trim();
    if path.is_empty() {
        return Err("path is empty".into());
    }
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut current = root.clone();
    for comp in Path::new(path).components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => {
                return Err("absolute path not allowed".into());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if !current.pop() || !current.starts_with(&root) {
                    return Err("path escapes its root directory".into());
                }
            }
            Component::Normal(p) => current.push(p),
        }
    }
    if !current.starts_with(&root) || current == root {
        return Err("path escapes its root directory".into());
    }
    Ok(current)
}

/// Path check shared by tools that take a path: must resolve under `root`.
pub(crate) fn check_path(path: &str, key: &str, root: &Path) -> Result<(), FieldError> {
    resolve_path(path, root)
        .map(|_| ())
        .map_err(|e| FieldError::new(key, e))
}

/// `path` with `.` dropped and `dir/..` collapsed, joined with `/`.
/// Spellings of the same relative path map to the same key.
fn normalized_key(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    for comp in Path::new(path.trim()).components() {
        match comp {
            Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::Prefix(_) | Component::RootDir => {}
        }
    }
    parts.join("/")
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct FileReadInput {
    /// Path relative to the working directory
    pub file_path: String,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct FileWriteInput {
    /// Path relative to the working directory
    pub file_path: String,
    /// Full new file content
    pub content: String,
}

/// file_read tool.
pub struct FileReadTool {
    schema: TypedSchema<FileReadInput>,
}

impl FileReadTool {
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            schema: TypedSchema::compile()?,
        })
    }
}

impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file in the working directory. Path is relative to the working directory."
    }

    fn input_schema(&self) -> &dyn InputSchema {
        &self.schema
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn validate_input(&self, input: &Value, ctx: &ToolUseContext) -> Result<(), FieldError> {
        let input: FileReadInput = parse_input(input)?;
        check_path(&input.file_path, "file_path", &ctx.cwd)
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a ToolUseContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolFailure>> {
        Box::pin(async move {
            let input: FileReadInput = serde_json::from_value(input)?;
            let resolved =
                resolve_path(&input.file_path, &ctx.cwd).map_err(ToolFailure::Message)?;
            let content = tokio::fs::read_to_string(&resolved).await?;
            ctx.read_file_timestamps.record_from_disk(&resolved).await?;
            Ok(ToolOutput::single(ToolResult::text(content)))
        })
    }
}

/// file_write tool. Refuses to overwrite a file that changed since it was last read.
pub struct FileWriteTool {
    schema: TypedSchema<FileWriteInput>,
}

impl FileWriteTool {
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            schema: TypedSchema::compile()?,
        })
    }
}

impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Overwrite a file in the working directory with the given content. Existing files must be read first."
    }

    fn input_schema(&self) -> &dyn InputSchema {
        &self.schema
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn validate_input(&self, input: &Value, ctx: &ToolUseContext) -> Result<(), FieldError> {
        let input: FileWriteInput = parse_input(input)?;
        check_path(&input.file_path, "file_path", &ctx.cwd)
    }

    /// One approval per target file, however the path is spelled.
    fn approval_scope(&self, input: &Value) -> Option<String> {
        let input: FileWriteInput = parse_input(input).ok()?;
        Some(format!("file_write:{}", normalized_key(&input.file_path)))
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a ToolUseContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolFailure>> {
        Box::pin(async move {
            let FileWriteInput { file_path, content } = serde_json::from_value(input)?;
            let resolved = resolve_path(&file_path, &ctx.cwd).map_err(ToolFailure::Message)?;
            ctx.read_file_timestamps.check_fresh(&resolved).await?;
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&resolved, &content).await?;
            ctx.read_file_timestamps.record_from_disk(&resolved).await?;
            let bytes = content.len();
            Ok(ToolOutput::single(ToolResult::new(
                json!({ "file_path": resolved.display().to_string(), "bytes": bytes }),
                format!("wrote {bytes} bytes to {}", resolved.display()),
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_rejects_escape() {
        let ws = std::env::temp_dir();
        assert!(resolve_path("..", &ws).is_err());
        assert!(resolve_path("../etc/passwd", &ws).is_err());
        assert!(resolve_path("/etc/passwd", &ws).is_err());
        assert!(resolve_path("  ", &ws).is_err());
        assert!(resolve_path(".", &ws).is_err());
        assert!(resolve_path("a/../b.txt", &ws).unwrap().ends_with("b.txt"));
    }

    #[test]
    fn write_scope_is_per_path() {
        let tool = FileWriteTool::new().unwrap();
        let scope = |p: &str| tool.approval_scope(&json!({ "file_path": p, "content": "" }));
        assert_eq!(scope("notes.txt"), Some("file_write:notes.txt".to_string()));
        assert_eq!(scope("./notes.txt"), scope("notes.txt"));
        assert_eq!(scope(" docs/../notes.txt "), scope("notes.txt"));
        assert_eq!(scope("out//./a.txt"), Some("file_write:out/a.txt".to_string()));
        assert_ne!(scope("out/a.txt"), scope("a.txt"));
    }
}
