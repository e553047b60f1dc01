//! Tool contract, registry, permission gate, execution engine; built-ins: file, memory, notebook, bash.

pub mod bash;
pub mod context;
pub mod engine;
pub mod error;
pub mod file;
pub mod memory;
pub mod notebook;
pub mod permission;
pub mod registry;
pub mod result;
pub mod schema;

pub use bash::BashTool;
pub use context::{ApprovalCallback, StaticApproval, TerminalApproval, ToolOptions, ToolProgress, ToolUseContext};
pub use engine::ExecutionEngine;
pub use error::{FieldError, RegistryError, SchemaError, ToolError, ToolFailure};
pub use file::{FileReadTool, FileWriteTool};
pub use memory::{MemoryReadTool, MemoryWriteTool};
pub use notebook::NotebookReadTool;
pub use permission::{PermissionGate, PermissionState};
pub use registry::{Tool, ToolDef, ToolRegistry, build_default_registry};
pub use result::{ToolOutput, ToolResult};
pub use schema::{AnyInput, InputSchema, TypedSchema, parse_input};
