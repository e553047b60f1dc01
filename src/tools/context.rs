//! Per-invocation context: cancellation, run options, approval callback, shared session maps.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stderr, Stdin,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::session::{ReadFileTimestamps, SessionApprovals};
use crate::tools::registry::BoxFuture;
use crate::tools::result::ToolResult;

/// Read-only snapshot of run configuration handed to tools.
#[derive(Debug, Clone, Default)]
pub struct ToolOptions {
    /// Names of the tools available in this run.
    pub tools: Vec<String>,
    /// Active model identifier.
    pub model: String,
    /// 0 for the main run; sub-agent forks count up from 1.
    pub fork_number: u32,
    pub max_thinking_tokens: u32,
    pub verbose: bool,
}

/// Asks the user whether `tool` may run with `input`. Implemented by the terminal layer.
///
/// May take arbitrarily long; the permission gate races it against the invocation's
/// cancellation token, so implementations need not watch the token themselves.
pub trait ApprovalCallback: Send + Sync {
    fn request<'a>(&'a self, tool: &'a str, input: &'a Value) -> BoxFuture<'a, bool>;
}

/// Fixed answer: `StaticApproval(false)` for non-interactive runs, `(true)` for trusted ones.
#[derive(Debug, Clone, Copy)]
pub struct StaticApproval(pub bool);

impl ApprovalCallback for StaticApproval {
    fn request<'a>(&'a self, _tool: &'a str, _input: &'a Value) -> BoxFuture<'a, bool> {
        let answer = self.0;
        Box::pin(async move { answer })
    }
}

/// `y/N` prompt written to `output`, answers read line by line from `input`.
/// Anything but `y`/`yes` denies, and so does a prompt that could not be shown.
///
/// One instance owns the input buffer for the whole run, so type-ahead answers are kept
/// between prompts. Prompts are serialized.
pub struct TerminalApproval<R = BufReader<Stdin>, W = Stderr> {
    io: Mutex<(R, W)>,
}

impl TerminalApproval {
    /// Prompt on stderr, answers from stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stderr())
    }
}

impl<R, W> TerminalApproval<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            io: Mutex::new((input, output)),
        }
    }
}

impl<R, W> ApprovalCallback for TerminalApproval<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn request<'a>(&'a self, tool: &'a str, input: &'a Value) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let mut io = self.io.lock().await;
            let (reader, writer) = &mut *io;
            let prompt = format!("Allow {tool} to run with {input}? [y/N] ");
            let shown = match writer.write_all(prompt.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = shown {
                warn!(tool, error = %e, "approval prompt could not be shown; denying");
                return false;
            }
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => false,
                Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            }
        })
    }
}

/// Incremental update from a streaming tool, in emission order.
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub tool: String,
    /// 0-based position in the stream.
    pub seq: usize,
    pub item: ToolResult,
}

pub type ProgressSender = mpsc::UnboundedSender<ToolProgress>;

/// Context for one tool invocation. Created at invocation start, dropped at the end.
#[derive(Clone)]
pub struct ToolUseContext {
    /// Cooperative cancellation; the caller may trigger it at any time.
    pub cancel: CancellationToken,
    pub options: ToolOptions,
    pub approver: Arc<dyn ApprovalCallback>,
    /// Shared with the session; file-touching tools record into it.
    pub read_file_timestamps: ReadFileTimestamps,
    /// Shared with the session; scopes approved earlier in the run.
    pub session_approvals: SessionApprovals,
    /// Root for relative file paths.
    pub cwd: PathBuf,
    /// Root for memory tools.
    pub memory_dir: PathBuf,
    /// Receives streaming progress, if the caller renders it.
    pub progress: Option<ProgressSender>,
}

impl ToolUseContext {
    /// Standalone context with default options and fresh maps.
    pub fn new(cwd: PathBuf, memory_dir: PathBuf, approver: Arc<dyn ApprovalCallback>) -> Self {
        Self {
            cancel: CancellationToken::new(),
            options: ToolOptions::default(),
            approver,
            read_file_timestamps: ReadFileTimestamps::default(),
            session_approvals: SessionApprovals::default(),
            cwd,
            memory_dir,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Forward a progress item; a closed receiver is ignored.
    pub fn emit_progress(&self, tool: &str, seq: usize, item: &ToolResult) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(ToolProgress {
                tool: tool.to_string(),
                seq,
                item: item.clone(),
            });
        }
    }
}
