//! bash: run a shell command in the working directory, streaming output lines as progress.
//!
//! The last stream item carries the full (truncated) stdout/stderr and the exit code. The child
//! is killed when the invocation is cancelled, when the timeout elapses, or when the consumer
//! drops the stream.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tools::context::ToolUseContext;
use crate::tools::error::{FieldError, SchemaError, ToolFailure};
use crate::tools::registry::{BoxFuture, Tool};
use crate::tools::result::{ToolOutput, ToolResult};
use crate::tools::schema::{InputSchema, TypedSchema, parse_input};

const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
/// Per-stream cap on captured output.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Commands that reach the network or open a browser; rejected outright.
const BANNED_COMMANDS: &[&str] = &[
    "alias", "curl", "curlie", "wget", "axel", "aria2c", "nc", "telnet", "lynx", "w3m", "links",
    "httpie", "xh", "http-prompt", "chrome", "firefox", "safari",
];

/// Commands that only inspect state; they run without asking when used without redirection.
const READ_ONLY_COMMANDS: &[&str] = &[
    "pwd", "ls", "tree", "date", "whoami", "which", "echo", "cat", "head", "tail", "wc",
];

/// Characters that end a simple command for `sh`, newlines included.
const COMMAND_SEPARATORS: [char; 7] = ['|', ';', '&', '\n', '\r', '(', ')'];

/// Program run by each separated segment: quotes removed, leading `VAR=value`
/// assignments skipped, directories stripped (`/usr/bin/curl` is `curl`).
/// Segments `shlex` cannot tokenize fall back to their first whitespace word.
fn command_heads(command: &str) -> Vec<String> {
    command
        .split(COMMAND_SEPARATORS)
        .filter_map(|seg| {
            let head = match shlex::split(seg) {
                Some(words) => words.into_iter().find(|w| !is_assignment(w))?,
                None => seg
                    .split_whitespace()
                    .find(|w| !is_assignment(w))?
                    .trim_matches(['"', '\'', '\\'])
                    .to_string(),
            };
            Some(program_name(&head))
        })
        .collect()
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn program_name(word: &str) -> String {
    Path::new(word)
        .file_name()
        .map_or_else(|| word.to_string(), |n| n.to_string_lossy().into_owned())
}

fn is_read_only_command(command: &str) -> bool {
    if command.contains(['>', '<', '`', '$']) {
        return false;
    }
    if !command
        .split(COMMAND_SEPARATORS)
        .all(|seg| shlex::split(seg).is_some())
    {
        return false;
    }
    let heads = command_heads(command);
    !heads.is_empty() && heads.iter().all(|h| READ_ONLY_COMMANDS.contains(&h.as_str()))
}

fn push_capped(buf: &mut String, line: &str) {
    if buf.len() >= MAX_OUTPUT_CHARS {
        return;
    }
    buf.push_str(line);
    buf.push('\n');
    if buf.len() > MAX_OUTPUT_CHARS {
        let mut cut = MAX_OUTPUT_CHARS;
        while !buf.is_char_boundary(cut) {
            cut -= 1;
        }
        buf.truncate(cut);
        buf.push_str("\n... (output truncated)");
    }
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
pub struct BashInput {
    /// Shell command to run
    pub command: String,
    /// Timeout in milliseconds (max 600000, default 120000)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// bash tool.
pub struct BashTool {
    schema: TypedSchema<BashInput>,
}

impl BashTool {
    pub fn new() -> Result<Self, SchemaError> {
        Ok(Self {
            schema: TypedSchema::compile()?,
        })
    }
}

impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory and stream its output."
    }

    fn input_schema(&self) -> &dyn InputSchema {
        &self.schema
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn validate_input(&self, input: &Value, _ctx: &ToolUseContext) -> Result<(), FieldError> {
        let input: BashInput = parse_input(input)?;
        if input.command.trim().is_empty() {
            return Err(FieldError::new("command", "must not be empty"));
        }
        if let Some(banned) = command_heads(&input.command)
            .into_iter()
            .find(|h| BANNED_COMMANDS.contains(&h.as_str()))
        {
            return Err(FieldError::new(
                "command",
                format!("uses '{banned}', which is not allowed"),
            ));
        }
        if let Some(ms) = input.timeout_ms {
            if ms == 0 || ms > MAX_TIMEOUT_MS {
                return Err(FieldError::new(
                    "timeout_ms",
                    format!("must be between 1 and {MAX_TIMEOUT_MS}"),
                ));
            }
        }
        Ok(())
    }

    fn approval_scope(&self, input: &Value) -> Option<String> {
        let input: BashInput = parse_input(input).ok()?;
        Some(format!("bash:{}", input.command.trim()))
    }

    fn needs_permission(&self, input: &Value, ctx: &ToolUseContext) -> bool {
        let Ok(BashInput { command, .. }) = parse_input(input) else {
            return true;
        };
        if is_read_only_command(&command) {
            return false;
        }
        match self.approval_scope(input) {
            Some(scope) => !ctx.session_approvals.contains(&scope),
            None => true,
        }
    }

    fn execute<'a>(
        &'a self,
        input: Value,
        ctx: &'a ToolUseContext,
    ) -> BoxFuture<'a, Result<ToolOutput, ToolFailure>> {
        Box::pin(async move {
            let BashInput {
                command,
                timeout_ms,
            } = serde_json::from_value(input)?;
            let timeout =
                Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS));
            let child = spawn_shell(&command, &ctx.cwd)?;
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(pump_output(child, tx, ctx.cancel.clone(), timeout));
            Ok(ToolOutput::stream(UnboundedReceiverStream::new(rx)))
        })
    }
}

fn spawn_shell(command: &str, cwd: &Path) -> std::io::Result<Child> {
    Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// One output line, decoded lossily; the terminator is dropped and `pending` is reset.
fn take_line(pending: &mut Vec<u8>) -> String {
    let line = String::from_utf8_lossy(pending)
        .trim_end_matches(['\n', '\r'])
        .to_string();
    pending.clear();
    line
}

type ItemSender = mpsc::UnboundedSender<Result<ToolResult, ToolFailure>>;

/// Forward output lines until both pipes close, then send the final summary item.
async fn pump_output(
    mut child: Child,
    tx: ItemSender,
    cancel: CancellationToken,
    timeout: Duration,
) {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = tx.send(Err(ToolFailure::msg("child output pipes unavailable")));
        return;
    };
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    // Partial lines survive a select round that another branch wins.
    let (mut out_pending, mut err_pending) = (Vec::new(), Vec::new());
    let (mut out_open, mut err_open) = (true, true);
    let (mut out_buf, mut err_buf) = (String::new(), String::new());
    let mut timed_out = false;
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while out_open || err_open {
        let (stream, read) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("bash: cancelled, killing child");
                let _ = child.kill().await;
                return;
            }
            _ = &mut deadline => {
                timed_out = true;
                let _ = child.kill().await;
                break;
            }
            read = stdout.read_until(b'\n', &mut out_pending), if out_open => ("stdout", read),
            read = stderr.read_until(b'\n', &mut err_pending), if err_open => ("stderr", read),
        };
        let (pending, buf, open) = if stream == "stdout" {
            (&mut out_pending, &mut out_buf, &mut out_open)
        } else {
            (&mut err_pending, &mut err_buf, &mut err_open)
        };
        match read {
            Ok(0) => *open = false,
            Ok(_) => {
                let line = take_line(pending);
                push_capped(buf, &line);
                let item = ToolResult::new(json!({ "stream": stream, "line": line }), line);
                if tx.send(Ok(item)).is_err() {
                    let _ = child.kill().await;
                    return;
                }
            }
            Err(e) => {
                debug!(stream, error = %e, "bash: output pipe failed");
                *open = false;
            }
        }
    }

    let exit_code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            let _ = tx.send(Err(e.into()));
            return;
        }
    };
    if timed_out {
        push_capped(&mut err_buf, &format!("command timed out after {}ms", timeout.as_millis()));
    }
    let mut for_llm = out_buf.trim_end().to_string();
    if !err_buf.trim().is_empty() {
        if !for_llm.is_empty() {
            for_llm.push('\n');
        }
        for_llm.push_str(err_buf.trim_end());
    }
    if let Some(code) = exit_code.filter(|c| *c != 0) {
        for_llm.push_str(&format!("\nexit code {code}"));
    }
    let _ = tx.send(Ok(ToolResult::new(
        json!({
            "stdout": out_buf,
            "stderr": err_buf,
            "exit_code": exit_code,
            "interrupted": timed_out,
        }),
        for_llm,
    )));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heads_split_on_operators() {
        assert_eq!(command_heads("ls -la && cat a | wc -l; pwd"), vec!["ls", "cat", "wc", "pwd"]);
    }

    #[test]
    fn heads_split_on_newlines_and_subshells() {
        assert_eq!(command_heads("ls\ntouch x\r\nrm y"), vec!["ls", "touch", "rm"]);
        assert_eq!(command_heads("(curl x)"), vec!["curl"]);
    }

    #[test]
    fn heads_see_through_quotes_paths_and_assignments() {
        assert_eq!(command_heads("\"curl\" https://x"), vec!["curl"]);
        assert_eq!(command_heads("/usr/bin/wget x"), vec!["wget"]);
        assert_eq!(command_heads("FOO=1 BAR=2 nc host 80"), vec!["nc"]);
        assert_eq!(command_heads("echo 'a"), vec!["echo"]);
    }

    #[test]
    fn read_only_detection() {
        assert!(is_read_only_command("ls -la"));
        assert!(is_read_only_command("cat a.txt | wc -l"));
        assert!(is_read_only_command("cat 'my notes.txt'"));
        assert!(!is_read_only_command("echo hi > out.txt"));
        assert!(!is_read_only_command("rm -rf build"));
        assert!(!is_read_only_command("ls && rm x"));
        assert!(!is_read_only_command("ls\ntouch pwned.txt"));
        assert!(!is_read_only_command("ls\rtouch pwned.txt"));
        assert!(!is_read_only_command("echo 'unbalanced"));
        assert!(!is_read_only_command(""));
    }

    #[test]
    fn lines_decode_lossily() {
        let mut pending = b"\xff ok\r\n".to_vec();
        assert_eq!(take_line(&mut pending), "\u{fffd} ok");
        assert!(pending.is_empty());
    }

    #[test]
    fn output_is_capped() {
        let mut buf = String::new();
        for _ in 0..10_000 {
            push_capped(&mut buf, "0123456789");
        }
        assert!(buf.len() <= MAX_OUTPUT_CHARS + 32);
        assert!(buf.ends_with("(output truncated)"));
    }
}
