//! Built-in tools through the engine: memory, file, notebook, bash.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::json;
use tokio::sync::mpsc;

use openagi::session::RunEnv;
use openagi::tools::{
    ExecutionEngine, PermissionGate, StaticApproval, ToolError, build_default_registry,
};

mod common;
use common::{CountingApprover, TestWorkspace};

fn engine() -> ExecutionEngine {
    let registry = build_default_registry(&RunEnv::default()).unwrap();
    ExecutionEngine::new(Arc::new(registry))
}

#[tokio::test]
async fn test_memory_write_then_read() {
    let ws = TestWorkspace::new();
    let engine = engine();
    let approver = CountingApprover::new(false);
    let ctx = ws.ctx(engine.registry(), approver.clone());

    let saved = engine
        .invoke(
            "memory_write",
            json!({ "file_path": "notes.txt", "content": "hi" }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(saved.for_llm, "Saved");

    let read = engine
        .invoke("memory_read", json!({ "file_path": "notes.txt" }), &ctx)
        .await
        .unwrap();
    assert_eq!(read.for_llm, "hi");
    assert_eq!(read.data, json!("hi"));
    // Memory writes never prompt.
    assert_eq!(approver.calls(), 0);
}

#[tokio::test]
async fn test_memory_list() {
    let ws = TestWorkspace::new();
    std::fs::write(ws.memory_dir.join("b"), "2").unwrap();
    std::fs::write(ws.memory_dir.join("a"), "1").unwrap();
    let engine = engine();
    let ctx = ws.ctx(engine.registry(), Arc::new(StaticApproval(false)));

    let listed = engine.invoke("memory_read", json!({}), &ctx).await.unwrap();
    assert_eq!(listed.data, json!(["a", "b"]));
}

#[tokio::test]
async fn test_memory_missing_file_and_escape() {
    let ws = TestWorkspace::new();
    let engine = engine();
    let ctx = ws.ctx(engine.registry(), Arc::new(StaticApproval(false)));

    let err = engine
        .invoke("memory_read", json!({ "file_path": "nope.txt" }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::ToolExecution { .. }));
    assert!(err.to_string().contains("does not exist"));

    let err = engine
        .invoke(
            "memory_write",
            json!({ "file_path": "../outside.txt", "content": "x" }),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidInput { .. }));
    assert!(!ws.root.join("outside.txt").exists());
}

#[tokio::test]
async fn test_memory_tools_disabled_for_external_users() {
    let ws = TestWorkspace::new();
    let env = RunEnv {
        user_type: Some("external".to_string()),
        ..RunEnv::default()
    };
    let engine = ExecutionEngine::new(Arc::new(build_default_registry(&env).unwrap()));
    let ctx = ws.ctx(engine.registry(), Arc::new(StaticApproval(true)));

    let err = engine.invoke("memory_read", json!({}), &ctx).await.unwrap_err();
    assert!(matches!(err, ToolError::ToolNotFound(_)));
    assert!(!ctx.options.tools.iter().any(|t| t.starts_with("memory")));
}

#[tokio::test]
async fn test_file_write_requires_approval_once_per_path() {
    let ws = TestWorkspace::new();
    let engine = engine();
    let approver = CountingApprover::new(true);
    let session = ws.session();

    for content in ["one", "two"] {
        let ctx = session.tool_use_context(engine.registry(), approver.clone());
        engine
            .invoke(
                "file_write",
                json!({ "file_path": "out/notes.txt", "content": content }),
                &ctx,
            )
            .await
            .unwrap();
    }
    assert_eq!(approver.calls(), 1);
    assert_eq!(
        std::fs::read_to_string(ws.cwd.join("out/notes.txt")).unwrap(),
        "two"
    );
}

#[tokio::test]
async fn test_file_write_approval_ignores_path_spelling() {
    let ws = TestWorkspace::new();
    let engine = engine();
    let approver = CountingApprover::new(true);
    let session = ws.session();

    for path in ["notes.txt", "./notes.txt", "drafts/../notes.txt"] {
        let ctx = session.tool_use_context(engine.registry(), approver.clone());
        engine
            .invoke(
                "file_write",
                json!({ "file_path": path, "content": path }),
                &ctx,
            )
            .await
            .unwrap();
    }
    assert_eq!(approver.calls(), 1);
    assert_eq!(
        std::fs::read_to_string(ws.cwd.join("notes.txt")).unwrap(),
        "drafts/../notes.txt"
    );
}

#[tokio::test]
async fn test_file_write_detects_concurrent_modification() {
    let ws = TestWorkspace::new();
    let path = ws.cwd.join("shared.txt");
    std::fs::write(&path, "original").unwrap();
    let engine = engine();
    let session = ws.session();
    let ctx = session.tool_use_context(engine.registry(), Arc::new(StaticApproval(true)));

    engine
        .invoke("file_read", json!({ "file_path": "shared.txt" }), &ctx)
        .await
        .unwrap();

    // Someone else edits the file after our read.
    std::fs::write(&path, "theirs").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();

    let err = engine
        .invoke(
            "file_write",
            json!({ "file_path": "shared.txt", "content": "mine" }),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ToolError::ConcurrentModification { ref tool, .. } if tool == "file_write"
    ));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "theirs");

    // Reading again refreshes the timestamp and the write goes through.
    engine
        .invoke("file_read", json!({ "file_path": "shared.txt" }), &ctx)
        .await
        .unwrap();
    engine
        .invoke(
            "file_write",
            json!({ "file_path": "shared.txt", "content": "mine" }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "mine");
}

#[tokio::test]
async fn test_file_write_refuses_unread_existing_file() {
    let ws = TestWorkspace::new();
    std::fs::write(ws.cwd.join("existing.txt"), "keep").unwrap();
    let engine = engine();
    let ctx = ws.ctx(engine.registry(), Arc::new(StaticApproval(true)));

    let err = engine
        .invoke(
            "file_write",
            json!({ "file_path": "existing.txt", "content": "x" }),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("has not been read yet"));
}

#[tokio::test]
async fn test_notebook_read() {
    let ws = TestWorkspace::new();
    let notebook = json!({
        "metadata": { "language_info": { "name": "python" } },
        "cells": [
            { "cell_type": "markdown", "source": "# Notes" },
            {
                "cell_type": "code",
                "source": ["x = 1\n", "x + 1"],
                "execution_count": 2,
                "outputs": [
                    { "output_type": "execute_result", "data": { "text/plain": ["2"] } }
                ]
            }
        ]
    });
    std::fs::write(ws.cwd.join("analysis.ipynb"), notebook.to_string()).unwrap();
    let engine = engine();
    let approver = CountingApprover::new(false);
    let ctx = ws.ctx(engine.registry(), approver.clone());

    let result = engine
        .invoke(
            "notebook_read",
            json!({ "notebook_path": "analysis.ipynb" }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result.data[1]["source"], "x = 1\nx + 1");
    assert_eq!(result.data[1]["outputs"], json!(["2"]));
    assert!(result.for_llm.contains("<cell 0><cell_type>markdown</cell_type># Notes</cell 0>"));
    assert_eq!(approver.calls(), 0);
    assert_eq!(ctx.read_file_timestamps.len(), 1);

    let err = engine
        .invoke("notebook_read", json!({ "notebook_path": "notes.txt" }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidInput { .. }));
}

#[tokio::test]
async fn test_bash_streams_lines() {
    let ws = TestWorkspace::new();
    let engine = engine();
    let approver = CountingApprover::new(false);
    let (ptx, mut prx) = mpsc::unbounded_channel();
    let ctx = ws
        .ctx(engine.registry(), approver.clone())
        .with_progress(ptx);

    let result = engine
        .invoke("bash", json!({ "command": "echo one; echo two" }), &ctx)
        .await
        .unwrap();
    assert_eq!(result.data["stdout"], "one\ntwo\n");
    assert_eq!(result.data["exit_code"], 0);
    assert_eq!(result.data["interrupted"], false);
    assert_eq!(result.for_llm, "one\ntwo");
    // Read-only commands run without asking.
    assert_eq!(approver.calls(), 0);

    let mut lines = Vec::new();
    while let Ok(p) = prx.try_recv() {
        if let Some(line) = p.item.data.get("line").and_then(|l| l.as_str()) {
            lines.push(line.to_string());
        }
    }
    assert_eq!(lines, vec!["one", "two"]);
}

#[tokio::test]
async fn test_bash_rejects_banned_and_denied_commands() {
    let ws = TestWorkspace::new();
    let engine = engine();
    let approver = CountingApprover::new(false);
    let ctx = ws.ctx(engine.registry(), approver.clone());

    let err = engine
        .invoke("bash", json!({ "command": "curl https://example.com" }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidInput { .. }));
    assert_eq!(approver.calls(), 0);

    let err = engine
        .invoke("bash", json!({ "command": "touch created.txt" }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::PermissionDenied { cancelled: false, .. }));
    assert_eq!(approver.calls(), 1);
    assert!(!ws.cwd.join("created.txt").exists());
}

#[tokio::test]
async fn test_bash_newline_separates_commands() {
    let ws = TestWorkspace::new();
    let engine = engine();
    let approver = CountingApprover::new(false);
    let ctx = ws.ctx(engine.registry(), approver.clone());

    let err = engine
        .invoke("bash", json!({ "command": "ls\ntouch pwned.txt" }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::PermissionDenied { cancelled: false, .. }));
    assert_eq!(approver.calls(), 1);
    assert!(!ws.cwd.join("pwned.txt").exists());

    for command in [
        "ls\ncurl http://127.0.0.1:1",
        "ls\r\n\"wget\" x",
        "FOO=1 /usr/bin/nc host 80",
    ] {
        let err = engine
            .invoke("bash", json!({ "command": command }), &ctx)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ToolError::InvalidInput { .. }),
            "{command:?} was not rejected: {err}"
        );
    }
    assert_eq!(approver.calls(), 1);
}

#[tokio::test]
async fn test_bash_survives_invalid_utf8_output() {
    let ws = TestWorkspace::new();
    let engine = engine().with_gate(PermissionGate::skipping_permissions());
    let ctx = ws.ctx(engine.registry(), Arc::new(StaticApproval(false)));

    // More than a pipe buffer of output after the bad byte: the reader must keep draining.
    let result = engine
        .invoke(
            "bash",
            json!({
                "command": "printf '\\377\\n'; seq 1 100000; echo done",
                "timeout_ms": 20000
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result.data["interrupted"], false);
    assert_eq!(result.data["exit_code"], 0);
    let stdout = result.data["stdout"].as_str().unwrap();
    assert!(stdout.starts_with("\u{fffd}\n1\n2\n"));
    assert!(stdout.ends_with("(output truncated)"));
}

#[tokio::test]
async fn test_bash_reports_exit_code_and_timeout() {
    let ws = TestWorkspace::new();
    let engine = engine().with_gate(PermissionGate::skipping_permissions());
    let ctx = ws.ctx(engine.registry(), Arc::new(StaticApproval(false)));

    let result = engine
        .invoke("bash", json!({ "command": "echo oops >&2; exit 3" }), &ctx)
        .await
        .unwrap();
    assert_eq!(result.data["exit_code"], 3);
    assert_eq!(result.data["stderr"], "oops\n");
    assert!(result.for_llm.ends_with("exit code 3"));

    let result = engine
        .invoke(
            "bash",
            json!({ "command": "sleep 5", "timeout_ms": 100 }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result.data["interrupted"], true);
    assert!(result.data["stderr"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_bash_cancel_kills_command() {
    let ws = TestWorkspace::new();
    let engine = engine().with_gate(PermissionGate::skipping_permissions());
    let ctx = ws.ctx(engine.registry(), Arc::new(StaticApproval(false)));
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let started = std::time::Instant::now();
    let err = engine
        .invoke(
            "bash",
            json!({ "command": "sleep 30 && touch finished.txt" }),
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!ws.cwd.join("finished.txt").exists());
}
