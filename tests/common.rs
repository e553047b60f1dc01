#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tempfile::TempDir;

use openagi::config::{ConfigStore, GlobalConfig};
use openagi::session::SessionContext;
use openagi::tools::registry::BoxFuture;
use openagi::tools::{ApprovalCallback, ToolRegistry, ToolUseContext};

pub struct TestWorkspace {
    // Keep TempDir alive so dir isn't deleted until struct drop
    _tmp: TempDir,
    pub root: PathBuf,
    pub cwd: PathBuf,
    pub memory_dir: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        let cwd = root.join("project");
        let memory_dir = root.join("memory");
        std::fs::create_dir_all(&cwd).unwrap();
        std::fs::create_dir_all(&memory_dir).unwrap();
        Self {
            _tmp: tmp,
            root,
            cwd,
            memory_dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config").join("config.toml")
    }

    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(self.config_path())
    }

    pub fn session(&self) -> SessionContext {
        SessionContext::new(
            self.cwd.clone(),
            &GlobalConfig::default(),
            self.memory_dir.clone(),
        )
    }

    /// Context for one invocation with the given approver.
    pub fn ctx(&self, registry: &ToolRegistry, approver: Arc<dyn ApprovalCallback>) -> ToolUseContext {
        self.session().tool_use_context(registry, approver)
    }
}

/// Approver that counts requests and answers with a fixed value.
#[derive(Default)]
pub struct CountingApprover {
    pub answer: bool,
    pub calls: AtomicUsize,
}

impl CountingApprover {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ApprovalCallback for CountingApprover {
    fn request<'a>(&'a self, _tool: &'a str, _input: &'a Value) -> BoxFuture<'a, bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self.answer;
        Box::pin(async move { answer })
    }
}

/// Approver that never answers.
pub struct PendingApprover;

impl ApprovalCallback for PendingApprover {
    fn request<'a>(&'a self, _tool: &'a str, _input: &'a Value) -> BoxFuture<'a, bool> {
        Box::pin(futures::future::pending())
    }
}
