//! Per-run session state: cwd, model, read-file timestamps, session approvals, run environment.
//!
//! Nothing here is persisted. The timestamp and approval maps are shared by handle with every
//! `ToolUseContext` built from the session, so tools record into the same maps.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::config::GlobalConfig;
use crate::tools::context::{ApprovalCallback, ToolOptions, ToolUseContext};
use crate::tools::error::ToolFailure;
use crate::tools::registry::ToolRegistry;

/// Process environment the CLI reads at startup.
#[derive(Debug, Clone, Default)]
pub struct RunEnv {
    /// `ANTHROPIC_API_KEY`: externally supplied custom key.
    pub api_key: Option<String>,
    /// `USER_TYPE`.
    pub user_type: Option<String>,
    /// `NODE_ENV` (or `OPENAGI_ENV`).
    pub environment: Option<String>,
}

impl RunEnv {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            api_key: var("ANTHROPIC_API_KEY"),
            user_type: var("USER_TYPE"),
            environment: var("OPENAGI_ENV").or_else(|| var("NODE_ENV")),
        }
    }

    /// Unset `USER_TYPE` counts as `ant`.
    pub fn memory_enabled(&self) -> bool {
        self.user_type.as_deref().unwrap_or("ant") == "ant"
    }

    /// Only an explicit `USER_TYPE=ant` auto-approves custom keys.
    pub fn trusts_custom_api_key(&self) -> bool {
        self.user_type.as_deref() == Some("ant")
    }

    /// Test runs keep their config out of the user's home directory.
    pub fn is_test(&self) -> bool {
        self.environment.as_deref() == Some("test")
    }
}

/// Path → modification time observed when a tool last read (or wrote) the file.
#[derive(Debug, Clone, Default)]
pub struct ReadFileTimestamps {
    inner: Arc<Mutex<HashMap<PathBuf, SystemTime>>>,
}

impl ReadFileTimestamps {
    pub fn record(&self, path: &Path, modified: SystemTime) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), modified);
    }

    pub fn get(&self, path: &Path) -> Option<SystemTime> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the current on-disk mtime of `path`.
    pub async fn record_from_disk(&self, path: &Path) -> io::Result<SystemTime> {
        let modified = tokio::fs::metadata(path).await?.modified()?;
        self.record(path, modified);
        Ok(modified)
    }

    /// Ok when `path` is safe to overwrite: it does not exist, or its mtime still matches the
    /// last recorded read.
    pub async fn check_fresh(&self, path: &Path) -> Result<(), ToolFailure> {
        let modified = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match self.get(path) {
            None => Err(ToolFailure::NotReadYet {
                path: path.to_path_buf(),
            }),
            Some(seen) if seen != modified => Err(ToolFailure::ConcurrentModification {
                path: path.to_path_buf(),
            }),
            Some(_) => Ok(()),
        }
    }
}

/// Approval scopes the user granted during this run. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct SessionApprovals {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl SessionApprovals {
    pub fn grant(&self, scope: impl Into<String>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope.into());
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(scope)
    }
}

/// Ephemeral state for one run of the assistant.
#[derive(Debug, Clone)]
pub struct SessionContext {
    cwd: PathBuf,
    model: String,
    memory_dir: PathBuf,
    fork_number: u32,
    max_thinking_tokens: u32,
    verbose: bool,
    read_file_timestamps: ReadFileTimestamps,
    approvals: SessionApprovals,
}

impl SessionContext {
    /// Session seeded from the persisted config (model, verbosity).
    pub fn new(cwd: PathBuf, config: &GlobalConfig, memory_dir: PathBuf) -> Self {
        Self {
            cwd,
            model: config.model_name.clone(),
            memory_dir,
            fork_number: 0,
            max_thinking_tokens: 0,
            verbose: config.verbose,
            read_file_timestamps: ReadFileTimestamps::default(),
            approvals: SessionApprovals::default(),
        }
    }

    #[inline]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Switch the working directory; must be an existing directory.
    pub fn set_cwd(&mut self, dir: &Path) -> io::Result<()> {
        let dir = std::fs::canonicalize(dir)?;
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("{} is not a directory", dir.display()),
            ));
        }
        self.cwd = dir;
        Ok(())
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    #[inline]
    pub fn memory_dir(&self) -> &Path {
        &self.memory_dir
    }

    #[inline]
    pub fn fork_number(&self) -> u32 {
        self.fork_number
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn set_max_thinking_tokens(&mut self, tokens: u32) {
        self.max_thinking_tokens = tokens;
    }

    #[inline]
    pub fn read_file_timestamps(&self) -> &ReadFileTimestamps {
        &self.read_file_timestamps
    }

    #[inline]
    pub fn approvals(&self) -> &SessionApprovals {
        &self.approvals
    }

    /// Sub-agent run: same cwd, model and shared maps, new fork number.
    pub fn fork(&self, fork_number: u32) -> Self {
        Self {
            fork_number,
            ..self.clone()
        }
    }

    /// Fresh per-invocation context with its own cancellation token.
    pub fn tool_use_context(
        &self,
        registry: &ToolRegistry,
        approver: Arc<dyn ApprovalCallback>,
    ) -> ToolUseContext {
        ToolUseContext {
            cancel: CancellationToken::new(),
            options: ToolOptions {
                tools: registry.names(),
                model: self.model.clone(),
                fork_number: self.fork_number,
                max_thinking_tokens: self.max_thinking_tokens,
                verbose: self.verbose,
            },
            approver,
            read_file_timestamps: self.read_file_timestamps.clone(),
            session_approvals: self.approvals.clone(),
            cwd: self.cwd.clone(),
            memory_dir: self.memory_dir.clone(),
            progress: None,
        }
    }
}
