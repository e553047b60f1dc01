//! Global config store: `~/.openagi/config.toml`, defaults on first read, atomic whole-record save.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::session::RunEnv;

pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-20250219";
/// Overrides the config directory (default `~/.openagi`, or a temp dir in test runs).
pub const CONFIG_DIR_ENV: &str = "OPENAGI_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write config to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Theme {
    Light,
    #[default]
    Dark,
    LightDaltonized,
    DarkDaltonized,
    Openagi,
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Dark => f.write_str("dark"),
            Self::LightDaltonized => f.write_str("light-daltonized"),
            Self::DarkDaltonized => f.write_str("dark-daltonized"),
            Self::Openagi => f.write_str("openagi"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifChannel {
    #[default]
    Iterm2,
    TerminalBell,
    Iterm2WithBell,
    NotificationsDisabled,
}

impl std::fmt::Display for NotifChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Iterm2 => f.write_str("iterm2"),
            Self::TerminalBell => f.write_str("terminal_bell"),
            Self::Iterm2WithBell => f.write_str("iterm2_with_bell"),
            Self::NotificationsDisabled => f.write_str("notifications_disabled"),
        }
    }
}

/// Persisted decisions about custom API keys, by fingerprint. The two sets stay disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomApiKeyResponses {
    pub approved: BTreeSet<String>,
    pub rejected: BTreeSet<String>,
}

impl CustomApiKeyResponses {
    pub fn approve(&mut self, fingerprint: &str) {
        self.rejected.remove(fingerprint);
        self.approved.insert(fingerprint.to_string());
    }

    pub fn reject(&mut self, fingerprint: &str) {
        self.approved.remove(fingerprint);
        self.rejected.insert(fingerprint.to_string());
    }

    pub fn status(&self, fingerprint: &str) -> crate::auth::ApiKeyStatus {
        use crate::auth::ApiKeyStatus;
        if self.approved.contains(fingerprint) {
            ApiKeyStatus::Approved
        } else if self.rejected.contains(fingerprint) {
            ApiKeyStatus::Rejected
        } else {
            ApiKeyStatus::Pending
        }
    }
}

/// The whole persisted record. Tables (`custom-api-key-responses`) must stay last for TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GlobalConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model_name: String,
    pub theme: Theme,
    pub verbose: bool,
    pub preferred_notif_channel: NotifChannel,
    pub has_completed_onboarding: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub num_startups: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_start_time: Option<String>,
    pub custom_api_key_responses: CustomApiKeyResponses,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model_name: DEFAULT_MODEL.to_string(),
            theme: Theme::default(),
            verbose: false,
            preferred_notif_channel: NotifChannel::default(),
            has_completed_onboarding: false,
            user_id: None,
            num_startups: 0,
            first_start_time: None,
            custom_api_key_responses: CustomApiKeyResponses::default(),
        }
    }
}

/// Directory name under the system temp dir used by test-mode runs.
pub const TEST_CONFIG_DIR_NAME: &str = "openagi-test";

/// Config directory for `env`: `$OPENAGI_CONFIG_DIR`, else a scratch directory under the
/// system temp dir when `env` is a test run, else `$HOME/.openagi` (or `./.openagi`).
pub fn config_dir_for(env: &RunEnv) -> PathBuf {
    resolve_config_dir(
        std::env::var_os(CONFIG_DIR_ENV),
        std::env::var_os("HOME"),
        env.is_test(),
    )
}

fn resolve_config_dir(
    override_dir: Option<OsString>,
    home: Option<OsString>,
    test_mode: bool,
) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if test_mode {
        return std::env::temp_dir().join(TEST_CONFIG_DIR_NAME);
    }
    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".openagi")
}

/// Memory tool storage: `<config dir>/memory`.
#[inline]
pub fn memory_dir_for(env: &RunEnv) -> PathBuf {
    config_dir_for(env).join("memory")
}

/// On-disk global config. One store per process, shared by `Arc`.
///
/// Reads go to the file every time, so they see the latest completed save from any writer.
/// Writers are serialized in-process and each save is a temp-file write plus rename, so a
/// reader never observes a partial record.
pub struct ConfigStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Store at `<config_dir_for(env)>/config.toml`.
    #[inline]
    pub fn open_for(env: &RunEnv) -> Self {
        Self::new(config_dir_for(env).join(CONFIG_FILE_NAME))
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current config. Never fails: a missing file yields defaults, a broken one is logged
    /// and replaced by defaults in memory (the file is left alone until the next save).
    pub fn load(&self) -> GlobalConfig {
        match self.try_load() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config unreadable, using defaults");
                GlobalConfig::default()
            }
        }
    }

    /// Like `load`, but surfaces read and parse errors. Missing file is still `Ok(defaults)`.
    pub fn try_load(&self) -> Result<GlobalConfig, ConfigError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(GlobalConfig::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Replace the whole record on disk.
    pub fn save(&self, config: &GlobalConfig) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_atomic(config)
    }

    /// Load, modify, save under the writer lock. Returns the saved record.
    pub fn update<F>(&self, f: F) -> Result<GlobalConfig, ConfigError>
    where
        F: FnOnce(&mut GlobalConfig),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut config = self.try_load()?;
        f(&mut config);
        self.write_atomic(&config)?;
        Ok(config)
    }

    /// Clear only the onboarding flag.
    pub fn reset_onboarding(&self) -> Result<(), ConfigError> {
        self.update(|c| c.has_completed_onboarding = false)
            .map(|_| ())
    }

    pub fn complete_onboarding(&self) -> Result<(), ConfigError> {
        self.update(|c| c.has_completed_onboarding = true).map(|_| ())
    }

    /// Restore defaults (onboarding cleared, decisions forgotten).
    pub fn reset(&self) -> Result<(), ConfigError> {
        self.save(&GlobalConfig::default())
    }

    /// Persisted random user id, created on first use.
    pub fn get_or_create_user_id(&self) -> Result<String, ConfigError> {
        let config = self.update(|c| {
            if c.user_id.is_none() {
                c.user_id = Some(uuid::Uuid::new_v4().to_string());
            }
        })?;
        Ok(config.user_id.unwrap_or_default())
    }

    /// Bump the startup counter; stamps `first_start_time` on the very first run.
    pub fn record_startup(&self) -> Result<GlobalConfig, ConfigError> {
        self.update(|c| {
            c.num_startups = c.num_startups.saturating_add(1);
            if c.first_start_time.is_none() {
                c.first_start_time = Some(chrono::Utc::now().to_rfc3339());
            }
        })
    }

    /// Write to a unique temp file next to the target, fsync, then rename over it.
    fn write_atomic(&self, config: &GlobalConfig) -> Result<(), ConfigError> {
        static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

        let write_err = |source: io::Error| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let text = toml::to_string_pretty(config)?;
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .path
            .with_extension(format!("toml.{}.{n}.tmp", std::process::id()));
        let written = fs::File::create(&tmp).and_then(|mut f| {
            f.write_all(text.as_bytes())?;
            f.sync_all()
        });
        if let Err(e) = written.and_then(|()| fs::rename(&tmp, &self.path)) {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(e));
        }
        debug!(path = %self.path.display(), "config saved");
        Ok(())
    }
}
