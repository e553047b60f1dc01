//! Custom API-key approval: key fingerprints, persisted approve/reject decisions, secret redaction.
//!
//! The config file is the single source of truth for decisions: every status check reloads it,
//! so a decision written by another process is picked up on the next check.

use std::sync::{OnceLock, PoisonError, RwLock};

use regex_lite::Regex;
use tracing::{debug, info};

use crate::config::{ConfigError, ConfigStore};

/// Number of trailing key characters kept as the fingerprint.
pub const FINGERPRINT_LEN: usize = 20;

/// Keys shaped like provider secrets (`sk-...`), long enough to be real.
const SECRET_PATTERN: &str = r"sk-[A-Za-z0-9_\-]{16,}";

/// Shorter registered values are ignored; they would redact ordinary words.
const MIN_SECRET_LEN: usize = 8;

/// Keys in use by this process, redacted literally whatever their shape.
static KNOWN_SECRETS: RwLock<Vec<String>> = RwLock::new(Vec::new());

/// Fingerprint of an API key: its last `FINGERPRINT_LEN` characters. Never store the raw key.
pub fn normalize_api_key(key: &str) -> String {
    let key = key.trim();
    let count = key.chars().count();
    key.chars().skip(count.saturating_sub(FINGERPRINT_LEN)).collect()
}

/// Register a key (configured or from the environment) for redaction.
pub fn register_secret(key: &str) {
    let key = key.trim();
    if key.chars().count() < MIN_SECRET_LEN {
        return;
    }
    let mut known = KNOWN_SECRETS.write().unwrap_or_else(PoisonError::into_inner);
    if !known.iter().any(|k| k == key) {
        known.push(key.to_string());
        // Longest first, so a key containing another is replaced whole.
        known.sort_by_key(|k| std::cmp::Reverse(k.len()));
        debug!(fingerprint = %normalize_api_key(key), "secret registered for redaction");
    }
}

/// What a secret is replaced with: `…<fingerprint>`, or a plain marker when the
/// fingerprint would be the whole key.
fn masked(key: &str) -> String {
    if key.chars().count() > FINGERPRINT_LEN {
        format!("…{}", normalize_api_key(key))
    } else {
        "[redacted]".to_string()
    }
}

/// Replace registered keys and anything that looks like an API key.
pub fn redact_secrets(text: &str) -> String {
    static SECRET_RE: OnceLock<Regex> = OnceLock::new();
    let mut text = text.to_string();
    {
        let known = KNOWN_SECRETS.read().unwrap_or_else(PoisonError::into_inner);
        for key in known.iter() {
            if text.contains(key.as_str()) {
                text = text.replace(key.as_str(), &masked(key));
            }
        }
    }
    let re = SECRET_RE.get_or_init(|| Regex::new(SECRET_PATTERN).expect("secret pattern"));
    re.replace_all(&text, |caps: &regex_lite::Captures<'_>| masked(&caps[0]))
        .into_owned()
}

/// Where a custom key stands in the approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyStatus {
    /// No custom key supplied.
    Unknown,
    /// Seen but never decided; needs an explicit decision before use.
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Pending => f.write_str("pending"),
            Self::Approved => f.write_str("approved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// Look up the persisted decision for `key`. Reloads the config file.
pub fn api_key_status(store: &ConfigStore, key: Option<&str>) -> ApiKeyStatus {
    let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
        return ApiKeyStatus::Unknown;
    };
    let fingerprint = normalize_api_key(key);
    store
        .load()
        .custom_api_key_responses
        .status(&fingerprint)
}

/// Persist an approve/reject decision for `key`. The fingerprint ends up in exactly one set.
pub fn record_api_key_decision(
    store: &ConfigStore,
    key: &str,
    approve: bool,
) -> Result<ApiKeyStatus, ConfigError> {
    let fingerprint = normalize_api_key(key);
    let config = store.update(|c| {
        if approve {
            c.custom_api_key_responses.approve(&fingerprint);
        } else {
            c.custom_api_key_responses.reject(&fingerprint);
        }
    })?;
    let status = config.custom_api_key_responses.status(&fingerprint);
    info!(fingerprint = %fingerprint, %status, "custom api key decision recorded");
    Ok(status)
}

/// Trusted run modes approve a supplied custom key without prompting.
/// Returns the resulting status; untrusted modes leave the record untouched.
pub fn auto_approve_api_key(
    store: &ConfigStore,
    key: Option<&str>,
    trusted: bool,
) -> Result<ApiKeyStatus, ConfigError> {
    let status = api_key_status(store, key);
    match (key, status) {
        (Some(key), ApiKeyStatus::Pending | ApiKeyStatus::Rejected) if trusted => {
            debug!("auto-approving custom api key for trusted run mode");
            record_api_key_decision(store, key, true)
        }
        _ => Ok(status),
    }
}
