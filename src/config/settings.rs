// src/config/settings.rs
//! Runtime settings: optional TOML file, then environment overrides (env wins).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::poll_loop::PollTimings;

pub const ENV_CONFIG_PATH: &str = "MONITOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

/// Values shipped in sample `.env` files; treated as "not configured".
const TOKEN_PLACEHOLDER: &str = "YOUR_TELEGRAM_BOT_TOKEN";
const CHAT_PLACEHOLDER: &str = "YOUR_TARGET_CHAT_ID";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Shared fallback bot token.
    pub default_bot_token: Option<String>,
    /// Seeds a "Default" group when no groups are persisted yet.
    pub default_chat_id: Option<String>,
    pub api_base: String,
    /// OpenAI-compatible base URL of the local LLM.
    pub ai_api_base: String,
    pub ai_enabled: bool,
    pub groups_path: PathBuf,
    pub http_addr: String,
    pub poll: PollSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_bot_token: None,
            default_chat_id: None,
            api_base: crate::monitor::fetch::DEFAULT_API_BASE.to_string(),
            ai_api_base: crate::enrich::DEFAULT_AI_API_BASE.to_string(),
            ai_enabled: true,
            groups_path: PathBuf::from(crate::config::groups::DEFAULT_GROUPS_PATH),
            http_addr: "127.0.0.1:8088".to_string(),
            poll: PollSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollSettings {
    pub long_poll_secs: u64,
    pub request_grace_secs: u64,
    pub pacing_ms: u64,
    pub api_error_backoff_secs: u64,
    pub transport_backoff_secs: u64,
    pub unexpected_backoff_secs: u64,
    pub stop_grace_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            long_poll_secs: 30,
            request_grace_secs: 5,
            pacing_ms: 1_000,
            api_error_backoff_secs: 10,
            transport_backoff_secs: 15,
            unexpected_backoff_secs: 5,
            stop_grace_ms: 2_000,
        }
    }
}

impl PollSettings {
    pub fn timings(&self) -> PollTimings {
        PollTimings {
            long_poll: Duration::from_secs(self.long_poll_secs),
            pacing: Duration::from_millis(self.pacing_ms),
            api_error_backoff: Duration::from_secs(self.api_error_backoff_secs),
            transport_backoff: Duration::from_secs(self.transport_backoff_secs),
            unexpected_backoff: Duration::from_secs(self.unexpected_backoff_secs),
            stop_grace: Duration::from_millis(self.stop_grace_ms),
        }
    }

    pub fn request_grace(&self) -> Duration {
        Duration::from_secs(self.request_grace_secs)
    }
}

impl Settings {
    /// Load order:
    /// 1) $MONITOR_CONFIG_PATH (must exist when set)
    /// 2) config/monitor.toml (optional)
    /// 3) defaults
    ///
    /// then environment overrides on top.
    pub fn load() -> Result<Self> {
        let mut s = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => Self::from_path(Path::new(&p))?,
            Err(_) => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Self::from_path(&p)?
                } else {
                    Self::default()
                }
            }
        };
        s.apply_env_from(|k| std::env::var(k).ok());
        Ok(s)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: Settings = toml::from_str(s)?;
        cfg.default_bot_token = clean(cfg.default_bot_token, TOKEN_PLACEHOLDER);
        cfg.default_chat_id = clean(cfg.default_chat_id, CHAT_PLACEHOLDER);
        Ok(cfg)
    }

    /// Applies overrides from a key lookup (the process env in production).
    pub fn apply_env_from<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.default_bot_token = clean(Some(v), TOKEN_PLACEHOLDER);
        }
        if let Some(v) = get("TELEGRAM_CHAT_ID") {
            self.default_chat_id = clean(Some(v), CHAT_PLACEHOLDER);
        }
        if let Some(v) = get("TELEGRAM_API_BASE").filter(|v| !v.trim().is_empty()) {
            self.api_base = v.trim().to_string();
        }
        if let Some(v) = get("AI_PROCESSOR_API_BASE").filter(|v| !v.trim().is_empty()) {
            self.ai_api_base = v.trim().to_string();
        }
        if let Some(v) = get("AI_ENABLED") {
            self.ai_enabled = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("MONITOR_GROUPS_PATH").filter(|v| !v.trim().is_empty()) {
            self.groups_path = PathBuf::from(v.trim());
        }
        if let Some(v) = get("MONITOR_HTTP_ADDR").filter(|v| !v.trim().is_empty()) {
            self.http_addr = v.trim().to_string();
        }
    }
}

fn clean(v: Option<String>, placeholder: &str) -> Option<String> {
    v.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && s != placeholder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn toml_overrides_defaults_partially() {
        let s = Settings::from_toml_str(
            r#"
default_bot_token = "YOUR_TELEGRAM_BOT_TOKEN"
http_addr = "0.0.0.0:9000"

[poll]
long_poll_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(s.default_bot_token, None);
        assert_eq!(s.http_addr, "0.0.0.0:9000");
        assert_eq!(s.poll.long_poll_secs, 5);
        assert_eq!(s.poll.transport_backoff_secs, 15);
        assert_eq!(s.poll.timings().long_poll, Duration::from_secs(5));
    }

    #[test]
    fn env_wins_over_file() {
        let mut s = Settings::from_toml_str(r#"default_bot_token = "file-token""#).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("TELEGRAM_BOT_TOKEN", " env-token "),
            ("TELEGRAM_CHAT_ID", "YOUR_TARGET_CHAT_ID"),
            ("AI_ENABLED", "0"),
            ("MONITOR_GROUPS_PATH", "state/groups.json"),
        ]);
        s.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(s.default_bot_token.as_deref(), Some("env-token"));
        assert_eq!(s.default_chat_id, None);
        assert!(!s.ai_enabled);
        assert_eq!(s.groups_path, PathBuf::from("state/groups.json"));
        assert_eq!(s.api_base, "https://api.telegram.org");
    }
}
