// src/config/groups.rs
//! Persisted list of monitored groups (`telegram_groups.json`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::monitor::source::MonitoredSource;

pub const DEFAULT_GROUPS_PATH: &str = "telegram_groups.json";

/// On-disk shape of one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntry {
    #[serde(default = "unknown_name")]
    pub name: String,
    #[serde(default)]
    pub chat_id: ChatIdRepr,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub auto_save: bool,
}

fn unknown_name() -> String {
    "Unknown".to_string()
}

/// Chat ids were written both as numbers and as strings over time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatIdRepr {
    Num(i64),
    Text(String),
}

impl Default for ChatIdRepr {
    fn default() -> Self {
        ChatIdRepr::Text(String::new())
    }
}

impl ChatIdRepr {
    fn into_string(self) -> String {
        match self {
            ChatIdRepr::Num(n) => n.to_string(),
            ChatIdRepr::Text(s) => s,
        }
    }
}

impl From<GroupEntry> for MonitoredSource {
    fn from(e: GroupEntry) -> Self {
        MonitoredSource::new(e.name, e.chat_id.into_string(), e.bot_token).with_auto_save(e.auto_save)
    }
}

impl From<&MonitoredSource> for GroupEntry {
    fn from(s: &MonitoredSource) -> Self {
        Self {
            name: s.name.clone(),
            chat_id: ChatIdRepr::Text(s.chat_id.clone()),
            bot_token: s.bot_token.clone(),
            auto_save: s.auto_save,
        }
    }
}

/// JSON file holding the group list, rewritten in full on every change.
#[derive(Debug, Clone)]
pub struct GroupStore {
    path: PathBuf,
}

impl GroupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file → empty. Unreadable or corrupt file → logged, empty.
    pub fn load(&self) -> Vec<MonitoredSource> {
        if !self.path.exists() {
            return Vec::new();
        }
        match self.try_load() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "registry", error = ?e, "ignoring unreadable group config");
                Vec::new()
            }
        }
    }

    pub fn try_load(&self) -> Result<Vec<MonitoredSource>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("reading groups from {}", self.path.display()))?;
        let entries: Vec<GroupEntry> = serde_json::from_str(&content)
            .with_context(|| format!("parsing groups in {}", self.path.display()))?;
        Ok(entries.into_iter().map(MonitoredSource::from).collect())
    }

    /// Atomic rewrite (tmp file + rename), pretty-printed.
    pub fn save(&self, sources: &[&MonitoredSource]) -> Result<()> {
        let entries: Vec<GroupEntry> = sources.iter().map(|s| GroupEntry::from(*s)).collect();
        let json = serde_json::to_string_pretty(&entries).context("serializing groups")?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}
