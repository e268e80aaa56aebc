// src/monitor/source.rs
use serde::Serialize;
use std::fmt;

/// Stable identity of a monitored group.
///
/// Derived once from `name` + `chat_id` at creation and kept for the lifetime of
/// the entry, even if an edit later changes either field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn derive(name: &str, chat_id: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(format!("{name}-{chat_id}").as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(32);
        for b in digest.iter().take(16) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One Telegram group (chat) being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredSource {
    id: SourceId,
    pub name: String,
    pub chat_id: String,
    /// Per-group bot token; falls back to the registry default when absent.
    pub bot_token: Option<String>,
    pub auto_save: bool,
}

impl MonitoredSource {
    pub fn new(name: impl Into<String>, chat_id: impl ToString, bot_token: Option<String>) -> Self {
        let name = name.into().trim().to_string();
        let chat_id = normalize_chat_id(&chat_id.to_string());
        let id = SourceId::derive(&name, &chat_id);
        Self {
            id,
            name,
            chat_id,
            bot_token: clean_token(bot_token),
            auto_save: false,
        }
    }

    pub fn with_auto_save(mut self, auto_save: bool) -> Self {
        self.auto_save = auto_save;
        self
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    /// Applies an edit in place. The identity is left untouched.
    pub fn apply(&mut self, edit: SourceEdit) {
        if let Some(name) = edit.name {
            self.name = name.trim().to_string();
        }
        if let Some(chat_id) = edit.chat_id {
            self.chat_id = normalize_chat_id(&chat_id);
        }
        if let Some(token) = edit.bot_token {
            self.bot_token = clean_token(token);
        }
        if let Some(auto_save) = edit.auto_save {
            self.auto_save = auto_save;
        }
    }
}

/// Mutable fields of a source; `None` leaves the field as is.
///
/// `bot_token: Some(None)` clears the per-group token.
#[derive(Debug, Clone, Default)]
pub struct SourceEdit {
    pub name: Option<String>,
    pub chat_id: Option<String>,
    pub bot_token: Option<Option<String>>,
    pub auto_save: Option<bool>,
}

/// Chat ids arrive as JSON numbers or strings; compare them as trimmed strings.
pub fn normalize_chat_id(raw: &str) -> String {
    raw.trim().to_string()
}

fn clean_token(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic_for_same_pair() {
        let a = MonitoredSource::new("Clinic", -100123, None);
        let b = MonitoredSource::new("Clinic", "-100123", Some("tok".into()));
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().as_str().len(), 32);

        let c = MonitoredSource::new("Clinic", "-100124", None);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn edit_keeps_identity() {
        let mut s = MonitoredSource::new("Clinic", "1", None);
        let before = s.id().clone();
        s.apply(SourceEdit {
            name: Some("Renamed".into()),
            chat_id: Some(" 2 ".into()),
            bot_token: Some(Some("  ".into())),
            auto_save: Some(true),
        });
        assert_eq!(s.id(), &before);
        assert_eq!(s.name, "Renamed");
        assert_eq!(s.chat_id, "2");
        assert_eq!(s.bot_token, None);
        assert!(s.auto_save);
    }
}
