// src/export/mod.rs
//! Telegram Desktop JSON export → flat message rows.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One exported message, flattened for tables and analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportRow {
    pub msg_id: Option<i64>,
    pub sender: String,
    pub sender_id: String,
    pub reply_to_msg_id: Option<i64>,
    /// Local ISO timestamp as written by the exporter (`2024-03-01T09:15:00`).
    pub date: Option<String>,
    pub date_unixtime: Option<String>,
    pub msg_type: String,
    pub msg_content: String,
    pub forwarded_from: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedChat {
    pub chat: String,
    pub rows: Vec<ExportRow>,
}

pub fn parse_file(path: &Path) -> Result<Vec<ParsedChat>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading export from {}", path.display()))?;
    parse_str(&content).with_context(|| format!("parsing export {}", path.display()))
}

/// Accepts a single-chat export or a full account export (`chats.list`).
pub fn parse_str(s: &str) -> Result<Vec<ParsedChat>> {
    let root: Value = serde_json::from_str(s.trim_start_matches('\u{feff}'))?;
    let chats = match root.get("chats").and_then(|c| c.get("list")).and_then(Value::as_array) {
        Some(list) => list.iter().map(parse_chat).collect(),
        None => vec![parse_chat(&root)],
    };
    let total: usize = message_count(&chats);
    tracing::info!(target: "export", chats = chats.len(), messages = total, "export parsed");
    Ok(chats)
}

pub fn message_count(chats: &[ParsedChat]) -> usize {
    chats.iter().map(|c| c.rows.len()).sum()
}

fn parse_chat(chat: &Value) -> ParsedChat {
    let name = chat
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match chat.get("id") {
            Some(id) => format!("Chat_ID_{}", scalar_string(id).unwrap_or_default()),
            None => "Chat_ID_Unknown".to_string(),
        });
    let rows = chat
        .get("messages")
        .and_then(Value::as_array)
        .map(|msgs| msgs.iter().filter_map(parse_message).collect())
        .unwrap_or_default();
    ParsedChat { chat: name, rows }
}

/// Service entries (joins, pins, ...) are skipped; only `type == "message"` is kept.
fn parse_message(msg: &Value) -> Option<ExportRow> {
    if msg.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    let str_or = |key: &str, default: &str| {
        msg.get(key)
            .and_then(scalar_string)
            .unwrap_or_else(|| default.to_string())
    };

    Some(ExportRow {
        msg_id: msg.get("id").and_then(Value::as_i64),
        sender: str_or("from", "Unknown Sender"),
        sender_id: str_or("from_id", "Unknown_ID"),
        reply_to_msg_id: msg.get("reply_to_message_id").and_then(Value::as_i64),
        date: msg.get("date").and_then(scalar_string),
        date_unixtime: msg.get("date_unixtime").and_then(scalar_string),
        msg_type: str_or("media_type", "text"),
        msg_content: message_text(msg),
        forwarded_from: str_or("forwarded_from", ""),
        action: str_or("action", ""),
    })
}

/// Prefers `text_entities`; falls back to `text`, which may be a string or a
/// list mixing strings and `{type, text}` fragments.
pub fn message_text(msg: &Value) -> String {
    let raw = match msg.get("text_entities").and_then(Value::as_array) {
        Some(parts) => join_fragments(parts),
        None => match msg.get("text") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(parts)) => join_fragments(parts),
            _ => String::new(),
        },
    };
    raw.replace('\n', " ").trim().to_string()
}

fn join_fragments(parts: &[Value]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            Value::String(s) => Some(s.as_str()),
            other => other.get("text").and_then(Value::as_str),
        })
        .collect()
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Writes one `<chat>.jsonl` per chat into `dir`. Returns the written paths.
/// Chats whose names sanitize to the same stem get `_2`, `_3`, ... suffixes.
pub fn write_jsonl(chats: &[ParsedChat], dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = Vec::with_capacity(chats.len());
    let mut used = HashSet::new();
    for chat in chats {
        let stem = unique_stem(file_stem(&chat.chat), &mut used);
        let path = dir.join(format!("{stem}.jsonl"));
        let mut f = fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        for row in &chat.rows {
            serde_json::to_writer(&mut f, row)?;
            f.write_all(b"\n")?;
        }
        written.push(path);
    }
    Ok(written)
}

fn file_stem(chat: &str) -> String {
    let stem: String = chat
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "chat".to_string()
    } else {
        stem
    }
}

fn unique_stem(base: String, used: &mut HashSet<String>) -> String {
    let mut stem = base.clone();
    let mut n = 2;
    while !used.insert(stem.clone()) {
        stem = format!("{base}_{n}");
        n += 1;
    }
    stem
}
