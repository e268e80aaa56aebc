// src/enrich/mod.rs
//! Dosing extraction through a local OpenAI-compatible LLM, plus the helpers
//! that turn results into feed lines and chart-ready timelines.
//!
//! Extraction never fails loudly: any transport or parse problem yields `None`.

pub mod summary;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::Settings;
use crate::export::ParsedChat;

pub use summary::{DosingSummary, TimelineEntry};

pub const DEFAULT_AI_API_BASE: &str = "http://localhost:1234/v1";

const SYSTEM_PROMPT: &str = r#"You are a precision medical data extraction tool. Your task is to analyze the user's message and extract any mention of medications, dosages, frequencies, and side effects.
Respond ONLY with a JSON object with the following structure:
{
  "medication": "string or null",
  "dosage": "string (e.g., '50mg') or null",
  "frequency": "string (e.g., 'once daily') or null",
  "side_effects": ["list of strings or empty list"],
  "is_dosing_related": boolean
}
If no dosing information is present, set "is_dosing_related" to false and the other fields to null or empty."#;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// Structured answer from the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DosingInfo {
    #[serde(default)]
    pub medication: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub side_effects: Vec<String>,
    pub is_dosing_related: bool,
}

fn null_as_empty<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(d)?.unwrap_or_default())
}

/// Text → dosing fields, or `None` on any failure.
pub trait Extractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<DosingInfo>> + Send + 'a>>;
    fn name(&self) -> &'static str;
}

pub type DynExtractor = Arc<dyn Extractor>;

/// Factory:
/// * `AI_TEST_MODE=mock` → deterministic mock,
/// * `ai_enabled == false` → disabled,
/// * else the local LLM client (disabled if the HTTP client cannot be built).
pub fn build_extractor(settings: &Settings) -> DynExtractor {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockExtractor {
            fixed: DosingInfo {
                medication: Some("mockazepam".into()),
                dosage: Some("5mg".into()),
                frequency: None,
                side_effects: Vec::new(),
                is_dosing_related: true,
            },
        });
    }
    if !settings.ai_enabled {
        return Arc::new(DisabledExtractor);
    }
    match LocalLlmExtractor::new(&settings.ai_api_base) {
        Ok(x) => Arc::new(x),
        Err(e) => {
            tracing::warn!(target: "enrich", error = ?e, "LLM client unavailable; enrichment disabled");
            Arc::new(DisabledExtractor)
        }
    }
}

// ------------------------------------------------------------
// Implementations
// ------------------------------------------------------------

/// Chat Completions client for a local server (LM Studio, llama.cpp, ...).
pub struct LocalLlmExtractor {
    http: reqwest::Client,
    api_base: String,
}

impl LocalLlmExtractor {
    pub fn new(api_base: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("telegram-monitor/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(45))
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn extract_impl(&self, text: &str) -> Option<DosingInfo> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct ResponseFormat {
            #[serde(rename = "type")]
            kind: &'static str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            response_format: ResponseFormat,
        }

        let url = format!("{}/chat/completions", self.api_base);
        let req = Req {
            model: "local-model",
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.1,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let resp = match self.http.post(&url).json(&req).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(target: "enrich", %url, error = %e, "could not reach LLM API; is the server running?");
                return None;
            }
        };
        if !resp.status().is_success() {
            tracing::warn!(target: "enrich", %url, status = resp.status().as_u16(), "LLM API returned an error status");
            return None;
        }
        let body: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "enrich", error = %e, "LLM response was not JSON");
                return None;
            }
        };
        parse_completion(&body)
    }
}

impl Extractor for LocalLlmExtractor {
    fn extract<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<DosingInfo>> + Send + 'a>> {
        Box::pin(async move {
            let out = self.extract_impl(text).await;
            let outcome = if out.is_some() { "parsed" } else { "none" };
            counter!("enrich_calls_total", "outcome" => outcome).increment(1);
            out
        })
    }
    fn name(&self) -> &'static str {
        "local-llm"
    }
}

/// Returns `None` always; used when enrichment is switched off.
pub struct DisabledExtractor;

impl Extractor for DisabledExtractor {
    fn extract<'a>(
        &'a self,
        _text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<DosingInfo>> + Send + 'a>> {
        Box::pin(async { None })
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed answer for tests/local runs.
#[derive(Clone)]
pub struct MockExtractor {
    pub fixed: DosingInfo,
}

impl Extractor for MockExtractor {
    fn extract<'a>(
        &'a self,
        _text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<DosingInfo>> + Send + 'a>> {
        let out = self.fixed.clone();
        Box::pin(async move { Some(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Response parsing
// ------------------------------------------------------------

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*`*$").unwrap());

/// Pulls `choices[0].message.content` out of a completion and decodes it.
pub fn parse_completion(body: &Value) -> Option<DosingInfo> {
    let content = body
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()?;
    parse_content(content)
}

/// Decodes the model's JSON answer, tolerating a Markdown code fence.
/// Answers without `is_dosing_related` are rejected.
pub fn parse_content(content: &str) -> Option<DosingInfo> {
    let trimmed = content.trim();
    let json = match RE_FENCE.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(""),
        None => trimmed,
    };
    match serde_json::from_str::<DosingInfo>(json) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!(target: "enrich", error = %e, "could not parse LLM JSON answer");
            None
        }
    }
}

// ------------------------------------------------------------
// Bulk analysis + feed formatting
// ------------------------------------------------------------

/// A dosing-related extraction tied back to its export row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DosingEvent {
    pub date: Option<String>,
    pub sender: String,
    #[serde(flatten)]
    pub info: DosingInfo,
}

/// Runs the extractor over every non-empty row and keeps dosing-related hits.
/// `progress(done, total)` fires every 10th row.
pub async fn analyze_chats<F>(
    extractor: &dyn Extractor,
    chats: &[ParsedChat],
    mut progress: F,
) -> Vec<DosingEvent>
where
    F: FnMut(usize, usize),
{
    let rows: Vec<_> = chats.iter().flat_map(|c| c.rows.iter()).collect();
    let total = rows.len();
    let mut events = Vec::new();

    for (i, row) in rows.into_iter().enumerate() {
        if row.msg_content.is_empty() {
            continue;
        }
        if i % 10 == 0 {
            progress(i + 1, total);
        }
        if let Some(info) = extractor.extract(&row.msg_content).await {
            if info.is_dosing_related {
                events.push(DosingEvent {
                    date: row.date.clone(),
                    sender: row.sender.clone(),
                    info,
                });
            }
        }
    }

    tracing::info!(target: "enrich", extractor = extractor.name(), rows = total, hits = events.len(), "bulk analysis finished");
    events
}

const NON_TEXT: &str = "[Non-text message or empty]";

/// Text of a live Bot API message, if it has any.
pub fn live_text(message: &Value) -> Option<&str> {
    message
        .get("text")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
}

/// Feed line for an incoming live message.
pub fn describe_live_message(group_name: &str, message: &Value) -> String {
    let sender = message
        .get("from")
        .and_then(|f| f.get("first_name"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown");
    let msg_id = message
        .get("message_id")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let text = live_text(message).unwrap_or(NON_TEXT);
    format!("[{group_name}] From: {sender} (ID: {msg_id}):\n    {text}")
}

/// Feed line for a dosing-related extraction.
pub fn format_insight(group_name: &str, msg_id: &str, info: &DosingInfo) -> String {
    let mut line = format!(
        "AI Insight [{group_name}] (ID: {msg_id}): Med: {}, Dose: {}",
        info.medication.as_deref().unwrap_or("n/a"),
        info.dosage.as_deref().unwrap_or("n/a"),
    );
    if !info.side_effects.is_empty() {
        line.push_str(&format!(", Side Effects: {}", info.side_effects.join(", ")));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fenced_json_is_accepted() {
        let c = "```json\n{\"medication\": \"ibuprofen\", \"dosage\": \"200mg\", \"side_effects\": null, \"is_dosing_related\": true}\n```";
        let info = parse_content(c).unwrap();
        assert_eq!(info.medication.as_deref(), Some("ibuprofen"));
        assert!(info.side_effects.is_empty());
        assert!(info.is_dosing_related);
    }

    #[test]
    fn answer_without_flag_is_rejected() {
        assert_eq!(parse_content(r#"{"medication": "x"}"#), None);
        assert_eq!(parse_content("not json at all"), None);
    }

    #[test]
    fn completion_envelope_is_unwrapped() {
        let body = json!({
            "choices": [{"message": {"content": "{\"is_dosing_related\": false}"}}]
        });
        let info = parse_completion(&body).unwrap();
        assert!(!info.is_dosing_related);
        assert_eq!(parse_completion(&json!({"choices": []})), None);
    }

    #[test]
    fn live_message_lines() {
        let m = json!({"message_id": 7, "from": {"first_name": "Ana"}, "text": "took 5mg"});
        assert_eq!(
            describe_live_message("Ward", &m),
            "[Ward] From: Ana (ID: 7):\n    took 5mg"
        );
        let sticker = json!({"sticker": {}});
        assert_eq!(live_text(&sticker), None);
        assert!(describe_live_message("Ward", &sticker).contains("Unknown (ID: N/A)"));
    }

    #[test]
    fn insight_line_lists_side_effects() {
        let info = DosingInfo {
            medication: Some("sertraline".into()),
            dosage: Some("50mg".into()),
            side_effects: vec!["nausea".into(), "insomnia".into()],
            is_dosing_related: true,
            ..Default::default()
        };
        assert_eq!(
            format_insight("Ward", "7", &info),
            "AI Insight [Ward] (ID: 7): Med: sertraline, Dose: 50mg, Side Effects: nausea, insomnia"
        );
    }
}
