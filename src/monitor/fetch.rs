// src/monitor/fetch.rs
//! Bot API `getUpdates` contract: wire types, error classes, HTTP client and a
//! scripted fetcher for tests/local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ------------------------------------------------------------
// Wire types
// ------------------------------------------------------------

/// One entry of the global update stream. Only the envelope is typed; the
/// message body stays opaque JSON for the consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Value>,
}

impl Update {
    /// `message.chat.id` normalized to a string (numbers and strings both accepted).
    pub fn chat_id(&self) -> Option<String> {
        match self.message.as_ref()?.get("chat")?.get("id")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        }
    }

    /// Builds a plain text update the way the Bot API shapes it.
    pub fn text_message(update_id: i64, chat_id: i64, text: &str) -> Self {
        Self {
            update_id,
            message: Some(serde_json::json!({
                "message_id": update_id,
                "chat": { "id": chat_id },
                "from": { "first_name": "Tester" },
                "text": text,
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    #[serde(default)]
    description: Option<String>,
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

/// Failure of one fetch iteration. Only `Unauthorized` ends a poll loop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The API answered `ok: false`.
    #[error("API Error: {description}")]
    Api { description: String },
    /// HTTP 401: the bot token was rejected.
    #[error("API Error: Unauthorized. Check bot token.")]
    Unauthorized,
    /// Any other non-200 status.
    #[error("HTTP Error {status}")]
    Http { status: u16 },
    /// Connection refused, DNS, timeout and friends.
    #[error("Network Error: {0}")]
    Network(String),
    /// Anything else (undecodable body, ...).
    #[error("Polling Error: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Application,
    Transport,
    Authorization,
    Unexpected,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Application => "application",
            ErrorClass::Transport => "transport",
            ErrorClass::Authorization => "authorization",
            ErrorClass::Unexpected => "unexpected",
        }
    }
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::Api { .. } => ErrorClass::Application,
            FetchError::Unauthorized => ErrorClass::Authorization,
            FetchError::Http { .. } | FetchError::Network(_) => ErrorClass::Transport,
            FetchError::Unexpected(_) => ErrorClass::Unexpected,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Authorization
    }
}

// ------------------------------------------------------------
// Fetcher abstraction
// ------------------------------------------------------------

/// Long-poll source of updates. Shared by every loop; the token is passed per call
/// so each loop uses the credential it snapshotted at start.
#[async_trait]
pub trait UpdateFetcher: Send + Sync {
    async fn get_updates(
        &self,
        bot_token: &str,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, FetchError>;
}

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Real Telegram Bot API client.
pub struct BotApiClient {
    http: reqwest::Client,
    api_base: String,
    request_grace: Duration,
}

impl BotApiClient {
    /// `request_grace` is added on top of the long-poll timeout for the HTTP deadline.
    pub fn new(api_base: &str, request_grace: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("telegram-monitor/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            request_grace,
        })
    }

    fn updates_url(&self, bot_token: &str) -> String {
        format!("{}/bot{}/getUpdates", self.api_base, bot_token)
    }
}

#[async_trait]
impl UpdateFetcher for BotApiClient {
    async fn get_updates(
        &self,
        bot_token: &str,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, FetchError> {
        let resp = self
            .http
            .get(self.updates_url(bot_token))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout.as_secs().to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .timeout(timeout + self.request_grace)
            .send()
            .await
            // the URL embeds the token; never let it reach status text
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let body: GetUpdatesResponse = resp.json().await.map_err(|e| {
            if e.is_decode() {
                FetchError::Unexpected(e.without_url().to_string())
            } else {
                FetchError::Network(e.without_url().to_string())
            }
        })?;
        into_updates(body)
    }
}

fn into_updates(body: GetUpdatesResponse) -> Result<Vec<Update>, FetchError> {
    if body.ok {
        Ok(body.result)
    } else {
        Err(FetchError::Api {
            description: body
                .description
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

// ------------------------------------------------------------
// Scripted fetcher (tests/local runs)
// ------------------------------------------------------------

/// One scripted reaction to a `getUpdates` call.
#[derive(Debug, Clone)]
pub enum Step {
    Respond(Result<Vec<Update>, FetchError>),
    /// Never returns (a stuck upstream).
    Hang,
    /// Panics inside the fetch (a buggy client).
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub bot_token: String,
    pub offset: i64,
}

/// Plays back per-token scripts and records every call. Once a script is
/// exhausted it behaves like an idle long-poll: waits `idle` and returns nothing.
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<FetchCall>>,
    idle: Duration,
}

impl ScriptedFetcher {
    pub fn new(idle: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            idle,
        }
    }

    pub fn script(self, bot_token: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bot_token.to_string(), steps.into());
        self
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn offsets_for(&self, bot_token: &str) -> Vec<i64> {
        self.calls()
            .into_iter()
            .filter(|c| c.bot_token == bot_token)
            .map(|c| c.offset)
            .collect()
    }
}

#[async_trait]
impl UpdateFetcher for ScriptedFetcher {
    async fn get_updates(
        &self,
        bot_token: &str,
        offset: i64,
        _timeout: Duration,
    ) -> Result<Vec<Update>, FetchError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FetchCall {
                bot_token: bot_token.to_string(),
                offset,
            });

        let next = self
            .scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(bot_token)
            .and_then(|q| q.pop_front());

        match next {
            Some(Step::Respond(r)) => r,
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
            Some(Step::Panic) => panic!("scripted fetcher panic for offset {offset}"),
            None => {
                tokio::time::sleep(self.idle).await;
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_accepts_numbers_and_strings() {
        let u = Update::text_message(1, -100123, "hi");
        assert_eq!(u.chat_id().as_deref(), Some("-100123"));

        let s: Update = serde_json::from_str(
            r#"{"update_id": 2, "message": {"chat": {"id": " 77 "}}}"#,
        )
        .unwrap();
        assert_eq!(s.chat_id().as_deref(), Some("77"));

        let none: Update = serde_json::from_str(r#"{"update_id": 3}"#).unwrap();
        assert_eq!(none.chat_id(), None);
    }

    #[test]
    fn ok_false_maps_to_application_error() {
        let body: GetUpdatesResponse =
            serde_json::from_str(r#"{"ok": false, "description": "Bad Request: wrong offset"}"#)
                .unwrap();
        let err = into_updates(body).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Application);
        assert_eq!(err.to_string(), "API Error: Bad Request: wrong offset");
        assert!(!err.is_fatal());
    }

    #[test]
    fn ok_true_without_result_is_empty() {
        let body: GetUpdatesResponse = serde_json::from_str(r#"{"ok": true}"#).unwrap();
        assert!(into_updates(body).unwrap().is_empty());
    }

    #[test]
    fn only_unauthorized_is_fatal() {
        assert!(FetchError::Unauthorized.is_fatal());
        for e in [
            FetchError::Http { status: 502 },
            FetchError::Network("refused".into()),
            FetchError::Unexpected("bad json".into()),
        ] {
            assert!(!e.is_fatal(), "{e} should be recoverable");
        }
    }

    #[tokio::test]
    async fn scripted_fetcher_replays_then_idles() {
        let f = ScriptedFetcher::new(Duration::from_millis(5)).script(
            "tok",
            vec![Step::Respond(Err(FetchError::Unauthorized))],
        );
        let first = f.get_updates("tok", 1, Duration::from_secs(1)).await;
        assert_eq!(first, Err(FetchError::Unauthorized));
        let second = f.get_updates("tok", 1, Duration::from_secs(1)).await;
        assert_eq!(second, Ok(Vec::new()));
        assert_eq!(f.offsets_for("tok"), vec![1, 1]);
    }
}
