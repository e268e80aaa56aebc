// src/monitor/dispatch.rs
//! Hand-off from poll loops to the consumer (feed display, enrichment).

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

use crate::monitor::source::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Success => "SUCCESS",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub source_id: SourceId,
    pub severity: Severity,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEvent {
    pub source_id: SourceId,
    /// Raw Bot API `message` object.
    pub message: Value,
}

/// Consumer side of the pipeline. Called from poll-loop tasks, so
/// implementations must be thread-safe and return quickly.
pub trait Dispatch: Send + Sync {
    fn on_message(&self, event: MessageEvent);
    fn on_status(&self, event: StatusEvent);
}

/// Logs the status through tracing and forwards it to the consumer.
pub(crate) fn report(dispatch: &dyn Dispatch, source_id: &SourceId, severity: Severity, text: String) {
    match severity {
        Severity::Info | Severity::Success => {
            tracing::info!(target: "monitor", source = %source_id, %severity, "{text}")
        }
        Severity::Warning => tracing::warn!(target: "monitor", source = %source_id, "{text}"),
        Severity::Error => tracing::error!(target: "monitor", source = %source_id, "{text}"),
    }
    dispatch.on_status(StatusEvent {
        source_id: source_id.clone(),
        severity,
        text,
    });
}

/// Queue-backed dispatcher: one unbounded channel per event kind, drained by the
/// consumer on its own schedule. Producers never wait on the consumer.
#[derive(Clone)]
pub struct ChannelDispatch {
    messages: mpsc::UnboundedSender<MessageEvent>,
    statuses: mpsc::UnboundedSender<StatusEvent>,
}

/// Receiving halves returned by [`ChannelDispatch::new`].
pub struct DispatchReceivers {
    pub messages: mpsc::UnboundedReceiver<MessageEvent>,
    pub statuses: mpsc::UnboundedReceiver<StatusEvent>,
}

impl ChannelDispatch {
    pub fn new() -> (Self, DispatchReceivers) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (st_tx, st_rx) = mpsc::unbounded_channel();
        (
            Self {
                messages: msg_tx,
                statuses: st_tx,
            },
            DispatchReceivers {
                messages: msg_rx,
                statuses: st_rx,
            },
        )
    }
}

impl Dispatch for ChannelDispatch {
    fn on_message(&self, event: MessageEvent) {
        if self.messages.send(event).is_err() {
            tracing::debug!(target: "monitor", "message receiver dropped");
        }
    }

    fn on_status(&self, event: StatusEvent) {
        if self.statuses.send(event).is_err() {
            tracing::debug!(target: "monitor", "status receiver dropped");
        }
    }
}
