// src/feed.rs
//! Human-readable live feed: status lines, incoming messages and AI insights.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::api::SharedRegistry;
use crate::enrich::{self, DynExtractor};
use crate::monitor::{DispatchReceivers, MessageEvent, SourceId, StatusEvent};

/// Where feed lines end up.
pub trait FeedSink: Send + Sync {
    fn line(&self, level: &str, msg: &str);
}

/// `[HH:MM:SS] [LEVEL] msg` on stdout.
pub struct StdoutFeed;

impl FeedSink for StdoutFeed {
    fn line(&self, level: &str, msg: &str) {
        println!("[{}] [{}] {}", chrono::Local::now().format("%H:%M:%S"), level, msg);
    }
}

/// Drains both dispatch queues into `sink` and fires one enrichment call per
/// live text message. On `shutdown` everything already queued is still written
/// before returning.
pub async fn run_feed(
    mut rx: DispatchReceivers,
    registry: SharedRegistry,
    extractor: DynExtractor,
    sink: Arc<dyn FeedSink>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(ev) = rx.statuses.recv() => show_status(&registry, &sink, ev).await,
            Some(ev) = rx.messages.recv() => show_message(&registry, &sink, &extractor, ev).await,
            _ = &mut shutdown => break,
            else => return,
        }
    }

    while let Ok(ev) = rx.statuses.try_recv() {
        show_status(&registry, &sink, ev).await;
    }
    while let Ok(ev) = rx.messages.try_recv() {
        show_message(&registry, &sink, &extractor, ev).await;
    }
}

async fn show_status(registry: &SharedRegistry, sink: &Arc<dyn FeedSink>, ev: StatusEvent) {
    let name = group_name(registry, &ev.source_id).await;
    sink.line(&ev.severity.to_string(), &format!("[{name}] {}", ev.text));
}

async fn show_message(
    registry: &SharedRegistry,
    sink: &Arc<dyn FeedSink>,
    extractor: &DynExtractor,
    ev: MessageEvent,
) {
    let name = group_name(registry, &ev.source_id).await;
    sink.line("INFO", &enrich::describe_live_message(&name, &ev.message));

    let Some(text) = enrich::live_text(&ev.message).map(str::to_string) else {
        return;
    };
    let msg_id = ev
        .message
        .get("message_id")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let extractor = Arc::clone(extractor);
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Some(info) = extractor.extract(&text).await {
            if info.is_dosing_related {
                sink.line("AI", &enrich::format_insight(&name, &msg_id, &info));
            }
        }
    });
}

async fn group_name(registry: &SharedRegistry, id: &SourceId) -> String {
    registry
        .lock()
        .await
        .get(id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}
