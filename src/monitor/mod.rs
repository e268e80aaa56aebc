// src/monitor/mod.rs
//! Live monitoring: per-group long-poll loops over the Telegram Bot API.

pub mod cursor;
pub mod dispatch;
pub mod fetch;
pub mod poll_loop;
pub mod registry;
pub mod source;

pub use cursor::Cursor;
pub use dispatch::{ChannelDispatch, Dispatch, DispatchReceivers, MessageEvent, Severity, StatusEvent};
pub use fetch::{BotApiClient, FetchError, ScriptedFetcher, Step, Update, UpdateFetcher};
pub use poll_loop::{LoopState, PollLoop, PollTimings};
pub use registry::{MonitorRegistry, RegistryError, SourceStatus, SourceView};
pub use source::{MonitoredSource, SourceEdit, SourceId};

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("monitor_fetches_total", "getUpdates calls issued.");
        describe_counter!(
            "monitor_messages_total",
            "Messages forwarded for a monitored chat."
        );
        describe_counter!(
            "monitor_fetch_errors_total",
            "Failed fetch iterations, labelled by error kind."
        );
        describe_gauge!("monitor_loops_running", "Poll loops currently alive.");
    });
}
