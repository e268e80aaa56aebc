// src/monitor/poll_loop.rs
//! One long-running `getUpdates` loop per monitored group.
//!
//! State machine: `Stopped --start--> Polling --stop/401--> Stopped|Unauthorized`.
//! Each loop runs in its own tokio task and owns its [`Cursor`]; stopping
//! destroys the task, so a restart begins with a fresh cursor.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::monitor::cursor::Cursor;
use crate::monitor::dispatch::{report, Dispatch, MessageEvent, Severity};
use crate::monitor::fetch::{ErrorClass, FetchError, Update, UpdateFetcher};
use crate::monitor::source::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Polling,
    /// Stopped on request (or never started).
    Stopped,
    /// Died on HTTP 401; will not retry by itself.
    Unauthorized,
}

/// Fixed-interval timings. No exponential backoff: failures are expected to be
/// short-lived and visible to the operator in the status feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimings {
    /// Long-poll `timeout` sent to `getUpdates`.
    pub long_poll: Duration,
    /// Delay after every successful fetch.
    pub pacing: Duration,
    /// After `ok: false`.
    pub api_error_backoff: Duration,
    /// After network failures and non-200 statuses.
    pub transport_backoff: Duration,
    /// After anything else.
    pub unexpected_backoff: Duration,
    /// How long `stop` waits for an in-flight fetch before detaching the task.
    pub stop_grace: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            long_poll: Duration::from_secs(30),
            pacing: Duration::from_secs(1),
            api_error_backoff: Duration::from_secs(10),
            transport_backoff: Duration::from_secs(15),
            unexpected_backoff: Duration::from_secs(5),
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl PollTimings {
    pub fn backoff_for(&self, err: &FetchError) -> Duration {
        match err.class() {
            ErrorClass::Application => self.api_error_backoff,
            ErrorClass::Transport => self.transport_backoff,
            ErrorClass::Unexpected => self.unexpected_backoff,
            ErrorClass::Authorization => Duration::ZERO,
        }
    }
}

/// Control handle for a single group's loop.
pub struct PollLoop {
    source_id: SourceId,
    chat_id: String,
    bot_token: String,
    fetcher: Arc<dyn UpdateFetcher>,
    dispatch: Arc<dyn Dispatch>,
    timings: PollTimings,
    run: Option<RunHandle>,
}

struct RunHandle {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<LoopState>,
    task: JoinHandle<()>,
}

impl PollLoop {
    /// `bot_token` is a snapshot; later credential changes need a new loop.
    pub fn new(
        source_id: SourceId,
        chat_id: String,
        bot_token: String,
        fetcher: Arc<dyn UpdateFetcher>,
        dispatch: Arc<dyn Dispatch>,
        timings: PollTimings,
    ) -> Self {
        Self {
            source_id,
            chat_id,
            bot_token,
            fetcher,
            dispatch,
            timings,
            run: None,
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    pub fn bot_token(&self) -> &str {
        &self.bot_token
    }

    /// A task that ended without reporting (it was aborted or panicked outside an
    /// iteration) counts as stopped.
    pub fn state(&self) -> LoopState {
        let Some(run) = &self.run else {
            return LoopState::Stopped;
        };
        let state = *run.state_rx.borrow();
        if state == LoopState::Polling && run.task.is_finished() {
            return LoopState::Stopped;
        }
        state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LoopState::Polling
    }

    /// Spawns the polling task. Returns `false` (and does nothing) when already polling.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }
        // reap a loop that ended on its own
        self.run = None;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(LoopState::Polling);
        let worker = Worker {
            source_id: self.source_id.clone(),
            chat_id: self.chat_id.clone(),
            bot_token: self.bot_token.clone(),
            fetcher: Arc::clone(&self.fetcher),
            dispatch: Arc::clone(&self.dispatch),
            timings: self.timings,
            cursor: Cursor::new(),
            stop_rx,
            state_tx,
        };
        let task = tokio::spawn(worker.run());
        self.run = Some(RunHandle {
            stop_tx,
            state_rx,
            task,
        });

        report(
            self.dispatch.as_ref(),
            &self.source_id,
            Severity::Success,
            "Monitoring started successfully.".to_string(),
        );
        true
    }

    /// Signals the loop and waits up to `stop_grace` for it to finish.
    /// An in-flight fetch is not cancelled; if it outlives the grace period the task
    /// is detached and exits on its own once the fetch returns.
    ///
    /// Returns `false` (no status emitted) when the loop was not polling.
    pub async fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(run) = self.run.take() else {
            return false;
        };

        let _ = run.stop_tx.send(true);
        if tokio::time::timeout(self.timings.stop_grace, run.task)
            .await
            .is_err()
        {
            tracing::warn!(
                target: "monitor",
                source = %self.source_id,
                grace_ms = self.timings.stop_grace.as_millis() as u64,
                "fetch still in flight after stop grace; detaching poll task"
            );
        }

        report(
            self.dispatch.as_ref(),
            &self.source_id,
            Severity::Info,
            "Monitoring stopped.".to_string(),
        );
        true
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            let _ = run.stop_tx.send(true);
        }
    }
}

// ------------------------------------------------------------
// Task body
// ------------------------------------------------------------

struct Worker {
    source_id: SourceId,
    chat_id: String,
    bot_token: String,
    fetcher: Arc<dyn UpdateFetcher>,
    dispatch: Arc<dyn Dispatch>,
    timings: PollTimings,
    cursor: Cursor,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<LoopState>,
}

impl Worker {
    async fn run(mut self) {
        crate::monitor::ensure_metrics_described();
        let _running = RunningGauge::enter();

        self.status(
            Severity::Info,
            format!("Polling for updates from chat ID: {}...", self.chat_id),
        );
        let end = self.poll().await;

        tracing::debug!(
            target: "monitor",
            source = %self.source_id,
            last_update_id = self.cursor.last_seen(),
            state = ?end,
            "poll loop finished"
        );
        let _ = self.state_tx.send(end);
    }

    async fn poll(&mut self) -> LoopState {
        loop {
            let outcome = AssertUnwindSafe(self.iteration()).catch_unwind().await;
            match outcome {
                Ok(Some(end)) => return end,
                Ok(None) => {}
                Err(panic) => {
                    // a panicking fetcher or consumer counts as an unexpected error
                    let err = FetchError::Unexpected(panic_message(panic.as_ref()));
                    counter!("monitor_fetch_errors_total", "kind" => err.class().as_str())
                        .increment(1);
                    self.status(Severity::Error, err.to_string());
                    if !self.pause(self.timings.backoff_for(&err)).await {
                        return LoopState::Stopped;
                    }
                }
            }
        }
    }

    /// One fetch-deliver-wait round. `Some(state)` ends the loop.
    async fn iteration(&mut self) -> Option<LoopState> {
        if self.stop_requested() {
            return Some(LoopState::Stopped);
        }

        counter!("monitor_fetches_total").increment(1);
        let fetched = self
            .fetcher
            .get_updates(&self.bot_token, self.cursor.next_offset(), self.timings.long_poll)
            .await;

        // a batch that lands after stop is dropped undelivered
        if self.stop_requested() {
            return Some(LoopState::Stopped);
        }

        match fetched {
            Ok(updates) => {
                self.deliver(updates);
                if !self.pause(self.timings.pacing).await {
                    return Some(LoopState::Stopped);
                }
            }
            Err(err) => {
                counter!("monitor_fetch_errors_total", "kind" => err.class().as_str())
                    .increment(1);
                self.status(Severity::Error, err.to_string());
                if err.is_fatal() {
                    return Some(LoopState::Unauthorized);
                }
                if !self.pause(self.timings.backoff_for(&err)).await {
                    return Some(LoopState::Stopped);
                }
            }
        }
        None
    }

    /// Advances the cursor past every update, forwarding only this group's messages.
    fn deliver(&mut self, updates: Vec<Update>) {
        for update in updates {
            self.cursor.advance(update.update_id);
            if update.chat_id().as_deref() != Some(self.chat_id.as_str()) {
                continue;
            }
            if let Some(message) = update.message {
                counter!("monitor_messages_total").increment(1);
                self.dispatch.on_message(MessageEvent {
                    source_id: self.source_id.clone(),
                    message,
                });
            }
        }
    }

    /// Sleeps for `d` unless stop arrives first. Returns `false` when the loop should end.
    async fn pause(&mut self, d: Duration) -> bool {
        if !d.is_zero() {
            let interrupted = tokio::select! {
                _ = tokio::time::sleep(d) => false,
                _ = self.stop_rx.changed() => true,
            };
            if interrupted {
                return false;
            }
        }
        !self.stop_requested()
    }

    fn stop_requested(&self) -> bool {
        // a dropped handle counts as a stop
        *self.stop_rx.borrow() || self.stop_rx.has_changed().is_err()
    }

    fn status(&self, severity: Severity, text: String) {
        report(self.dispatch.as_ref(), &self.source_id, severity, text);
    }
}

/// Keeps `monitor_loops_running` balanced however the task ends.
struct RunningGauge;

impl RunningGauge {
    fn enter() -> Self {
        gauge!("monitor_loops_running").increment(1.0);
        RunningGauge
    }
}

impl Drop for RunningGauge {
    fn drop(&mut self) {
        gauge!("monitor_loops_running").decrement(1.0);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "poll iteration panicked".to_string()
    }
}
