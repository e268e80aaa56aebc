// src/monitor/registry.rs
//! In-memory set of monitored groups, each optionally bound to a running [`PollLoop`].
//!
//! The registry is owned by the control side (CLI, status server); poll loops
//! never touch it. At most one loop exists per group at any time.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::groups::GroupStore;
use crate::monitor::dispatch::Dispatch;
use crate::monitor::fetch::UpdateFetcher;
use crate::monitor::poll_loop::{LoopState, PollLoop, PollTimings};
use crate::monitor::source::{MonitoredSource, SourceEdit, SourceId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("group {0} is already registered")]
    DuplicateSource(SourceId),
    #[error("unknown group {0}")]
    UnknownSource(SourceId),
    #[error("no bot token for group '{name}': set one on the group or a default token")]
    MissingCredential { name: String },
    #[error("bot token for group '{name}' was rejected as unauthorized; change the token before restarting")]
    CredentialRejected { name: String },
}

/// Externally visible status label of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceStatus {
    Stopped,
    Running,
    /// The last loop died on a rejected token (as opposed to a user stop).
    Unauthorized,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceStatus::Stopped => "Stopped",
            SourceStatus::Running => "Running",
            SourceStatus::Unauthorized => "Unauthorized",
        };
        f.write_str(s)
    }
}

/// Row for listings (status routes, feeds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceView {
    pub id: SourceId,
    pub name: String,
    pub chat_id: String,
    pub status: SourceStatus,
    pub auto_save: bool,
}

struct Entry {
    source: MonitoredSource,
    poll: Option<PollLoop>,
    /// Token that got a 401; starting again with the same token is refused.
    rejected_token: Option<String>,
}

impl Entry {
    /// Latches the outcome of a loop that died on its own.
    fn reap(&mut self) {
        if let Some(poll) = &self.poll {
            match poll.state() {
                LoopState::Polling => {}
                LoopState::Unauthorized => {
                    self.rejected_token = Some(poll.bot_token().to_string());
                    self.poll = None;
                }
                LoopState::Stopped => self.poll = None,
            }
        }
    }

    fn is_running(&self) -> bool {
        self.poll.as_ref().is_some_and(PollLoop::is_running)
    }

    fn status(&self) -> SourceStatus {
        match self.poll.as_ref().map(PollLoop::state) {
            Some(LoopState::Polling) => SourceStatus::Running,
            Some(LoopState::Unauthorized) => SourceStatus::Unauthorized,
            _ if self.rejected_token.is_some() => SourceStatus::Unauthorized,
            _ => SourceStatus::Stopped,
        }
    }

    fn view(&self) -> SourceView {
        SourceView {
            id: self.source.id().clone(),
            name: self.source.name.clone(),
            chat_id: self.source.chat_id.clone(),
            status: self.status(),
            auto_save: self.source.auto_save,
        }
    }
}

pub struct MonitorRegistry {
    entries: Vec<Entry>,
    default_token: Option<String>,
    fetcher: Arc<dyn UpdateFetcher>,
    dispatch: Arc<dyn Dispatch>,
    timings: PollTimings,
    store: Option<GroupStore>,
}

impl MonitorRegistry {
    pub fn new(
        fetcher: Arc<dyn UpdateFetcher>,
        dispatch: Arc<dyn Dispatch>,
        timings: PollTimings,
    ) -> Self {
        Self {
            entries: Vec::new(),
            default_token: None,
            fetcher,
            dispatch,
            timings,
            store: None,
        }
    }

    /// Shared fallback token for groups without their own.
    pub fn with_default_token(mut self, token: Option<String>) -> Self {
        self.set_default_token(token);
        self
    }

    /// Rewrite `store` after every add/edit/remove.
    pub fn with_store(mut self, store: GroupStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Takes effect for loops started afterwards; running loops keep their snapshot.
    pub fn set_default_token(&mut self, token: Option<String>) {
        self.default_token = token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
    }

    pub fn default_token(&self) -> Option<&str> {
        self.default_token.as_deref()
    }

    /// Loads persisted groups without rewriting the store. Duplicates are skipped.
    pub fn restore(&mut self, sources: Vec<MonitoredSource>) -> usize {
        let mut added = 0;
        for source in sources {
            if self.position(source.id()).is_some() {
                warn!(target: "registry", id = %source.id(), name = %source.name, "skipping duplicate persisted group");
                continue;
            }
            self.entries.push(Entry {
                source,
                poll: None,
                rejected_token: None,
            });
            added += 1;
        }
        added
    }

    pub fn add(&mut self, source: MonitoredSource) -> Result<SourceId, RegistryError> {
        let id = source.id().clone();
        if self.position(&id).is_some() {
            return Err(RegistryError::DuplicateSource(id));
        }
        info!(target: "registry", id = %id, name = %source.name, chat_id = %source.chat_id, "group added");
        self.entries.push(Entry {
            source,
            poll: None,
            rejected_token: None,
        });
        self.persist();
        Ok(id)
    }

    /// Updates mutable fields. A running loop keeps polling with its old settings
    /// until it is restarted.
    pub fn edit(&mut self, id: &SourceId, edit: SourceEdit) -> Result<(), RegistryError> {
        let entry = self.entry_mut(id)?;
        entry.source.apply(edit);
        info!(target: "registry", id = %id, name = %entry.source.name, running = entry.is_running(), "group edited");
        self.persist();
        Ok(())
    }

    /// Stops the group's loop (bounded by the stop grace) and deletes the entry.
    pub async fn remove(&mut self, id: &SourceId) -> Result<MonitoredSource, RegistryError> {
        let idx = self
            .position(id)
            .ok_or_else(|| RegistryError::UnknownSource(id.clone()))?;
        if let Some(poll) = self.entries[idx].poll.as_mut() {
            poll.stop().await;
        }
        let entry = self.entries.remove(idx);
        info!(target: "registry", id = %id, name = %entry.source.name, "group removed");
        self.persist();
        Ok(entry.source)
    }

    /// Starts polling for one group. `Ok(false)` when it was already running.
    pub fn start(&mut self, id: &SourceId) -> Result<bool, RegistryError> {
        let default_token = self.default_token.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let dispatch = Arc::clone(&self.dispatch);
        let timings = self.timings;

        let entry = self.entry_mut(id)?;
        entry.reap();
        if entry.is_running() {
            return Ok(false);
        }

        let token = entry
            .source
            .bot_token
            .clone()
            .or(default_token)
            .ok_or_else(|| RegistryError::MissingCredential {
                name: entry.source.name.clone(),
            })?;
        if entry.rejected_token.as_deref() == Some(token.as_str()) {
            return Err(RegistryError::CredentialRejected {
                name: entry.source.name.clone(),
            });
        }

        let mut poll = PollLoop::new(
            id.clone(),
            entry.source.chat_id.clone(),
            token,
            fetcher,
            dispatch,
            timings,
        );
        poll.start();
        entry.poll = Some(poll);
        entry.rejected_token = None;
        Ok(true)
    }

    /// Stops one group. `Ok(false)` when it was not running.
    pub async fn stop(&mut self, id: &SourceId) -> Result<bool, RegistryError> {
        let entry = self.entry_mut(id)?;
        entry.reap();
        let stopped = match entry.poll.as_mut() {
            Some(poll) => poll.stop().await,
            None => false,
        };
        entry.poll = None;
        Ok(stopped)
    }

    /// Starts every group; one group's failure does not affect the others.
    pub fn start_all(&mut self) -> Vec<(SourceId, Result<bool, RegistryError>)> {
        let ids = self.ids();
        ids.into_iter()
            .map(|id| {
                let res = self.start(&id);
                if let Err(e) = &res {
                    warn!(target: "registry", id = %id, error = %e, "start skipped");
                }
                (id, res)
            })
            .collect()
    }

    /// Stops every running group. Returns how many loops were actually stopped.
    pub async fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for id in self.ids() {
            if let Ok(true) = self.stop(&id).await {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn status(&self, id: &SourceId) -> Option<SourceStatus> {
        self.position(id).map(|i| self.entries[i].status())
    }

    pub fn get(&self, id: &SourceId) -> Option<&MonitoredSource> {
        self.position(id).map(|i| &self.entries[i].source)
    }

    pub fn list(&self) -> Vec<SourceView> {
        self.entries.iter().map(Entry::view).collect()
    }

    pub fn ids(&self) -> Vec<SourceId> {
        self.entries.iter().map(|e| e.source.id().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &SourceId) -> Option<usize> {
        self.entries.iter().position(|e| e.source.id() == id)
    }

    fn entry_mut(&mut self, id: &SourceId) -> Result<&mut Entry, RegistryError> {
        self.entries
            .iter_mut()
            .find(|e| e.source.id() == id)
            .ok_or_else(|| RegistryError::UnknownSource(id.clone()))
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let sources: Vec<&MonitoredSource> = self.entries.iter().map(|e| &e.source).collect();
        if let Err(e) = store.save(&sources) {
            warn!(target: "registry", error = ?e, path = %store.path().display(), "saving groups failed");
        }
    }
}
