// src/monitor/cursor.rs
//! Per-source position in the Bot API update stream.

/// Highest `update_id` consumed so far by one poll loop.
///
/// The update stream is global to the bot, so the cursor moves past every
/// update in a batch, including the ones filtered out for another chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    last_seen: i64,
}

impl Cursor {
    /// Bot API update ids are positive, so zero sits below every valid id.
    pub const NONE_SEEN: i64 = 0;

    pub fn new() -> Self {
        Self {
            last_seen: Self::NONE_SEEN,
        }
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    /// Offset for the next `getUpdates` call (strictly greater than anything seen).
    pub fn next_offset(&self) -> i64 {
        self.last_seen.saturating_add(1)
    }

    /// Never moves backwards.
    pub fn advance(&mut self, update_id: i64) {
        self.last_seen = self.last_seen.max(update_id);
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}
