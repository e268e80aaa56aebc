// src/enrich/summary.rs
//! Chart-ready timelines built from bulk extraction results.

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;

use super::DosingEvent;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimelineEntry {
    pub time: NaiveDateTime,
    pub label: String,
}

/// Medication intake vs. reported side effects, both sorted by time.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DosingSummary {
    pub medications: Vec<TimelineEntry>,
    pub side_effects: Vec<TimelineEntry>,
}

impl DosingSummary {
    /// Events without a parseable date are left out.
    pub fn from_events(events: &[DosingEvent]) -> Self {
        let mut out = Self::default();
        for ev in events {
            let Some(time) = ev.date.as_deref().and_then(parse_export_date) else {
                tracing::debug!(target: "enrich", date = ?ev.date, "skipping event without usable date");
                continue;
            };
            let info = &ev.info;
            if info.medication.is_some() || info.dosage.is_some() {
                out.medications.push(TimelineEntry {
                    time,
                    label: format!(
                        "{} {}",
                        info.medication.as_deref().unwrap_or("?"),
                        info.dosage.as_deref().unwrap_or("?")
                    ),
                });
            }
            if !info.side_effects.is_empty() {
                out.side_effects.push(TimelineEntry {
                    time,
                    label: info.side_effects.join(", "),
                });
            }
        }
        out.medications.sort_by_key(|e| e.time);
        out.side_effects.sort_by_key(|e| e.time);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.medications.is_empty() && self.side_effects.is_empty()
    }
}

/// Exports write local time without offset; RFC 3339 is accepted too.
pub fn parse_export_date(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.naive_local()))
}
