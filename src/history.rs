//! Log of every individual read, kept for CSV export.
//!
//! Unlike the tag registry the log is not deduplicated. It is capped, not
//! rolling: once full, later reads are discarded and the export keeps the
//! first `capacity` reads of the session.

use std::io::Write;

use log::warn;
use serde::Serialize;

use crate::types::{TrackerError, format_elapsed};

/// Reads kept per session
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

const CSV_HEADER: [&str; 6] = [
    "Test Location",
    "Read Number",
    "Timestamp",
    "Bottle Name",
    "EPC",
    "RSSI (dBm)",
];

/// Name written for bottles that were never registered
const UNREGISTERED: &str = "Unregistered";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// Milliseconds since the station started
    #[serde(skip)]
    pub timestamp: u64,
    pub epc: String,
    /// Name at the time of the read, empty if unknown
    #[serde(rename = "name")]
    pub bottle_name: String,
    pub rssi: i16,
    /// `HH:MM:SS` since the session started
    #[serde(rename = "time")]
    pub datetime: String,
}

#[derive(Debug)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    capacity: usize,
    session_start: u64,
    full_reported: bool,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
            session_start: 0,
            full_reported: false,
        }
    }

    /// Store `entry` unless the log is full. Returns whether it was kept.
    pub fn append(&mut self, entry: HistoryEntry) -> bool {
        if self.is_full() {
            if !self.full_reported {
                warn!("History buffer full - {} reads captured", self.capacity);
                self.full_reported = true;
            }
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Build an entry stamped relative to the current session
    pub fn entry(&self, epc: &str, bottle_name: &str, rssi: i16, now_ms: u64) -> HistoryEntry {
        HistoryEntry {
            timestamp: now_ms,
            epc: epc.to_string(),
            bottle_name: bottle_name.to_string(),
            rssi,
            datetime: format_elapsed(now_ms.saturating_sub(self.session_start)),
        }
    }

    /// Snapshot in insertion order
    pub fn export(&self) -> Vec<HistoryEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Drop every entry and start a new session at `now_ms`
    pub fn reset(&mut self, now_ms: u64) {
        self.entries.clear();
        self.session_start = now_ms;
        self.full_reported = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Write the log as CSV, one row per read, tagged with `location`
    pub fn write_csv<W: Write>(&self, writer: W, location: &str) -> Result<(), TrackerError> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(CSV_HEADER)
            .map_err(|e| TrackerError::Export(e.to_string()))?;

        for (index, entry) in self.entries.iter().enumerate() {
            let name = if entry.bottle_name.is_empty() {
                UNREGISTERED
            } else {
                entry.bottle_name.as_str()
            };
            csv.write_record([
                location,
                (index + 1).to_string().as_str(),
                entry.datetime.as_str(),
                name,
                entry.epc.as_str(),
                entry.rssi.to_string().as_str(),
            ])
            .map_err(|e| TrackerError::Export(e.to_string()))?;
        }

        csv.flush().map_err(|e| TrackerError::Export(e.to_string()))
    }
}
