//! ═══════════════════════════════════════════════════════════════════════════════
//! EVENTS — Append-Only Heat Event Log
//! ═══════════════════════════════════════════════════════════════════════════════
//!
//! The only durable state. Every append bumps a version token; the model
//! compares that token against the one captured at its last successful train.
//!
//! Duplicate `(timestamp, unit_id)` keys are kept in the raw record but the
//! indexed view always resolves to the last write.
//!
//! Persistence is JSON Lines, one record per line:
//! `{"timestamp":…,"unit_id":…,"temperature":…,"time_of_day":…,"day_of_week":…}`
//! ═══════════════════════════════════════════════════════════════════════════════

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{GridError, GridResult, ValidationError};
use crate::topology::GridTopology;

/// Wall-clock now, in the naive local form the log stores
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Parse an ISO-8601 timestamp. A trailing `Z` or offset is accepted; the wall
/// time as written is kept.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, ValidationError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    Err(ValidationError::InvalidTimestamp(raw.to_string()))
}

/// One observed sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatEvent {
    pub timestamp: NaiveDateTime,
    pub unit_id: usize,
    pub temperature: f64,
    /// Hour of day, 0-23
    pub time_of_day: u32,
    /// 0 = Monday … 6 = Sunday
    pub day_of_week: u32,
}

impl HeatEvent {
    pub fn new(unit_id: usize, temperature: f64, timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            unit_id,
            temperature,
            time_of_day: timestamp.hour(),
            day_of_week: timestamp.weekday().num_days_from_monday(),
        }
    }
}

/// Append-only event log with per-unit time index
#[derive(Debug)]
pub struct EventLog {
    topology: GridTopology,
    /// Raw records in append order
    events: Vec<HeatEvent>,
    /// unit → timestamp → index of the latest record for that key
    by_unit: Vec<BTreeMap<NaiveDateTime, usize>>,
    version: u64,
    path: Option<PathBuf>,
}

impl EventLog {
    /// In-memory log
    pub fn new(topology: GridTopology) -> Self {
        Self {
            topology,
            events: Vec::new(),
            by_unit: vec![BTreeMap::new(); topology.unit_count()],
            version: 0,
            path: None,
        }
    }

    /// Log backed by a JSONL file. Existing records are loaded; unparseable lines
    /// are skipped. Records for units outside `topology` are rejected.
    pub fn open(topology: GridTopology, path: impl AsRef<Path>) -> GridResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut log = Self::new(topology);

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let mut skipped = 0usize;
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: HeatEvent = match serde_json::from_str(&line) {
                    Ok(e) => e,
                    Err(err) => {
                        tracing::debug!(line = lineno + 1, %err, "skipping malformed event record");
                        skipped += 1;
                        continue;
                    }
                };
                if !topology.contains(event.unit_id) {
                    return Err(GridError::TopologyMismatch(format!(
                        "{} line {} has unit {} but grid is {} ({} units)",
                        path.display(),
                        lineno + 1,
                        event.unit_id,
                        topology.signature(),
                        topology.unit_count()
                    )));
                }
                log.insert(event);
            }
            if skipped > 0 {
                tracing::warn!(skipped, path = %path.display(), "dropped malformed event records");
            }
            tracing::info!(records = log.len(), path = %path.display(), "event log loaded");
        }

        log.version = if log.events.is_empty() { 0 } else { 1 };
        log.path = Some(path);
        Ok(log)
    }

    fn insert(&mut self, event: HeatEvent) {
        let idx = self.events.len();
        self.by_unit[event.unit_id].insert(event.timestamp, idx);
        self.events.push(event);
    }

    fn check(&self, event: &HeatEvent) -> Result<(), ValidationError> {
        if !self.topology.contains(event.unit_id) {
            return Err(ValidationError::UnitOutOfRange {
                unit_id: event.unit_id as i64,
                max: self.topology.unit_count().saturating_sub(1),
            });
        }
        if !event.temperature.is_finite() {
            return Err(ValidationError::TemperatureOutOfRange {
                value: event.temperature,
                min: f64::MIN,
                max: f64::MAX,
            });
        }
        Ok(())
    }

    /// Append one event
    pub fn append(&mut self, event: HeatEvent) -> GridResult<()> {
        self.merge(vec![event]).map(|_| ())
    }

    /// Append a batch. Nothing is appended if any event is invalid.
    pub fn merge(&mut self, events: Vec<HeatEvent>) -> GridResult<usize> {
        for e in &events {
            self.check(e)?;
        }
        if events.is_empty() {
            return Ok(0);
        }
        if let Some(path) = &self.path {
            persist(path, &events)?;
        }
        let n = events.len();
        for e in events {
            self.insert(e);
        }
        self.version += 1;
        Ok(n)
    }

    /// Monotonic content token; changes on every successful append
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn topology(&self) -> GridTopology {
        self.topology
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Raw record count (duplicates included)
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct `(timestamp, unit_id)` keys
    pub fn unique_len(&self) -> usize {
        self.by_unit.iter().map(|m| m.len()).sum()
    }

    /// Raw records in append order
    pub fn events(&self) -> &[HeatEvent] {
        &self.events
    }

    /// Keep-last view, sorted by `(unit_id, timestamp)`
    pub fn deduplicated(&self) -> Vec<HeatEvent> {
        self.by_unit
            .iter()
            .flat_map(|m| m.values().map(|&i| self.events[i].clone()))
            .collect()
    }

    /// Most recent `n` samples for a unit at or before `at`, oldest first
    pub fn recent_for_unit_until(
        &self,
        unit_id: usize,
        at: NaiveDateTime,
        n: usize,
    ) -> Vec<HeatEvent> {
        let Some(index) = self.by_unit.get(unit_id) else {
            return Vec::new();
        };
        let mut out: Vec<HeatEvent> = index
            .range(..=at)
            .rev()
            .take(n)
            .map(|(_, &i)| self.events[i].clone())
            .collect();
        out.reverse();
        out
    }

    pub fn latest_for_unit(&self, unit_id: usize) -> Option<&HeatEvent> {
        self.by_unit
            .get(unit_id)?
            .values()
            .next_back()
            .map(|&i| &self.events[i])
    }

    /// Last `limit` raw records in append order
    pub fn tail(&self, limit: usize) -> Vec<HeatEvent> {
        let start = self.events.len().saturating_sub(limit);
        self.events[start..].to_vec()
    }
}

fn persist(path: &Path, events: &[HeatEvent]) -> GridResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for e in events {
        serde_json::to_writer(&mut writer, e)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
