//! Reading history for the presentation layer
//!
//! [`SensorHistory`] is the short newest-first list shown on the history page.
//! [`RecordStore`] is the seam to the day-indexed record store; the in-memory
//! implementation keeps the console front end self-contained.

use crate::mqtt::message_manager::SensorReading;
use chrono::{Days, Local, NaiveDate, NaiveDateTime};
use std::collections::VecDeque;
use std::fmt;

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// One complete snapshot of the three readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorRecord {
    pub recorded_at: NaiveDateTime,
    pub dissolved_oxygen: Option<f64>,
    pub ph: Option<f64>,
    pub temperature: Option<f64>,
}

impl SensorRecord {
    pub fn from_reading(reading: &SensorReading, recorded_at: NaiveDateTime) -> Self {
        Self {
            recorded_at,
            dissolved_oxygen: reading.dissolved_oxygen,
            ph: reading.ph,
            temperature: reading.temperature,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.recorded_at.date()
    }
}

fn fmt_value(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "--".to_string(),
    }
}

impl fmt::Display for SensorRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: DO {} mg/L | pH {} | Temp {} °C",
            self.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            fmt_value(self.dissolved_oxygen, 2),
            fmt_value(self.ph, 1),
            fmt_value(self.temperature, 1)
        )
    }
}

#[derive(Debug)]
pub struct SensorHistory {
    records: VecDeque<SensorRecord>,
    capacity: usize,
}

impl Default for SensorHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl SensorHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, record: SensorRecord) {
        self.records.push_front(record);
        self.records.truncate(self.capacity);
    }

    /// Newest first
    pub fn records(&self) -> impl Iterator<Item = &SensorRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Day {
    Today,
    Yesterday,
}

impl Day {
    pub fn date(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Day::Today => today,
            Day::Yesterday => today.checked_sub_days(Days::new(1)).unwrap_or(today),
        }
    }
}

/// Day-indexed store for complete readings
pub trait RecordStore {
    fn insert(&mut self, record: SensorRecord);

    /// Records of that day, newest first
    fn query_day(&self, day: Day) -> Vec<SensorRecord>;

    /// Drops everything older than yesterday; returns how many went
    fn purge_expired(&mut self) -> usize;
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Vec<SensorRecord>,
}

impl InMemoryRecordStore {
    fn query_on(&self, date: NaiveDate) -> Vec<SensorRecord> {
        let mut found: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.day() == date)
            .copied()
            .collect();
        found.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        found
    }

    fn purge_before(&mut self, today: NaiveDate) -> usize {
        let yesterday = Day::Yesterday.date(today);
        let before = self.records.len();
        self.records
            .retain(|r| r.day() == today || r.day() == yesterday);
        before - self.records.len()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert(&mut self, record: SensorRecord) {
        self.records.push(record);
    }

    fn query_day(&self, day: Day) -> Vec<SensorRecord> {
        self.query_on(day.date(Local::now().date_naive()))
    }

    fn purge_expired(&mut self) -> usize {
        self.purge_before(Local::now().date_naive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S")
            .unwrap()
    }

    fn record(ts: NaiveDateTime, ph: f64) -> SensorRecord {
        SensorRecord {
            recorded_at: ts,
            dissolved_oxygen: Some(7.257),
            ph: Some(ph),
            temperature: None,
        }
    }

    #[test]
    fn display_rounds_like_the_history_page() {
        let r = record(at("2026-03-01", "08:00:00"), 7.04);
        assert_eq!(
            r.to_string(),
            "2026-03-01 08:00:00: DO 7.26 mg/L | pH 7.0 | Temp -- °C"
        );
    }

    #[test]
    fn history_is_newest_first_and_bounded() {
        let mut history = SensorHistory::with_capacity(2);
        history.record(record(at("2026-03-01", "08:00:00"), 1.0));
        history.record(record(at("2026-03-01", "08:00:01"), 2.0));
        history.record(record(at("2026-03-01", "08:00:02"), 3.0));

        let phs: Vec<_> = history.records().map(|r| r.ph).collect();
        assert_eq!(phs, vec![Some(3.0), Some(2.0)]);
    }

    #[test]
    fn store_queries_by_day_and_purges_older_days() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let mut store = InMemoryRecordStore::default();
        store.insert(record(at("2026-03-10", "09:00:00"), 1.0));
        store.insert(record(at("2026-03-10", "11:00:00"), 2.0));
        store.insert(record(at("2026-03-09", "23:59:59"), 3.0));
        store.insert(record(at("2026-03-07", "12:00:00"), 4.0));

        let todays = store.query_on(Day::Today.date(today));
        assert_eq!(
            todays.iter().map(|r| r.ph).collect::<Vec<_>>(),
            vec![Some(2.0), Some(1.0)]
        );
        assert_eq!(store.query_on(Day::Yesterday.date(today)).len(), 1);

        assert_eq!(store.purge_before(today), 1);
        assert_eq!(store.records.len(), 3);
    }
}
