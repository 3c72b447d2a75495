//! Attendance ledger: a CSV file with header `Name,Date,Time,Status`.
//!
//! Every mutation loads the whole file, changes it in memory and rewrites it
//! through a temp file that is renamed over the ledger file. There is no
//! locking; callers must ensure a single writer.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HEADER: [&str; 4] = ["Name", "Date", "Time", "Status"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ledger csv error on {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[default]
    Present,
    Absent,
}

/// One ledger row. Field names double as CSV headers and JSON keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    /// `None` is written as `-` (absentee rows).
    #[serde(rename = "Time", with = "clock_time")]
    pub time: Option<NaiveTime>,
    /// Older three-column ledgers have no status; their rows are presences.
    #[serde(rename = "Status", default)]
    pub status: Status,
}

impl AttendanceRecord {
    pub fn present(name: &str, at: NaiveDateTime) -> Self {
        Self {
            name: name.to_string(),
            date: at.date(),
            time: at.time().with_nanosecond(0),
            status: Status::Present,
        }
    }

    pub fn absent(name: &str, date: NaiveDate) -> Self {
        Self {
            name: name.to_string(),
            date,
            time: None,
            status: Status::Absent,
        }
    }
}

/// `HH:MM:SS`, or `-` for no time.
mod clock_time {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M:%S";
    const NONE: &str = "-";

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => s.collect_str(&t.format(FORMAT)),
            None => s.serialize_str(NONE),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let raw = String::deserialize(d)?;
        let raw = raw.trim();
        if raw == NONE || raw.is_empty() {
            return Ok(None);
        }
        NaiveTime::parse_from_str(raw, FORMAT)
            .map(Some)
            .map_err(de::Error::custom)
    }
}

/// Handle to the ledger file. Cheap to clone; holds only the path.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open the ledger at `path`, creating it with just a header if absent.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self { path: path.into() };
        if !ledger.path.exists() {
            ledger.save(&[])?;
            tracing::info!(path = %ledger.path.display(), "created attendance ledger");
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row, in file order. Names are kept byte for byte.
    pub fn load(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.csv_err(e))?;

        reader
            .deserialize()
            .collect::<Result<Vec<AttendanceRecord>, _>>()
            .map_err(|e| self.csv_err(e))
    }

    /// Replace the file contents with `records`.
    pub fn save(&self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;

        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer.write_record(HEADER).map_err(|e| self.csv_err(e))?;
            for record in records {
                writer.serialize(record).map_err(|e| self.csv_err(e))?;
            }
            writer.flush().map_err(|e| self.io_err(e))?;
        }
        tmp.as_file_mut().flush().map_err(|e| self.io_err(e))?;

        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }

    /// Rows dated `date`.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.load()?.into_iter().filter(|r| r.date == date).collect())
    }

    /// Append a Present row for `name` unless one exists for that day already.
    ///
    /// Returns true if a row was written.
    pub fn mark_present(&self, name: &str, at: NaiveDateTime) -> Result<bool, LedgerError> {
        let mut records = self.load()?;
        let date = at.date();
        if records.iter().any(|r| r.name == name && r.date == date) {
            return Ok(false);
        }

        records.push(AttendanceRecord::present(name, at));
        self.save(&records)?;
        Ok(true)
    }

    /// Append an Absent row for each name with no row on `date`.
    ///
    /// Returns the names marked absent, in the order given. Running it again
    /// the same day finds nothing to add.
    pub fn mark_absentees<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        date: NaiveDate,
    ) -> Result<Vec<String>, LedgerError> {
        let mut records = self.load()?;
        let seen: HashSet<&str> = records
            .iter()
            .filter(|r| r.date == date)
            .map(|r| r.name.as_str())
            .collect();

        let absentees: Vec<String> = names
            .into_iter()
            .filter(|n| !seen.contains(n))
            .map(str::to_owned)
            .collect();

        if absentees.is_empty() {
            return Ok(absentees);
        }

        records.extend(absentees.iter().map(|n| AttendanceRecord::absent(n, date)));
        self.save(&records)?;
        Ok(absentees)
    }

    fn io_err(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_err(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn day(date: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
    }

    fn temp_ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("attendance.csv")).unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_open_creates_header_only_file() {
        let (_dir, ledger) = temp_ledger();
        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(content, "Name,Date,Time,Status\n");
        assert!(ledger.load().unwrap().is_empty());
    }

    #[test]
    fn test_open_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Name,Date,Time,Status\nalice,2024-01-01,09:00:00,Present\n").unwrap();
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.load().unwrap().len(), 1);
    }

    #[test]
    fn test_write_then_read_preserves_fields() {
        let (_dir, ledger) = temp_ledger();
        let records = vec![
            AttendanceRecord::present("alice", at("2024-01-01", "09:00:00")),
            AttendanceRecord::absent("bob", day("2024-01-01")),
            AttendanceRecord::present("Smith, Jane", at("2024-01-02", "23:59:59")),
        ];
        ledger.save(&records).unwrap();
        assert_eq!(ledger.load().unwrap(), records);

        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert!(content.contains("alice,2024-01-01,09:00:00,Present\n"));
        assert!(content.contains("bob,2024-01-01,-,Absent\n"));
        assert!(content.contains("\"Smith, Jane\",2024-01-02,23:59:59,Present\n"));
    }

    #[test]
    fn test_legacy_three_column_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Name,Date,Time\nalice,2024-01-01,09:00:00\n").unwrap();

        let ledger = Ledger::open(&path).unwrap();
        let records = ledger.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Status::Present);

        // Next mutation upgrades the file to four columns.
        ledger.mark_present("bob", at("2024-01-01", "10:00:00")).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Name,Date,Time,Status\n"));
        assert!(content.contains("alice,2024-01-01,09:00:00,Present\n"));
    }

    #[test]
    fn test_mark_present_once_per_day() {
        let (_dir, ledger) = temp_ledger();
        assert!(ledger.mark_present("alice", at("2024-01-01", "09:00:00")).unwrap());
        for _ in 0..5 {
            assert!(!ledger.mark_present("alice", at("2024-01-01", "09:05:00")).unwrap());
        }

        let records = ledger.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, NaiveTime::from_hms_opt(9, 0, 0));

        // A new day gets its own row.
        assert!(ledger.mark_present("alice", at("2024-01-02", "08:30:00")).unwrap());
        assert_eq!(ledger.load().unwrap().len(), 2);
    }

    #[test]
    fn test_name_whitespace_round_trips() {
        let (_dir, ledger) = temp_ledger();
        for _ in 0..3 {
            ledger.mark_present("Jane ", at("2024-01-01", "09:00:00")).unwrap();
        }
        let records = ledger.load().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Jane ");

        assert!(ledger.mark_absentees(["Jane "], day("2024-01-01")).unwrap().is_empty());
        assert_eq!(ledger.load().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_present_drops_subsecond() {
        let (_dir, ledger) = temp_ledger();
        let when = at("2024-01-01", "09:00:00") + chrono::Duration::milliseconds(750);
        ledger.mark_present("alice", when).unwrap();
        let content = std::fs::read_to_string(ledger.path()).unwrap();
        assert!(content.contains("alice,2024-01-01,09:00:00,Present\n"));
    }

    #[test]
    fn test_mark_absentees_idempotent() {
        let (_dir, ledger) = temp_ledger();
        let today = day("2024-01-01");
        ledger.mark_present("alice", at("2024-01-01", "09:00:00")).unwrap();
        // Bob was here yesterday, which does not count for today.
        ledger.mark_present("bob", at("2023-12-31", "09:00:00")).unwrap();

        let names = ["alice", "bob", "carol"];
        let absent = ledger.mark_absentees(names, today).unwrap();
        assert_eq!(absent, ["bob", "carol"]);
        let after_first = std::fs::read_to_string(ledger.path()).unwrap();

        assert!(ledger.mark_absentees(names, today).unwrap().is_empty());
        let after_second = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_records_on_filters_by_date() {
        let (_dir, ledger) = temp_ledger();
        ledger.mark_present("alice", at("2024-01-01", "09:00:00")).unwrap();
        ledger.mark_present("alice", at("2024-01-02", "09:00:00")).unwrap();
        let rows = ledger.records_on(day("2024-01-02")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, day("2024-01-02"));
    }

    #[test]
    fn test_json_shape() {
        let record = AttendanceRecord::absent("bob", day("2024-01-01"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Name": "bob", "Date": "2024-01-01", "Time": "-", "Status": "Absent"})
        );
    }

    #[test]
    fn test_malformed_row_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        std::fs::write(&path, "Name,Date,Time,Status\nalice,not-a-date,09:00:00,Present\n").unwrap();
        let ledger = Ledger::open(&path).unwrap();
        assert!(matches!(ledger.load(), Err(LedgerError::Csv { .. })));
    }
}
