//! Daily attendance log.
//!
//! One CSV file per calendar day (`attendance_YYYY-MM-DD.csv`) with the
//! header `ID-Name,Date,Time`. Every write opens the file in append mode,
//! writes a single row, flushes and closes it, so readers never observe a
//! half-written line and nothing stays open between records.

use crate::session::AttendanceSink;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HEADER: [&str; 3] = ["ID-Name", "Date", "Time"];
const FILE_PREFIX: &str = "attendance_";
const FILE_SUFFIX: &str = ".csv";

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("attendance log I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("attendance log CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("invalid record date: {0:?}")]
    InvalidDate(String),
    #[error("no attendance log for {0}")]
    NotFound(NaiveDate),
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "ID-Name")]
    pub identity_label: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
}

impl AttendanceRecord {
    pub fn at<Tz: TimeZone>(identity_label: &str, when: &DateTime<Tz>) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        Self {
            identity_label: identity_label.to_string(),
            date: when.format("%Y-%m-%d").to_string(),
            time: when.format("%H:%M:%S").to_string(),
        }
    }
}

/// Directory of per-day attendance files.
#[derive(Debug, Clone)]
pub struct AttendanceLog {
    dir: PathBuf,
}

impl AttendanceLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the log file for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d")))
    }

    /// Append one record to the file for its date, creating the file (with
    /// header) if absent.
    pub fn append(&self, record: &AttendanceRecord) -> Result<PathBuf, AttendanceError> {
        let date = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d")
            .map_err(|_| AttendanceError::InvalidDate(record.date.clone()))?;
        let path = self.path_for(date);

        std::fs::create_dir_all(&self.dir).map_err(|source| AttendanceError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AttendanceError::Io { path: path.clone(), source })?;
        let needs_header = file
            .metadata()
            .map_err(|source| AttendanceError::Io { path: path.clone(), source })?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(HEADER)?;
        }
        writer.serialize(record)?;
        writer
            .flush()
            .map_err(|source| AttendanceError::Io { path: path.clone(), source })?;

        tracing::info!(
            label = %record.identity_label,
            date = %record.date,
            time = %record.time,
            path = %path.display(),
            "attendance recorded"
        );
        Ok(path)
    }

    /// Read every record logged on `date`.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let path = self.path_for(date);
        if !path.exists() {
            return Err(AttendanceError::NotFound(date));
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let records = reader.deserialize().collect::<Result<Vec<AttendanceRecord>, _>>()?;
        Ok(records)
    }

    /// Dates with a log file, oldest first.
    pub fn list_days(&self) -> Result<Vec<NaiveDate>, AttendanceError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(AttendanceError::Io { path: self.dir.clone(), source }),
        };

        let mut days: Vec<NaiveDate> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
                NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
            })
            .collect();
        days.sort();
        Ok(days)
    }
}

impl AttendanceSink for AttendanceLog {
    type Error = AttendanceError;

    fn record(&mut self, label: &str) -> Result<AttendanceRecord, AttendanceError> {
        let record = AttendanceRecord::at(label, &Local::now());
        self.append(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(label: &str, date: &str, time: &str) -> AttendanceRecord {
        AttendanceRecord {
            identity_label: label.into(),
            date: date.into(),
            time: time.into(),
        }
    }

    #[test]
    fn test_first_append_writes_header() {
        let dir = tempdir().unwrap();
        let log = AttendanceLog::new(dir.path());
        let path = log.append(&record("101 - Alice", "2026-03-01", "09:15:00")).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "ID-Name,Date,Time\n101 - Alice,2026-03-01,09:15:00\n");
        assert!(path.ends_with("attendance_2026-03-01.csv"));
    }

    #[test]
    fn test_second_append_keeps_single_header() {
        let dir = tempdir().unwrap();
        let log = AttendanceLog::new(dir.path());
        log.append(&record("101 - Alice", "2026-03-01", "09:15:00")).unwrap();
        log.append(&record("102 - Bob", "2026-03-01", "09:16:30")).unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let rows = log.read_day(day).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].identity_label, "102 - Bob");

        let contents = std::fs::read_to_string(log.path_for(day)).unwrap();
        assert_eq!(contents.matches("ID-Name").count(), 1);
    }

    #[test]
    fn test_records_split_by_day() {
        let dir = tempdir().unwrap();
        let log = AttendanceLog::new(dir.path().join("logs"));
        log.append(&record("1 - A", "2026-03-02", "10:00:00")).unwrap();
        log.append(&record("1 - A", "2026-03-01", "10:00:00")).unwrap();

        let days = log.list_days().unwrap();
        assert_eq!(
            days,
            vec![
                NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            ]
        );
    }

    #[test]
    fn test_list_days_ignores_other_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("attendance_garbage.csv"), "x").unwrap();
        let log = AttendanceLog::new(dir.path());
        assert!(log.list_days().unwrap().is_empty());
    }

    #[test]
    fn test_list_days_missing_dir() {
        let dir = tempdir().unwrap();
        let log = AttendanceLog::new(dir.path().join("absent"));
        assert!(log.list_days().unwrap().is_empty());
    }

    #[test]
    fn test_read_missing_day() {
        let dir = tempdir().unwrap();
        let log = AttendanceLog::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(matches!(log.read_day(day), Err(AttendanceError::NotFound(_))));
    }

    #[test]
    fn test_label_with_comma_is_quoted() {
        let dir = tempdir().unwrap();
        let log = AttendanceLog::new(dir.path());
        log.append(&record("7 - Doe, Jane", "2026-03-01", "08:00:00")).unwrap();
        let rows = log.read_day(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()).unwrap();
        assert_eq!(rows[0].identity_label, "7 - Doe, Jane");
    }

    #[test]
    fn test_sink_stamps_today() {
        let dir = tempdir().unwrap();
        let mut log = AttendanceLog::new(dir.path());
        let rec = log.record("5 - Eve").unwrap();
        assert_eq!(rec.identity_label, "5 - Eve");
        assert_eq!(rec.time.len(), 8);
        let date = NaiveDate::parse_from_str(&rec.date, "%Y-%m-%d").unwrap();
        assert_eq!(log.read_day(date).unwrap(), vec![rec]);
    }

    #[test]
    fn test_record_formatting() {
        let when = Local.with_ymd_and_hms(2026, 4, 5, 7, 8, 9).unwrap();
        let rec = AttendanceRecord::at("1 - A", &when);
        assert_eq!(rec.date, "2026-04-05");
        assert_eq!(rec.time, "07:08:09");
    }
}
