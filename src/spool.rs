use crate::error::PipelineError;
use crate::parser::RawEvent;
use std::fs;
use std::path::PathBuf;

/// Append-only CSV spool between the live subscriber and consolidation.
///
/// One line per record, no header, append order preserved. Each append is a
/// scoped open-write-flush-close, so a crash mid-append leaves either the
/// whole line or nothing, and a concurrent drain never reads a torn record.
#[derive(Debug, Clone)]
pub struct Spool {
    path: PathBuf,
}

impl Spool {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Durably append one record. The file handle is acquired for this
    /// single write and released on every exit path.
    pub fn append(&self, event: &RawEvent) -> Result<(), PipelineError> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.serialize(event)?;
        writer.flush()?;
        Ok(())
    }

    /// Read every stored record in append order without deleting. A spool
    /// that was never written (or already cleared) drains empty.
    pub fn drain(&self) -> Result<Vec<RawEvent>, PipelineError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(file);
        let mut records = Vec::new();
        for record in reader.deserialize() {
            records.push(record?);
        }
        Ok(records)
    }

    /// Remove all records. Only valid once the consumer has durably
    /// committed them elsewhere; a spool file that vanished after a
    /// non-empty drain is an error, not a no-op.
    pub fn clear(&self) -> Result<(), PipelineError> {
        if !self.path.exists() {
            return Err(PipelineError::MissingSourceFile(self.path.clone()));
        }
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn event(name: &str, ppm: f64, date: (i32, u32, u32), time: (u32, u32, u32)) -> RawEvent {
        RawEvent {
            operator_name: name.to_string(),
            ppm,
            record_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            record_time: NaiveTime::from_hms_opt(time.0, time.1, time.2).unwrap(),
        }
    }

    fn temp_spool() -> (tempfile::TempDir, Spool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let spool = Spool::new(dir.path().join("ppm-events.csv")).expect("spool");
        (dir, spool)
    }

    #[test]
    fn append_then_drain_round_trips_in_order() {
        let (_dir, spool) = temp_spool();
        let events = vec![
            event("LNER", 90.0, (2024, 1, 1), (8, 0, 0)),
            event("LNER", 92.0, (2024, 1, 1), (9, 15, 0)),
            event("GWR", 85.5, (2024, 1, 1), (8, 30, 0)),
        ];
        for e in &events {
            spool.append(e).expect("append");
        }
        assert_eq!(spool.drain().expect("drain"), events);
        // drain does not consume
        assert_eq!(spool.drain().expect("drain again").len(), 3);
    }

    #[test]
    fn missing_spool_drains_empty() {
        let (_dir, spool) = temp_spool();
        assert!(spool.drain().expect("drain").is_empty());
    }

    #[test]
    fn clear_removes_the_file() {
        let (_dir, spool) = temp_spool();
        spool
            .append(&event("GWR", 85.0, (2024, 1, 1), (8, 30, 0)))
            .expect("append");
        spool.clear().expect("clear");
        assert!(!spool.path().exists());
        assert!(spool.drain().expect("drain").is_empty());
    }

    #[test]
    fn clear_on_vanished_file_is_an_error() {
        let (_dir, spool) = temp_spool();
        let err = spool.clear().unwrap_err();
        assert!(matches!(err, PipelineError::MissingSourceFile(_)));
    }

    #[test]
    fn appends_survive_interleaved_drains() {
        let (_dir, spool) = temp_spool();
        spool
            .append(&event("LNER", 90.0, (2024, 1, 1), (8, 0, 0)))
            .expect("append");
        assert_eq!(spool.drain().expect("drain").len(), 1);
        spool
            .append(&event("LNER", 92.0, (2024, 1, 1), (9, 15, 0)))
            .expect("append");
        let records = spool.drain().expect("drain");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].ppm, 92.0);
    }
}
