//! Append-only order history

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};

use super::order::OrderRecord;
use crate::types::ist_now;

/// Where placed orders are recorded
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &OrderRecord) -> Result<()>;
}

/// One CSV file per trading day: `order_history_YYYYMMDD.csv`
#[derive(Debug, Clone)]
pub struct CsvOrderJournal {
    dir: PathBuf,
}

impl CsvOrderJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("order_history_{}.csv", date.format("%Y%m%d")))
    }

    fn record_date(record: &OrderRecord) -> NaiveDate {
        NaiveDateTime::parse_from_str(&record.timestamp, "%Y-%m-%d %H:%M:%S")
            .map(|t| t.date())
            .unwrap_or_else(|_| ist_now().date())
    }
}

impl AuditSink for CsvOrderJournal {
    fn record(&self, record: &OrderRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(Self::record_date(record));
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut writer = csv::WriterBuilder::new().has_headers(is_new).from_writer(file);
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}
