use crate::calendar::{Category, ValidatedRecord};
use crate::CrawlerError;

use chrono::NaiveDate;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Accepted records of one run, kept in memory until shutdown.
#[derive(Debug, Default)]
pub struct Collections {
    records: BTreeMap<Category, Vec<ValidatedRecord>>,
}

impl Collections {
    pub fn push(&mut self, record: ValidatedRecord) {
        self.records
            .entry(record.record().category)
            .or_default()
            .push(record);
    }

    pub fn get(&self, category: Category) -> &[ValidatedRecord] {
        self.records
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One pretty printed JSON array per non-empty category.
    pub fn write(
        &self,
        dir: &Path,
        prefix: Option<&str>,
        run_date: NaiveDate,
    ) -> Result<Vec<PathBuf>, CrawlerError> {
        if self.is_empty() {
            warn!("No data to save");
            return Ok(vec![]);
        }
        fs::create_dir_all(dir)?;

        let mut written = vec![];
        for (category, records) in &self.records {
            if records.is_empty() {
                continue;
            }
            let path = dir.join(output_filename(*category, prefix, run_date));
            let mut writer = BufWriter::new(File::create(&path)?);
            serde_json::to_writer_pretty(&mut writer, records)?;
            writer.flush()?;
            info!("Saved {} {} items to {}", records.len(), category, path.display());
            written.push(path);
        }
        Ok(written)
    }
}

/// `{prefix}_{category}.json`, or `{category}_{YYYYMMDD}.json` without a prefix.
pub fn output_filename(category: Category, prefix: Option<&str>, run_date: NaiveDate) -> String {
    match prefix {
        Some(prefix) => format!("{}_{}.json", prefix, category),
        None => format!("{}_{}.json", category, run_date.format("%Y%m%d")),
    }
}

pub fn load_records(path: &Path) -> Result<Vec<Value>, CrawlerError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Most recently modified `*_{category}.json` in `dir`.
pub fn latest_file(dir: &Path, category: Category) -> Result<Option<PathBuf>, CrawlerError> {
    let suffix = format!("_{}.json", category);
    let mut latest = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().ends_with(&suffix) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if latest.as_ref().map_or(true, |(t, _)| modified > *t) {
            latest = Some((modified, entry.path()));
        }
    }
    Ok(latest.map(|(_, path)| path))
}
