//! Versioned period files on the local filesystem.
//!
//! ```text
//! <root>/<strategy>/<version>/metadata.json
//! <root>/<strategy>/<version>/<YYYY-MM-DD>.csv   SecCode,Date,TestFlag,<features...>
//! ```

use crate::domain::error::QuantwalkError;
use crate::domain::period::{PeriodFrame, PeriodRow};
use crate::domain::version::{VersionMetadata, next_version_name, parse_version_number};
use crate::ports::period_store::PeriodStore;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

const METADATA_FILE: &str = "metadata.json";
const FIXED_COLUMNS: [&str; 3] = ["SecCode", "Date", "TestFlag"];

pub struct CsvPeriodStore {
    root: PathBuf,
}

fn period_error(path: &Path, reason: impl std::fmt::Display) -> QuantwalkError {
    QuantwalkError::PeriodFile {
        reason: format!("{}: {}", path.display(), reason),
    }
}

/// Write through a sibling temp file and rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), QuantwalkError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn sub_directories(dir: &Path) -> Result<Vec<String>, QuantwalkError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

impl CsvPeriodStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn version_dir(&self, strategy: &str, version: &str) -> PathBuf {
        self.root.join(strategy).join(version)
    }

    fn period_path(&self, strategy: &str, version: &str, period: NaiveDate) -> PathBuf {
        self.version_dir(strategy, version)
            .join(format!("{}.csv", period.format("%Y-%m-%d")))
    }

    fn require_version(&self, strategy: &str, version: &str) -> Result<PathBuf, QuantwalkError> {
        let dir = self.version_dir(strategy, version);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(QuantwalkError::VersionNotFound {
                strategy: strategy.to_string(),
                version: version.to_string(),
            })
        }
    }
}

impl PeriodStore for CsvPeriodStore {
    /// Directories holding at least one `version_NNN` directory.
    fn list_strategies(&self) -> Result<Vec<String>, QuantwalkError> {
        let mut out = Vec::new();
        for name in sub_directories(&self.root)? {
            if !self.list_versions(&name)?.is_empty() {
                out.push(name);
            }
        }
        Ok(out)
    }

    fn list_versions(&self, strategy: &str) -> Result<Vec<String>, QuantwalkError> {
        let mut versions: Vec<String> = sub_directories(&self.root.join(strategy))?
            .into_iter()
            .filter(|v| parse_version_number(v).is_some())
            .collect();
        versions.sort_by_key(|v| parse_version_number(v));
        Ok(versions)
    }

    fn create_version(&self, strategy: &str) -> Result<String, QuantwalkError> {
        let existing = self.list_versions(strategy)?;
        let name = next_version_name(&existing);
        fs::create_dir_all(self.version_dir(strategy, &name))?;
        Ok(name)
    }

    fn read_metadata(&self, strategy: &str, version: &str) -> Result<VersionMetadata, QuantwalkError> {
        let path = self.require_version(strategy, version)?.join(METADATA_FILE);
        let text = fs::read_to_string(&path).map_err(|e| QuantwalkError::Metadata {
            reason: format!("{}: {}", path.display(), e),
        })?;
        VersionMetadata::from_json(&text)
    }

    fn write_metadata(
        &self,
        strategy: &str,
        version: &str,
        metadata: &VersionMetadata,
    ) -> Result<(), QuantwalkError> {
        let path = self.version_dir(strategy, version).join(METADATA_FILE);
        write_atomic(&path, metadata.to_json()?.as_bytes())
    }

    fn list_periods(&self, strategy: &str, version: &str) -> Result<Vec<NaiveDate>, QuantwalkError> {
        let dir = self.require_version(strategy, version)?;
        let mut periods = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            if let Some(date) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
            {
                periods.push(date);
            }
        }
        periods.sort();
        Ok(periods)
    }

    fn read_period(
        &self,
        strategy: &str,
        version: &str,
        period: NaiveDate,
    ) -> Result<PeriodFrame, QuantwalkError> {
        let path = self.period_path(strategy, version, period);
        let mut rdr = csv::Reader::from_path(&path).map_err(|e| period_error(&path, e))?;

        let headers = rdr.headers()?.clone();
        let header_names: Vec<&str> = headers.iter().collect();
        if header_names.len() < FIXED_COLUMNS.len() || header_names[..3] != FIXED_COLUMNS {
            return Err(period_error(&path, "expected SecCode,Date,TestFlag header"));
        }
        let mut frame = PeriodFrame::new(header_names[3..].iter().map(|s| s.to_string()).collect());

        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let at = |what: &str| period_error(&path, format!("row {}: {}", line + 2, what));
            let sec_code = record.get(0).filter(|s| !s.is_empty()).ok_or_else(|| at("missing SecCode"))?;
            let date = record
                .get(1)
                .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
                .ok_or_else(|| at("invalid Date"))?;
            let test_flag = record.get(2).and_then(parse_flag).ok_or_else(|| at("invalid TestFlag"))?;

            let mut values = Vec::with_capacity(frame.columns.len());
            for i in 3..headers.len() {
                let raw = record.get(i).unwrap_or("").trim();
                if raw.is_empty() {
                    values.push(None);
                } else {
                    let v: f64 = raw.parse().map_err(|_| at(&format!("invalid number '{}'", raw)))?;
                    values.push(Some(v));
                }
            }
            frame.push(PeriodRow {
                sec_code: sec_code.to_string(),
                date,
                test_flag,
                values,
            });
        }

        if !frame.is_sorted() {
            frame.sort();
            frame.ensure_unique()?;
        }
        Ok(frame)
    }

    fn write_period(
        &self,
        strategy: &str,
        version: &str,
        period: NaiveDate,
        frame: &PeriodFrame,
    ) -> Result<(), QuantwalkError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        let mut header: Vec<&str> = FIXED_COLUMNS.to_vec();
        header.extend(frame.columns.iter().map(String::as_str));
        wtr.write_record(&header)?;

        for row in &frame.rows {
            let mut record: Vec<String> = Vec::with_capacity(header.len());
            record.push(row.sec_code.clone());
            record.push(row.date.format("%Y-%m-%d").to_string());
            record.push(if row.test_flag { "1" } else { "0" }.to_string());
            record.extend(row.values.iter().map(|v| v.map(|x| x.to_string()).unwrap_or_default()));
            wtr.write_record(&record)?;
        }
        let bytes = wtr.into_inner().map_err(|e| QuantwalkError::PeriodFile {
            reason: e.to_string(),
        })?;
        write_atomic(&self.period_path(strategy, version, period), &bytes)
    }

    fn remove_period(
        &self,
        strategy: &str,
        version: &str,
        period: NaiveDate,
    ) -> Result<(), QuantwalkError> {
        let path = self.period_path(strategy, version, period);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, m, day).unwrap()
    }

    fn sample() -> PeriodFrame {
        let mut f = PeriodFrame::new(vec!["AdjClose".into(), "LAG1_AdjClose".into()]);
        f.push(PeriodRow {
            sec_code: "7".into(),
            date: d(1, 3),
            test_flag: false,
            values: vec![Some(10.25), None],
        });
        f.push(PeriodRow {
            sec_code: "7".into(),
            date: d(1, 4),
            test_flag: true,
            values: vec![Some(10.5), Some(10.25)],
        });
        f
    }

    #[test]
    fn versions_are_allocated_in_order() {
        let dir = TempDir::new().unwrap();
        let store = CsvPeriodStore::new(dir.path().to_path_buf());
        assert!(store.list_strategies().unwrap().is_empty());
        assert_eq!(store.create_version("momo").unwrap(), "version_001");
        assert_eq!(store.create_version("momo").unwrap(), "version_002");
        assert_eq!(store.list_versions("momo").unwrap(), vec!["version_001", "version_002"]);
        std::fs::create_dir_all(dir.path().join("results").join("momo")).unwrap();
        assert_eq!(store.list_strategies().unwrap(), vec!["momo"]);
    }

    #[test]
    fn period_files_round_trip_with_missing_values() {
        let dir = TempDir::new().unwrap();
        let store = CsvPeriodStore::new(dir.path().to_path_buf());
        let version = store.create_version("momo").unwrap();
        store.write_period("momo", &version, d(1, 1), &sample()).unwrap();

        let back = store.read_period("momo", &version, d(1, 1)).unwrap();
        assert_eq!(back, sample());
        assert_eq!(store.list_periods("momo", &version).unwrap(), vec![d(1, 1)]);

        let text = fs::read_to_string(dir.path().join("momo").join(&version).join("2022-01-01.csv")).unwrap();
        assert!(text.starts_with("SecCode,Date,TestFlag,AdjClose,LAG1_AdjClose"));
        assert!(text.contains("7,2022-01-03,0,10.25,\n"));
    }

    #[test]
    fn no_temp_files_remain() {
        let dir = TempDir::new().unwrap();
        let store = CsvPeriodStore::new(dir.path().to_path_buf());
        let version = store.create_version("s").unwrap();
        store.write_period("s", &version, d(2, 1), &sample()).unwrap();
        store.write_period("s", &version, d(2, 1), &sample()).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path().join("s").join(&version))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["2022-02-01.csv"]);
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = CsvPeriodStore::new(dir.path().to_path_buf());
        let version = store.create_version("s").unwrap();
        store.write_period("s", &version, d(2, 1), &sample()).unwrap();
        store.remove_period("s", &version, d(2, 1)).unwrap();
        store.remove_period("s", &version, d(2, 1)).unwrap();
        assert!(store.list_periods("s", &version).unwrap().is_empty());
    }

    #[test]
    fn unknown_version_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = CsvPeriodStore::new(dir.path().to_path_buf());
        assert!(matches!(
            store.list_periods("s", "version_009"),
            Err(QuantwalkError::VersionNotFound { .. })
        ));
        assert!(matches!(
            store.read_metadata("s", "version_009"),
            Err(QuantwalkError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn malformed_rows_name_the_file() {
        let dir = TempDir::new().unwrap();
        let store = CsvPeriodStore::new(dir.path().to_path_buf());
        let version = store.create_version("s").unwrap();
        let path = dir.path().join("s").join(&version).join("2022-03-01.csv");
        fs::write(&path, "SecCode,Date,TestFlag,AdjClose\n1,2022-03-02,maybe,1.0\n").unwrap();
        let err = store.read_period("s", &version, d(3, 1)).unwrap_err();
        match err {
            QuantwalkError::PeriodFile { reason } => assert!(reason.contains("TestFlag")),
            other => panic!("expected PeriodFile, got {other}"),
        }
    }
}
