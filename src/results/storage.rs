//! Results storage and retrieval
//!
//! Append-only persistence of pipeline results. Each run is one JSON file
//! that is created once and never rewritten.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::pipeline::{PipelineResult, Trigger};

/// Append-only history of pipeline runs
pub trait ResultStore: Send + Sync {
    /// Persist one run; an existing run is never replaced
    fn append(&self, result: &PipelineResult) -> Result<()>;

    /// Most recent runs, oldest first
    fn load_recent(&self, limit: usize) -> Result<Vec<PipelineResult>>;
}

/// File-backed results storage
pub struct ResultsStorage {
    /// Base directory for results
    base_dir: PathBuf,
}

impl ResultsStorage {
    /// Create a new results storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create with default directory
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ci-gate")
            .join("results");
        Self::new(base_dir)
    }

    /// Configured directory, else the platform data directory
    pub fn from_config(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::new(dir),
            None => Self::default_dir(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Ensure storage directory exists
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!("Failed to create results dir: {}", self.base_dir.display())
        })
    }

    /// Get path for a specific run
    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a pipeline run
    pub fn save(&self, run: &PipelineResult) -> Result<PathBuf> {
        self.ensure_dir()?;

        let path = self.run_path(&run.id);
        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                bail!("Run {} is already stored at {}", run.id, path.display())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        };
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, run).context("Failed to write results")?;

        info!("Saved pipeline results to {}", path.display());
        Ok(path)
    }

    /// Load a pipeline run
    pub fn load(&self, run_id: &str) -> Result<PipelineResult> {
        let path = self.run_path(run_id);
        let run = self
            .load_from_path(&path)
            .with_context(|| format!("Failed to load run {run_id}"))?;
        debug!("Loaded pipeline results from {}", path.display());
        Ok(run)
    }

    /// Load from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<PipelineResult> {
        let file = File::open(path).context("Failed to open results file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse results")
    }

    /// Load every stored run, oldest first
    pub fn load_all(&self) -> Result<Vec<PipelineResult>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();

            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match self.load_from_path(&path) {
                    Ok(run) => runs.push(run),
                    Err(e) => {
                        debug!("Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        runs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(runs)
    }

    /// List stored runs, newest first
    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        let mut runs: Vec<RunInfo> = self.load_all()?.iter().map(RunInfo::from).collect();
        runs.reverse();
        Ok(runs)
    }

    /// Get latest run
    pub fn latest(&self) -> Result<Option<PipelineResult>> {
        Ok(self.load_all()?.pop())
    }

    /// Export run to a file
    pub fn export(&self, run: &PipelineResult, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                let writer = BufWriter::new(file);
                serde_json::to_writer_pretty(writer, run)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;

                writer.write_record([
                    "suite",
                    "suite_type",
                    "test_name",
                    "status",
                    "duration_ms",
                    "attempts",
                    "coverage",
                    "failure_kind",
                    "error",
                ])?;

                for suite in &run.suite_results {
                    for result in &suite.results {
                        writer.write_record([
                            suite.suite_name.clone(),
                            suite.suite_type.to_string(),
                            result.test_name.clone(),
                            result.status.to_string(),
                            result.duration_ms.to_string(),
                            result.attempts.to_string(),
                            format!("{:.4}", result.coverage),
                            result
                                .failure_kind
                                .map(|k| k.to_string())
                                .unwrap_or_default(),
                            result.error.clone().unwrap_or_default(),
                        ])?;
                    }
                }
                writer.flush()?;
            }
        }

        info!("Exported results to {}", path.display());
        Ok(())
    }
}

impl ResultStore for ResultsStorage {
    fn append(&self, result: &PipelineResult) -> Result<()> {
        self.save(result).map(|_| ())
    }

    fn load_recent(&self, limit: usize) -> Result<Vec<PipelineResult>> {
        let runs = self.load_all()?;
        let skip = runs.len().saturating_sub(limit);
        Ok(runs.into_iter().skip(skip).collect())
    }
}

/// In-process history for embedding and tests
#[derive(Default)]
pub struct InMemoryStore {
    runs: Mutex<Vec<PipelineResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for InMemoryStore {
    fn append(&self, result: &PipelineResult) -> Result<()> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| anyhow!("results store lock poisoned"))?;
        if runs.iter().any(|r| r.id == result.id) {
            bail!("Run {} is already stored", result.id);
        }
        runs.push(result.clone());
        Ok(())
    }

    fn load_recent(&self, limit: usize) -> Result<Vec<PipelineResult>> {
        let runs = self
            .runs
            .lock()
            .map_err(|_| anyhow!("results store lock poisoned"))?;
        let skip = runs.len().saturating_sub(limit);
        Ok(runs.iter().skip(skip).cloned().collect())
    }
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub trigger: Trigger,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub score: f64,
    pub stages: usize,
    pub tests: usize,
}

impl From<&PipelineResult> for RunInfo {
    fn from(run: &PipelineResult) -> Self {
        Self {
            id: run.id.clone(),
            trigger: run.trigger,
            timestamp: run.timestamp,
            success: run.success,
            score: run.score,
            stages: run.stage_results.len(),
            tests: run.total_tests(),
        }
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, SuiteType, TestOutcome, TestResult, TestSuiteResult};
    use crate::pipeline::{PipelineStage, StageResult};
    use chrono::Duration;
    use tempfile::tempdir;

    fn run(id: &str, minutes_ago: i64) -> PipelineResult {
        let suite = TestSuiteResult::new(
            format!("suite_{id}"),
            "core",
            SuiteType::Unit,
            vec![
                TestResult::pass("a", 5, TestOutcome::default().with_coverage(0.9)),
                TestResult::fail("b", 7, FailureKind::Timeout, "timed out, after 1s"),
            ],
            12,
            Utc::now(),
        );
        PipelineResult {
            id: id.to_string(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            trigger: Trigger::Commit,
            duration_ms: 12,
            success: false,
            stage_results: vec![StageResult::failed(PipelineStage::UnitTesting, 12, "1 failed")],
            score: 0.0,
            recommendations: vec!["Fix failing unit tests.".to_string()],
            planned_stages: vec![PipelineStage::UnitTesting],
            suite_results: vec![suite],
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());

        let original = run("run-1", 0);
        storage.save(&original).unwrap();

        let loaded = storage.load("run-1").unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_save_never_overwrites() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());

        storage.save(&run("run-1", 0)).unwrap();
        let err = storage.save(&run("run-1", 0)).unwrap_err();
        assert!(err.to_string().contains("already stored"));
    }

    #[test]
    fn test_load_recent_is_oldest_first() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());

        storage.append(&run("newest", 1)).unwrap();
        storage.append(&run("oldest", 30)).unwrap();
        storage.append(&run("middle", 10)).unwrap();

        let recent = storage.load_recent(2).unwrap();
        let ids: Vec<_> = recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["middle", "newest"]);

        let listed = storage.list_runs().unwrap();
        assert_eq!(listed[0].id, "newest");
        assert_eq!(listed[0].tests, 2);
        assert_eq!(storage.latest().unwrap().unwrap().id, "newest");
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path().join("absent"));
        assert!(storage.load_all().unwrap().is_empty());
        assert!(storage.latest().unwrap().is_none());
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let storage = ResultsStorage::new(dir.path());
        let path = dir.path().join("run.csv");

        storage.export(&run("run-1", 0), &path, ExportFormat::Csv).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][2], "b");
        assert_eq!(&rows[1][7], "timeout");
        // embedded comma survives quoting
        assert_eq!(&rows[1][8], "timed out, after 1s");
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryStore::new();
        store.append(&run("a", 2)).unwrap();
        store.append(&run("b", 1)).unwrap();
        assert!(store.append(&run("a", 0)).is_err());

        assert_eq!(store.len(), 2);
        let recent = store.load_recent(1).unwrap();
        assert_eq!(recent[0].id, "b");
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("CSV"), Some(ExportFormat::Csv));
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.json")),
            Some(ExportFormat::Json)
        );
        assert!(ExportFormat::from_str("xml").is_none());
    }
}
