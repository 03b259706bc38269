//! Test data manager
//!
//! Owns templates, generated data sets and their version history, and
//! applies the age-based archive/purge lifecycle per category.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::generator::{self, checksum, validate_records};
use super::performance::{self, GenerationPlan, PerformanceOptions, PerformanceTestDataSet};
use super::spec::{
    DataCategory, DataSetStatus, DataVersion, Record, TestDataSet, TestDataSpecification,
};
use crate::config::DataConfig;
use crate::error::DataError;
use crate::models::generate_id;

/// Age limits for one category, in days
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub archive_after_days: i64,
    pub purge_after_days: i64,
}

/// What one lifecycle pass changed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleReport {
    pub archived: Vec<String>,
    pub purged: Vec<String>,
}

impl LifecycleReport {
    pub fn is_empty(&self) -> bool {
        self.archived.is_empty() && self.purged.is_empty()
    }
}

struct Entry {
    spec: TestDataSpecification,
    /// Oldest first; the last one is current
    versions: Vec<(TestDataSet, String)>,
}

impl Entry {
    fn current(&self) -> Option<&TestDataSet> {
        self.versions.last().map(|(set, _)| set)
    }
}

pub struct TestDataManager {
    config: DataConfig,
    templates: BTreeMap<String, Arc<Vec<Record>>>,
    entries: BTreeMap<String, Entry>,
    retention: HashMap<DataCategory, RetentionPolicy>,
}

impl TestDataManager {
    pub fn new(config: DataConfig) -> Self {
        Self {
            config,
            templates: BTreeMap::new(),
            entries: BTreeMap::new(),
            retention: HashMap::new(),
        }
    }

    /// Override the configured age limits for one category
    pub fn with_retention(mut self, category: DataCategory, policy: RetentionPolicy) -> Self {
        self.retention.insert(category, policy);
        self
    }

    pub fn retention_for(&self, category: DataCategory) -> RetentionPolicy {
        self.retention
            .get(&category)
            .copied()
            .unwrap_or(RetentionPolicy {
                archive_after_days: self.config.archive_after_days,
                purge_after_days: self.config.purge_after_days,
            })
    }

    pub fn register_template(&mut self, name: impl Into<String>, records: Vec<Record>) {
        let name = name.into();
        debug!("Registered template {} ({} records)", name, records.len());
        self.templates.insert(name, Arc::new(records));
    }

    /// Register a template from a JSON array of objects
    pub fn load_template(&mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?;
        let records: Vec<Record> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse template: {}", path.display()))?;
        self.register_template(name, records);
        Ok(())
    }

    pub fn template_names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    fn template_for(&self, spec: &TestDataSpecification) -> Option<Arc<Vec<Record>>> {
        spec.template
            .as_ref()
            .and_then(|name| self.templates.get(name))
            .cloned()
    }

    /// Generate a data set, or return the cached one when reuse is enabled
    pub fn generate_test_data(
        &mut self,
        spec: &TestDataSpecification,
    ) -> Result<TestDataSet, DataError> {
        if self.config.allow_reuse {
            if let Some(current) = self.current(&spec.id).filter(|s| s.is_active()) {
                debug!("Reusing data set {} for {}", current.id, spec.id);
                return Ok(current.clone());
            }
        }

        let template = self.template_for(spec);
        let mut data_set = generator::generate(spec, template.as_deref().map(Vec::as_slice))?;

        let entry = self.entries.entry(spec.id.clone()).or_insert_with(|| Entry {
            spec: spec.clone(),
            versions: Vec::new(),
        });
        if let Some(previous) = entry.current() {
            data_set.version = data_set.version.max(previous.version + 1);
        }
        entry.spec = spec.clone();
        entry
            .versions
            .push((data_set.clone(), format!("generated ({})", spec.strategy)));

        info!(
            "Generated data set {} v{} ({} records)",
            spec.id,
            data_set.version,
            data_set.len()
        );
        Ok(data_set)
    }

    /// Plan batched generation from the configured memory budget
    pub fn plan_generation(&self, spec: &TestDataSpecification) -> GenerationPlan {
        GenerationPlan::for_spec(
            spec,
            self.config.available_memory_mb,
            self.config.max_batch_concurrency,
        )
    }

    /// Batched generation for large sets; the result is not cached
    pub async fn generate_performance_data(
        &self,
        spec: &TestDataSpecification,
        options: &PerformanceOptions,
    ) -> Result<PerformanceTestDataSet, DataError> {
        let plan = self.plan_generation(spec);
        performance::generate_performance_data(spec, self.template_for(spec), &plan, options).await
    }

    pub fn current(&self, spec_id: &str) -> Option<&TestDataSet> {
        self.entries.get(spec_id).and_then(Entry::current)
    }

    pub fn version(&self, spec_id: &str, version: u32) -> Option<&TestDataSet> {
        self.entries
            .get(spec_id)?
            .versions
            .iter()
            .map(|(set, _)| set)
            .find(|set| set.version == version)
    }

    /// Version history, oldest first
    pub fn versions(&self, spec_id: &str) -> Vec<DataVersion> {
        self.entries
            .get(spec_id)
            .map(|entry| {
                entry
                    .versions
                    .iter()
                    .map(|(set, description)| DataVersion {
                        version: set.version,
                        created_at: set.created_at,
                        description: description.clone(),
                        record_count: set.len(),
                        checksum: set.metadata.checksum.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current sets, ordered by specification id
    pub fn data_sets(&self) -> Vec<&TestDataSet> {
        self.entries.values().filter_map(Entry::current).collect()
    }

    /// Apply a mutation as a new version; earlier versions are kept
    pub fn update_data_set<F>(
        &mut self,
        spec_id: &str,
        description: impl Into<String>,
        mutate: F,
    ) -> Result<DataVersion, DataError>
    where
        F: FnOnce(&mut Vec<Record>),
    {
        let entry = self
            .entries
            .get_mut(spec_id)
            .ok_or_else(|| DataError::NotFound(spec_id.to_string()))?;
        let current = entry
            .current()
            .ok_or_else(|| DataError::NotFound(spec_id.to_string()))?;

        let mut records = current.records.clone();
        mutate(&mut records);

        let shape = TestDataSpecification {
            record_count: records.len(),
            ..entry.spec.clone()
        };
        let validation = validate_records(&records, &shape);
        if !validation.is_valid {
            return Err(DataError::ValidationFailed(validation.errors.join("; ")));
        }

        let mut next = current.clone();
        next.id = generate_id("data");
        next.version = current.version + 1;
        next.metadata.checksum = checksum(&records);
        next.records = records;
        next.validation = validation;
        next.status = DataSetStatus::Active;
        next.created_at = Utc::now();
        next.archived_at = None;

        let description = description.into();
        info!("Data set {} updated to v{}: {}", spec_id, next.version, description);
        entry.versions.push((next, description));
        self.versions(spec_id)
            .pop()
            .ok_or_else(|| DataError::NotFound(spec_id.to_string()))
    }

    pub fn manage_lifecycle(&mut self) -> LifecycleReport {
        self.manage_lifecycle_at(Utc::now())
    }

    /// Archive and purge by age and category as of `now`
    ///
    /// Running it again with the same `now` and no new data changes nothing.
    pub fn manage_lifecycle_at(&mut self, now: DateTime<Utc>) -> LifecycleReport {
        let mut report = LifecycleReport::default();

        let mut purge = Vec::new();
        for (id, entry) in &self.entries {
            let Some(current) = entry.current() else {
                continue;
            };
            let policy = self.retention_for(current.metadata.category);
            if now - current.created_at >= ChronoDuration::days(policy.purge_after_days) {
                purge.push(id.clone());
            }
        }
        for id in purge {
            self.entries.remove(&id);
            info!("Purged data set {}", id);
            report.purged.push(id);
        }

        let retention: Vec<(String, RetentionPolicy)> = self
            .entries
            .iter()
            .filter_map(|(id, e)| {
                e.current()
                    .map(|c| (id.clone(), self.retention_for(c.metadata.category)))
            })
            .collect();
        for (id, policy) in retention {
            let Some((current, _)) = self.entries.get_mut(&id).and_then(|e| e.versions.last_mut())
            else {
                continue;
            };
            if current.is_active()
                && now - current.created_at >= ChronoDuration::days(policy.archive_after_days)
            {
                current.status = DataSetStatus::Archived;
                current.archived_at = Some(now);
                info!("Archived data set {}", id);
                report.archived.push(id);
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::spec::{FieldConstraints, FieldSpec, FieldType};
    use serde_json::Value;

    fn spec(id: &str, category: DataCategory) -> TestDataSpecification {
        TestDataSpecification::new(id, 5)
            .with_category(category)
            .with_seed(11)
            .with_field(
                FieldSpec::new("score", FieldType::Integer)
                    .with_constraints(FieldConstraints::range(0.0, 100.0)),
            )
    }

    #[test]
    fn test_reuse_cache() {
        let mut manager = TestDataManager::new(DataConfig::default());
        let first = manager.generate_test_data(&spec("scores", DataCategory::Generic)).unwrap();
        let second = manager.generate_test_data(&spec("scores", DataCategory::Generic)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.versions("scores").len(), 1);

        let mut manager = TestDataManager::new(DataConfig {
            allow_reuse: false,
            ..Default::default()
        });
        let first = manager.generate_test_data(&spec("scores", DataCategory::Generic)).unwrap();
        let second = manager.generate_test_data(&spec("scores", DataCategory::Generic)).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.version, first.version + 1);
    }

    #[test]
    fn test_update_creates_new_version() {
        let mut manager = TestDataManager::new(DataConfig::default());
        let original = manager.generate_test_data(&spec("scores", DataCategory::Generic)).unwrap();

        let version = manager
            .update_data_set("scores", "zero the first score", |records| {
                records[0].insert("score".into(), Value::from(0));
            })
            .unwrap();
        assert_eq!(version.version, original.version + 1);

        assert_eq!(manager.version("scores", original.version).unwrap().records, original.records);
        assert_eq!(manager.current("scores").unwrap().records[0]["score"], 0);
        assert_eq!(manager.versions("scores").len(), 2);

        // invalid mutations leave history untouched
        let err = manager
            .update_data_set("scores", "out of range", |records| {
                records[1].insert("score".into(), Value::from(500));
            })
            .unwrap_err();
        assert!(matches!(err, DataError::ValidationFailed(_)));
        assert_eq!(manager.versions("scores").len(), 2);

        assert_eq!(
            manager.update_data_set("missing", "x", |_| {}).unwrap_err(),
            DataError::NotFound("missing".into())
        );
    }

    #[test]
    fn test_template_resolution() {
        let mut manager = TestDataManager::new(DataConfig::default());
        let spec = spec("tpl", DataCategory::Generic).with_template("scores");
        assert_eq!(
            manager.generate_test_data(&spec).unwrap_err(),
            DataError::UnknownTemplate("scores".into())
        );

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");
        std::fs::write(&path, r#"[{"score": 10}, {"score": 20}]"#).unwrap();
        manager.load_template("scores", &path).unwrap();

        let data = manager.generate_test_data(&spec).unwrap();
        assert_eq!(data.records[1]["score"], 20);
        assert_eq!(manager.template_names(), vec!["scores"]);
    }

    #[test]
    fn test_lifecycle_is_idempotent() {
        let mut manager = TestDataManager::new(DataConfig {
            archive_after_days: 30,
            purge_after_days: 90,
            ..Default::default()
        })
        .with_retention(
            DataCategory::Event,
            RetentionPolicy {
                archive_after_days: 1,
                purge_after_days: 7,
            },
        );
        manager.generate_test_data(&spec("users", DataCategory::User)).unwrap();
        manager.generate_test_data(&spec("events", DataCategory::Event)).unwrap();

        let now = Utc::now();
        assert!(manager.manage_lifecycle_at(now).is_empty());

        let later = now + ChronoDuration::days(10);
        let report = manager.manage_lifecycle_at(later);
        assert_eq!(report.purged, vec!["events".to_string()]);
        assert!(report.archived.is_empty());

        let much_later = now + ChronoDuration::days(40);
        let report = manager.manage_lifecycle_at(much_later);
        assert_eq!(report.archived, vec!["users".to_string()]);

        let before: Vec<TestDataSet> = manager.data_sets().into_iter().cloned().collect();
        let report = manager.manage_lifecycle_at(much_later);
        assert!(report.is_empty());
        let after: Vec<TestDataSet> = manager.data_sets().into_iter().cloned().collect();
        assert_eq!(before, after);
        assert!(!after[0].is_active());
    }

    #[tokio::test]
    async fn test_performance_generation_uses_config() {
        let manager = TestDataManager::new(DataConfig {
            available_memory_mb: 1,
            max_batch_concurrency: 2,
            ..Default::default()
        });
        let spec = TestDataSpecification::new("bulk", 5_000)
            .with_seed(5)
            .with_field(FieldSpec::new("id", FieldType::Uuid));

        let plan = manager.plan_generation(&spec);
        assert!(plan.batch_count > 1);
        let generated = manager
            .generate_performance_data(&spec, &PerformanceOptions::default())
            .await
            .unwrap();
        assert_eq!(generated.data_set.len(), 5_000);
        assert_eq!(generated.data_set.metadata.batches, plan.batch_count);
        assert!(manager.current("bulk").is_none());
    }
}
