//! Performance-scale data generation
//!
//! Large data sets are generated in batches sized from the memory budget.
//! Batches run on the blocking pool, at most `concurrency` at a time, and
//! are combined in batch order before the shared post-processing.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::generator::{check_template, checksum, finalize, generate_records, seed_for};
use super::spec::{FieldType, PrivacyAction, Record, TestDataSet, TestDataSpecification};
use crate::error::DataError;

const MAX_BATCH_SIZE: usize = 10_000;
const RECORD_OVERHEAD_BYTES: usize = 64;
/// Share of available memory generation may use
const MEMORY_SHARE: u64 = 4;

/// How a large data set is split up
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub batch_size: usize,
    pub batch_count: usize,
    pub concurrency: usize,
    pub estimated_record_bytes: usize,
    pub estimated_total_bytes: u64,
}

impl GenerationPlan {
    pub fn for_spec(
        spec: &TestDataSpecification,
        available_memory_mb: u64,
        max_concurrency: usize,
    ) -> Self {
        let record_bytes = estimate_record_size(spec);
        let budget = available_memory_mb * 1024 * 1024 / MEMORY_SHARE;
        let in_memory = ((budget / record_bytes as u64) as usize).max(1);
        let concurrency = max_concurrency.max(1);

        let batch_size = (in_memory / concurrency)
            .clamp(1, MAX_BATCH_SIZE)
            .min(spec.record_count.max(1));
        let batch_count = spec.record_count.div_ceil(batch_size).max(1);

        Self {
            batch_size,
            batch_count,
            concurrency: concurrency.min(batch_count),
            estimated_record_bytes: record_bytes,
            estimated_total_bytes: record_bytes as u64 * spec.record_count as u64,
        }
    }
}

/// Rough in-memory size of one record
pub fn estimate_record_size(spec: &TestDataSpecification) -> usize {
    RECORD_OVERHEAD_BYTES
        + spec
            .fields
            .iter()
            .map(|field| {
                let c = &field.constraints;
                field.name.len()
                    + match field.field_type {
                        FieldType::Integer | FieldType::Float => 16,
                        FieldType::Boolean => 8,
                        FieldType::Uuid => 48,
                        FieldType::Timestamp | FieldType::Email => 40,
                        FieldType::Name => 24,
                        FieldType::Enum => {
                            16 + c.values.iter().map(String::len).max().unwrap_or(0)
                        }
                        FieldType::String => {
                            24 + c.pattern.as_ref().map_or(c.max_len(), String::len)
                        }
                    }
            })
            .sum::<usize>()
}

/// Optional post-generation optimisations
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceOptions {
    /// Drop null entries and release spare capacity
    pub optimize_memory: bool,
    /// Sort records by this field for sequential access
    pub access_key: Option<String>,
}

/// Data set produced by batched generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceTestDataSet {
    pub data_set: TestDataSet,
    pub plan: GenerationPlan,
    pub optimizations: Vec<String>,
}

/// Generate `spec` in parallel batches
///
/// Validation runs on the combined records before optimisations, so a
/// memory-optimised set may omit null entries the specification allows.
pub async fn generate_performance_data(
    spec: &TestDataSpecification,
    template: Option<Arc<Vec<Record>>>,
    plan: &GenerationPlan,
    options: &PerformanceOptions,
) -> Result<PerformanceTestDataSet, DataError> {
    spec.validate()?;
    check_template(spec, template.as_deref().map(Vec::as_slice))?;
    if let Some(key) = &options.access_key {
        if spec.field(key).is_none() {
            return Err(DataError::UnknownField(key.clone()));
        }
    }

    let start = Instant::now();
    let seed = seed_for(spec);
    info!(
        "Generating {} records for {} in {} batches of {} ({} concurrent)",
        spec.record_count, spec.id, plan.batch_count, plan.batch_size, plan.concurrency
    );

    let shared = Arc::new(spec.clone());
    let semaphore = Arc::new(Semaphore::new(plan.concurrency.max(1)));
    let mut set = JoinSet::new();
    let batch_size = plan.batch_size.max(1);

    for (batch, offset) in (0..spec.record_count).step_by(batch_size).enumerate() {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| DataError::Batch(e.to_string()))?;
        let count = batch_size.min(spec.record_count - offset);
        let spec = shared.clone();
        let template = template.clone();

        set.spawn_blocking(move || {
            let _permit = permit;
            let records =
                generate_records(&spec, template.as_deref().map(Vec::as_slice), seed, offset, count);
            (batch, records)
        });
    }

    let mut batches = Vec::with_capacity(plan.batch_count);
    while let Some(joined) = set.join_next().await {
        batches.push(joined.map_err(|e| DataError::Batch(e.to_string()))?);
    }
    batches.sort_by_key(|(batch, _)| *batch);
    let batch_count = batches.len();
    let records: Vec<Record> = batches.into_iter().flat_map(|(_, r)| r).collect();
    debug!("Combined {} batches into {} records", batch_count, records.len());

    let mut data_set = finalize(spec, records, seed, batch_count)?;

    let mut optimizations = Vec::new();
    if let Some(key) = &options.access_key {
        let dropped = spec
            .privacy_rule(key)
            .is_some_and(|r| r.action == PrivacyAction::Drop);
        if !dropped {
            data_set
                .records
                .sort_by(|a, b| compare_values(a.get(key), b.get(key)));
            optimizations.push(format!("sorted by {key}"));
        }
    }
    if options.optimize_memory {
        for record in &mut data_set.records {
            record.retain(|_, v| !v.is_null());
        }
        data_set.records.shrink_to_fit();
        optimizations.push("dropped null entries".to_string());
    }
    if !optimizations.is_empty() {
        data_set.metadata.checksum = checksum(&data_set.records);
    }
    data_set.metadata.generation_ms = start.elapsed().as_millis() as u64;

    Ok(PerformanceTestDataSet {
        data_set,
        plan: plan.clone(),
        optimizations,
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        // nulls last
        (Some(Value::Null) | None, _) => Ordering::Greater,
        (_, Some(Value::Null) | None) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::spec::{FieldConstraints, FieldSpec};
    use std::collections::HashSet;

    fn events(count: usize) -> TestDataSpecification {
        TestDataSpecification::new("events", count)
            .with_seed(3)
            .with_field(
                FieldSpec::new("id", FieldType::Uuid)
                    .with_constraints(FieldConstraints::default().unique()),
            )
            .with_field(
                FieldSpec::new("latency", FieldType::Integer)
                    .with_constraints(FieldConstraints::range(1.0, 5000.0)),
            )
            .with_field(
                FieldSpec::new("note", FieldType::String)
                    .with_constraints(FieldConstraints::length(3, 12).nullable(0.3)),
            )
    }

    #[test]
    fn test_plan_covers_all_records() {
        let spec = events(25_000);
        let plan = GenerationPlan::for_spec(&spec, 1024, 8);
        assert!(plan.batch_size * plan.batch_count >= 25_000);
        assert!(plan.batch_size <= MAX_BATCH_SIZE);
        assert!(plan.concurrency <= 8 && plan.concurrency <= plan.batch_count);

        // less memory, smaller batches
        let small = GenerationPlan::for_spec(&spec, 1, 8);
        assert!(small.batch_size < plan.batch_size);
        assert!(small.batch_size * small.batch_count >= 25_000);
    }

    #[test]
    fn test_plan_for_tiny_set() {
        let plan = GenerationPlan::for_spec(&events(3), 1024, 8);
        assert_eq!(plan.batch_size, 3);
        assert_eq!(plan.batch_count, 1);
        assert_eq!(plan.concurrency, 1);
    }

    #[tokio::test]
    async fn test_batched_generation() {
        let spec = events(2_500);
        let plan = GenerationPlan {
            batch_size: 500,
            batch_count: 5,
            concurrency: 2,
            estimated_record_bytes: estimate_record_size(&spec),
            estimated_total_bytes: 0,
        };

        let generated = generate_performance_data(&spec, None, &plan, &PerformanceOptions::default())
            .await
            .unwrap();

        let data = &generated.data_set;
        assert_eq!(data.len(), 2_500);
        assert!(data.validation.is_valid);
        assert_eq!(data.metadata.batches, 5);
        let ids: HashSet<&str> = data.records.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids.len(), 2_500);
        assert!(generated.optimizations.is_empty());
    }

    #[tokio::test]
    async fn test_optimisations() {
        let spec = events(300);
        let plan = GenerationPlan::for_spec(&spec, 1, 4);
        let options = PerformanceOptions {
            optimize_memory: true,
            access_key: Some("latency".to_string()),
        };

        let generated = generate_performance_data(&spec, None, &plan, &options)
            .await
            .unwrap();

        let latencies: Vec<i64> = generated
            .data_set
            .records
            .iter()
            .map(|r| r["latency"].as_i64().unwrap())
            .collect();
        assert!(latencies.windows(2).all(|w| w[0] <= w[1]));
        assert!(generated
            .data_set
            .records
            .iter()
            .all(|r| r.values().all(|v| !v.is_null())));
        assert_eq!(generated.optimizations.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_access_key() {
        let spec = events(10);
        let plan = GenerationPlan::for_spec(&spec, 16, 2);
        let options = PerformanceOptions {
            access_key: Some("missing".to_string()),
            ..Default::default()
        };
        assert_eq!(
            generate_performance_data(&spec, None, &plan, &options)
                .await
                .unwrap_err(),
            DataError::UnknownField("missing".into())
        );
    }
}
