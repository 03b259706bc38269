//! Record generation and post-processing
//!
//! Every strategy produces raw records; they then go through the same
//! pipeline: uniqueness repair, relationships, privacy rules, validation.
//! A data set exists only once validation has passed.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::spec::{
    DataSetMetadata, DataSetStatus, FieldSpec, FieldType, GenerationStrategy, PrivacyAction,
    Record, RelationshipKind, TestDataSet, TestDataSpecification, ValidationResult,
};
use crate::error::DataError;
use crate::models::generate_id;

const UNIQUE_ATTEMPTS: usize = 100;
const MAX_REPORTED_ERRORS: usize = 20;

const FIRST_NAMES: &[&str] = &[
    "Alice", "Bruno", "Chen", "Dana", "Elif", "Farah", "Goran", "Hana", "Ivan", "Jun", "Kofi",
    "Lena", "Mateo", "Nora", "Omar", "Priya", "Quinn", "Rosa", "Sven", "Tariq",
];
const LAST_NAMES: &[&str] = &[
    "Adams", "Bauer", "Costa", "Dubois", "Eriksen", "Fischer", "Garcia", "Haddad", "Ito",
    "Jensen", "Kowalski", "Lopez", "Moreau", "Novak", "Okafor", "Petrov", "Rossi", "Silva",
];
const WORDS: &[&str] = &[
    "alpha", "bravo", "cargo", "delta", "ember", "forge", "grove", "harbor", "index", "jolly",
    "kernel", "lumen", "matrix", "nexus", "orbit", "pixel", "quartz", "relay", "signal", "tensor",
];
const SYLLABLES: &[&str] = &["ka", "lo", "mi", "ne", "ru", "ta", "vo", "xe", "si", "po"];
const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Seed used for a specification; random unless the specification fixes one
pub fn seed_for(spec: &TestDataSpecification) -> u64 {
    spec.seed.unwrap_or_else(rand::random)
}

/// Generate and post-process a complete data set
pub fn generate(
    spec: &TestDataSpecification,
    template: Option<&[Record]>,
) -> Result<TestDataSet, DataError> {
    spec.validate()?;
    check_template(spec, template)?;

    let start = Instant::now();
    let seed = seed_for(spec);
    let records = generate_records(spec, template, seed, 0, spec.record_count);
    let mut data_set = finalize(spec, records, seed, 1)?;
    data_set.metadata.generation_ms = start.elapsed().as_millis() as u64;
    Ok(data_set)
}

pub(crate) fn check_template(
    spec: &TestDataSpecification,
    template: Option<&[Record]>,
) -> Result<(), DataError> {
    if spec.strategy != GenerationStrategy::Template {
        return Ok(());
    }
    let name = spec.template.clone().unwrap_or_default();
    match template {
        None => Err(DataError::UnknownTemplate(name)),
        Some([]) => Err(DataError::EmptyTemplate(name)),
        Some(_) => Ok(()),
    }
}

/// Raw records `offset..offset + count`; deterministic for a given seed and offset
pub fn generate_records(
    spec: &TestDataSpecification,
    template: Option<&[Record]>,
    seed: u64,
    offset: usize,
    count: usize,
) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed ^ (offset as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    (offset..offset + count)
        .map(|index| {
            let base = template
                .filter(|t| !t.is_empty())
                .map(|t| &t[index % t.len()]);
            spec.fields
                .iter()
                .map(|field| {
                    let value = match base.and_then(|b| b.get(&field.name)) {
                        Some(value) if !field.constraints.unique => value.clone(),
                        _ => generate_value(field, spec, index, &mut rng),
                    };
                    (field.name.clone(), value)
                })
                .collect()
        })
        .collect()
}

/// Post-processing shared by every strategy
pub fn finalize(
    spec: &TestDataSpecification,
    mut records: Vec<Record>,
    seed: u64,
    batches: usize,
) -> Result<TestDataSet, DataError> {
    let mut rng = StdRng::seed_from_u64(seed.rotate_left(17));

    enforce_unique(&mut records, spec, &mut rng)?;
    apply_relationships(&mut records, spec, &mut rng);
    apply_privacy(&mut records, spec);

    let validation = validate_records(&records, spec);
    if !validation.is_valid {
        return Err(DataError::ValidationFailed(validation.errors.join("; ")));
    }
    debug!(
        "Generated {} records for {} ({})",
        records.len(),
        spec.id,
        spec.strategy
    );

    let now = Utc::now();
    Ok(TestDataSet {
        id: generate_id("data"),
        specification_id: spec.id.clone(),
        version: spec.version,
        metadata: DataSetMetadata {
            strategy: spec.strategy,
            category: spec.category,
            seed,
            generation_ms: 0,
            batches,
            checksum: checksum(&records),
        },
        records,
        validation,
        status: DataSetStatus::Active,
        created_at: now,
        archived_at: None,
    })
}

fn generate_value(
    field: &FieldSpec,
    spec: &TestDataSpecification,
    index: usize,
    rng: &mut StdRng,
) -> Value {
    let c = &field.constraints;
    if c.null_rate > 0.0 && rng.random_bool(c.null_rate) {
        return Value::Null;
    }
    let strategy = spec.strategy;

    match field.field_type {
        FieldType::Integer => {
            let (min, max) = (c.min_value().ceil() as i64, c.max_value().floor() as i64);
            let max = max.max(min);
            let value = match strategy {
                GenerationStrategy::Pattern => {
                    let span = max as i128 - min as i128 + 1;
                    (min as i128 + index as i128 % span) as i64
                }
                GenerationStrategy::Synthetic | GenerationStrategy::Realistic => {
                    centred(rng, min as f64, max as f64).round() as i64
                }
                _ => rng.random_range(min..=max),
            };
            Value::from(value)
        }
        FieldType::Float => {
            let (min, max) = (c.min_value(), c.max_value().max(c.min_value()));
            let value = match strategy {
                GenerationStrategy::Pattern => min + (index % 100) as f64 * (max - min) / 100.0,
                GenerationStrategy::Synthetic => centred(rng, min, max),
                // currency-like
                GenerationStrategy::Realistic => (centred(rng, min, max) * 100.0).round() / 100.0,
                _ => {
                    if max > min {
                        rng.random_range(min..max)
                    } else {
                        min
                    }
                }
            };
            Value::from(value.clamp(min, max))
        }
        FieldType::Boolean => Value::from(match strategy {
            GenerationStrategy::Pattern => index % 2 == 0,
            GenerationStrategy::Synthetic => rng.random_bool(0.7),
            _ => rng.random_bool(0.5),
        }),
        FieldType::String => {
            if let Some(pattern) = &c.pattern {
                return Value::from(render_pattern(pattern, rng));
            }
            let (min, max) = (c.min_len(), c.max_len());
            let value = match strategy {
                GenerationStrategy::Pattern => {
                    let digits = format!("{:0>width$}", index, width = min);
                    digits[digits.len().saturating_sub(max)..].to_string()
                }
                GenerationStrategy::Synthetic => from_parts(SYLLABLES, "", min, max, rng),
                GenerationStrategy::Realistic => from_parts(WORDS, " ", min, max, rng),
                _ => {
                    let len = rng.random_range(min..=max);
                    (0..len)
                        .map(|_| ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())] as char)
                        .collect()
                }
            };
            Value::from(value)
        }
        FieldType::Name => Value::from(match strategy {
            GenerationStrategy::Pattern => format!("User {index}"),
            _ => format!("{} {}", pick(FIRST_NAMES, rng), pick(LAST_NAMES, rng)),
        }),
        FieldType::Email => Value::from(match strategy {
            GenerationStrategy::Pattern => format!("user{index}@example.com"),
            GenerationStrategy::Random => {
                let local: String = (0..10)
                    .map(|_| ALPHANUMERIC[rng.random_range(26..ALPHANUMERIC.len())] as char)
                    .collect();
                format!("{}@example.com", local.to_lowercase())
            }
            _ => format!(
                "{}.{}{}@example.com",
                pick(FIRST_NAMES, rng).to_lowercase(),
                pick(LAST_NAMES, rng).to_lowercase(),
                rng.random_range(1..1000)
            ),
        }),
        FieldType::Uuid => {
            let mut bytes = [0u8; 16];
            rng.fill(&mut bytes);
            Value::from(uuid::Builder::from_random_bytes(bytes).into_uuid().to_string())
        }
        FieldType::Timestamp => {
            let epoch = timestamp_epoch();
            let (min, max) = (c.min.unwrap_or(0.0), c.max.unwrap_or(365.0).max(c.min.unwrap_or(0.0)));
            let offset = match strategy {
                GenerationStrategy::Pattern => ChronoDuration::hours(index as i64),
                _ => {
                    let days = if max > min { rng.random_range(min..max) } else { min };
                    ChronoDuration::seconds((days * 86_400.0) as i64)
                }
            };
            Value::from((epoch + offset).to_rfc3339())
        }
        FieldType::Enum => {
            let values = &c.values;
            let i = match strategy {
                GenerationStrategy::Pattern => index % values.len(),
                // earlier values are more likely
                GenerationStrategy::Synthetic => {
                    let u: f64 = rng.random();
                    ((u * u) * values.len() as f64) as usize
                }
                _ => rng.random_range(0..values.len()),
            };
            Value::from(values[i.min(values.len() - 1)].clone())
        }
    }
}

/// Triangular draw peaking at the middle of the range
fn centred(rng: &mut StdRng, min: f64, max: f64) -> f64 {
    if max <= min {
        return min;
    }
    let u: f64 = (rng.random::<f64>() + rng.random::<f64>()) / 2.0;
    min + u * (max - min)
}

fn pick<'a>(items: &'a [&'a str], rng: &mut StdRng) -> &'a str {
    items[rng.random_range(0..items.len())]
}

fn from_parts(parts: &[&str], sep: &str, min: usize, max: usize, rng: &mut StdRng) -> String {
    let target = rng.random_range(min..=max);
    let mut out = String::new();
    while out.len() < target {
        if !out.is_empty() {
            out.push_str(sep);
        }
        out.push_str(pick(parts, rng));
    }
    out.truncate(target);
    // a trailing separator would shorten the visible value
    while out.ends_with(' ') {
        out.pop();
        out.push('x');
    }
    out
}

fn render_pattern(pattern: &str, rng: &mut StdRng) -> String {
    pattern
        .chars()
        .map(|ch| match ch {
            '#' => char::from(b'0' + rng.random_range(0..10u8)),
            'A' => char::from(b'A' + rng.random_range(0..26u8)),
            'a' => char::from(b'a' + rng.random_range(0..26u8)),
            '*' => ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())] as char,
            other => other,
        })
        .collect()
}

fn matches_pattern(value: &str, pattern: &str) -> bool {
    value.chars().count() == pattern.chars().count()
        && value.chars().zip(pattern.chars()).all(|(v, p)| match p {
            '#' => v.is_ascii_digit(),
            'A' => v.is_ascii_uppercase(),
            'a' => v.is_ascii_lowercase(),
            '*' => v.is_ascii_alphanumeric(),
            other => v == other,
        })
}

fn timestamp_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Regenerate duplicates of unique fields
fn enforce_unique(
    records: &mut [Record],
    spec: &TestDataSpecification,
    rng: &mut StdRng,
) -> Result<(), DataError> {
    // random draws resolve collisions that a sequence would repeat
    let retry_spec = TestDataSpecification {
        strategy: GenerationStrategy::Random,
        ..spec.clone()
    };

    for field in spec.fields.iter().filter(|f| f.constraints.unique) {
        let mut seen = HashSet::new();
        for (index, record) in records.iter_mut().enumerate() {
            let mut value = record.get(&field.name).cloned().unwrap_or(Value::Null);
            let mut attempts = 0;
            while !seen.insert(value.to_string()) {
                attempts += 1;
                if attempts > UNIQUE_ATTEMPTS {
                    return Err(DataError::UniqueExhausted {
                        field: field.name.clone(),
                        requested: spec.record_count,
                    });
                }
                value = generate_value(field, &retry_spec, index, rng);
            }
            record.insert(field.name.clone(), value);
        }
    }
    Ok(())
}

/// Point relationship fields at values of their referenced fields
pub fn apply_relationships(records: &mut [Record], spec: &TestDataSpecification, rng: &mut StdRng) {
    for relationship in &spec.relationships {
        let mut targets: Vec<Value> = records
            .iter()
            .filter_map(|r| r.get(&relationship.references).cloned())
            .collect();
        if targets.is_empty() {
            continue;
        }
        if relationship.kind == RelationshipKind::OneToOne {
            targets.shuffle(rng);
        }

        for (i, record) in records.iter_mut().enumerate() {
            let value = match relationship.kind {
                RelationshipKind::OneToOne => targets[i % targets.len()].clone(),
                RelationshipKind::ManyToOne => targets[rng.random_range(0..targets.len())].clone(),
            };
            record.insert(relationship.field.clone(), value);
        }
    }
}

/// Mask, hash, redact or drop protected fields
pub fn apply_privacy(records: &mut [Record], spec: &TestDataSpecification) {
    for rule in &spec.privacy_rules {
        for record in records.iter_mut() {
            if rule.action == PrivacyAction::Drop {
                record.remove(&rule.field);
                continue;
            }
            let Some(value) = record.get_mut(&rule.field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let text = match &*value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            *value = Value::from(match rule.action {
                PrivacyAction::Mask => mask(&text),
                PrivacyAction::Hash => {
                    let mut hasher = Sha256::new();
                    hasher.update(spec.id.as_bytes());
                    hasher.update(b":");
                    hasher.update(text.as_bytes());
                    hex::encode(hasher.finalize())
                }
                PrivacyAction::Redact => "[REDACTED]".to_string(),
                PrivacyAction::Drop => continue,
            });
        }
    }
}

fn mask(text: &str) -> String {
    let len = text.chars().count();
    text.chars()
        .enumerate()
        .map(|(i, ch)| if i + 4 < len { '*' } else { ch })
        .collect()
}

/// Check records against the specification
pub fn validate_records(records: &[Record], spec: &TestDataSpecification) -> ValidationResult {
    let mut errors = Vec::new();
    if records.len() != spec.record_count {
        errors.push(format!(
            "expected {} records, got {}",
            spec.record_count,
            records.len()
        ));
    }

    let mut unique: HashMap<&str, HashSet<String>> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        for field in &spec.fields {
            let rule = spec.privacy_rule(&field.name);
            let value = record.get(&field.name);
            match (rule.map(|r| r.action), value) {
                (Some(PrivacyAction::Drop), None) => continue,
                (Some(PrivacyAction::Drop), Some(_)) => {
                    errors.push(format!("record {i}: dropped field '{}' is present", field.name));
                    continue;
                }
                (_, None) => {
                    errors.push(format!("record {i}: missing field '{}'", field.name));
                    continue;
                }
                // transformed values are opaque
                (Some(_), Some(_)) => continue,
                (None, Some(value)) => {
                    // relationship fields carry values of the referenced field
                    let checked = spec
                        .relationships
                        .iter()
                        .find(|r| r.field == field.name)
                        .and_then(|r| spec.field(&r.references))
                        .unwrap_or(field);
                    if let Err(reason) = check_value(checked, value) {
                        errors.push(format!("record {i}: field '{}' {}", field.name, reason));
                    }
                    if field.constraints.unique
                        && !unique
                            .entry(field.name.as_str())
                            .or_default()
                            .insert(value.to_string())
                    {
                        errors.push(format!("record {i}: duplicate value for '{}'", field.name));
                    }
                }
            }
        }
        if errors.len() >= MAX_REPORTED_ERRORS {
            break;
        }
    }

    errors.truncate(MAX_REPORTED_ERRORS);
    ValidationResult::from_errors(errors)
}

fn check_value(field: &FieldSpec, value: &Value) -> Result<(), String> {
    let c = &field.constraints;
    if value.is_null() {
        return if c.null_rate > 0.0 {
            Ok(())
        } else {
            Err("is null".to_string())
        };
    }

    let in_range = |n: f64| {
        c.min.map_or(true, |min| n >= min) && c.max.map_or(true, |max| n <= max)
    };
    let string = || value.as_str().ok_or_else(|| "is not a string".to_string());

    match field.field_type {
        FieldType::Integer => match value.as_i64() {
            Some(n) if in_range(n as f64) => Ok(()),
            Some(n) => Err(format!("value {n} is out of range")),
            None => Err("is not an integer".to_string()),
        },
        FieldType::Float => match value.as_f64() {
            Some(n) if in_range(n) => Ok(()),
            Some(n) => Err(format!("value {n} is out of range")),
            None => Err("is not a number".to_string()),
        },
        FieldType::Boolean => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| "is not a boolean".to_string()),
        FieldType::String => {
            let s = string()?;
            match &c.pattern {
                Some(pattern) if !matches_pattern(s, pattern) => {
                    Err(format!("'{s}' does not match pattern '{pattern}'"))
                }
                Some(_) => Ok(()),
                None => {
                    let len = s.chars().count();
                    if c.min_length.map_or(false, |min| len < min)
                        || c.max_length.map_or(false, |max| len > max)
                    {
                        Err(format!("length {len} is out of bounds"))
                    } else {
                        Ok(())
                    }
                }
            }
        }
        FieldType::Name => match string()? {
            "" => Err("is empty".to_string()),
            _ => Ok(()),
        },
        FieldType::Email => {
            let s = string()?;
            match s.split_once('@') {
                Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
                _ => Err(format!("'{s}' is not an email address")),
            }
        }
        FieldType::Uuid => uuid::Uuid::parse_str(string()?)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        FieldType::Timestamp => DateTime::parse_from_rfc3339(string()?)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        FieldType::Enum => {
            let s = string()?;
            if c.values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(format!("'{s}' is not an allowed value"))
            }
        }
    }
}

/// SHA-256 over the serialized records
pub fn checksum(records: &[Record]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(Value::Object(record.clone()).to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
