//! Test data specifications and materialized data sets

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::Context;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::is_yaml_file;
use crate::error::DataError;

/// One generated record
pub type Record = Map<String, Value>;

/// Domain category; drives realistic generators and retention
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataCategory {
    User,
    Transaction,
    Product,
    Event,
    #[default]
    Generic,
}

impl DataCategory {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(DataCategory::User),
            "transaction" => Some(DataCategory::Transaction),
            "product" => Some(DataCategory::Product),
            "event" => Some(DataCategory::Event),
            "generic" => Some(DataCategory::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataCategory::User => write!(f, "user"),
            DataCategory::Transaction => write!(f, "transaction"),
            DataCategory::Product => write!(f, "product"),
            DataCategory::Event => write!(f, "event"),
            DataCategory::Generic => write!(f, "generic"),
        }
    }
}

/// How field values are produced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStrategy {
    /// Cycle the records of a registered template
    Template,
    /// Values drawn from distributions centred in each field's range
    Synthetic,
    /// Uniform values within each field's constraints
    #[default]
    Random,
    /// Sequential numbers and pattern-shaped strings
    Pattern,
    /// Domain-flavoured names, emails, amounts
    Realistic,
}

impl GenerationStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "template" => Some(GenerationStrategy::Template),
            "synthetic" => Some(GenerationStrategy::Synthetic),
            "random" => Some(GenerationStrategy::Random),
            "pattern" => Some(GenerationStrategy::Pattern),
            "realistic" => Some(GenerationStrategy::Realistic),
            _ => None,
        }
    }
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationStrategy::Template => "template",
            GenerationStrategy::Synthetic => "synthetic",
            GenerationStrategy::Random => "random",
            GenerationStrategy::Pattern => "pattern",
            GenerationStrategy::Realistic => "realistic",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    String,
    Name,
    Email,
    Uuid,
    Timestamp,
    /// One of `constraints.values`
    Enum,
}

/// Per-field bounds; unset bounds use type defaults
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConstraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Allowed values for enum fields
    pub values: Vec<String>,
    /// `#` digit, `A` upper, `a` lower, `*` alphanumeric, anything else literal
    pub pattern: Option<String>,
    pub unique: bool,
    /// Probability of a null value
    pub null_rate: f64,
}

impl FieldConstraints {
    pub fn range(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Default::default()
        }
    }

    pub fn length(min: usize, max: usize) -> Self {
        Self {
            min_length: Some(min),
            max_length: Some(max),
            ..Default::default()
        }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn nullable(mut self, null_rate: f64) -> Self {
        self.null_rate = null_rate;
        self
    }

    pub fn min_value(&self) -> f64 {
        self.min.unwrap_or(0.0)
    }

    pub fn max_value(&self) -> f64 {
        self.max.unwrap_or(1000.0)
    }

    pub fn min_len(&self) -> usize {
        self.min_length.unwrap_or(4)
    }

    pub fn max_len(&self) -> usize {
        self.max_length.unwrap_or(16).max(self.min_len())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub constraints: FieldConstraints,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            constraints: FieldConstraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: FieldConstraints) -> Self {
        self.constraints = constraints;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Each record points at a random record's referenced value
    ManyToOne,
    /// Referenced values are handed out once each
    OneToOne,
}

/// `field` takes its values from `references` across the generated records
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub field: String,
    pub references: String,
    pub kind: RelationshipKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyAction {
    /// Keep the last four characters
    Mask,
    /// Salted SHA-256, hex encoded
    Hash,
    Redact,
    /// Remove the field from every record
    Drop,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyRule {
    pub field: String,
    pub action: PrivacyAction,
}

/// What to generate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestDataSpecification {
    pub id: String,
    pub category: DataCategory,
    pub strategy: GenerationStrategy,
    /// Template name for the template strategy
    pub template: Option<String>,
    pub record_count: usize,
    pub fields: Vec<FieldSpec>,
    pub relationships: Vec<Relationship>,
    pub privacy_rules: Vec<PrivacyRule>,
    pub version: u32,
    /// Fixed seed for reproducible output
    pub seed: Option<u64>,
}

impl Default for TestDataSpecification {
    fn default() -> Self {
        Self {
            id: String::new(),
            category: DataCategory::Generic,
            strategy: GenerationStrategy::Random,
            template: None,
            record_count: 0,
            fields: Vec::new(),
            relationships: Vec::new(),
            privacy_rules: Vec::new(),
            version: 1,
            seed: None,
        }
    }
}

impl TestDataSpecification {
    pub fn new(id: impl Into<String>, record_count: usize) -> Self {
        Self {
            id: id.into(),
            record_count,
            ..Default::default()
        }
    }

    /// Read a specification from YAML or JSON, chosen by extension
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read specification: {}", path.display()))?;
        let spec: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML specification: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON specification: {}", path.display()))?
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_category(mut self, category: DataCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_strategy(mut self, strategy: GenerationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.strategy = GenerationStrategy::Template;
        self.template = Some(template.into());
        self
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_relationship(
        mut self,
        field: impl Into<String>,
        references: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        self.relationships.push(Relationship {
            field: field.into(),
            references: references.into(),
            kind,
        });
        self
    }

    pub fn with_privacy(mut self, field: impl Into<String>, action: PrivacyAction) -> Self {
        self.privacy_rules.push(PrivacyRule {
            field: field.into(),
            action,
        });
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn privacy_rule(&self, field: &str) -> Option<&PrivacyRule> {
        self.privacy_rules.iter().find(|r| r.field == field)
    }

    /// Reject the specification before any generation starts
    pub fn validate(&self) -> Result<(), DataError> {
        if self.record_count == 0 {
            return Err(DataError::InvalidRecordCount);
        }
        if self.fields.is_empty() {
            return Err(DataError::NoFields(self.id.clone()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(DataError::DuplicateField(field.name.clone()));
            }
            self.validate_field(field)?;
        }

        for relationship in &self.relationships {
            for name in [&relationship.field, &relationship.references] {
                if self.field(name).is_none() {
                    return Err(DataError::UnknownField(name.clone()));
                }
            }
            let types = (
                self.field(&relationship.field).map(|f| f.field_type),
                self.field(&relationship.references).map(|f| f.field_type),
            );
            if types.0 != types.1 {
                return Err(DataError::InvalidConstraint {
                    field: relationship.field.clone(),
                    reason: format!("type differs from '{}'", relationship.references),
                });
            }
            if self.relationships.iter().any(|r| r.field == relationship.references) {
                return Err(DataError::InvalidConstraint {
                    field: relationship.field.clone(),
                    reason: format!("'{}' is itself a relationship field", relationship.references),
                });
            }
            if relationship.kind == RelationshipKind::ManyToOne
                && self.field(&relationship.field).map_or(false, |f| f.constraints.unique)
            {
                return Err(DataError::InvalidConstraint {
                    field: relationship.field.clone(),
                    reason: "a many-to-one field cannot be unique".to_string(),
                });
            }
            if relationship.kind == RelationshipKind::OneToOne
                && !self.field(&relationship.references).map_or(false, |f| f.constraints.unique)
            {
                return Err(DataError::InvalidConstraint {
                    field: relationship.field.clone(),
                    reason: format!("one-to-one target '{}' must be unique", relationship.references),
                });
            }
        }
        for rule in &self.privacy_rules {
            if self.field(&rule.field).is_none() {
                return Err(DataError::UnknownField(rule.field.clone()));
            }
        }

        if self.strategy == GenerationStrategy::Template && self.template.is_none() {
            return Err(DataError::UnknownTemplate("<none>".to_string()));
        }
        Ok(())
    }

    fn validate_field(&self, field: &FieldSpec) -> Result<(), DataError> {
        let c = &field.constraints;
        let invalid = |reason: String| DataError::InvalidConstraint {
            field: field.name.clone(),
            reason,
        };

        if let (Some(min), Some(max)) = (c.min, c.max) {
            if min >= max {
                return Err(invalid(format!("min {min} must be below max {max}")));
            }
            if field.field_type == FieldType::Integer && min.ceil() > max.floor() {
                return Err(invalid(format!("no whole number lies in [{min}, {max}]")));
            }
        }
        if let (Some(min), Some(max)) = (c.min_length, c.max_length) {
            if min >= max {
                return Err(invalid(format!("min_length {min} must be below max_length {max}")));
            }
        }
        if !(0.0..=1.0).contains(&c.null_rate) {
            return Err(invalid(format!("null_rate {} is outside [0, 1]", c.null_rate)));
        }
        if c.unique && c.null_rate > 0.0 {
            return Err(invalid("unique fields cannot be nullable".to_string()));
        }
        if let Some(pattern) = &c.pattern {
            if pattern.is_empty() {
                return Err(invalid("pattern is empty".to_string()));
            }
        }
        if field.field_type == FieldType::Enum && c.values.is_empty() {
            return Err(invalid("enum field declares no values".to_string()));
        }

        if c.unique {
            let capacity = match field.field_type {
                FieldType::Boolean => Some(2.0),
                FieldType::Enum => Some(c.values.len() as f64),
                FieldType::Integer => Some((c.max_value().floor() - c.min_value().ceil() + 1.0).max(0.0)),
                _ => None,
            };
            if let Some(capacity) = capacity {
                if capacity < self.record_count as f64 {
                    return Err(DataError::UniqueExhausted {
                        field: field.name.clone(),
                        requested: self.record_count,
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSetStatus {
    #[default]
    Active,
    Archived,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataSetMetadata {
    pub strategy: GenerationStrategy,
    pub category: DataCategory,
    pub seed: u64,
    pub generation_ms: u64,
    /// Batches used; 1 outside performance-scale generation
    pub batches: usize,
    /// SHA-256 of the serialized records
    pub checksum: String,
}

/// Materialized output of one specification version
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestDataSet {
    pub id: String,
    pub specification_id: String,
    pub version: u32,
    pub records: Vec<Record>,
    pub metadata: DataSetMetadata,
    pub validation: ValidationResult,
    pub status: DataSetStatus,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl TestDataSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.status == DataSetStatus::Active
    }

    /// Write the records as a JSON array, or as CSV for a `.csv` path
    pub fn export(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let is_csv = path.extension().is_some_and(|e| e == "csv");
        if !is_csv {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), &self.records)
                .context("Failed to write records")?;
            return Ok(());
        }

        // records may omit dropped or null fields
        let columns: BTreeSet<&str> = self
            .records
            .iter()
            .flat_map(|r| r.keys().map(String::as_str))
            .collect();
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer.write_record(&columns)?;
        for record in &self.records {
            writer.write_record(columns.iter().map(|c| match record.get(*c) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// History entry for one version of a data set
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataVersion {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub description: String,
    pub record_count: usize,
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TestDataSpecification {
        TestDataSpecification::new("users", 10)
            .with_field(FieldSpec::new("id", FieldType::Uuid))
            .with_field(
                FieldSpec::new("age", FieldType::Integer)
                    .with_constraints(FieldConstraints::range(18.0, 90.0)),
            )
    }

    #[test]
    fn test_valid_specification() {
        assert!(users().validate().is_ok());
    }

    #[test]
    fn test_zero_count_and_no_fields_rejected() {
        let mut spec = users();
        spec.record_count = 0;
        assert_eq!(spec.validate(), Err(DataError::InvalidRecordCount));

        let spec = TestDataSpecification::new("empty", 5);
        assert_eq!(spec.validate(), Err(DataError::NoFields("empty".into())));
    }

    #[test]
    fn test_inconsistent_constraints_rejected() {
        let spec = TestDataSpecification::new("bad", 5).with_field(
            FieldSpec::new("n", FieldType::Integer)
                .with_constraints(FieldConstraints::range(10.0, 1.0)),
        );
        assert!(matches!(spec.validate(), Err(DataError::InvalidConstraint { .. })));

        let spec = TestDataSpecification::new("bad", 5)
            .with_field(FieldSpec::new("kind", FieldType::Enum));
        assert!(matches!(spec.validate(), Err(DataError::InvalidConstraint { .. })));
    }

    #[test]
    fn test_empty_bounds_rejected() {
        let reject = |field: FieldSpec| {
            let spec = TestDataSpecification::new("bad", 5).with_field(field);
            assert!(matches!(spec.validate(), Err(DataError::InvalidConstraint { .. })));
        };
        reject(
            FieldSpec::new("n", FieldType::Integer)
                .with_constraints(FieldConstraints::range(0.5, 0.7)),
        );
        reject(
            FieldSpec::new("n", FieldType::Integer)
                .with_constraints(FieldConstraints::range(5.0, 5.0)),
        );
        reject(
            FieldSpec::new("s", FieldType::String)
                .with_constraints(FieldConstraints::length(4, 4)),
        );

        let spec = TestDataSpecification::new("ok", 5).with_field(
            FieldSpec::new("x", FieldType::Float)
                .with_constraints(FieldConstraints::range(0.5, 0.7)),
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_relationship_shapes() {
        let team = || {
            TestDataSpecification::new("team", 10)
                .with_field(
                    FieldSpec::new("id", FieldType::Uuid)
                        .with_constraints(FieldConstraints::default().unique()),
                )
                .with_field(FieldSpec::new("manager", FieldType::Uuid))
                .with_field(FieldSpec::new("mentor", FieldType::Uuid))
        };
        assert!(team()
            .with_relationship("manager", "id", RelationshipKind::ManyToOne)
            .validate()
            .is_ok());

        let chained = team()
            .with_relationship("manager", "id", RelationshipKind::ManyToOne)
            .with_relationship("mentor", "manager", RelationshipKind::ManyToOne);
        assert!(matches!(
            chained.validate(),
            Err(DataError::InvalidConstraint { field, .. }) if field == "mentor"
        ));

        let unique_many = TestDataSpecification::new("team", 10)
            .with_field(
                FieldSpec::new("id", FieldType::Uuid)
                    .with_constraints(FieldConstraints::default().unique()),
            )
            .with_field(
                FieldSpec::new("manager", FieldType::Uuid)
                    .with_constraints(FieldConstraints::default().unique()),
            )
            .with_relationship("manager", "id", RelationshipKind::ManyToOne);
        assert!(matches!(
            unique_many.validate(),
            Err(DataError::InvalidConstraint { field, .. }) if field == "manager"
        ));
    }

    #[test]
    fn test_unique_capacity() {
        let spec = TestDataSpecification::new("flags", 3).with_field(
            FieldSpec::new("flag", FieldType::Boolean)
                .with_constraints(FieldConstraints::default().unique()),
        );
        assert_eq!(
            spec.validate(),
            Err(DataError::UniqueExhausted {
                field: "flag".into(),
                requested: 3
            })
        );
    }

    #[test]
    fn test_references_must_resolve() {
        let spec = users().with_privacy("email", PrivacyAction::Hash);
        assert_eq!(spec.validate(), Err(DataError::UnknownField("email".into())));

        let spec = users().with_relationship("manager", "id", RelationshipKind::ManyToOne);
        assert_eq!(spec.validate(), Err(DataError::UnknownField("manager".into())));

        let mut spec = users();
        spec.strategy = GenerationStrategy::Template;
        assert!(matches!(spec.validate(), Err(DataError::UnknownTemplate(_))));
    }

    #[test]
    fn test_spec_from_yaml() {
        let yaml = r#"
id: orders
category: transaction
strategy: realistic
record_count: 50
seed: 7
fields:
  - name: order_id
    type: uuid
  - name: amount
    type: float
    constraints:
      min: 1.0
      max: 500.0
"#;
        let spec: TestDataSpecification = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.category, DataCategory::Transaction);
        assert_eq!(spec.fields[1].constraints.max, Some(500.0));
        assert_eq!(spec.version, 1);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_export_csv_and_json() {
        let data = crate::data::generate(&users().with_seed(5), None).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let csv_path = dir.path().join("users.csv");
        data.export(&csv_path).unwrap();
        let content = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("age,id"));
        assert_eq!(lines.count(), 10);

        let json_path = dir.path().join("users.json");
        data.export(&json_path).unwrap();
        let records: Vec<Record> =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(records, data.records);
    }

    #[test]
    fn test_load_rejects_invalid_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        std::fs::write(&path, r#"{"id": "empty", "record_count": 0}"#).unwrap();
        let err = TestDataSpecification::load(&path).unwrap_err();
        assert_eq!(err.downcast_ref::<DataError>(), Some(&DataError::InvalidRecordCount));

        let path = dir.path().join("users.yml");
        std::fs::write(&path, "id: users\nrecord_count: 3\nfields:\n  - name: id\n    type: uuid\n")
            .unwrap();
        assert_eq!(TestDataSpecification::load(&path).unwrap().record_count, 3);
    }
}
