//! Test data management

mod generator;
mod manager;
mod performance;
mod spec;

pub use generator::{generate, validate_records};
pub use manager::{LifecycleReport, RetentionPolicy, TestDataManager};
pub use performance::{
    estimate_record_size, generate_performance_data, GenerationPlan, PerformanceOptions,
    PerformanceTestDataSet,
};
pub use spec::{
    DataCategory, DataSetMetadata, DataSetStatus, DataVersion, FieldConstraints, FieldSpec,
    FieldType, GenerationStrategy, PrivacyAction, PrivacyRule, Record, Relationship,
    RelationshipKind, TestDataSet, TestDataSpecification, ValidationResult,
};
