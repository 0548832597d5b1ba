//! The feature schema: the ordered list of encoded column names shared by
//! training and serving.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::record::CategoricalField;

/// Ordered, duplicate-free list of encoded column names.
///
/// Fixed at training time and persisted verbatim. Every encoded matrix,
/// training or inference, has exactly these columns in exactly this order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSchema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl FeatureSchema {
    /// Build a schema from an ordered column list. Duplicate names are rejected.
    pub fn new(columns: Vec<String>) -> Result<Self, PipelineError> {
        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(PipelineError::invariant(format!(
                    "duplicate feature column '{name}'"
                )));
            }
        }
        Ok(Self { columns, index })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a column, if the schema has it.
    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    /// Category values observed at training time for one field, in schema order.
    ///
    /// Recovers the diagnosis and breed vocabularies from the column names.
    pub fn known_values(&self, field: CategoricalField) -> Vec<&str> {
        let prefix = format!("{}_", field.name());
        self.columns
            .iter()
            .filter_map(|c| c.strip_prefix(prefix.as_str()))
            .collect()
    }

    /// Arrow schema with one non-nullable Float32 field per column.
    pub fn arrow_schema(&self) -> Arc<Schema> {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(c, DataType::Float32, false))
            .collect();
        Arc::new(Schema::new(fields))
    }
}

impl PartialEq for FeatureSchema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for FeatureSchema {}

impl TryFrom<Vec<String>> for FeatureSchema {
    type Error = PipelineError;

    fn try_from(columns: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(columns)
    }
}

impl From<FeatureSchema> for Vec<String> {
    fn from(schema: FeatureSchema) -> Self {
        schema.columns
    }
}

/// Arrow schemas for the training tables.
pub mod tables {
    use arrow::datatypes::{DataType, Field, Schema};

    /// Joined training records: one row per (case, diagnosis, prescription).
    ///
    /// All columns are text; numeric coercion happens in the schema builder.
    pub fn training_records_schema() -> Schema {
        Schema::new(vec![
            Field::new("care_calendar_id", DataType::Utf8, true),
            Field::new("diagnosis", DataType::Utf8, true),
            Field::new("breed", DataType::Utf8, true),
            Field::new("num_calvings", DataType::Utf8, true),
            Field::new("age", DataType::Utf8, true),
            Field::new("months_pregnant", DataType::Utf8, true),
            Field::new("months_since_calving", DataType::Utf8, true),
            Field::new("avg_lpd", DataType::Utf8, true),
            Field::new("medicine", DataType::Utf8, true),
            Field::new("dosage", DataType::Utf8, true),
        ])
    }
}
