//! Dense encoded feature matrix bound to a [`FeatureSchema`].

use std::sync::Arc;

use arrow::array::{ArrayRef, Float32Array};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

use crate::error::PipelineError;
use crate::schema::FeatureSchema;

/// Row-major f32 matrix whose columns are exactly a schema's columns.
///
/// Missing numeric cells are `NaN`.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    schema: Arc<FeatureSchema>,
    rows: Vec<Vec<f32>>,
}

impl FeatureMatrix {
    /// Wrap rows, checking every row has one value per schema column.
    pub fn new(schema: Arc<FeatureSchema>, rows: Vec<Vec<f32>>) -> Result<Self, PipelineError> {
        let width = schema.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(PipelineError::invariant(format!(
                "row {i} has {} values, schema has {width} columns",
                row.len()
            )));
        }
        Ok(Self { schema, rows })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn columns(&self) -> &[String] {
        self.schema.columns()
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> Option<&[f32]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.schema.len()
    }

    /// Value at (row, column name); `None` if either is unknown.
    pub fn get(&self, row: usize, column: &str) -> Option<f32> {
        let col = self.schema.position(column)?;
        self.rows.get(row).map(|r| r[col])
    }

    /// Columnar Arrow view, one Float32 column per schema column.
    pub fn to_record_batch(&self) -> Result<RecordBatch, ArrowError> {
        let columns: Vec<ArrayRef> = (0..self.n_cols())
            .map(|c| {
                let values: Vec<f32> = self.rows.iter().map(|r| r[c]).collect();
                Arc::new(Float32Array::from(values)) as ArrayRef
            })
            .collect();
        RecordBatch::try_new(self.schema.arrow_schema(), columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    fn schema() -> Arc<FeatureSchema> {
        Arc::new(
            FeatureSchema::new(vec!["diagnosis_Bloat".into(), "age".into()]).unwrap(),
        )
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = FeatureMatrix::new(schema(), vec![vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(_)));
    }

    #[test]
    fn lookup_by_column_name() {
        let m = FeatureMatrix::new(schema(), vec![vec![1.0, 4.0]]).unwrap();
        assert_eq!(m.get(0, "age"), Some(4.0));
        assert_eq!(m.get(0, "breed_Jersey"), None);
        assert_eq!(m.get(1, "age"), None);
    }

    #[test]
    fn record_batch_is_columnar() {
        let m = FeatureMatrix::new(schema(), vec![vec![1.0, 4.0], vec![0.0, f32::NAN]]).unwrap();
        let batch = m.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(batch.schema().field(1).name(), "age");

        let age = batch
            .column(1)
            .as_any()
            .downcast_ref::<Float32Array>()
            .unwrap();
        assert_eq!(age.value(0), 4.0);
        assert!(age.value(1).is_nan());
        assert_eq!(age.null_count(), 0);
    }
}
