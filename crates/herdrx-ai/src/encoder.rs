//! One-hot expansion and reconciliation against a persisted feature schema.
//!
//! Training and serving share [`expand_row`] and [`reconcile`], so a value
//! seen at training time always lands in the same column at inference time.
//! Columns the schema lacks are dropped; schema columns the row lacks are 0.

use std::collections::HashSet;
use std::sync::Arc;

use herdrx_core::{
    CategoricalField, FeatureMatrix, FeatureSchema, NumericField, PipelineError, ValidatedRequest,
    coerce_value,
};
use tracing::debug;

/// Sparse encoding of one row: `(column, value)` pairs in expansion order.
///
/// A blank categorical value produces no column. A missing numeric value is `NaN`.
pub fn expand_row<'a>(
    categories: impl IntoIterator<Item = (CategoricalField, &'a str)>,
    numerics: impl IntoIterator<Item = (NumericField, Option<f32>)>,
) -> Vec<(String, f32)> {
    let mut out = Vec::new();
    for (field, value) in categories {
        let value = value.trim();
        if !value.is_empty() {
            out.push((field.column(value), 1.0));
        }
    }
    for (field, value) in numerics {
        out.push((field.name().to_string(), value.unwrap_or(f32::NAN)));
    }
    out
}

/// Align a sparse row to the schema.
///
/// Returns the dense row and the names of columns the schema does not know.
pub fn reconcile(expanded: Vec<(String, f32)>, schema: &FeatureSchema) -> (Vec<f32>, Vec<String>) {
    let mut row = vec![0.0f32; schema.len()];
    let mut dropped = Vec::new();
    for (column, value) in expanded {
        match schema.position(&column) {
            Some(i) => row[i] = value,
            None => dropped.push(column),
        }
    }
    (row, dropped)
}

/// Encode requests into a matrix with exactly the schema's columns.
///
/// Each diagnosis of each request becomes its own row, in request order then
/// diagnosis order, sharing that request's attributes.
pub fn encode(
    requests: &[ValidatedRequest],
    schema: Arc<FeatureSchema>,
) -> Result<FeatureMatrix, PipelineError> {
    let mut rows = Vec::new();
    let mut unseen: HashSet<String> = HashSet::new();

    for req in requests {
        let attrs = &req.attributes;
        let numerics: Vec<(NumericField, Option<f32>)> = NumericField::ALL
            .iter()
            .map(|&f| (f, coerce_value(attrs.numeric(f))))
            .collect();

        for diagnosis in &req.diagnoses {
            let expanded = expand_row(
                [
                    (CategoricalField::Diagnosis, diagnosis.as_str()),
                    (CategoricalField::Breed, attrs.breed.as_str()),
                ],
                numerics.iter().copied(),
            );
            let (row, dropped) = reconcile(expanded, &schema);
            unseen.extend(dropped);
            rows.push(row);
        }
    }

    if !unseen.is_empty() {
        let mut unseen: Vec<String> = unseen.into_iter().collect();
        unseen.sort();
        debug!(?unseen, "dropped columns not present in feature schema");
    }

    FeatureMatrix::new(schema, rows)
}

/// Encode a single request; one row per diagnosis.
pub fn encode_request(
    request: &ValidatedRequest,
    schema: Arc<FeatureSchema>,
) -> Result<FeatureMatrix, PipelineError> {
    encode(std::slice::from_ref(request), schema)
}
