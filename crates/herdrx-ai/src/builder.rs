//! Schema builder: derives the one-hot feature space from raw training records.
//!
//! Column layout: every categorical field in declaration order (diagnosis,
//! then breed), its distinct values in ascending order, followed by the
//! numeric fields in declaration order. Sorting the values makes the schema
//! independent of record order, so retraining on the same data reproduces it.

use std::collections::BTreeSet;
use std::sync::Arc;

use herdrx_core::{
    CategoricalField, FeatureMatrix, FeatureSchema, NumericField, PipelineError, RawRecord,
};
use tracing::info;

use crate::encoder::{expand_row, reconcile};
use crate::labels::{DosageTable, LabelDecoder};

/// Everything the training pipeline derives from one record set.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub schema: Arc<FeatureSchema>,
    pub matrix: FeatureMatrix,
    /// Decoder index per matrix row.
    pub targets: Vec<usize>,
    pub decoder: LabelDecoder,
    pub dosages: DosageTable,
    pub records_used: usize,
    pub records_dropped: usize,
}

/// Build the feature schema, encoded training matrix and label decoder.
///
/// Records missing any required field are dropped, not imputed. Fails with
/// [`PipelineError::InsufficientData`] when nothing survives.
pub fn build(records: &[RawRecord]) -> Result<TrainingSet, PipelineError> {
    let complete: Vec<&RawRecord> = records.iter().filter(|r| r.is_complete()).collect();
    let records_dropped = records.len() - complete.len();

    if complete.is_empty() {
        return Err(PipelineError::InsufficientData(format!(
            "no complete records among {} rows",
            records.len()
        )));
    }

    let schema = Arc::new(derive_schema(&complete)?);

    let rows: Vec<Vec<f32>> = complete
        .iter()
        .map(|rec| reconcile(expand_record(rec), &schema).0)
        .collect();
    let matrix = FeatureMatrix::new(Arc::clone(&schema), rows)?;

    let decoder = LabelDecoder::fit(complete.iter().filter_map(|r| r.medicine()));
    let targets = complete
        .iter()
        .map(|rec| {
            let medicine = rec.medicine().unwrap_or_default();
            decoder.encode(medicine).ok_or_else(|| {
                PipelineError::invariant(format!("medicine '{medicine}' missing from decoder"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let dosages = DosageTable::from_records(complete.iter().copied());

    info!(
        records = complete.len(),
        dropped = records_dropped,
        columns = schema.len(),
        classes = decoder.len(),
        "built training set"
    );

    Ok(TrainingSet {
        schema,
        matrix,
        targets,
        decoder,
        dosages,
        records_used: complete.len(),
        records_dropped,
    })
}

fn derive_schema(records: &[&RawRecord]) -> Result<FeatureSchema, PipelineError> {
    let mut columns = Vec::new();
    for field in CategoricalField::ALL {
        let values: BTreeSet<&str> = records.iter().filter_map(|r| r.categorical(field)).collect();
        columns.extend(values.into_iter().map(|v| field.column(v)));
    }
    columns.extend(NumericField::ALL.iter().map(|f| f.name().to_string()));
    FeatureSchema::new(columns)
}

fn expand_record(rec: &RawRecord) -> Vec<(String, f32)> {
    expand_row(
        CategoricalField::ALL
            .iter()
            .filter_map(|&f| rec.categorical(f).map(|v| (f, v))),
        NumericField::ALL.iter().map(|&f| (f, rec.numeric(f))),
    )
}
