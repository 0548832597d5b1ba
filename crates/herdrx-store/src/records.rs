//! Conversion between joined training tables and [`RawRecord`]s.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use herdrx_core::{RawRecord, tables};

use crate::StoreError;

/// Read every row of a joined training batch.
///
/// Columns are matched by name against
/// [`tables::training_records_schema`]; any text-like or numeric column type
/// is accepted and cast to text. A column absent from the batch reads as null.
pub fn records_from_batch(batch: &RecordBatch) -> Result<Vec<RawRecord>, StoreError> {
    let text = |name: &str| -> Result<Option<StringArray>, StoreError> {
        let Some(col) = batch.column_by_name(name) else {
            return Ok(None);
        };
        let utf8 = cast(col, &DataType::Utf8)?;
        let strings = utf8
            .as_any()
            .downcast_ref::<StringArray>()
            .cloned()
            .ok_or_else(|| StoreError::Other(format!("column {name} is not text")))?;
        Ok(Some(strings))
    };

    let diagnosis = text("diagnosis")?;
    let breed = text("breed")?;
    let num_calvings = text("num_calvings")?;
    let age = text("age")?;
    let months_pregnant = text("months_pregnant")?;
    let months_since_calving = text("months_since_calving")?;
    let avg_lpd = text("avg_lpd")?;
    let medicine = text("medicine")?;
    let dosage = text("dosage")?;

    let cell = |col: &Option<StringArray>, i: usize| -> Option<String> {
        col.as_ref()
            .filter(|a| !a.is_null(i))
            .map(|a| a.value(i).to_string())
    };

    Ok((0..batch.num_rows())
        .map(|i| RawRecord {
            diagnosis: cell(&diagnosis, i),
            breed: cell(&breed, i),
            num_calvings: cell(&num_calvings, i),
            age: cell(&age, i),
            months_pregnant: cell(&months_pregnant, i),
            months_since_calving: cell(&months_since_calving, i),
            avg_lpd: cell(&avg_lpd, i),
            medicine: cell(&medicine, i),
            dosage: cell(&dosage, i),
        })
        .collect())
}

/// Build a joined training batch from records (no case identifiers).
pub fn records_to_batch(records: &[RawRecord]) -> Result<RecordBatch, StoreError> {
    let schema = Arc::new(tables::training_records_schema());
    let column = |get: fn(&RawRecord) -> Option<&str>| -> ArrayRef {
        Arc::new(records.iter().map(get).collect::<StringArray>())
    };
    let columns = vec![
        column(|_| None),
        column(|r| r.diagnosis.as_deref()),
        column(|r| r.breed.as_deref()),
        column(|r| r.num_calvings.as_deref()),
        column(|r| r.age.as_deref()),
        column(|r| r.months_pregnant.as_deref()),
        column(|r| r.months_since_calving.as_deref()),
        column(|r| r.avg_lpd.as_deref()),
        column(|r| r.medicine.as_deref()),
        column(|r| r.dosage.as_deref()),
    ];
    Ok(RecordBatch::try_new(schema, columns)?)
}
