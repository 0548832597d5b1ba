//! DuckDB loader for a client's raw training tables.

use std::path::{Path, PathBuf};

use arrow::record_batch::RecordBatch;
use duckdb::Connection;
use herdrx_core::RawRecord;
use tracing::info;

use crate::StoreError;
use crate::records::records_from_batch;

/// File stem of the observation table inside a client directory.
pub const OBSERVATIONS_STEM: &str = "observations";
/// File stem of the prescription table inside a client directory.
pub const PRESCRIPTIONS_STEM: &str = "prescriptions";

/// Observation names pivoted into training columns.
pub const OBSERVATION_FIELDS: [(&str, &str); 6] = [
    ("Breed", "breed"),
    ("No. of Calvings", "num_calvings"),
    ("Age as of 24-Feb-2025", "age"),
    ("Months Pregnant as of 24-Feb-2025", "months_pregnant"),
    ("Months Since Calving As of 24-Feb-2025", "months_since_calving"),
    ("Average Animal LPD", "avg_lpd"),
];

/// In-memory DuckDB holding one client's `observations` and `prescriptions`
/// tables.
///
/// The observation table is long-form (`care_calendar_id`, `Observation`,
/// `Response`, `Diagnosis`): one row per recorded observation. The
/// prescription table maps `Diagnosis` to `Medicine`, optionally with a
/// `Dosage`. [`raw_records`](Self::raw_records) pivots and joins them into one
/// row per (case, diagnosis, prescription).
pub struct TrainingStore {
    conn: Connection,
}

impl TrainingStore {
    pub fn open() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    /// Load the observation table from a CSV or Parquet file.
    pub fn load_observations(&self, path: &Path) -> Result<usize, StoreError> {
        self.load_table("observations", path)
    }

    /// Load the prescription table from a CSV or Parquet file.
    pub fn load_prescriptions(&self, path: &Path) -> Result<usize, StoreError> {
        self.load_table("prescriptions", path)
    }

    /// Load both tables from a client directory, preferring CSV over Parquet.
    pub fn load_client_dir(&self, dir: &Path) -> Result<(), StoreError> {
        self.load_observations(&find_input(dir, OBSERVATIONS_STEM)?)?;
        self.load_prescriptions(&find_input(dir, PRESCRIPTIONS_STEM)?)?;
        Ok(())
    }

    fn load_table(&self, table: &str, path: &Path) -> Result<usize, StoreError> {
        if !path.exists() {
            return Err(StoreError::DataNotFound(path.to_path_buf()));
        }
        let literal = sql_string(&path.display().to_string());
        let source = match path.extension().and_then(|e| e.to_str()) {
            Some("parquet") => format!("read_parquet({literal})"),
            // Everything stays text; coercion happens in the schema builder.
            _ => format!("read_csv({literal}, header = true, all_varchar = true)"),
        };
        self.conn.execute_batch(&format!(
            "CREATE OR REPLACE TABLE {table} AS SELECT * FROM {source}"
        ))?;
        let count = self.count_table(table)?;
        info!(table, count, path = %path.display(), "loaded training table");
        Ok(count)
    }

    fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        self.query_count(&format!("SELECT count(*)::BIGINT AS cnt FROM {table}"), &[])
    }

    fn has_column(&self, table: &str, column: &str) -> Result<bool, StoreError> {
        let n = self.query_count(
            "SELECT count(*)::BIGINT AS cnt FROM information_schema.columns \
             WHERE table_name = ? AND lower(column_name) = lower(?)",
            &[table, column],
        )?;
        Ok(n > 0)
    }

    fn query_count(&self, sql: &str, params: &[&str]) -> Result<usize, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt
            .query_arrow(duckdb::params_from_iter(params.iter()))?
            .collect();
        let batch = batches.first().ok_or(StoreError::NoResults)?;
        let col = batch
            .column(0)
            .as_any()
            .downcast_ref::<arrow::array::Int64Array>()
            .ok_or_else(|| StoreError::Other("count column not i64".into()))?;
        Ok(col.value(0) as usize)
    }

    /// The pivot/join query producing the joined training table.
    fn joined_sql(&self) -> Result<String, StoreError> {
        let pivots: Vec<String> = OBSERVATION_FIELDS
            .iter()
            .map(|(observation, column)| {
                format!(
                    "any_value(response) FILTER (WHERE observation = {}) AS {column}",
                    sql_string(observation)
                )
            })
            .collect();
        let attr_columns: Vec<String> = OBSERVATION_FIELDS
            .iter()
            .map(|(_, column)| format!("a.{column}"))
            .collect();
        let dosage = if self.has_column("prescriptions", "Dosage")? {
            "CAST(p.Dosage AS VARCHAR)"
        } else {
            "CAST(NULL AS VARCHAR)"
        };

        Ok(format!(
            "WITH obs AS (
                SELECT CAST(care_calendar_id AS VARCHAR) AS case_id,
                       CAST(Observation AS VARCHAR) AS observation,
                       CAST(Response AS VARCHAR) AS response,
                       CAST(Diagnosis AS VARCHAR) AS diagnosis
                FROM observations
                WHERE care_calendar_id IS NOT NULL
                  AND CAST(care_calendar_id AS VARCHAR) NOT LIKE '%care_calendar_id%'
            ),
            attrs AS (
                SELECT case_id, {pivots}
                FROM obs
                GROUP BY case_id
            ),
            cases AS (
                SELECT DISTINCT case_id, diagnosis
                FROM obs
                WHERE diagnosis IS NOT NULL
            )
            SELECT c.case_id AS care_calendar_id,
                   c.diagnosis,
                   {attr_columns},
                   CAST(p.Medicine AS VARCHAR) AS medicine,
                   {dosage} AS dosage
            FROM cases c
            JOIN attrs a ON a.case_id = c.case_id
            JOIN prescriptions p ON CAST(p.Diagnosis AS VARCHAR) = c.diagnosis
            ORDER BY 1, 2, 9, 10",
            pivots = pivots.join(",\n                       "),
            attr_columns = attr_columns.join(", "),
        ))
    }

    /// The joined training table as Arrow batches.
    pub fn joined_batches(&self) -> Result<Vec<RecordBatch>, StoreError> {
        let sql = self.joined_sql()?;
        self.query_arrow(&sql)
    }

    /// One [`RawRecord`] per (case, diagnosis, prescription).
    pub fn raw_records(&self) -> Result<Vec<RawRecord>, StoreError> {
        let mut records = Vec::new();
        for batch in self.joined_batches()? {
            records.extend(records_from_batch(&batch)?);
        }
        info!(records = records.len(), "joined training records");
        Ok(records)
    }

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }
}

/// `<dir>/<stem>.csv`, else `<dir>/<stem>.parquet`.
fn find_input(dir: &Path, stem: &str) -> Result<PathBuf, StoreError> {
    let csv = dir.join(format!("{stem}.csv"));
    if csv.exists() {
        return Ok(csv);
    }
    let parquet = dir.join(format!("{stem}.parquet"));
    if parquet.exists() {
        return Ok(parquet);
    }
    Err(StoreError::DataNotFound(csv))
}

fn sql_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}
