//! Storage layer: DuckDB training-table loader and versioned artifact store.

mod artifacts;
mod error;
mod records;

pub use artifacts::{
    ArtifactReader, ArtifactStore, DECODER_FILE, DOSAGES_FILE, MANIFEST_FILE, MODEL_FILE,
    Manifest, REQUIRED_FILES, SCHEMA_FILE, StagedArtifacts,
};
pub use error::StoreError;
pub use records::{records_from_batch, records_to_batch};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::{OBSERVATION_FIELDS, OBSERVATIONS_STEM, PRESCRIPTIONS_STEM, TrainingStore};
