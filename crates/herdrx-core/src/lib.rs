//! Core types for herdrx: field vocabulary, feature schema, encoded matrices,
//! request/response contracts, and the shared error taxonomy.

pub mod error;
pub mod matrix;
pub mod record;
pub mod request;
pub mod schema;

pub use error::PipelineError;
pub use matrix::FeatureMatrix;
pub use record::{CategoricalField, NumericField, RawRecord, coerce_str, coerce_value};
pub use request::{
    AnimalAttributes, ErrorResponse, FusionPolicy, Prediction, PredictionRequest,
    PredictionResponse, ValidatedRequest,
};
pub use schema::{FeatureSchema, tables};
