//! Model layer: schema derivation, one-hot encoding, classification and
//! aggregation of per-diagnosis probabilities into ranked prescriptions.

pub mod builder;
pub mod classifier;
pub mod encoder;
pub mod fusion;
pub mod labels;
pub mod model;

pub use builder::{TrainingSet, build};
pub use classifier::{CentroidClassifier, ProbabilisticClassifier};
pub use encoder::{encode, encode_request};
pub use fusion::{DEFAULT_TOP_N, LEGACY_TOP_N, RankedMedicine, aggregate};
pub use labels::{DosageTable, LabelDecoder};
pub use model::{ClientModel, PredictOptions, TrainingSummary};
