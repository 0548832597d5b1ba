//! Per-client model context: training entry point and prediction path.
//!
//! A [`ClientModel`] owns one client's schema, decoder, classifier and dosage
//! table. Nothing is shared between clients, and prediction only reads.

use std::sync::Arc;

use herdrx_core::{
    FeatureMatrix, FeatureSchema, FusionPolicy, PipelineError, Prediction, PredictionResponse,
    RawRecord, ValidatedRequest,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::builder;
use crate::classifier::{CentroidClassifier, ProbabilisticClassifier};
use crate::encoder;
use crate::fusion::{self, DEFAULT_TOP_N, LEGACY_TOP_N};
use crate::labels::{DosageTable, LabelDecoder};

/// How a prediction is aggregated and truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictOptions {
    pub policy: FusionPolicy,
    pub top_n: usize,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            policy: FusionPolicy::Summed,
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl PredictOptions {
    /// Single best-guess mode: summed fusion, top 2.
    pub fn legacy() -> Self {
        Self {
            policy: FusionPolicy::Summed,
            top_n: LEGACY_TOP_N,
        }
    }
}

/// Counts reported by a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub records_used: usize,
    pub records_dropped: usize,
    pub features: usize,
    pub classes: usize,
}

/// One client's trained artifacts, validated to be mutually consistent.
#[derive(Debug, Clone)]
pub struct ClientModel<C = CentroidClassifier> {
    client: String,
    schema: Arc<FeatureSchema>,
    decoder: LabelDecoder,
    classifier: C,
    dosages: DosageTable,
}

impl<C: ProbabilisticClassifier> ClientModel<C> {
    /// Assemble a model, checking classifier, decoder and schema agree.
    pub fn new(
        client: impl Into<String>,
        schema: FeatureSchema,
        decoder: LabelDecoder,
        classifier: C,
        dosages: DosageTable,
    ) -> Result<Self, PipelineError> {
        if classifier.n_classes() != decoder.len() {
            return Err(PipelineError::invariant(format!(
                "classifier has {} classes, decoder has {}",
                classifier.n_classes(),
                decoder.len()
            )));
        }
        if classifier.n_features() != schema.len() {
            return Err(PipelineError::invariant(format!(
                "classifier expects {} features, schema has {} columns",
                classifier.n_features(),
                schema.len()
            )));
        }
        Ok(Self {
            client: client.into(),
            schema: Arc::new(schema),
            decoder,
            classifier,
            dosages,
        })
    }

    /// Build the feature space from raw records and fit a classifier on it.
    pub fn train(
        client: impl Into<String>,
        records: &[RawRecord],
    ) -> Result<(Self, TrainingSummary), PipelineError> {
        let client = client.into();
        let set = builder::build(records)?;
        let classifier = C::fit(&set.matrix, &set.targets, set.decoder.len())?;

        let summary = TrainingSummary {
            records_used: set.records_used,
            records_dropped: set.records_dropped,
            features: set.schema.len(),
            classes: set.decoder.len(),
        };
        info!(client = %client, ?summary, "trained model");

        let schema = Arc::unwrap_or_clone(set.schema);
        let model = Self::new(client, schema, set.decoder, classifier, set.dosages)?;
        Ok((model, summary))
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn decoder(&self) -> &LabelDecoder {
        &self.decoder
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn dosages(&self) -> &DosageTable {
        &self.dosages
    }

    /// Encode a request against this client's schema, one row per diagnosis.
    pub fn encode(&self, request: &ValidatedRequest) -> Result<FeatureMatrix, PipelineError> {
        encoder::encode_request(request, Arc::clone(&self.schema))
    }

    /// Encode, score and aggregate one request.
    pub fn predict(
        &self,
        request: &ValidatedRequest,
        options: PredictOptions,
    ) -> Result<PredictionResponse, PipelineError> {
        let x = self.encode(request)?;
        let probs = self.classifier.predict_proba(&x)?;
        if probs.len() != x.n_rows() {
            return Err(PipelineError::invariant(format!(
                "classifier returned {} rows for {} inputs",
                probs.len(),
                x.n_rows()
            )));
        }

        let ranked = fusion::aggregate(&probs, &self.decoder, options.policy, options.top_n)?;
        debug!(
            client = %self.client,
            diagnoses = request.diagnoses.len(),
            results = ranked.len(),
            policy = options.policy.as_str(),
            "scored request"
        );

        let predictions = ranked
            .into_iter()
            .map(|r| Prediction {
                dosage: self.dosages.get(&r.medicine).map(str::to_string),
                diagnosis: r.source_row.and_then(|i| request.diagnoses.get(i).cloned()),
                medicine: r.medicine,
                confidence_percent: r.confidence_percent,
            })
            .collect();

        Ok(PredictionResponse {
            client: self.client.clone(),
            policy: options.policy,
            predictions,
        })
    }
}
