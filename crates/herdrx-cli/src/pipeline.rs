//! Orchestration between the training tables, the model layer and the
//! artifact store.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use herdrx_ai::{CentroidClassifier, ClientModel, DosageTable, LabelDecoder, TrainingSummary};
use herdrx_core::{FeatureSchema, PredictionRequest, ValidatedRequest};
use herdrx_store::{
    ArtifactStore, DECODER_FILE, DOSAGES_FILE, MODEL_FILE, SCHEMA_FILE, TrainingStore,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{RequestInput, Settings};
use crate::error::AppError;

/// Result of training one client.
#[derive(Debug, Serialize)]
pub struct TrainOutcome {
    pub client: String,
    pub version: String,
    #[serde(flatten)]
    pub summary: TrainingSummary,
    pub elapsed_secs: f64,
}

/// Per-client results of a bulk retrain.
#[derive(Debug, Default, Serialize)]
pub struct RetrainReport {
    pub trained: Vec<TrainOutcome>,
    pub failed: Vec<RetrainFailure>,
}

#[derive(Debug, Serialize)]
pub struct RetrainFailure {
    pub client: String,
    pub status: u16,
    pub error: String,
}

/// Load a client's tables, train, and publish a new artifact version.
///
/// Nothing is published when any step fails; the previous version stays live.
pub fn train_client(settings: &Settings, client: &str) -> Result<TrainOutcome, AppError> {
    let start = Instant::now();
    let store = ArtifactStore::new(&settings.models_dir);
    // Validate the name before touching the data directory.
    store.current_version(client)?;

    let tables = TrainingStore::open()?;
    tables.load_client_dir(&settings.data_dir.join(client))?;
    let records = tables.raw_records()?;

    let (model, summary) = ClientModel::<CentroidClassifier>::train(client, &records)?;

    let mut staged = store.stage(client)?;
    staged.write_json(MODEL_FILE, model.classifier())?;
    staged.write_json(DECODER_FILE, model.decoder())?;
    staged.write_json(SCHEMA_FILE, model.schema())?;
    staged.write_json(DOSAGES_FILE, model.dosages())?;
    staged.set_summary(&summary)?;
    let version = staged.publish()?;

    Ok(TrainOutcome {
        client: client.to_string(),
        version,
        summary,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

/// Train every sub-directory of the data directory, continuing past failures.
pub fn retrain_all(settings: &Settings) -> Result<RetrainReport, AppError> {
    let clients = data_clients(&settings.data_dir)?;
    info!(count = clients.len(), data_dir = %settings.data_dir.display(), "retraining clients");

    let mut report = RetrainReport::default();
    for client in clients {
        match train_client(settings, &client) {
            Ok(outcome) => report.trained.push(outcome),
            Err(err) => {
                warn!(client = %client, error = %err, "training failed");
                report.failed.push(RetrainFailure {
                    client,
                    status: err.status_code(),
                    error: err.to_string(),
                });
            }
        }
    }
    info!(
        trained = report.trained.len(),
        failed = report.failed.len(),
        "retrain finished"
    );
    Ok(report)
}

/// Load the live artifact set for `client`.
pub fn load_model(settings: &Settings, client: &str) -> Result<ClientModel, AppError> {
    let reader = ArtifactStore::new(&settings.models_dir).open(client)?;
    let schema: FeatureSchema = reader.read_json(SCHEMA_FILE)?;
    let decoder: LabelDecoder = reader.read_json(DECODER_FILE)?;
    let classifier: CentroidClassifier = reader.read_json(MODEL_FILE)?;
    let dosages: DosageTable = reader.read_optional_json(DOSAGES_FILE)?.unwrap_or_default();
    info!(
        client,
        version = reader.version(),
        features = schema.len(),
        classes = decoder.len(),
        "loaded model"
    );
    Ok(ClientModel::new(client, schema, decoder, classifier, dosages)?)
}

/// Read and validate a request body.
pub fn read_request(input: &RequestInput) -> Result<ValidatedRequest, AppError> {
    let body = match (&input.request, &input.file) {
        (Some(inline), _) => inline.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("reading request from {}", path.display()))?,
        (None, None) => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading request from stdin")?;
            buf
        }
    };
    Ok(PredictionRequest::from_json(&body)?.validate()?)
}

/// Sub-directories of `data_dir` that look like client names, sorted.
fn data_clients(data_dir: &Path) -> Result<Vec<String>, AppError> {
    let entries = fs::read_dir(data_dir)
        .with_context(|| format!("listing data directory {}", data_dir.display()))?;
    let mut clients = Vec::new();
    for entry in entries {
        let entry = entry.context("reading data directory entry")?;
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if !name.starts_with('.') => clients.push(name),
            _ => {}
        }
    }
    clients.sort();
    Ok(clients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use herdrx_ai::PredictOptions;
    use herdrx_core::PipelineError;
    use std::path::PathBuf;

    const PRESCRIPTIONS: &str = "\
Diagnosis,Medicine,Dosage
Mastitis,Ceftiofur,10 ml
Bloat,Tympanyl,100 ml oral
";

    fn observations() -> String {
        let mut csv = String::from("care_calendar_id,Observation,Response,Diagnosis\n");
        for (case, diagnosis, breed, age) in [
            ("c1", "Mastitis", "Jersey", "5"),
            ("c2", "Mastitis", "Jersey", "6"),
            ("c3", "Bloat", "HF", "3"),
            ("c4", "Bloat", "HF", "4"),
        ] {
            for (obs, value) in [
                ("Breed", breed),
                ("No. of Calvings", "2"),
                ("Age as of 24-Feb-2025", age),
                ("Months Pregnant as of 24-Feb-2025", "0"),
                ("Months Since Calving As of 24-Feb-2025", "3"),
                ("Average Animal LPD", "11"),
            ] {
                csv.push_str(&format!("{case},{obs},{value},{diagnosis}\n"));
            }
        }
        csv
    }

    fn settings(root: &Path) -> Settings {
        Settings {
            models_dir: root.join("models"),
            data_dir: root.join("client_data"),
        }
    }

    fn write_client(settings: &Settings, client: &str, observations: &str) -> PathBuf {
        let dir = settings.data_dir.join(client);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("observations.csv"), observations).unwrap();
        fs::write(dir.join("prescriptions.csv"), PRESCRIPTIONS).unwrap();
        dir
    }

    fn inline(body: &str) -> RequestInput {
        RequestInput {
            request: Some(body.to_string()),
            file: None,
        }
    }

    #[test]
    fn train_then_predict() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        write_client(&settings, "farm_a", &observations());

        let outcome = train_client(&settings, "farm_a").unwrap();
        assert_eq!(outcome.summary.records_used, 4);
        assert_eq!(outcome.summary.classes, 2);

        let model = load_model(&settings, "farm_a").unwrap();
        let request = read_request(&inline(r#"{"diagnosis": "Bloat", "breed": "HF"}"#)).unwrap();
        let response = model.predict(&request, PredictOptions::default()).unwrap();
        assert_eq!(response.predictions[0].medicine, "Tympanyl");
        assert_eq!(response.predictions[0].dosage.as_deref(), Some("100 ml oral"));
    }

    #[test]
    fn untrained_client_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_model(&settings(tmp.path()), "farm_z").unwrap_err();
        assert!(matches!(
            err,
            AppError::Pipeline(PipelineError::ClientNotFound { .. })
        ));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn failed_retrain_keeps_previous_model() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        let dir = write_client(&settings, "farm_a", &observations());
        let first = train_client(&settings, "farm_a").unwrap();

        // No prescription matches these diagnoses, so the join is empty.
        let unmatched = observations()
            .replace("Mastitis", "Fever")
            .replace("Bloat", "Fever");
        fs::write(dir.join("observations.csv"), unmatched).unwrap();
        let err = train_client(&settings, "farm_a").unwrap_err();
        assert_eq!(err.status_code(), 422);

        let store = ArtifactStore::new(&settings.models_dir);
        assert_eq!(
            store.current_version("farm_a").unwrap().as_deref(),
            Some(first.version.as_str())
        );
        assert!(load_model(&settings, "farm_a").is_ok());
    }

    #[test]
    fn retrain_all_continues_past_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings(tmp.path());
        write_client(&settings, "farm_a", &observations());
        write_client(&settings, "farm_b", &observations());
        // No input files at all.
        fs::create_dir_all(settings.data_dir.join("farm_c")).unwrap();

        let report = retrain_all(&settings).unwrap();
        let trained: Vec<&str> = report.trained.iter().map(|o| o.client.as_str()).collect();
        assert_eq!(trained, vec!["farm_a", "farm_b"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].client, "farm_c");
        assert_eq!(report.failed[0].status, 500);
    }

    #[test]
    fn missing_diagnosis_rejected_before_model_load() {
        let err = read_request(&inline(r#"{"breed": "HF"}"#)).unwrap_err();
        assert!(matches!(err, AppError::Pipeline(PipelineError::MissingDiagnosis)));
        let err = read_request(&inline("[1, 2]")).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn request_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("req.json");
        fs::write(&path, r#"{"diagnosis": ["Bloat", "Mastitis"]}"#).unwrap();
        let req = read_request(&RequestInput {
            request: None,
            file: Some(path),
        })
        .unwrap();
        assert_eq!(req.diagnoses, vec!["Bloat", "Mastitis"]);
    }
}
