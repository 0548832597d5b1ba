//! Prediction request and response contracts.
//!
//! Requests arrive as loosely-typed JSON. [`PredictionRequest::validate`]
//! turns one into a [`ValidatedRequest`] before any model is touched: the
//! diagnosis field is mandatory, every other field defaults to `""`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::record::NumericField;

/// Inbound prediction request, as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionRequest {
    #[serde(default)]
    pub diagnosis: Option<Value>,
    #[serde(default)]
    pub breed: Option<Value>,
    #[serde(default)]
    pub num_calvings: Option<Value>,
    #[serde(default)]
    pub age: Option<Value>,
    #[serde(default)]
    pub months_pregnant: Option<Value>,
    #[serde(default)]
    pub months_since_calving: Option<Value>,
    #[serde(default)]
    pub avg_lpd: Option<Value>,
}

impl PredictionRequest {
    /// Parse a JSON body. Anything other than a JSON object is malformed.
    pub fn from_json(body: &str) -> Result<Self, PipelineError> {
        let malformed = |e: serde_json::Error| PipelineError::MalformedRequest(e.to_string());
        let value: Value = serde_json::from_str(body).map_err(malformed)?;
        if !value.is_object() {
            return Err(PipelineError::MalformedRequest(
                "request body must be a JSON object".into(),
            ));
        }
        serde_json::from_value(value).map_err(malformed)
    }

    /// Validate at the boundary, checking the diagnosis before anything else.
    pub fn validate(self) -> Result<ValidatedRequest, PipelineError> {
        let diagnoses = parse_diagnoses(self.diagnosis.as_ref())?;
        let or_blank = |v: Option<Value>| v.unwrap_or_else(|| Value::String(String::new()));

        let attributes = AnimalAttributes {
            breed: category_text(self.breed.as_ref()),
            num_calvings: or_blank(self.num_calvings),
            age: or_blank(self.age),
            months_pregnant: or_blank(self.months_pregnant),
            months_since_calving: or_blank(self.months_since_calving),
            avg_lpd: or_blank(self.avg_lpd),
        };

        Ok(ValidatedRequest {
            diagnoses,
            attributes,
        })
    }
}

/// Attribute values shared by every diagnosis in one request.
///
/// Numeric values stay as received; the encoder coerces them.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimalAttributes {
    pub breed: String,
    pub num_calvings: Value,
    pub age: Value,
    pub months_pregnant: Value,
    pub months_since_calving: Value,
    pub avg_lpd: Value,
}

impl AnimalAttributes {
    pub fn numeric(&self, field: NumericField) -> &Value {
        match field {
            NumericField::NumCalvings => &self.num_calvings,
            NumericField::Age => &self.age,
            NumericField::MonthsPregnant => &self.months_pregnant,
            NumericField::MonthsSinceCalving => &self.months_since_calving,
            NumericField::AvgLpd => &self.avg_lpd,
        }
    }
}

/// A request that passed boundary validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    /// Non-empty; each entry becomes one classifier query.
    pub diagnoses: Vec<String>,
    pub attributes: AnimalAttributes,
}

fn parse_diagnoses(value: Option<&Value>) -> Result<Vec<String>, PipelineError> {
    let items: Vec<&Value> = match value {
        Some(v @ Value::String(_)) => vec![v],
        Some(Value::Array(items)) => items.iter().collect(),
        _ => return Err(PipelineError::MissingDiagnosis),
    };

    let mut diagnoses = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if !s.trim().is_empty() => diagnoses.push(s.trim().to_string()),
            _ => return Err(PipelineError::MissingDiagnosis),
        }
    }

    if diagnoses.is_empty() {
        return Err(PipelineError::MissingDiagnosis);
    }
    Ok(diagnoses)
}

/// Text of a categorical attribute. Non-scalar values mean "no category".
fn category_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Named aggregation strategy for multi-diagnosis requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionPolicy {
    /// Column-wise sum of the per-diagnosis probability rows.
    #[default]
    Summed,
    /// Union of each diagnosis's own top picks, first occurrence wins.
    Union,
}

impl FusionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summed => "summed",
            Self::Union => "union",
        }
    }
}

/// One ranked recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub medicine: String,
    pub confidence_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    /// Diagnosis that produced this pick (union policy only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<String>,
}

/// Successful prediction response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub client: String,
    pub policy: FusionPolicy,
    pub predictions: Vec<Prediction>,
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(err: &PipelineError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> Result<ValidatedRequest, PipelineError> {
        PredictionRequest::from_json(&body.to_string())?.validate()
    }

    #[test]
    fn single_diagnosis_string() {
        let req = request(json!({"diagnosis": "Mastitis", "breed": "Jersey"})).unwrap();
        assert_eq!(req.diagnoses, vec!["Mastitis"]);
        assert_eq!(req.attributes.breed, "Jersey");
    }

    #[test]
    fn diagnosis_list() {
        let req = request(json!({"diagnosis": ["Mastitis", "Bloat"]})).unwrap();
        assert_eq!(req.diagnoses, vec!["Mastitis", "Bloat"]);
    }

    #[test]
    fn missing_diagnosis_variants_rejected() {
        for body in [
            json!({"diagnosis": ""}),
            json!({"diagnosis": "   "}),
            json!({"diagnosis": []}),
            json!({"diagnosis": null}),
            json!({"diagnosis": 42}),
            json!({"diagnosis": ["Mastitis", 3]}),
            json!({"diagnosis": ["Mastitis", ""]}),
            json!({"breed": "Jersey", "age": 4}),
            json!({"breed": {"nested": true}, "age": "abc"}),
        ] {
            let err = request(body.clone()).unwrap_err();
            assert_eq!(err, PipelineError::MissingDiagnosis, "body: {body}");
        }
    }

    #[test]
    fn non_object_body_is_malformed() {
        let err = PredictionRequest::from_json("[1, 2]").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRequest(_)));
        let err = PredictionRequest::from_json("not json").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRequest(_)));
    }

    #[test]
    fn optional_fields_default_to_blank() {
        let req = request(json!({"diagnosis": "Bloat"})).unwrap();
        assert_eq!(req.attributes.breed, "");
        assert_eq!(req.attributes.age, json!(""));
        assert_eq!(req.attributes.numeric(NumericField::AvgLpd), &json!(""));
    }

    #[test]
    fn numeric_values_kept_as_received() {
        let req = request(json!({"diagnosis": "Bloat", "age": "4", "avg_lpd": 11.5})).unwrap();
        assert_eq!(req.attributes.numeric(NumericField::Age), &json!("4"));
        assert_eq!(req.attributes.numeric(NumericField::AvgLpd), &json!(11.5));
    }

    #[test]
    fn scalar_breed_becomes_text() {
        let req = request(json!({"diagnosis": "Bloat", "breed": 7})).unwrap();
        assert_eq!(req.attributes.breed, "7");
        let req = request(json!({"diagnosis": "Bloat", "breed": ["Jersey"]})).unwrap();
        assert_eq!(req.attributes.breed, "");
    }

    #[test]
    fn response_omits_absent_optional_fields() {
        let resp = PredictionResponse {
            client: "farm_a".into(),
            policy: FusionPolicy::Summed,
            predictions: vec![Prediction {
                medicine: "Ceftiofur".into(),
                confidence_percent: 60.0,
                dosage: None,
                diagnosis: None,
            }],
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            json!({
                "client": "farm_a",
                "policy": "summed",
                "predictions": [{"medicine": "Ceftiofur", "confidence_percent": 60.0}]
            })
        );
    }

    #[test]
    fn error_response_carries_message() {
        let body = ErrorResponse::from(&PipelineError::MissingDiagnosis);
        assert!(body.error.starts_with("diagnosis is required"));
    }
}
