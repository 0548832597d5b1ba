//! Field vocabulary and the raw training record.
//!
//! Categorical fields are one-hot expanded; numeric fields pass through after
//! coercion. Numeric values arrive as free-form text (spreadsheet cells) or
//! JSON values (requests) and a value that does not coerce is treated as
//! missing rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categorical input fields, in feature-schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalField {
    Diagnosis,
    Breed,
}

impl CategoricalField {
    pub const ALL: [CategoricalField; 2] = [Self::Diagnosis, Self::Breed];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Diagnosis => "diagnosis",
            Self::Breed => "breed",
        }
    }

    /// Encoded column name for one observed value: `<field>_<value>`.
    pub fn column(&self, value: &str) -> String {
        format!("{}_{}", self.name(), value)
    }
}

/// Numeric input fields, in feature-schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    NumCalvings,
    Age,
    MonthsPregnant,
    MonthsSinceCalving,
    AvgLpd,
}

impl NumericField {
    pub const ALL: [NumericField; 5] = [
        Self::NumCalvings,
        Self::Age,
        Self::MonthsPregnant,
        Self::MonthsSinceCalving,
        Self::AvgLpd,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NumCalvings => "num_calvings",
            Self::Age => "age",
            Self::MonthsPregnant => "months_pregnant",
            Self::MonthsSinceCalving => "months_since_calving",
            Self::AvgLpd => "avg_lpd",
        }
    }
}

/// One training example, as produced by joining the observation and
/// prescription tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub diagnosis: Option<String>,
    pub breed: Option<String>,
    pub num_calvings: Option<String>,
    pub age: Option<String>,
    pub months_pregnant: Option<String>,
    pub months_since_calving: Option<String>,
    pub avg_lpd: Option<String>,
    /// Target label.
    pub medicine: Option<String>,
    /// Dosage text from the prescription table, when present.
    pub dosage: Option<String>,
}

impl RawRecord {
    /// Non-blank categorical value, trimmed.
    pub fn categorical(&self, field: CategoricalField) -> Option<&str> {
        let raw = match field {
            CategoricalField::Diagnosis => self.diagnosis.as_deref(),
            CategoricalField::Breed => self.breed.as_deref(),
        };
        non_blank(raw)
    }

    /// Raw text of a numeric field.
    pub fn numeric_text(&self, field: NumericField) -> Option<&str> {
        match field {
            NumericField::NumCalvings => self.num_calvings.as_deref(),
            NumericField::Age => self.age.as_deref(),
            NumericField::MonthsPregnant => self.months_pregnant.as_deref(),
            NumericField::MonthsSinceCalving => self.months_since_calving.as_deref(),
            NumericField::AvgLpd => self.avg_lpd.as_deref(),
        }
    }

    /// Coerced numeric value; `None` when absent or not a number.
    pub fn numeric(&self, field: NumericField) -> Option<f32> {
        self.numeric_text(field).and_then(coerce_str)
    }

    pub fn medicine(&self) -> Option<&str> {
        non_blank(self.medicine.as_deref())
    }

    pub fn dosage(&self) -> Option<&str> {
        non_blank(self.dosage.as_deref())
    }

    /// True when every field required for training is present and coercible.
    pub fn is_complete(&self) -> bool {
        CategoricalField::ALL
            .iter()
            .all(|&f| self.categorical(f).is_some())
            && NumericField::ALL.iter().all(|&f| self.numeric(f).is_some())
            && self.medicine().is_some()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Coerce free-form text to a number. Blank, unparseable or non-finite text
/// (including values beyond the `f32` range) is missing.
pub fn coerce_str(text: &str) -> Option<f32> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok().and_then(finite_f32)
}

/// Coerce a JSON value to a number. Strings are parsed, booleans map to 0/1,
/// everything else is missing.
pub fn coerce_value(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().and_then(finite_f32),
        Value::String(s) => coerce_str(s),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn finite_f32(v: f64) -> Option<f32> {
    Some(v as f32).filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> RawRecord {
        RawRecord {
            diagnosis: Some("Mastitis".into()),
            breed: Some("Jersey".into()),
            num_calvings: Some("2".into()),
            age: Some("4.5".into()),
            months_pregnant: Some("0".into()),
            months_since_calving: Some("3".into()),
            avg_lpd: Some("12".into()),
            medicine: Some("Ceftiofur".into()),
            dosage: None,
        }
    }

    #[test]
    fn column_names_join_field_and_value() {
        assert_eq!(
            CategoricalField::Diagnosis.column("Mastitis"),
            "diagnosis_Mastitis"
        );
        assert_eq!(CategoricalField::Breed.column("HF Cross"), "breed_HF Cross");
    }

    #[test]
    fn coerce_text() {
        assert_eq!(coerce_str(" 3 "), Some(3.0));
        assert_eq!(coerce_str("4.25"), Some(4.25));
        assert_eq!(coerce_str(""), None);
        assert_eq!(coerce_str("two"), None);
        assert_eq!(coerce_str("NaN"), None);
    }

    #[test]
    fn non_finite_numbers_are_missing() {
        assert_eq!(coerce_str("inf"), None);
        assert_eq!(coerce_str("-infinity"), None);
        // Finite as f64, infinite once narrowed.
        assert_eq!(coerce_str("1e39"), None);
        assert_eq!(coerce_value(&json!(1e39)), None);
        assert_eq!(coerce_value(&json!("inf")), None);
        // Large but representable values are kept.
        assert_eq!(coerce_str("1e20"), Some(1e20));
        assert_eq!(coerce_value(&json!(1e20)), Some(1e20));
    }

    #[test]
    fn coerce_json() {
        assert_eq!(coerce_value(&json!(5)), Some(5.0));
        assert_eq!(coerce_value(&json!("7.5")), Some(7.5));
        assert_eq!(coerce_value(&json!("")), None);
        assert_eq!(coerce_value(&json!(null)), None);
        assert_eq!(coerce_value(&json!(true)), Some(1.0));
        assert_eq!(coerce_value(&json!([1])), None);
    }

    #[test]
    fn complete_record() {
        assert!(complete().is_complete());
    }

    #[test]
    fn non_numeric_field_makes_record_incomplete() {
        let mut rec = complete();
        rec.age = Some("unknown".into());
        assert!(!rec.is_complete());
    }

    #[test]
    fn blank_categorical_makes_record_incomplete() {
        let mut rec = complete();
        rec.breed = Some("  ".into());
        assert!(!rec.is_complete());

        let mut rec = complete();
        rec.medicine = None;
        assert!(!rec.is_complete());
    }

    #[test]
    fn categorical_values_are_trimmed() {
        let mut rec = complete();
        rec.diagnosis = Some(" Mastitis ".into());
        assert_eq!(rec.categorical(CategoricalField::Diagnosis), Some("Mastitis"));
    }
}
