//! Human-readable and JSON output for the `herdrx` binary.
//!
//! JSON goes to stdout. Logs go to stderr, so stdout stays machine-readable.

use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;
use herdrx_core::{CategoricalField, FeatureSchema, PredictionResponse};
use serde::Serialize;

/// Print any serializable value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a prediction as a vertical card.
pub fn print_prediction_card(response: &PredictionResponse) {
    println!("=== {} ===", response.client);
    println!("policy: {}", response.policy.as_str());
    println!();
    if response.predictions.is_empty() {
        println!("  (no recommendations)");
        return;
    }
    for (rank, p) in response.predictions.iter().enumerate() {
        println!(
            "  {:>2}. {:<26} {:>5.1}%",
            rank + 1,
            p.medicine,
            p.confidence_percent
        );
        if let Some(dosage) = &p.dosage {
            println!("      {:<26} {}", "dosage", dosage);
        }
        if let Some(diagnosis) = &p.diagnosis {
            println!("      {:<26} {}", "for", diagnosis);
        }
    }
}

/// Render a feature matrix as an ASCII table, one column per schema entry.
pub fn format_matrix(batch: &RecordBatch) -> anyhow::Result<String> {
    Ok(pretty_format_batches(std::slice::from_ref(batch))?.to_string())
}

/// Print the categorical values a schema knows, grouped by field.
pub fn print_vocab(client: &str, schema: &FeatureSchema) {
    println!("=== {client} ===");
    println!();
    for field in CategoricalField::ALL {
        let values = schema.known_values(field);
        println!("{} ({})", field.name(), values.len());
        for value in values {
            println!("  {value}");
        }
        println!();
    }
}
