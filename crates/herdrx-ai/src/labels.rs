//! Target labels: the medicine ↔ class-index decoder and the dosage lookup.
//!
//! Class indices are assigned in ascending medicine-name order. The classifier
//! is always fitted on indices produced by [`LabelDecoder::encode`], so class
//! `i` of the classifier is decoder index `i`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use herdrx_core::{PipelineError, RawRecord};
use serde::{Deserialize, Serialize};

/// Bijection between medicine name and dense class index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DecoderRepr", into = "DecoderRepr")]
pub struct LabelDecoder {
    classes: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct DecoderRepr {
    classes: Vec<String>,
}

impl LabelDecoder {
    /// Fit over the distinct labels; duplicates collapse, order is lexicographic.
    pub fn fit<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let distinct: BTreeSet<&str> = labels.into_iter().collect();
        Self {
            classes: distinct.into_iter().map(str::to_string).collect(),
        }
    }

    /// Class index for a medicine.
    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .ok()
    }

    /// Medicine for a class index.
    ///
    /// Indices come from the classifier, so an out-of-range index means the
    /// decoder and classifier have drifted apart.
    pub fn decode(&self, index: usize) -> Result<&str, PipelineError> {
        self.classes.get(index).map(String::as_str).ok_or_else(|| {
            PipelineError::invariant(format!(
                "class index {index} out of range for {} known medicines",
                self.classes.len()
            ))
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl TryFrom<DecoderRepr> for LabelDecoder {
    type Error = PipelineError;

    fn try_from(repr: DecoderRepr) -> Result<Self, Self::Error> {
        if repr.classes.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::invariant(
                "label classes must be unique and sorted",
            ));
        }
        Ok(Self {
            classes: repr.classes,
        })
    }
}

impl From<LabelDecoder> for DecoderRepr {
    fn from(decoder: LabelDecoder) -> Self {
        Self {
            classes: decoder.classes,
        }
    }
}

/// Most frequently prescribed dosage per medicine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DosageTable {
    dosages: BTreeMap<String, String>,
}

impl DosageTable {
    /// Mode of the dosage text per medicine; ties go to the smallest text.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RawRecord>) -> Self {
        let mut counts: HashMap<&str, BTreeMap<&str, usize>> = HashMap::new();
        for rec in records {
            if let (Some(medicine), Some(dosage)) = (rec.medicine(), rec.dosage()) {
                *counts
                    .entry(medicine)
                    .or_default()
                    .entry(dosage)
                    .or_insert(0) += 1;
            }
        }

        let mut dosages = BTreeMap::new();
        for (medicine, by_dosage) in counts {
            // BTreeMap iterates ascending, so the first maximum is the smallest text.
            let mut best: Option<(&str, usize)> = None;
            for (dosage, n) in by_dosage {
                if best.is_none_or(|(_, m)| n > m) {
                    best = Some((dosage, n));
                }
            }
            if let Some((dosage, _)) = best {
                dosages.insert(medicine.to_string(), dosage.to_string());
            }
        }
        Self { dosages }
    }

    pub fn get(&self, medicine: &str) -> Option<&str> {
        self.dosages.get(medicine).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.dosages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dosages.is_empty()
    }
}
