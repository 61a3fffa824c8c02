use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::Result;
use crate::models::{decode_documents, lenient, Collections};
use crate::pre_assessment::{PreAssessment, PreAssessmentResponse};

/// A `null` or non-array collection reads as empty.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSnapshot {
    #[serde(deserialize_with = "lenient::vec")]
    students: Vec<Value>,
    #[serde(deserialize_with = "lenient::vec")]
    category_results: Vec<Value>,
    #[serde(deserialize_with = "lenient::vec")]
    intervention_progress: Vec<Value>,
    #[serde(deserialize_with = "lenient::vec")]
    intervention_plans: Vec<Value>,
    #[serde(deserialize_with = "lenient::vec")]
    prescriptive_analyses: Vec<Value>,
    #[serde(deserialize_with = "lenient::vec")]
    pre_assessments: Vec<Value>,
    #[serde(deserialize_with = "lenient::vec")]
    pre_assessment_responses: Vec<Value>,
}

/// All collections exported into a single JSON file.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub collections: Collections,
    pub pre_assessments: Vec<PreAssessment>,
    pub responses: Vec<PreAssessmentResponse>,
}

impl Snapshot {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            students = snapshot.collections.students.len(),
            category_results = snapshot.collections.category_results.len(),
            "loaded snapshot"
        );
        Ok(snapshot)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let raw: RawSnapshot = serde_json::from_str(raw)?;

        Ok(Snapshot {
            collections: Collections {
                students: decode_documents("students", raw.students),
                category_results: decode_documents("category_results", raw.category_results),
                intervention_progress: decode_documents(
                    "intervention_progress",
                    raw.intervention_progress,
                ),
                intervention_plans: decode_documents("intervention_plans", raw.intervention_plans),
                prescriptive_analyses: raw.prescriptive_analyses,
            },
            pre_assessments: decode_documents("pre_assessments", raw.pre_assessments),
            responses: decode_documents("pre_assessment_responses", raw.pre_assessment_responses),
        })
    }
}
