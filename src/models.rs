use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tracing::warn;

use crate::reading_level::ReadingLevel;

/// Canonical string form of a document identifier. Upstream documents store
/// ids as plain strings, `{"$oid": ..}` objects or numbers; every join goes
/// through this type so heterogeneous representations compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(value: impl Into<String>) -> Self {
        DocumentId(value.into().trim().to_string())
    }

    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => DocumentId::new(s.as_str()),
            Value::Number(n) => DocumentId(n.to_string()),
            Value::Object(map) => map
                .get("$oid")
                .or_else(|| map.get("_id"))
                .or_else(|| map.get("id"))
                .map(DocumentId::from_value)
                .unwrap_or_default(),
            _ => DocumentId::default(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(DocumentId::from_value(&value))
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Field deserializers that turn wrong-typed values into defaults instead of
/// failing the whole document.
pub mod lenient {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::DocumentId;

    pub fn as_number(value: &Value) -> Option<f64> {
        let number = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Object(map) => map
                .get("$numberInt")
                .or_else(|| map.get("$numberDouble"))
                .or_else(|| map.get("$numberLong"))
                .and_then(as_number),
            _ => None,
        };
        number.filter(|n| n.is_finite())
    }

    pub fn as_string(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::String(s) => parse_date_str(s.trim()),
            Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
            Value::Object(map) => {
                if let Some(inner) = map.get("$date") {
                    as_date(inner)
                } else {
                    map.get("$numberLong")
                        .and_then(as_number)
                        .and_then(|millis| DateTime::<Utc>::from_timestamp_millis(millis as i64))
                }
            }
            _ => None,
        }
    }

    fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
            return Some(parsed.with_timezone(&Utc));
        }
        if let Ok(parsed) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(parsed.and_utc());
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    fn raw<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
        Option::<Value>::deserialize(deserializer)
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        Ok(raw(deserializer)?.as_ref().and_then(as_number))
    }

    pub fn number_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(number(deserializer)?.unwrap_or(0.0))
    }

    pub fn integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        Ok(number(deserializer)?.map(|n| n.round() as i64))
    }

    pub fn boolean<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
        Ok(match raw(deserializer)? {
            Some(Value::Bool(b)) => Some(b),
            Some(Value::String(s)) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(boolean(deserializer)?.unwrap_or(false))
    }

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(raw(deserializer)?.as_ref().and_then(as_string))
    }

    /// Reading levels show up as labels or as a bare `false`.
    pub fn level<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
        Ok(match raw(deserializer)? {
            Some(Value::Bool(false)) => None,
            other => other.as_ref().and_then(as_string),
        })
    }

    pub fn date<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Ok(raw(deserializer)?.as_ref().and_then(as_date))
    }

    pub fn optional_id<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DocumentId>, D::Error> {
        Ok(raw(deserializer)?
            .as_ref()
            .map(DocumentId::from_value)
            .filter(|id| !id.is_empty()))
    }

    pub fn vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(optional_vec(deserializer)?.unwrap_or_default())
    }

    /// `None` when the field is missing or not an array; elements that do not
    /// decode are dropped.
    pub fn optional_vec<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(match raw(deserializer)? {
            Some(Value::Array(items)) => Some(
                items
                    .into_iter()
                    .filter_map(|item| serde_json::from_value(item).ok())
                    .collect(),
            ),
            _ => None,
        })
    }

    /// Decodes an embedded object, yielding `None` for anything that is not
    /// an object or does not fit `T`.
    pub fn optional_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        Ok(match raw(deserializer)? {
            Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
            _ => None,
        })
    }

    pub fn object<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<serde_json::Map<String, Value>, D::Error> {
        Ok(match raw(deserializer)? {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentRecord {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(deserialize_with = "lenient::string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub first_name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub middle_name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub last_name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub section: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub grade_level: Option<String>,
    /// Older documents store the grade under `grade`.
    #[serde(deserialize_with = "lenient::string")]
    pub grade: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub gender: Option<String>,
    #[serde(deserialize_with = "lenient::integer")]
    pub age: Option<i64>,
    #[serde(deserialize_with = "lenient::level")]
    pub reading_level: Option<String>,
    #[serde(deserialize_with = "lenient::flag")]
    pub pre_assessment_completed: bool,
    #[serde(deserialize_with = "lenient::optional_id")]
    pub parent_id: Option<DocumentId>,
    #[serde(deserialize_with = "lenient::date")]
    pub last_assessment_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::optional_vec")]
    pub completed_lessons: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryEntry {
    #[serde(deserialize_with = "lenient::string")]
    pub category_name: Option<String>,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub total_questions: f64,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub correct_answers: f64,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub score: f64,
    #[serde(deserialize_with = "lenient::boolean")]
    pub is_passed: Option<bool>,
    #[serde(deserialize_with = "lenient::number")]
    pub passing_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryResult {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub student_id: DocumentId,
    #[serde(deserialize_with = "lenient::date")]
    pub assessment_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::date")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::level")]
    pub reading_level: Option<String>,
    #[serde(deserialize_with = "lenient::number_or_zero")]
    pub overall_score: f64,
    #[serde(deserialize_with = "lenient::flag")]
    pub all_categories_passed: bool,
    #[serde(deserialize_with = "lenient::vec")]
    pub categories: Vec<CategoryEntry>,
}

impl CategoryResult {
    /// Date used to pick the latest result per student.
    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created_at.or(self.assessment_date)
    }

    /// Date used to place the result on the progress timeline.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.assessment_date.or(self.created_at)
    }

    pub fn reading_level(&self) -> ReadingLevel {
        ReadingLevel::normalize(self.reading_level.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterventionProgress {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub student_id: DocumentId,
    pub intervention_plan_id: DocumentId,
    #[serde(deserialize_with = "lenient::integer")]
    pub completed_activities: Option<i64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub total_activities: Option<i64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub correct_answers: Option<i64>,
    #[serde(deserialize_with = "lenient::integer")]
    pub incorrect_answers: Option<i64>,
    #[serde(deserialize_with = "lenient::number")]
    pub percent_complete: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub percent_correct: Option<f64>,
    #[serde(deserialize_with = "lenient::flag")]
    pub passed_threshold: bool,
    #[serde(deserialize_with = "lenient::date")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::date")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::string")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterventionPlan {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(deserialize_with = "lenient::string")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub category: Option<String>,
    #[serde(deserialize_with = "lenient::level")]
    pub reading_level: Option<String>,
}

/// Every collection the dashboard reads, already decoded.
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub students: Vec<StudentRecord>,
    pub category_results: Vec<CategoryResult>,
    pub intervention_progress: Vec<InterventionProgress>,
    pub intervention_plans: Vec<InterventionPlan>,
    pub prescriptive_analyses: Vec<Value>,
}

/// Decodes raw documents, logging and skipping the ones that do not fit `T`.
pub fn decode_documents<T, I>(collection: &str, documents: I) -> Vec<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = Value>,
{
    documents
        .into_iter()
        .map(normalize_id)
        .filter_map(|doc| {
            let id = doc.get("_id").map(DocumentId::from_value).unwrap_or_default();
            match serde_json::from_value::<T>(doc) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(collection, id = %id, error = %err, "skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

/// Folds a bare `id` key into `_id`. When both are present `_id` wins and
/// `id` is discarded.
pub fn normalize_id(mut doc: Value) -> Value {
    if let Value::Object(map) = &mut doc {
        if let Some(id) = map.remove("id") {
            map.entry("_id").or_insert(id);
        }
    }
    doc
}

/// Makes sure a stored document carries its row id as `_id`.
pub fn with_id(id: &str, doc: Value) -> Value {
    let mut doc = normalize_id(doc);
    if let Value::Object(map) = &mut doc {
        map.entry("_id")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    doc
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentViewModel {
    pub id: DocumentId,
    pub unique_id: String,
    pub name: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub section: Option<String>,
    pub grade_level: Option<String>,
    pub gender: Option<String>,
    pub age: Option<i64>,
    pub reading_level: ReadingLevel,
    pub pre_assessment_completed: bool,
    pub parent_id: Option<DocumentId>,
    pub last_assessment_date: Option<DateTime<Utc>>,
    pub completion_rate: u32,
    pub last_score: u32,
    pub improvement_categories: Vec<String>,
    pub needs_attention: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingLevelBucket {
    pub name: ReadingLevel,
    pub value: usize,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressPoint {
    pub name: String,
    pub progress: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelProgress {
    pub weekly: Vec<ProgressPoint>,
    pub monthly: Vec<ProgressPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_students: usize,
    pub completion_rate: u32,
    pub average_score: u32,
    pub pending_edits: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedInterventionProgress {
    #[serde(flatten)]
    pub progress: InterventionProgress,
    pub student_name: String,
    pub student_reading_level: String,
    pub intervention_plan_name: String,
    pub category: String,
    pub reading_level: String,
    pub last_activity_formatted: String,
    pub created_at_formatted: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPayload {
    pub students: Vec<StudentViewModel>,
    pub students_needing_attention: Vec<StudentViewModel>,
    pub reading_level_distribution: Vec<ReadingLevelBucket>,
    pub metrics: Metrics,
    pub prescriptive_data: Vec<Value>,
    pub sections: Vec<String>,
    pub progress_data: BTreeMap<String, LevelProgress>,
    pub intervention_progress: Vec<EnrichedInterventionProgress>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn ids_coerce_to_one_string_form() {
        let plain = DocumentId::from_value(&json!("64b7f0c2a1"));
        let oid = DocumentId::from_value(&json!({ "$oid": "64b7f0c2a1" }));
        let nested = DocumentId::from_value(&json!({ "_id": { "$oid": "64b7f0c2a1" } }));
        assert_eq!(plain, oid);
        assert_eq!(plain, nested);
        assert_eq!(DocumentId::from_value(&json!(42)).as_str(), "42");
        assert!(DocumentId::from_value(&json!(null)).is_empty());
    }

    #[test]
    fn category_result_tolerates_wrong_typed_fields() {
        let result: CategoryResult = serde_json::from_value(json!({
            "_id": "r1",
            "studentId": { "$oid": "s1" },
            "createdAt": { "$date": "2026-03-02T10:00:00Z" },
            "overallScore": "85",
            "allCategoriesPassed": "true",
            "categories": "not-a-list"
        }))
        .unwrap();

        assert_eq!(result.student_id.as_str(), "s1");
        assert_eq!(result.overall_score, 85.0);
        assert!(result.all_categories_passed);
        assert!(result.categories.is_empty());
        assert_eq!(
            result.created_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn category_entries_that_do_not_decode_are_dropped() {
        let result: CategoryResult = serde_json::from_value(json!({
            "studentId": "s1",
            "categories": [
                { "categoryName": "Decoding", "totalQuestions": 10, "correctAnswers": "7", "isPassed": false },
                "garbage"
            ]
        }))
        .unwrap();

        assert_eq!(result.categories.len(), 1);
        assert_eq!(result.categories[0].correct_answers, 7.0);
        assert_eq!(result.categories[0].is_passed, Some(false));
    }

    #[test]
    fn dates_accept_plain_days_and_epoch_millis() {
        let day = lenient::as_date(&json!("2026-01-15")).unwrap();
        assert_eq!(day, Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap());

        let millis = lenient::as_date(&json!({ "$date": { "$numberLong": "1768435200000" } }));
        assert_eq!(millis, Some(Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap()));

        assert_eq!(lenient::as_date(&json!("yesterday")), None);
    }

    #[test]
    fn student_reading_level_false_is_absent() {
        let student: StudentRecord = serde_json::from_value(json!({
            "_id": "s1",
            "firstName": "Ana",
            "readingLevel": false,
            "preAssessmentCompleted": true
        }))
        .unwrap();

        assert_eq!(student.reading_level, None);
        assert!(student.pre_assessment_completed);
        assert!(student.completed_lessons.is_none());
    }

    #[test]
    fn with_id_fills_missing_identifier_only() {
        let filled = with_id("row-1", json!({ "name": "x" }));
        assert_eq!(filled["_id"], json!("row-1"));

        let kept = with_id("row-1", json!({ "_id": "doc-9" }));
        assert_eq!(kept["_id"], json!("doc-9"));
    }

    #[test]
    fn with_id_prefers_existing_identifiers() {
        let moved = with_id("row-1", json!({ "id": "doc-3" }));
        assert_eq!(moved["_id"], json!("doc-3"));
        assert!(moved.get("id").is_none());
    }

    #[test]
    fn documents_with_both_id_keys_still_decode() {
        let students: Vec<StudentRecord> = decode_documents(
            "students",
            vec![json!({ "_id": "s1", "id": "s1", "firstName": "Ana", "grade": "Grade 2" })],
        );
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].id.as_str(), "s1");
        assert_eq!(students[0].grade.as_deref(), Some("Grade 2"));

        let results: Vec<CategoryResult> = decode_documents(
            "category_results",
            vec![
                json!({ "_id": "r1", "id": "virtual-r1", "studentId": "s1", "overallScore": 80 }),
                json!({ "id": "r2", "studentId": "s1" }),
            ],
        );
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id.as_str(), "r1");
        assert_eq!(results[1].id.as_str(), "r2");
    }

    #[test]
    fn decode_skips_documents_of_the_wrong_shape() {
        let records: Vec<InterventionPlan> = decode_documents(
            "intervention_plans",
            vec![json!({ "_id": "p1", "name": "Phonics Boost" }), json!("not an object")],
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name.as_deref(), Some("Phonics Boost"));
    }
}
