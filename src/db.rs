use chrono::{Duration, Utc};
use clap::ValueEnum;
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    decode_documents, normalize_id, with_id, Collections, DocumentId, StudentRecord,
};
use crate::pre_assessment::{PreAssessment, PreAssessmentResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Collection {
    Students,
    CategoryResults,
    InterventionProgress,
    InterventionPlans,
    PrescriptiveAnalyses,
    PreAssessments,
    PreAssessmentResponses,
}

impl Collection {
    pub fn table(self) -> &'static str {
        match self {
            Collection::Students => "students",
            Collection::CategoryResults => "category_results",
            Collection::InterventionProgress => "intervention_progress",
            Collection::InterventionPlans => "intervention_plans",
            Collection::PrescriptiveAnalyses => "prescriptive_analyses",
            Collection::PreAssessments => "pre_assessments",
            Collection::PreAssessmentResponses => "pre_assessment_responses",
        }
    }
}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn fetch_documents(pool: &PgPool, collection: Collection) -> Result<Vec<Value>> {
    let query = format!(
        "SELECT id, doc FROM reading_dashboard.{} ORDER BY created_at, id",
        collection.table()
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;

    let documents: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            let id: String = row.get("id");
            let Json(doc): Json<Value> = row.get("doc");
            with_id(&id, doc)
        })
        .collect();

    debug!(collection = collection.table(), count = documents.len(), "fetched documents");
    Ok(documents)
}

/// Reads every dashboard collection concurrently; any failed read fails the
/// whole fetch.
pub async fn fetch_collections(pool: &PgPool) -> Result<Collections> {
    let (students, category_results, intervention_progress, intervention_plans, prescriptive) = tokio::try_join!(
        fetch_documents(pool, Collection::Students),
        fetch_documents(pool, Collection::CategoryResults),
        fetch_documents(pool, Collection::InterventionProgress),
        fetch_documents(pool, Collection::InterventionPlans),
        fetch_documents(pool, Collection::PrescriptiveAnalyses),
    )?;

    let collections = Collections {
        students: decode_documents(Collection::Students.table(), students),
        category_results: decode_documents(Collection::CategoryResults.table(), category_results),
        intervention_progress: decode_documents(
            Collection::InterventionProgress.table(),
            intervention_progress,
        ),
        intervention_plans: decode_documents(
            Collection::InterventionPlans.table(),
            intervention_plans,
        ),
        prescriptive_analyses: prescriptive,
    };

    info!(
        students = collections.students.len(),
        category_results = collections.category_results.len(),
        intervention_progress = collections.intervention_progress.len(),
        intervention_plans = collections.intervention_plans.len(),
        prescriptive_analyses = collections.prescriptive_analyses.len(),
        "loaded dashboard collections"
    );
    Ok(collections)
}

pub async fn fetch_student(pool: &PgPool, id: &DocumentId) -> Result<Option<StudentRecord>> {
    let row = sqlx::query("SELECT id, doc FROM reading_dashboard.students WHERE id = $1")
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|row| {
        let Json(doc): Json<Value> = row.get("doc");
        decode_documents(Collection::Students.table(), [with_id(id.as_str(), doc)]).pop()
    }))
}

pub async fn fetch_pre_assessment_responses(
    pool: &PgPool,
    student_id: &DocumentId,
) -> Result<Vec<PreAssessmentResponse>> {
    let rows = sqlx::query(
        r#"
        SELECT id, doc FROM reading_dashboard.pre_assessment_responses
        WHERE doc->>'studentId' = $1 OR doc->'studentId'->>'$oid' = $1
        "#,
    )
    .bind(student_id.as_str())
    .fetch_all(pool)
    .await?;

    let documents = rows.into_iter().map(|row| {
        let id: String = row.get("id");
        let Json(doc): Json<Value> = row.get("doc");
        with_id(&id, doc)
    });
    Ok(decode_documents(Collection::PreAssessmentResponses.table(), documents))
}

pub async fn fetch_pre_assessment(
    pool: &PgPool,
    assessment_id: &DocumentId,
) -> Result<Vec<PreAssessment>> {
    let rows = sqlx::query("SELECT id, doc FROM reading_dashboard.pre_assessments WHERE id = $1")
        .bind(assessment_id.as_str())
        .fetch_all(pool)
        .await?;

    let documents = rows.into_iter().map(|row| {
        let id: String = row.get("id");
        let Json(doc): Json<Value> = row.get("doc");
        with_id(&id, doc)
    });
    Ok(decode_documents(Collection::PreAssessments.table(), documents))
}

pub async fn upsert_document(
    pool: &PgPool,
    collection: Collection,
    id: &str,
    doc: &Value,
) -> Result<u64> {
    let query = format!(
        r#"
        INSERT INTO reading_dashboard.{} (id, doc)
        VALUES ($1, $2)
        ON CONFLICT (id) DO UPDATE SET doc = EXCLUDED.doc
        "#,
        collection.table()
    );
    let result = sqlx::query(&query)
        .bind(id)
        .bind(Json(doc))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn seed(pool: &PgPool) -> Result<()> {
    let now = Utc::now();
    let days_ago = |days: i64| (now - Duration::days(days)).to_rfc3339();

    let students = vec![
        json!({
            "_id": "3d7f5d6f24f74e8e8b4b3e7e",
            "firstName": "Andrea", "middleName": "Lim", "lastName": "Santos",
            "section": "Sampaguita", "gradeLevel": "Grade 1", "gender": "Female", "age": 6,
            "readingLevel": "High Emerging", "preAssessmentCompleted": true,
            "parentId": "a1c2f1f1918441fd9b2128c6",
            "lastAssessmentDate": days_ago(3)
        }),
        json!({
            "_id": "0c22f1f191844fd49b2128c6",
            "firstName": "Miguel", "lastName": "Reyes",
            "section": "Unity", "gradeLevel": "Grade 1", "gender": "Male", "age": 7,
            "readingLevel": "Developing", "preAssessmentCompleted": true,
            "lastAssessmentDate": days_ago(10)
        }),
        json!({
            "_id": "d5a0a1a22a3c44c28f7360b7",
            "firstName": "Kiara", "lastName": "Dela Cruz",
            "section": "Dignity", "gradeLevel": "Grade 1", "gender": "Female", "age": 6,
            "readingLevel": "Early", "preAssessmentCompleted": false
        }),
        json!({
            "_id": "7b1e9c0d5f2a4b8c9d0e1f2a",
            "firstName": "Paolo", "lastName": "Garcia",
            "section": "Unity", "gradeLevel": "Grade 1", "gender": "Male", "age": 7,
            "readingLevel": false, "preAssessmentCompleted": false
        }),
    ];

    let category_results = vec![
        json!({
            "_id": "cr-001",
            "studentId": "3d7f5d6f24f74e8e8b4b3e7e",
            "assessmentDate": days_ago(3), "createdAt": days_ago(3),
            "readingLevel": "High Emerging", "overallScore": 72, "allCategoriesPassed": false,
            "categories": [
                { "categoryName": "Alphabet Knowledge", "totalQuestions": 10, "correctAnswers": 9, "score": 90, "isPassed": true, "passingThreshold": 75 },
                { "categoryName": "Phonological Awareness", "totalQuestions": 10, "correctAnswers": 6, "score": 60, "isPassed": false, "passingThreshold": 75 }
            ]
        }),
        json!({
            "_id": "cr-002",
            "studentId": "3d7f5d6f24f74e8e8b4b3e7e",
            "assessmentDate": days_ago(40), "createdAt": days_ago(40),
            "readingLevel": "Emergent", "overallScore": 58, "allCategoriesPassed": false,
            "categories": [
                { "categoryName": "Alphabet Knowledge", "totalQuestions": 10, "correctAnswers": 7, "score": 70, "isPassed": false, "passingThreshold": 75 }
            ]
        }),
        json!({
            "_id": "cr-003",
            "studentId": { "$oid": "0c22f1f191844fd49b2128c6" },
            "assessmentDate": days_ago(10), "createdAt": days_ago(10),
            "readingLevel": "Developing", "overallScore": 88, "allCategoriesPassed": true,
            "categories": [
                { "categoryName": "Word Recognition", "totalQuestions": 10, "correctAnswers": 9, "score": 90, "isPassed": true, "passingThreshold": 75 },
                { "categoryName": "Reading Comprehension", "totalQuestions": 5, "correctAnswers": 4, "score": 80, "isPassed": true, "passingThreshold": 75 }
            ]
        }),
    ];

    let plans = vec![json!({
        "_id": "plan-phonics-01",
        "name": "Sound It Out",
        "category": "Phonological Awareness",
        "readingLevel": "High Emerging"
    })];

    let progress = vec![json!({
        "_id": "ip-001",
        "studentId": "3d7f5d6f24f74e8e8b4b3e7e",
        "interventionPlanId": "plan-phonics-01",
        "completedActivities": 4, "totalActivities": 10,
        "correctAnswers": 14, "incorrectAnswers": 6,
        "percentComplete": 40, "percentCorrect": 70, "passedThreshold": false,
        "lastActivity": days_ago(1), "createdAt": days_ago(14),
        "notes": "Blending improving; rhyme recognition still slow"
    })];

    let analyses = vec![json!({
        "_id": "pa-analysis-001",
        "studentId": "3d7f5d6f24f74e8e8b4b3e7e",
        "categoryId": "Phonological Awareness",
        "readingLevel": "High Emerging",
        "strengths": "Recognizes all letters",
        "weaknesses": "Struggles with rhyme and syllable counting",
        "recommendations": "Daily five-minute rhyme games"
    })];

    let pre_assessments = vec![json!({
        "_id": "pre-assessment-en-g1",
        "title": "Grade 1 Reading Pre-Assessment",
        "language": "EN",
        "questions": [
            {
                "questionId": "q-alpha-1", "questionTypeId": "alphabet_knowledge",
                "questionText": "Which letter makes the /b/ sound?",
                "choiceOptions": [
                    { "optionId": "o1", "optionText": "B", "isCorrect": true },
                    { "optionId": "o2", "optionText": "D", "isCorrect": false }
                ]
            },
            {
                "questionId": "q-decode-1", "questionTypeId": "decoding",
                "questionText": "Read the word: c-a-t",
                "choiceOptions": [
                    { "optionId": "o3", "optionText": "cat", "isCorrect": true },
                    { "optionId": "o4", "optionText": "cot", "isCorrect": false }
                ]
            },
            {
                "questionId": "q-comp-1", "questionTypeId": "reading_comprehension",
                "passages": [{ "pageNumber": 1, "text": "Lina has a small brown dog named Bantay." }],
                "sentenceQuestion": {
                    "questionText": "What is the dog's name?",
                    "answerChoice1": "Bantay",
                    "answerChoice2": "Lina",
                    "correctAnswerChoice": "1"
                }
            }
        ]
    })];

    let responses = vec![json!({
        "_id": "resp-001",
        "studentId": "3d7f5d6f24f74e8e8b4b3e7e",
        "assessmentId": "pre-assessment-en-g1",
        "readingLevel": "High Emerging",
        "overallScore": 67, "totalQuestions": 3, "correctAnswers": 2,
        "answers": { "q-alpha-1": "o1", "q-decode-1": "o4", "q-comp-1": "Bantay" },
        "categoryScores": {
            "alphabet_knowledge": { "correct": 1, "total": 1, "score": 100 },
            "decoding": { "correct": 0, "total": 1, "score": 0 },
            "reading_comprehension": { "correct": 1, "total": 1, "score": 100 }
        },
        "completedAt": days_ago(20)
    })];

    let batches = [
        (Collection::Students, students),
        (Collection::CategoryResults, category_results),
        (Collection::InterventionPlans, plans),
        (Collection::InterventionProgress, progress),
        (Collection::PrescriptiveAnalyses, analyses),
        (Collection::PreAssessments, pre_assessments),
        (Collection::PreAssessmentResponses, responses),
    ];

    for (collection, documents) in batches {
        for doc in &documents {
            let id = DocumentId::from_value(&doc["_id"]);
            upsert_document(pool, collection, id.as_str(), doc).await?;
        }
        debug!(collection = collection.table(), count = documents.len(), "seeded");
    }

    Ok(())
}

pub async fn import_students_csv(pool: &PgPool, csv_path: &std::path::Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CsvRow {
        id: Option<String>,
        first_name: String,
        middle_name: Option<String>,
        last_name: String,
        section: Option<String>,
        grade_level: Option<String>,
        gender: Option<String>,
        age: Option<u32>,
        reading_level: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let id = row
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

        let doc = json!({
            "_id": id,
            "firstName": row.first_name,
            "middleName": row.middle_name,
            "lastName": row.last_name,
            "section": row.section,
            "gradeLevel": row.grade_level,
            "gender": row.gender,
            "age": row.age,
            "readingLevel": row.reading_level,
            "preAssessmentCompleted": false
        });

        if upsert_document(pool, Collection::Students, &id, &doc).await? > 0 {
            inserted += 1;
        }
    }

    info!(path = %csv_path.display(), inserted, "imported students");
    Ok(inserted)
}

/// Imports a JSON array of documents (mongoexport `--jsonArray` layout).
pub async fn import_documents(
    pool: &PgPool,
    collection: Collection,
    json_path: &std::path::Path,
) -> Result<usize> {
    let raw = std::fs::read_to_string(json_path)?;
    let documents: Vec<Value> = serde_json::from_str(&raw)?;
    let mut inserted = 0usize;

    for doc in documents.into_iter().map(normalize_id) {
        let id = doc
            .get("_id")
            .map(DocumentId::from_value)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| DocumentId::new(Uuid::new_v4().simple().to_string()));

        if upsert_document(pool, collection, id.as_str(), &doc).await? > 0 {
            inserted += 1;
        }
    }

    info!(
        collection = collection.table(),
        path = %json_path.display(),
        inserted,
        "imported documents"
    );
    Ok(inserted)
}
