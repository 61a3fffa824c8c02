use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dashboard::{percent, to_score};
use crate::error::{DashboardError, Result};
use crate::interventions::{student_name, UNKNOWN_STUDENT};
use crate::models::{lenient, DocumentId, StudentRecord};
use crate::reading_level::ReadingLevel;

const READING_COMPREHENSION: &str = "reading_comprehension";
const GENERAL_CATEGORY: &str = "general";
const FOCUS_THRESHOLD: f64 = 75.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreAssessment {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(deserialize_with = "lenient::string")]
    pub title: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub language: Option<String>,
    #[serde(deserialize_with = "lenient::vec")]
    pub questions: Vec<AssessmentQuestion>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssessmentQuestion {
    pub question_id: DocumentId,
    #[serde(deserialize_with = "lenient::string")]
    pub question_type_id: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub question_type: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub question_text: Option<String>,
    #[serde(deserialize_with = "lenient::vec")]
    pub choice_options: Vec<ChoiceOption>,
    #[serde(deserialize_with = "lenient::vec")]
    pub passages: Vec<Value>,
    #[serde(deserialize_with = "lenient::optional_object")]
    pub comprehension_question: Option<ComprehensionQuestion>,
    #[serde(deserialize_with = "lenient::optional_object")]
    pub sentence_question: Option<ComprehensionQuestion>,
}

impl AssessmentQuestion {
    /// Category key source: `questionTypeId`, then the older `questionType`.
    pub fn category(&self) -> Option<&str> {
        self.question_type_id
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.question_type.as_deref())
    }

    /// Passage question, preferring `comprehensionQuestion` over the older
    /// `sentenceQuestion`.
    pub fn comprehension(&self) -> Option<&ComprehensionQuestion> {
        self.comprehension_question
            .as_ref()
            .or(self.sentence_question.as_ref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChoiceOption {
    pub option_id: DocumentId,
    #[serde(deserialize_with = "lenient::string")]
    pub option_text: Option<String>,
    #[serde(deserialize_with = "lenient::flag")]
    pub is_correct: bool,
}

/// Comprehension question attached to a passage, with two written answers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComprehensionQuestion {
    #[serde(deserialize_with = "lenient::string")]
    pub question_text: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub answer_choice1: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub answer_choice2: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub correct_answer_choice: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreAssessmentResponse {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    pub student_id: DocumentId,
    pub assessment_id: DocumentId,
    #[serde(deserialize_with = "lenient::string")]
    pub student_name: Option<String>,
    #[serde(deserialize_with = "lenient::level")]
    pub reading_level: Option<String>,
    #[serde(deserialize_with = "lenient::number")]
    pub overall_score: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub total_questions: Option<f64>,
    #[serde(deserialize_with = "lenient::number")]
    pub correct_answers: Option<f64>,
    #[serde(deserialize_with = "lenient::object")]
    pub answers: serde_json::Map<String, Value>,
    #[serde(deserialize_with = "lenient::object")]
    pub category_scores: serde_json::Map<String, Value>,
    #[serde(deserialize_with = "lenient::date")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::date")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StoredScore {
    correct: f64,
    total: f64,
    score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_id: DocumentId,
    pub question_text: Option<String>,
    pub student_answer: Option<String>,
    pub correct_answer: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScoreDetail {
    pub category: String,
    pub category_key: String,
    pub score: u32,
    pub correct: u32,
    pub total: u32,
    pub questions: Vec<QuestionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAssessmentResult {
    pub student_id: DocumentId,
    pub student_name: String,
    pub assessment_id: DocumentId,
    pub reading_level: ReadingLevel,
    pub overall_score: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub skill_details: Vec<CategoryScoreDetail>,
    pub focus_areas: Vec<String>,
    pub has_completed: bool,
}

/// Lowercase snake_case key used to match stored category scores.
pub fn normalize_category_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn category_display_name(key: &str) -> String {
    match key {
        "alphabet_knowledge" => "Alphabet Knowledge".to_string(),
        "phonological_awareness" => "Phonological Awareness".to_string(),
        "decoding" => "Decoding".to_string(),
        "word_recognition" => "Word Recognition".to_string(),
        READING_COMPREHENSION => "Reading Comprehension".to_string(),
        other => other
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn stored_scores(response: &PreAssessmentResponse) -> HashMap<String, StoredScore> {
    response
        .category_scores
        .iter()
        .filter_map(|(key, value)| {
            let field = |name: &str| value.get(name).and_then(lenient::as_number);
            let correct = field("correct").or_else(|| field("correctAnswers")).unwrap_or(0.0);
            let total = field("total").or_else(|| field("totalQuestions")).unwrap_or(0.0);
            let score = field("score").unwrap_or_else(|| percent(correct, total) as f64);
            value.is_object().then(|| {
                (
                    normalize_category_key(key),
                    StoredScore {
                        correct,
                        total,
                        score,
                    },
                )
            })
        })
        .collect()
}

fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map
            .get("optionId")
            .or_else(|| map.get("answer"))
            .and_then(lenient::as_string),
        other => lenient::as_string(other),
    }
}

fn score_question(question: &AssessmentQuestion, category: &str, answer: Option<&str>) -> QuestionOutcome {
    let (correct_answer, accepted) = if category == READING_COMPREHENSION {
        comprehension_key(question)
    } else {
        choice_key(question)
    };

    let is_correct = answer
        .map(str::trim)
        .is_some_and(|given| !given.is_empty() && accepted.iter().any(|a| a == given));

    QuestionOutcome {
        question_id: question.question_id.clone(),
        question_text: question.question_text.clone().or_else(|| {
            question
                .comprehension()
                .and_then(|q| q.question_text.clone())
        }),
        student_answer: answer.map(str::to_string),
        correct_answer,
        is_correct,
    }
}

fn choice_key(question: &AssessmentQuestion) -> (Option<String>, Vec<String>) {
    let Some(option) = question.choice_options.iter().find(|o| o.is_correct) else {
        return (None, Vec::new());
    };
    let mut accepted = Vec::new();
    if !option.option_id.is_empty() {
        accepted.push(option.option_id.to_string());
    }
    if let Some(text) = &option.option_text {
        accepted.push(text.clone());
    }
    (option.option_text.clone(), accepted)
}

/// `correctAnswerChoice` of "1" selects the first written answer, anything
/// else the second.
fn comprehension_key(question: &AssessmentQuestion) -> (Option<String>, Vec<String>) {
    let Some(comprehension) = question.comprehension() else {
        return (None, Vec::new());
    };
    let choice = comprehension
        .correct_answer_choice
        .as_deref()
        .map(str::trim)
        .unwrap_or("2");
    let correct = if choice == "1" {
        comprehension.answer_choice1.clone()
    } else {
        comprehension.answer_choice2.clone()
    };

    let mut accepted = vec![choice.to_string()];
    if let Some(text) = &correct {
        accepted.push(text.clone());
    }
    (correct, accepted)
}

/// Scores one response against its assessment definition.
pub fn score_pre_assessment(
    response: &PreAssessmentResponse,
    assessment: &PreAssessment,
    student: Option<&StudentRecord>,
) -> PreAssessmentResult {
    let stored = stored_scores(response);

    let mut grouped: Vec<(String, Vec<&AssessmentQuestion>)> = Vec::new();
    for question in &assessment.questions {
        let key = question
            .category()
            .map(normalize_category_key)
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| GENERAL_CATEGORY.to_string());
        match grouped.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, questions)) => questions.push(question),
            None => grouped.push((key, vec![question])),
        }
    }

    let skill_details: Vec<CategoryScoreDetail> = grouped
        .into_iter()
        .map(|(key, questions)| {
            let outcomes: Vec<QuestionOutcome> = questions
                .iter()
                .map(|question| {
                    let answer = response
                        .answers
                        .get(question.question_id.as_str())
                        .and_then(answer_text);
                    score_question(question, &key, answer.as_deref())
                })
                .collect();

            let score = stored.get(&key).copied().unwrap_or(StoredScore {
                correct: 0.0,
                total: outcomes.len() as f64,
                score: 0.0,
            });

            CategoryScoreDetail {
                category: category_display_name(&key),
                score: to_score(score.score),
                correct: score.correct.max(0.0).round() as u32,
                total: score.total.max(0.0).round() as u32,
                category_key: key,
                questions: outcomes,
            }
        })
        .collect();

    let focus_areas = skill_details
        .iter()
        .filter(|detail| (detail.score as f64) < FOCUS_THRESHOLD)
        .map(|detail| detail.category.clone())
        .collect();

    let summed_total: u32 = skill_details.iter().map(|d| d.total).sum();
    let summed_correct: u32 = skill_details.iter().map(|d| d.correct).sum();
    let total_questions = response
        .total_questions
        .map(|n| n.max(0.0).round() as u32)
        .unwrap_or(summed_total);
    let correct_answers = response
        .correct_answers
        .map(|n| n.max(0.0).round() as u32)
        .unwrap_or(summed_correct);
    let overall_score = response
        .overall_score
        .map(to_score)
        .unwrap_or_else(|| percent(correct_answers as f64, total_questions as f64));

    let name = student
        .map(|s| student_name(Some(s)))
        .filter(|name| name != UNKNOWN_STUDENT)
        .or_else(|| response.student_name.clone())
        .unwrap_or_else(|| UNKNOWN_STUDENT.to_string());
    let level = response
        .reading_level
        .as_deref()
        .or_else(|| student.and_then(|s| s.reading_level.as_deref()));

    PreAssessmentResult {
        student_id: response.student_id.clone(),
        student_name: name,
        assessment_id: response.assessment_id.clone(),
        reading_level: ReadingLevel::normalize(level),
        overall_score,
        total_questions,
        correct_answers,
        skill_details,
        focus_areas,
        has_completed: true,
    }
}

/// Most recent response recorded for the student.
pub fn latest_response_for<'a>(
    student_id: &DocumentId,
    responses: &'a [PreAssessmentResponse],
) -> Result<&'a PreAssessmentResponse> {
    responses
        .iter()
        .filter(|r| r.student_id == *student_id)
        .fold(None, |latest: Option<&PreAssessmentResponse>, candidate| match latest {
            Some(current) if candidate.completed_at.or(candidate.created_at)
                <= current.completed_at.or(current.created_at) =>
            {
                Some(current)
            }
            _ => Some(candidate),
        })
        .ok_or_else(|| {
            DashboardError::NotFound(format!("no pre-assessment response for student {student_id}"))
        })
}

pub fn definition_for<'a>(
    response: &PreAssessmentResponse,
    assessments: &'a [PreAssessment],
) -> Result<&'a PreAssessment> {
    assessments
        .iter()
        .find(|a| a.id == response.assessment_id)
        .ok_or_else(|| {
            DashboardError::NotFound(format!("pre-assessment {} not found", response.assessment_id))
        })
}

/// Resolves the student's latest response and its definition, then scores it.
pub fn score_for_student(
    student_id: &DocumentId,
    responses: &[PreAssessmentResponse],
    assessments: &[PreAssessment],
    students: &[StudentRecord],
) -> Result<PreAssessmentResult> {
    let response = latest_response_for(student_id, responses)?;
    let assessment = definition_for(response, assessments)?;
    let student = students.iter().find(|s| s.id == *student_id);
    Ok(score_pre_assessment(response, assessment, student))
}
