use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::interventions;
use crate::models::{
    CategoryResult, Collections, DashboardPayload, DocumentId, Metrics, ReadingLevelBucket,
    StudentRecord, StudentViewModel,
};
use crate::progress;
use crate::reading_level::ReadingLevel;

const ATTENTION_LIMIT: usize = 10;
const ATTENTION_SCORE_THRESHOLD: u32 = 70;
const ATTENTION_COMPLETION_THRESHOLD: u32 = 60;
const LESSONS_PER_PROGRAM: f64 = 25.0;
const DEFAULT_SECTIONS: [&str; 3] = ["Sampaguita", "Unity", "Dignity"];

/// Rounded percentage clamped into 0..=100; a zero denominator yields 0.
pub fn percent(numerator: f64, denominator: f64) -> u32 {
    if denominator <= 0.0 {
        return 0;
    }
    to_score(100.0 * numerator / denominator)
}

pub fn to_score(value: f64) -> u32 {
    value.round().clamp(0.0, 100.0) as u32
}

/// Latest category result per student, keyed by canonical student id. Ties
/// keep the first result seen.
pub fn index_latest_results(results: &[CategoryResult]) -> HashMap<DocumentId, &CategoryResult> {
    let mut latest: HashMap<DocumentId, &CategoryResult> = HashMap::new();

    for result in results {
        if result.student_id.is_empty() {
            continue;
        }
        let newer = latest
            .get(&result.student_id)
            .map_or(true, |current| result.created() > current.created());
        if newer {
            latest.insert(result.student_id.clone(), result);
        }
    }

    latest
}

/// Display name, in priority order: explicit `name`, then first, middle and
/// last name joined by single spaces.
pub fn display_name(student: &StudentRecord) -> String {
    if let Some(name) = student.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        return name.to_string();
    }

    [&student.first_name, &student.middle_name, &student.last_name]
        .into_iter()
        .filter_map(|part| part.as_deref().map(str::trim))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reading level, in priority order: latest result, student record, then
/// `Not Assessed`.
pub fn resolve_reading_level(
    student: &StudentRecord,
    latest: Option<&CategoryResult>,
) -> ReadingLevel {
    let raw = latest
        .and_then(|result| result.reading_level.as_deref())
        .or(student.reading_level.as_deref());
    ReadingLevel::normalize(raw)
}

/// Completion, in priority order: answers across the latest result's
/// categories, then completed lessons out of the program length, then 0.
pub fn completion_rate(student: &StudentRecord, latest: Option<&CategoryResult>) -> u32 {
    if let Some(result) = latest {
        let (correct, total) = result
            .categories
            .iter()
            .fold((0.0, 0.0), |(correct, total), category| {
                (correct + category.correct_answers, total + category.total_questions)
            });
        return percent(correct, total);
    }

    match &student.completed_lessons {
        Some(lessons) => percent(lessons.len() as f64, LESSONS_PER_PROGRAM),
        None => 0,
    }
}

pub fn improvement_categories(level: &ReadingLevel, latest: Option<&CategoryResult>) -> Vec<String> {
    let failed: Vec<String> = latest
        .map(|result| {
            result
                .categories
                .iter()
                .filter(|category| category.is_passed == Some(false))
                .filter_map(|category| category.category_name.clone())
                .collect()
        })
        .unwrap_or_default();

    if failed.is_empty() {
        level.default_improvement_categories()
    } else {
        failed
    }
}

pub fn needs_attention(
    level: &ReadingLevel,
    last_score: u32,
    completion_rate: u32,
    latest: Option<&CategoryResult>,
) -> bool {
    matches!(level, ReadingLevel::NotAssessed | ReadingLevel::LowEmerging)
        || last_score < ATTENTION_SCORE_THRESHOLD
        || completion_rate < ATTENTION_COMPLETION_THRESHOLD
        || latest.is_some_and(|result| !result.all_categories_passed)
}

pub fn build_view_model(
    student: &StudentRecord,
    latest: Option<&CategoryResult>,
) -> StudentViewModel {
    let reading_level = resolve_reading_level(student, latest);
    let completion_rate = completion_rate(student, latest);
    let last_score = latest.map(|result| to_score(result.overall_score)).unwrap_or(0);
    let improvement_categories = improvement_categories(&reading_level, latest);
    let needs_attention = needs_attention(&reading_level, last_score, completion_rate, latest);

    StudentViewModel {
        id: student.id.clone(),
        unique_id: student.id.to_string(),
        name: display_name(student),
        first_name: student.first_name.clone(),
        middle_name: student.middle_name.clone(),
        last_name: student.last_name.clone(),
        section: student.section.clone(),
        grade_level: student.grade_level.clone().or_else(|| student.grade.clone()),
        gender: student.gender.clone(),
        age: student.age,
        reading_level,
        pre_assessment_completed: student.pre_assessment_completed,
        parent_id: student.parent_id.clone(),
        last_assessment_date: student.last_assessment_date,
        completion_rate,
        last_score,
        improvement_categories,
        needs_attention,
    }
}

pub fn build_view_models(
    students: &[StudentRecord],
    results: &[CategoryResult],
) -> Vec<StudentViewModel> {
    let latest = index_latest_results(results);
    students
        .iter()
        .map(|student| build_view_model(student, latest.get(&student.id).copied()))
        .collect()
}

pub fn reading_level_distribution(students: &[StudentViewModel]) -> Vec<ReadingLevelBucket> {
    let mut counts: Vec<(ReadingLevel, usize)> = Vec::new();

    for student in students {
        if student.reading_level.as_str().is_empty() {
            continue;
        }
        match counts.iter_mut().find(|(level, _)| *level == student.reading_level) {
            Some((_, count)) => *count += 1,
            None => counts.push((student.reading_level.clone(), 1)),
        }
    }

    counts.sort_by_key(|(level, _)| level.order_index());
    counts
        .into_iter()
        .map(|(level, value)| ReadingLevelBucket {
            color: level.color().to_string(),
            name: level,
            value,
        })
        .collect()
}

/// Up to ten flagged students, unassessed first, then lowest score first.
pub fn students_needing_attention(students: &[StudentViewModel]) -> Vec<StudentViewModel> {
    let mut flagged: Vec<StudentViewModel> = students
        .iter()
        .filter(|student| student.needs_attention)
        .cloned()
        .collect();

    flagged.sort_by_key(|student| (!student.reading_level.is_not_assessed(), student.last_score));
    flagged.truncate(ATTENTION_LIMIT);
    flagged
}

/// Fleet-wide totals. Category results are aggregated across every stored
/// result, not only the latest per student.
pub fn summarize_metrics(students: &[StudentViewModel], results: &[CategoryResult]) -> Metrics {
    let pending_edits = students.iter().filter(|s| s.needs_attention).count();

    let (completion_rate, average_score) = if !results.is_empty() {
        let score_sum: f64 = results.iter().map(|r| r.overall_score).sum();
        let (correct, total) = results
            .iter()
            .flat_map(|r| r.categories.iter())
            .fold((0.0, 0.0), |(correct, total), category| {
                (correct + category.correct_answers, total + category.total_questions)
            });
        (
            percent(correct, total),
            to_score(score_sum / results.len() as f64),
        )
    } else {
        let assessed: Vec<&StudentViewModel> = students
            .iter()
            .filter(|s| !s.reading_level.is_not_assessed())
            .collect();
        if assessed.is_empty() {
            (0, 0)
        } else {
            let count = assessed.len() as f64;
            let completion: u32 = assessed.iter().map(|s| s.completion_rate).sum();
            let score: u32 = assessed.iter().map(|s| s.last_score).sum();
            (to_score(completion as f64 / count), to_score(score as f64 / count))
        }
    };

    Metrics {
        total_students: students.len(),
        completion_rate,
        average_score,
        pending_edits,
    }
}

/// Distinct non-empty sections in first-seen order.
pub fn collect_sections(students: &[StudentRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    let sections: Vec<String> = students
        .iter()
        .filter_map(|s| s.section.as_deref().map(str::trim))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect();

    if sections.is_empty() {
        DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect()
    } else {
        sections
    }
}

/// Restricts the collections to one section's students and their records.
pub fn scope_to_section(collections: &Collections, section: &str) -> Collections {
    let students: Vec<StudentRecord> = collections
        .students
        .iter()
        .filter(|s| s.section.as_deref().map(str::trim) == Some(section.trim()))
        .cloned()
        .collect();
    let ids: HashSet<&DocumentId> = students.iter().map(|s| &s.id).collect();

    let category_results = collections
        .category_results
        .iter()
        .filter(|r| ids.contains(&r.student_id))
        .cloned()
        .collect();
    let intervention_progress = collections
        .intervention_progress
        .iter()
        .filter(|p| ids.contains(&p.student_id))
        .cloned()
        .collect();

    Collections {
        students,
        category_results,
        intervention_progress,
        intervention_plans: collections.intervention_plans.clone(),
        prescriptive_analyses: collections.prescriptive_analyses.clone(),
    }
}

pub fn build_dashboard(collections: &Collections, now: DateTime<Utc>) -> DashboardPayload {
    let students = build_view_models(&collections.students, &collections.category_results);
    let reading_level_distribution = reading_level_distribution(&students);
    let students_needing_attention = students_needing_attention(&students);
    let metrics = summarize_metrics(&students, &collections.category_results);
    let progress_data = progress::generate_progress_data(
        &collections.category_results,
        &reading_level_distribution,
        now,
    );
    let intervention_progress = interventions::enrich_intervention_progress(
        &collections.intervention_progress,
        &collections.students,
        &collections.intervention_plans,
    );

    info!(
        students = metrics.total_students,
        needing_attention = metrics.pending_edits,
        levels = reading_level_distribution.len(),
        interventions = intervention_progress.len(),
        "dashboard assembled"
    );

    DashboardPayload {
        students,
        students_needing_attention,
        reading_level_distribution,
        metrics,
        prescriptive_data: collections.prescriptive_analyses.clone(),
        sections: collect_sections(&collections.students),
        progress_data,
        intervention_progress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn student(doc: serde_json::Value) -> StudentRecord {
        serde_json::from_value(doc).unwrap()
    }

    fn result(doc: serde_json::Value) -> CategoryResult {
        serde_json::from_value(doc).unwrap()
    }

    fn view(id: &str, level: ReadingLevel, last_score: u32, needs_attention: bool) -> StudentViewModel {
        StudentViewModel {
            id: DocumentId::new(id),
            unique_id: id.to_string(),
            name: id.to_string(),
            first_name: None,
            middle_name: None,
            last_name: None,
            section: None,
            grade_level: None,
            gender: None,
            age: None,
            reading_level: level,
            pre_assessment_completed: false,
            parent_id: None,
            last_assessment_date: None,
            completion_rate: 100,
            last_score,
            improvement_categories: Vec::new(),
            needs_attention,
        }
    }

    #[test]
    fn unassessed_student_without_results_needs_attention() {
        let record = student(json!({ "_id": "s1", "firstName": "Ana", "lastName": "Cruz" }));
        let vm = build_view_model(&record, None);

        assert_eq!(vm.reading_level, ReadingLevel::NotAssessed);
        assert_eq!(vm.completion_rate, 0);
        assert_eq!(vm.last_score, 0);
        assert!(vm.needs_attention);
        assert_eq!(vm.improvement_categories, vec!["Pre-Assessment Needed".to_string()]);
        assert_eq!(vm.name, "Ana Cruz");
    }

    #[test]
    fn passing_result_produces_healthy_view_model() {
        let record = student(json!({ "_id": "s1", "name": "Ben Reyes", "readingLevel": "Developing" }));
        let latest = result(json!({
            "studentId": "s1",
            "readingLevel": "Developing",
            "overallScore": 85,
            "allCategoriesPassed": true,
            "categories": [
                { "categoryName": "Decoding", "totalQuestions": 10, "correctAnswers": 8, "score": 80, "isPassed": true }
            ]
        }));

        let vm = build_view_model(&record, Some(&latest));
        assert_eq!(vm.completion_rate, 80);
        assert_eq!(vm.last_score, 85);
        assert!(!vm.needs_attention);
        assert_eq!(
            vm.improvement_categories,
            vec!["Word Recognition".to_string(), "Reading Comprehension".to_string()]
        );
    }

    fn passing_result(score: u32, correct: u32) -> CategoryResult {
        result(json!({
            "studentId": "s1",
            "readingLevel": "Developing",
            "overallScore": score,
            "allCategoriesPassed": true,
            "categories": [
                { "categoryName": "Decoding", "totalQuestions": 10, "correctAnswers": correct, "isPassed": true }
            ]
        }))
    }

    #[test]
    fn low_score_alone_flags_attention() {
        let record = student(json!({ "_id": "s1", "readingLevel": "Developing" }));

        let low = build_view_model(&record, Some(&passing_result(65, 10)));
        assert_eq!((low.last_score, low.completion_rate), (65, 100));
        assert!(low.needs_attention);

        let at_threshold = build_view_model(&record, Some(&passing_result(70, 10)));
        assert_eq!(at_threshold.last_score, 70);
        assert!(!at_threshold.needs_attention);
    }

    #[test]
    fn low_completion_alone_flags_attention() {
        let record = student(json!({ "_id": "s1", "readingLevel": "Developing" }));

        let half = build_view_model(&record, Some(&passing_result(90, 5)));
        assert_eq!((half.last_score, half.completion_rate), (90, 50));
        assert!(half.needs_attention);

        let at_threshold = build_view_model(&record, Some(&passing_result(90, 6)));
        assert_eq!(at_threshold.completion_rate, 60);
        assert!(!at_threshold.needs_attention);
    }

    #[test]
    fn legacy_grade_field_fills_grade_level() {
        let record = student(json!({ "_id": "s1", "grade": "Grade 3" }));
        assert_eq!(build_view_model(&record, None).grade_level.as_deref(), Some("Grade 3"));
    }

    #[test]
    fn failed_categories_drive_improvement_and_attention() {
        let record = student(json!({ "_id": "s1", "readingLevel": "Transitioning" }));
        let latest = result(json!({
            "studentId": "s1",
            "overallScore": 90,
            "allCategoriesPassed": false,
            "categories": [
                { "categoryName": "Decoding", "totalQuestions": 5, "correctAnswers": 5, "isPassed": true },
                { "categoryName": "Word Recognition", "totalQuestions": 5, "correctAnswers": 4, "isPassed": false }
            ]
        }));

        let vm = build_view_model(&record, Some(&latest));
        assert_eq!(vm.reading_level, ReadingLevel::Transitioning);
        assert_eq!(vm.improvement_categories, vec!["Word Recognition".to_string()]);
        assert!(vm.needs_attention);
    }

    #[test]
    fn result_level_wins_over_legacy_student_level() {
        let record = student(json!({ "_id": "s1", "readingLevel": "Early" }));
        assert_eq!(resolve_reading_level(&record, None), ReadingLevel::LowEmerging);

        let latest = result(json!({ "studentId": "s1", "readingLevel": "Fluent" }));
        assert_eq!(resolve_reading_level(&record, Some(&latest)), ReadingLevel::Developing);
    }

    #[test]
    fn completion_falls_back_to_lessons_and_guards_zero_totals() {
        let with_lessons = student(json!({ "_id": "s1", "completedLessons": [1, 2, 3, 4, 5] }));
        assert_eq!(completion_rate(&with_lessons, None), 20);

        let lessons: Vec<u32> = (0..40).collect();
        let many_lessons = student(json!({ "_id": "s2", "completedLessons": lessons }));
        assert_eq!(completion_rate(&many_lessons, None), 100);

        let empty_result = result(json!({
            "studentId": "s1",
            "categories": [{ "categoryName": "Decoding", "totalQuestions": 0, "correctAnswers": 0 }]
        }));
        assert_eq!(completion_rate(&with_lessons, Some(&empty_result)), 0);
    }

    #[test]
    fn index_keeps_latest_result_across_id_representations() {
        let results = vec![
            result(json!({ "_id": "old", "studentId": { "$oid": "s1" }, "createdAt": "2026-01-01T00:00:00Z" })),
            result(json!({ "_id": "new", "studentId": "s1", "createdAt": "2026-02-01T00:00:00Z" })),
            result(json!({ "_id": "tie", "studentId": "s1", "createdAt": "2026-02-01T00:00:00Z" })),
        ];

        let index = index_latest_results(&results);
        assert_eq!(index.len(), 1);
        assert_eq!(index[&DocumentId::new("s1")].id.as_str(), "new");
    }

    #[test]
    fn display_name_prefers_explicit_name() {
        let named = student(json!({ "name": "  Carla Santos ", "firstName": "X" }));
        assert_eq!(display_name(&named), "Carla Santos");

        let parts = student(json!({ "firstName": "Maria", "middleName": " ", "lastName": "Lopez" }));
        assert_eq!(display_name(&parts), "Maria Lopez");
    }

    #[test]
    fn distribution_sorts_by_progression_with_unknowns_last() {
        let students = vec![
            view("a", ReadingLevel::Other("Advanced".into()), 90, false),
            view("b", ReadingLevel::AtGradeLevel, 90, false),
            view("c", ReadingLevel::NotAssessed, 0, true),
            view("d", ReadingLevel::LowEmerging, 50, true),
            view("e", ReadingLevel::AtGradeLevel, 95, false),
        ];

        let buckets = reading_level_distribution(&students);
        let names: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Low Emerging", "At Grade Level", "Not Assessed", "Advanced"]);
        assert_eq!(buckets.iter().map(|b| b.value).sum::<usize>(), students.len());
        assert_eq!(buckets[1].value, 2);
        assert_eq!(buckets[3].color, "#CCCCCC");
    }

    #[test]
    fn attention_list_is_capped_and_puts_unassessed_first() {
        let mut students: Vec<StudentViewModel> = (0..12)
            .map(|i| view(&format!("s{i}"), ReadingLevel::Developing, 60 - i, true))
            .collect();
        students.push(view("na", ReadingLevel::NotAssessed, 0, true));
        students.push(view("ok", ReadingLevel::AtGradeLevel, 99, false));

        let flagged = students_needing_attention(&students);
        assert_eq!(flagged.len(), 10);
        assert!(flagged.iter().all(|s| s.needs_attention));
        assert_eq!(flagged[0].id.as_str(), "na");
        let scores: Vec<u32> = flagged[1..].iter().map(|s| s.last_score).collect();
        let mut sorted = scores.clone();
        sorted.sort();
        assert_eq!(scores, sorted);
    }

    #[test]
    fn metrics_average_every_result() {
        let students = vec![view("a", ReadingLevel::Developing, 80, false)];
        let results = vec![
            result(json!({
                "studentId": "a", "overallScore": 80,
                "categories": [{ "totalQuestions": 10, "correctAnswers": 9 }]
            })),
            result(json!({
                "studentId": "a", "overallScore": 60,
                "categories": [{ "totalQuestions": 10, "correctAnswers": 5 }]
            })),
        ];

        let metrics = summarize_metrics(&students, &results);
        assert_eq!(metrics.average_score, 70);
        assert_eq!(metrics.completion_rate, 70);
        assert_eq!(metrics.total_students, 1);
        assert_eq!(metrics.pending_edits, 0);
    }

    #[test]
    fn metrics_fall_back_to_assessed_students() {
        let mut a = view("a", ReadingLevel::Developing, 80, false);
        a.completion_rate = 70;
        let mut b = view("b", ReadingLevel::Transitioning, 61, true);
        b.completion_rate = 50;
        let c = view("c", ReadingLevel::NotAssessed, 0, true);

        let metrics = summarize_metrics(&[a, b, c], &[]);
        assert_eq!(metrics.average_score, 71);
        assert_eq!(metrics.completion_rate, 60);
        assert_eq!(metrics.pending_edits, 2);

        let none = summarize_metrics(&[view("x", ReadingLevel::NotAssessed, 0, true)], &[]);
        assert_eq!(none.average_score, 0);
        assert_eq!(none.completion_rate, 0);
    }

    #[test]
    fn sections_are_distinct_with_defaults() {
        let students = vec![
            student(json!({ "section": "Unity" })),
            student(json!({ "section": "Rizal" })),
            student(json!({ "section": "Unity" })),
            student(json!({ "section": "" })),
        ];
        assert_eq!(collect_sections(&students), vec!["Unity", "Rizal"]);
        assert_eq!(collect_sections(&[]), vec!["Sampaguita", "Unity", "Dignity"]);
    }

    #[test]
    fn section_scope_filters_related_records() {
        let collections = Collections {
            students: vec![
                student(json!({ "_id": "s1", "section": "Unity" })),
                student(json!({ "_id": "s2", "section": "Dignity" })),
            ],
            category_results: vec![
                result(json!({ "studentId": "s1", "overallScore": 90 })),
                result(json!({ "studentId": "s2", "overallScore": 40 })),
            ],
            ..Collections::default()
        };

        let scoped = scope_to_section(&collections, "Unity");
        assert_eq!(scoped.students.len(), 1);
        assert_eq!(scoped.category_results.len(), 1);
        assert_eq!(scoped.category_results[0].overall_score, 90.0);
    }

    #[test]
    fn dashboard_is_deterministic_for_identical_input() {
        let now = Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap();
        let collections = Collections {
            students: vec![
                student(json!({ "_id": "s1", "section": "Unity", "readingLevel": "Emergent" })),
                student(json!({ "_id": "s2", "section": "Unity" })),
            ],
            category_results: vec![result(json!({
                "studentId": "s1",
                "readingLevel": "High Emerging",
                "assessmentDate": "2026-06-10T08:00:00Z",
                "overallScore": 72,
                "allCategoriesPassed": true,
                "categories": [{ "categoryName": "Decoding", "totalQuestions": 10, "correctAnswers": 7, "isPassed": true }]
            }))],
            ..Collections::default()
        };

        let first = build_dashboard(&collections, now);
        let second = build_dashboard(&collections, now);
        assert_eq!(first.metrics, second.metrics);
        assert_eq!(first.reading_level_distribution, second.reading_level_distribution);
        assert_eq!(first.progress_data, second.progress_data);
        assert_eq!(first.students, second.students);

        assert_eq!(first.sections, vec!["Unity"]);
        assert_eq!(first.progress_data["High Emerging"].weekly[3].progress, 72);
        assert!(first.progress_data["Not Assessed"].weekly.is_empty());
        assert!(first.intervention_progress.is_empty());
        for vm in &first.students {
            assert!(vm.completion_rate <= 100 && vm.last_score <= 100);
        }
    }
}
