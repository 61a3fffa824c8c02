use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{
    DocumentId, EnrichedInterventionProgress, InterventionPlan, InterventionProgress,
    StudentRecord,
};
use crate::reading_level::ReadingLevel;

pub const UNKNOWN_STUDENT: &str = "Unknown Student";
const UNKNOWN_PLAN: &str = "Unknown Plan";
const UNKNOWN: &str = "Unknown";
const NO_DATE: &str = "N/A";

/// Joins progress rows to their student and intervention plan.
pub fn enrich_intervention_progress(
    progress: &[InterventionProgress],
    students: &[StudentRecord],
    plans: &[InterventionPlan],
) -> Vec<EnrichedInterventionProgress> {
    if progress.is_empty() {
        return Vec::new();
    }

    let students_by_id: HashMap<&DocumentId, &StudentRecord> =
        students.iter().map(|s| (&s.id, s)).collect();
    let plans_by_id: HashMap<&DocumentId, &InterventionPlan> =
        plans.iter().map(|p| (&p.id, p)).collect();

    progress
        .iter()
        .map(|row| {
            let student = students_by_id.get(&row.student_id).copied();
            let plan = plans_by_id.get(&row.intervention_plan_id).copied();

            EnrichedInterventionProgress {
                progress: row.clone(),
                student_name: student_name(student),
                student_reading_level: student
                    .map(|s| ReadingLevel::normalize(s.reading_level.as_deref()).to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                intervention_plan_name: plan
                    .and_then(|p| p.name.clone())
                    .unwrap_or_else(|| UNKNOWN_PLAN.to_string()),
                category: plan
                    .and_then(|p| p.category.clone())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                reading_level: plan
                    .and_then(|p| p.reading_level.clone())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                last_activity_formatted: format_date(row.last_activity),
                created_at_formatted: format_date(row.created_at),
            }
        })
        .collect()
}

/// Student label, in priority order: first and last name, the `name` field,
/// then `Unknown Student`.
pub fn student_name(student: Option<&StudentRecord>) -> String {
    let Some(student) = student else {
        return UNKNOWN_STUDENT.to_string();
    };

    let full = [&student.first_name, &student.last_name]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .collect::<Vec<_>>()
        .join(" ");
    if !full.trim().is_empty() {
        return full.trim().to_string();
    }

    student
        .name
        .clone()
        .unwrap_or_else(|| UNKNOWN_STUDENT.to_string())
}

pub fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%-m/%-d/%Y").to_string())
        .unwrap_or_else(|| NO_DATE.to_string())
}
