use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::DashboardPayload;

const INTERVENTION_ROWS: usize = 10;

pub fn build_report(payload: &DashboardPayload, generated_at: DateTime<Utc>) -> String {
    let mut output = String::new();
    let metrics = &payload.metrics;

    let _ = writeln!(output, "# Reading Assessment Dashboard Report");
    let _ = writeln!(
        output,
        "Generated {} for sections: {}",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        payload.sections.join(", ")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Students: {}", metrics.total_students);
    let _ = writeln!(output, "- Average score: {}%", metrics.average_score);
    let _ = writeln!(output, "- Completion rate: {}%", metrics.completion_rate);
    let _ = writeln!(output, "- Students needing attention: {}", metrics.pending_edits);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Reading Level Distribution");

    if payload.reading_level_distribution.is_empty() {
        let _ = writeln!(output, "No students recorded yet.");
    } else {
        for bucket in payload.reading_level_distribution.iter() {
            let _ = writeln!(output, "- {}: {} students", bucket.name, bucket.value);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");

    if payload.students_needing_attention.is_empty() {
        let _ = writeln!(output, "No students currently flagged.");
    } else {
        for student in payload.students_needing_attention.iter() {
            let focus = if student.improvement_categories.is_empty() {
                "none listed".to_string()
            } else {
                student.improvement_categories.join(", ")
            };
            let _ = writeln!(
                output,
                "- {} ({}, {}) score {}%, completion {}%; focus: {}",
                student.name,
                student.section.as_deref().unwrap_or("no section"),
                student.reading_level,
                student.last_score,
                student.completion_rate,
                focus
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Intervention Progress");

    if payload.intervention_progress.is_empty() {
        let _ = writeln!(output, "No intervention activity recorded.");
    } else {
        for row in payload.intervention_progress.iter().take(INTERVENTION_ROWS) {
            let _ = writeln!(
                output,
                "- {} on {} ({}): {}% complete, {}% correct, last active {}",
                row.student_name,
                row.intervention_plan_name,
                row.category,
                row.progress.percent_complete.unwrap_or(0.0).round(),
                row.progress.percent_correct.unwrap_or(0.0).round(),
                row.last_activity_formatted
            );
        }
    }

    output
}
