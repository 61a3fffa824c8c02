use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::dashboard::to_score;
use crate::models::{CategoryResult, LevelProgress, ProgressPoint, ReadingLevelBucket};
use crate::reading_level::ReadingLevel;

const WEEKS: i64 = 4;
const MONTHS: i32 = 6;

/// Weekly and monthly average-score series for every level in the
/// distribution. `Not Assessed` always gets empty series.
pub fn generate_progress_data(
    results: &[CategoryResult],
    buckets: &[ReadingLevelBucket],
    now: DateTime<Utc>,
) -> BTreeMap<String, LevelProgress> {
    let mut data = BTreeMap::new();

    for bucket in buckets {
        let level = &bucket.name;
        if level.is_not_assessed() {
            data.insert(level.to_string(), LevelProgress::default());
            continue;
        }

        let scores = dated_scores(results, level);
        data.insert(
            level.to_string(),
            LevelProgress {
                weekly: weekly_series(&scores, now),
                monthly: monthly_series(&scores, now),
            },
        );
    }

    data
}

fn dated_scores(results: &[CategoryResult], level: &ReadingLevel) -> Vec<(DateTime<Utc>, f64)> {
    results
        .iter()
        .filter(|result| result.reading_level() == *level)
        .filter_map(|result| result.recorded_at().map(|at| (at, result.overall_score)))
        .collect()
}

/// Four trailing seven-day windows ending at `now`, oldest first.
pub fn weekly_series(scores: &[(DateTime<Utc>, f64)], now: DateTime<Utc>) -> Vec<ProgressPoint> {
    (0..WEEKS)
        .map(|i| {
            let name = format!("Week {}", i + 1);
            if scores.is_empty() {
                return ProgressPoint { name, progress: 0 };
            }
            let end = now - Duration::days(7 * (WEEKS - 1 - i));
            let start = end - Duration::days(7);
            let progress = average(scores.iter().filter(|(at, _)| *at > start && *at <= end));
            ProgressPoint { name, progress }
        })
        .collect()
}

/// The six calendar months up to and including the month of `now`, oldest
/// first, labelled with the month's abbreviation.
pub fn monthly_series(scores: &[(DateTime<Utc>, f64)], now: DateTime<Utc>) -> Vec<ProgressPoint> {
    let current = now.year() * 12 + now.month0() as i32;

    (0..MONTHS)
        .map(|i| {
            let index = current - (MONTHS - 1 - i);
            match (month_start(index), month_start(index + 1)) {
                (Some(start), Some(end)) => ProgressPoint {
                    name: start.format("%b").to_string(),
                    progress: average(scores.iter().filter(|(at, _)| *at >= start && *at < end)),
                },
                _ => ProgressPoint {
                    name: String::new(),
                    progress: 0,
                },
            }
        })
        .collect()
}

fn month_start(month_index: i32) -> Option<DateTime<Utc>> {
    let year = month_index.div_euclid(12);
    let month = month_index.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn average<'a, I>(scores: I) -> u32
where
    I: Iterator<Item = &'a (DateTime<Utc>, f64)>,
{
    let (sum, count) = scores.fold((0.0, 0usize), |(sum, count), (_, score)| (sum + score, count + 1));
    if count == 0 {
        0
    } else {
        to_score(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 20, 12, 0, 0).unwrap()
    }

    fn result(level: &str, date: &str, score: f64) -> CategoryResult {
        serde_json::from_value(json!({
            "studentId": "s1",
            "readingLevel": level,
            "assessmentDate": date,
            "overallScore": score
        }))
        .unwrap()
    }

    fn bucket(level: ReadingLevel) -> ReadingLevelBucket {
        ReadingLevelBucket {
            color: level.color().to_string(),
            name: level,
            value: 1,
        }
    }

    #[test]
    fn weekly_windows_average_scores_oldest_first() {
        let results = vec![
            result("Developing", "2026-03-19T09:00:00Z", 80.0),
            result("Developing", "2026-03-18T09:00:00Z", 91.0),
            result("Developing", "2026-03-05T09:00:00Z", 60.0),
            result("Developing", "2026-01-05T09:00:00Z", 10.0),
        ];
        let data = generate_progress_data(&results, &[bucket(ReadingLevel::Developing)], now());
        let weekly = &data["Developing"].weekly;

        assert_eq!(weekly.len(), 4);
        assert_eq!(weekly[0].name, "Week 1");
        let progress: Vec<u32> = weekly.iter().map(|p| p.progress).collect();
        assert_eq!(progress, vec![0, 60, 0, 86]);
    }

    #[test]
    fn week_boundary_belongs_to_the_earlier_window() {
        let boundary = now() - Duration::days(7);
        let just_after = boundary + Duration::seconds(1);

        let weekly = weekly_series(&[(boundary, 55.0)], now());
        let progress: Vec<u32> = weekly.iter().map(|p| p.progress).collect();
        assert_eq!(progress, vec![0, 0, 55, 0]);

        let weekly = weekly_series(&[(just_after, 75.0)], now());
        let progress: Vec<u32> = weekly.iter().map(|p| p.progress).collect();
        assert_eq!(progress, vec![0, 0, 0, 75]);
    }

    #[test]
    fn monthly_series_uses_real_month_names() {
        let results = vec![
            result("Fluent", "2026-03-01T00:00:00Z", 70.0),
            result("Developing", "2026-02-14", 90.0),
            result("Developing", "2025-10-31T23:59:59Z", 40.0),
            result("Developing", "2025-09-30T00:00:00Z", 100.0),
        ];
        let data = generate_progress_data(&results, &[bucket(ReadingLevel::Developing)], now());
        let monthly = &data["Developing"].monthly;

        let names: Vec<&str> = monthly.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Oct", "Nov", "Dec", "Jan", "Feb", "Mar"]);
        let progress: Vec<u32> = monthly.iter().map(|p| p.progress).collect();
        assert_eq!(progress, vec![40, 0, 0, 0, 90, 70]);
    }

    #[test]
    fn levels_without_results_get_zeroed_fixed_length_series() {
        let data = generate_progress_data(&[], &[bucket(ReadingLevel::Transitioning)], now());
        let series = &data["Transitioning"];
        assert_eq!(series.weekly.len(), 4);
        assert_eq!(series.monthly.len(), 6);
        assert!(series.weekly.iter().chain(series.monthly.iter()).all(|p| p.progress == 0));
    }

    #[test]
    fn not_assessed_has_empty_series() {
        let results = vec![result("Not Assessed", "2026-03-19T09:00:00Z", 50.0)];
        let data = generate_progress_data(&results, &[bucket(ReadingLevel::NotAssessed)], now());
        assert_eq!(data["Not Assessed"], LevelProgress::default());
    }

    #[test]
    fn created_at_is_used_when_assessment_date_is_missing() {
        let undated: CategoryResult = serde_json::from_value(json!({
            "studentId": "s1",
            "readingLevel": "Transitioning",
            "createdAt": "2026-03-19T00:00:00Z",
            "overallScore": 64
        }))
        .unwrap();
        let data = generate_progress_data(&[undated], &[bucket(ReadingLevel::Transitioning)], now());
        assert_eq!(data["Transitioning"].weekly[3].progress, 64);
        assert_eq!(data["Transitioning"].monthly[5].progress, 64);
    }

    #[test]
    fn month_index_wraps_years() {
        let january = month_start(2026 * 12).unwrap();
        assert_eq!(january, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let december = month_start(2026 * 12 - 1).unwrap();
        assert_eq!(december, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
    }
}
