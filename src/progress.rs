use chrono::{DateTime, SecondsFormat};
use serde::Serialize;
use tracing::warn;

use crate::store::{ActivityKind, ActivityLog, ActivityRecord, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl CompletionStatus {
    fn from_flag(flag: i64) -> Self {
        match flag {
            1 => CompletionStatus::Completed,
            0 => CompletionStatus::InProgress,
            _ => CompletionStatus::NotStarted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub student_id: i64,
    pub course_id: Option<i64>,
    pub course_name: String,
    pub status: CompletionStatus,
    pub completion_date: Option<String>,
}

impl CourseProgress {
    pub fn not_started(student_id: i64, placeholder: &str) -> Self {
        Self {
            student_id,
            course_id: None,
            course_name: placeholder.to_string(),
            status: CompletionStatus::NotStarted,
            completion_date: None,
        }
    }
}

fn rfc3339(ts: i64) -> Option<String> {
    DateTime::from_timestamp(ts, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

pub struct CourseProgressResolver<'a, S> {
    store: &'a S,
    placeholder: &'a str,
}

impl<'a, S: ActivityLog> CourseProgressResolver<'a, S> {
    pub fn new(store: &'a S, placeholder: &'a str) -> Self {
        Self { store, placeholder }
    }

    /// Progress in the student's most recently updated course. This is the
    /// state of that one course, not a rollup across courses.
    pub fn resolve(&self, student_id: i64) -> StoreResult<CourseProgress> {
        let records = match self.store.activities(student_id, ActivityKind::Course, None) {
            Ok(v) => v,
            Err(e) if e.is_degradable() => {
                warn!(student_id, error = %e, "activity log unavailable");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let latest = records
            .iter()
            .filter(|r| r.title.is_some())
            .max_by_key(|r| (r.updated_at.unwrap_or(0), r.id));
        let Some(ActivityRecord {
            ref_id,
            status,
            completed_at,
            title: Some(title),
            ..
        }) = latest
        else {
            return Ok(CourseProgress::not_started(student_id, self.placeholder));
        };

        Ok(CourseProgress {
            student_id,
            course_id: Some(*ref_id),
            course_name: title.clone(),
            status: CompletionStatus::from_flag(*status),
            completion_date: (*completed_at).and_then(rfc3339),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeLog(Vec<ActivityRecord>);

    impl ActivityLog for FakeLog {
        fn activities(
            &self,
            _student_id: i64,
            kind: ActivityKind,
            _status: Option<i64>,
        ) -> StoreResult<Vec<ActivityRecord>> {
            assert_eq!(kind, ActivityKind::Course);
            Ok(self.0.clone())
        }
    }

    fn course(id: i64, course_id: i64, status: i64, updated: i64, title: Option<&str>) -> ActivityRecord {
        ActivityRecord {
            id,
            ref_id: course_id,
            status,
            updated_at: Some(updated),
            completed_at: None,
            meta: None,
            title: title.map(str::to_string),
        }
    }

    #[test]
    fn most_recent_course_wins_over_completed_older_one() {
        let log = FakeLog(vec![
            course(1, 50, 1, 100, Some("Algebra")),
            course(2, 51, 0, 200, Some("Geometry")),
        ]);
        let p = CourseProgressResolver::new(&log, "No Course Data")
            .resolve(7)
            .expect("resolve");
        assert_eq!(p.status, CompletionStatus::InProgress);
        assert_eq!(p.course_name, "Geometry");
        assert_eq!(p.course_id, Some(51));
    }

    #[test]
    fn no_record_is_not_started_placeholder() {
        let log = FakeLog(vec![course(1, 50, 1, 100, None)]);
        let p = CourseProgressResolver::new(&log, "No Course Data")
            .resolve(7)
            .expect("resolve");
        assert_eq!(p, CourseProgress::not_started(7, "No Course Data"));
    }

    #[test]
    fn completed_course_reports_rfc3339_date() {
        let mut rec = course(1, 50, 1, 100, Some("Algebra"));
        rec.completed_at = Some(1_700_000_000);
        let p = CourseProgressResolver::new(&FakeLog(vec![rec]), "x")
            .resolve(7)
            .expect("resolve");
        assert_eq!(p.status, CompletionStatus::Completed);
        assert_eq!(p.completion_date.as_deref(), Some("2023-11-14T22:13:20Z"));
    }

    #[test]
    fn unknown_status_flag_is_not_started() {
        let p = CourseProgressResolver::new(&FakeLog(vec![course(1, 50, 2, 100, Some("Algebra"))]), "x")
            .resolve(7)
            .expect("resolve");
        assert_eq!(p.status, CompletionStatus::NotStarted);
        assert_eq!(p.course_name, "Algebra");
    }
}
