use serde::Serialize;
use tracing::{info, warn};

use crate::config::DashboardConfig;
use crate::progress::{CourseProgress, CourseProgressResolver};
use crate::quiz_stats::{QuizStatsAggregator, StudentQuizStatistics};
use crate::roster::{MembershipRecord, RosterResolver};
use crate::store::{ActivityLog, AttemptStore, IdentityStore, MembershipStore, StoreResult};

/// Everything the dashboard needs to read.
pub trait DashboardStore: MembershipStore + IdentityStore + AttemptStore + ActivityLog {}

impl<T> DashboardStore for T where T: MembershipStore + IdentityStore + AttemptStore + ActivityLog {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    #[serde(flatten)]
    pub member: MembershipRecord,
    pub quiz_stats: StudentQuizStatistics,
    pub course_progress: CourseProgress,
}

pub struct DashboardAssembler<'a, S> {
    store: &'a S,
    config: &'a DashboardConfig,
}

impl<'a, S: DashboardStore> DashboardAssembler<'a, S> {
    pub fn new(store: &'a S, config: &'a DashboardConfig) -> Self {
        Self { store, config }
    }

    /// One record per roster member, in roster order. Per-student failures
    /// become empty defaults and never fail the group.
    pub fn assemble(&self, group_id: i64) -> Vec<StudentRecord> {
        let roster = RosterResolver::new(self.store, self.config).resolve(group_id);
        let records: Vec<StudentRecord> = roster
            .into_iter()
            .map(|member| self.student_record(member))
            .collect();
        info!(group_id, students = records.len(), "group assembled");
        records
    }

    fn student_record(&self, member: MembershipRecord) -> StudentRecord {
        let student_id = member.student.id;
        let quiz_stats = self.quiz_stats(student_id).unwrap_or_else(|e| {
            warn!(student_id, error = %e, "quiz statistics failed; using empty record");
            StudentQuizStatistics::empty(student_id)
        });
        let course_progress = self.course_progress(student_id).unwrap_or_else(|e| {
            warn!(student_id, error = %e, "course progress failed; using placeholder");
            CourseProgress::not_started(student_id, &self.config.no_course_label)
        });
        StudentRecord {
            member,
            quiz_stats,
            course_progress,
        }
    }

    pub fn quiz_stats(&self, student_id: i64) -> StoreResult<StudentQuizStatistics> {
        QuizStatsAggregator::new(self.store, self.config.completed_rate_policy).compute(student_id)
    }

    pub fn course_progress(&self, student_id: i64) -> StoreResult<CourseProgress> {
        CourseProgressResolver::new(self.store, &self.config.no_course_label).resolve(student_id)
    }
}
