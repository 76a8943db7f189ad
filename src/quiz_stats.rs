use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::config::CompletedRatePolicy;
use crate::store::{
    ActivityKind, ActivityLog, ActivityRecord, AttemptRollup, AttemptScore, AttemptStore,
    StoreResult,
};

/// Activity status flag for a passed quiz (not merely attempted).
const PASSED: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsSource {
    Attempts,
    Activity,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentQuizStatistics {
    pub student_id: i64,
    pub total_attempts: i64,
    pub unique_quizzes: i64,
    pub overall_rate: f64,
    /// `None` only under `CompletedRatePolicy::Null` when attempts exist but
    /// none scored above zero.
    pub completed_only_rate: Option<f64>,
    pub source: StatsSource,
}

impl StudentQuizStatistics {
    pub fn empty(student_id: i64) -> Self {
        Self {
            student_id,
            total_attempts: 0,
            unique_quizzes: 0,
            overall_rate: 0.0,
            completed_only_rate: Some(0.0),
            source: StatsSource::None,
        }
    }
}

/// Half-up rounding to one decimal: `Int(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

fn attempt_percentage(s: &AttemptScore) -> Option<f64> {
    if s.total_points > 0.0 {
        Some(s.earned_points / s.total_points * 100.0)
    } else {
        None
    }
}

fn mean<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .fold((0.0_f64, 0_usize), |(sum, n), v| (sum + v, n + 1));
    if n > 0 {
        Some(sum / n as f64)
    } else {
        None
    }
}

/// Rolls per-attempt aggregates up into the unrounded means. Attempts with
/// zero total points still count toward `total_attempts` but not toward
/// either mean.
pub fn rollup_scores(scores: &[AttemptScore]) -> AttemptRollup {
    let unique_quizzes = scores.iter().map(|s| s.quiz_id).collect::<BTreeSet<_>>().len();
    AttemptRollup {
        total_attempts: scores.len() as i64,
        unique_quizzes: unique_quizzes as i64,
        mean_percentage: mean(scores.iter().filter_map(attempt_percentage)),
        mean_scored_percentage: mean(
            scores
                .iter()
                .filter(|s| s.earned_points > 0.0)
                .filter_map(attempt_percentage),
        ),
    }
}

/// Reads the stored percentage from an activity's metadata object. Numbers
/// and numeric strings are accepted.
fn percentage_from_meta(meta: Option<&str>) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(meta?).ok()?;
    let pct = match value.get("percentage")? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    pct.is_finite().then_some(pct)
}

pub struct QuizStatsAggregator<'a, S> {
    store: &'a S,
    policy: CompletedRatePolicy,
}

impl<'a, S> QuizStatsAggregator<'a, S>
where
    S: AttemptStore + ActivityLog,
{
    pub fn new(store: &'a S, policy: CompletedRatePolicy) -> Self {
        Self { store, policy }
    }

    /// Attempt statistics when the student has any graded attempt, else the
    /// passed-quiz activity log, else zeros.
    pub fn compute(&self, student_id: i64) -> StoreResult<StudentQuizStatistics> {
        match self.store.attempt_rollup(student_id) {
            Ok(rollup) if rollup.total_attempts > 0 => {
                return self.from_rollup(student_id, rollup);
            }
            Ok(_) => {}
            Err(e) if e.is_degradable() => {
                warn!(student_id, error = %e, "attempt store unavailable; using activity log");
            }
            Err(e) => return Err(e),
        }

        let records = match self
            .store
            .activities(student_id, ActivityKind::Quiz, Some(PASSED))
        {
            Ok(v) => v,
            Err(e) if e.is_degradable() => {
                warn!(student_id, error = %e, "activity log unavailable");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        if let Some(stats) = from_activity(student_id, &records) {
            return Ok(stats);
        }

        debug!(student_id, "no quiz data");
        Ok(StudentQuizStatistics::empty(student_id))
    }

    fn from_rollup(&self, student_id: i64, rollup: AttemptRollup) -> StoreResult<StudentQuizStatistics> {
        let overall_rate = rollup.mean_percentage.map(round_off_1_decimal).unwrap_or(0.0);
        let mut completed = rollup.mean_scored_percentage.map(round_off_1_decimal);

        if completed.unwrap_or(0.0) == 0.0 && overall_rate > 0.0 {
            if let Some(corrected) = self.corrected_completed_rate(student_id)? {
                warn!(
                    student_id,
                    overall_rate, corrected, "completed-only rate was zero with a nonzero overall rate; corrected"
                );
                completed = Some(corrected);
            }
        }

        let completed_only_rate = match (completed, self.policy) {
            (Some(v), _) => Some(v),
            (None, CompletedRatePolicy::Zero) => Some(0.0),
            (None, CompletedRatePolicy::Null) => None,
        };

        Ok(StudentQuizStatistics {
            student_id,
            total_attempts: rollup.total_attempts,
            unique_quizzes: rollup.unique_quizzes,
            overall_rate,
            completed_only_rate,
            source: StatsSource::Attempts,
        })
    }

    /// Completed-only rate from attempts filtered before aggregation. `None`
    /// unless the recomputed value is nonzero. Query failures propagate like
    /// the primary query's.
    fn corrected_completed_rate(&self, student_id: i64) -> StoreResult<Option<f64>> {
        let scored = match self.store.scored_attempts(student_id) {
            Ok(v) => v,
            Err(e) if e.is_degradable() => {
                warn!(student_id, error = %e, "completed-only correction source unavailable");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let Some(mean_scored) = mean(scored.iter().filter_map(attempt_percentage)) else {
            return Ok(None);
        };
        let rate = round_off_1_decimal(mean_scored);
        Ok((rate > 0.0).then_some(rate))
    }
}

// Passed-only records: both rates are the same mean.
fn from_activity(student_id: i64, records: &[ActivityRecord]) -> Option<StudentQuizStatistics> {
    let mut quizzes = BTreeSet::new();
    let mut percentages = Vec::with_capacity(records.len());
    for r in records {
        match percentage_from_meta(r.meta.as_deref()) {
            Some(p) => {
                quizzes.insert(r.ref_id);
                percentages.push(p);
            }
            None => {
                warn!(student_id, activity_id = r.id, "quiz activity without a usable percentage");
            }
        }
    }
    let rate = round_off_1_decimal(mean(percentages.iter().copied())?);
    Some(StudentQuizStatistics {
        student_id,
        total_attempts: percentages.len() as i64,
        unique_quizzes: quizzes.len() as i64,
        overall_rate: rate,
        completed_only_rate: Some(rate),
        source: StatsSource::Activity,
    })
}
