//! Read-only repository interfaces over the external stores.
//!
//! Every resolver takes its stores as explicit parameters bound by these
//! traits; the SQLite workspace implements all of them in `sqlite_store`.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The table backing a source does not exist in this workspace.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// A value expected to be list-shaped (or JSON) is not.
    #[error("malformed record in {source_name}: {message}")]
    Malformed {
        source_name: &'static str,
        message: String,
    },

    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "source_unavailable",
            StoreError::Malformed { .. } => "malformed_record",
            StoreError::Query(_) => "internal_error",
        }
    }

    /// Unavailable and malformed sources degrade to empty; query failures do not.
    pub fn is_degradable(&self) -> bool {
        !matches!(self, StoreError::Query(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: i64,
    pub display_name: String,
    pub email: String,
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub status: String,
}

/// One student row from the class-roster join, already carrying identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMember {
    pub student: Student,
    pub class_id: i64,
    pub class_name: String,
}

/// Per-attempt aggregate of graded line items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptScore {
    pub attempt_ref: i64,
    pub quiz_id: i64,
    pub earned_points: f64,
    pub total_points: f64,
}

/// Means over a student's attempts before rounding. `None` means no attempt
/// qualified for that mean.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AttemptRollup {
    pub total_attempts: i64,
    pub unique_quizzes: i64,
    pub mean_percentage: Option<f64>,
    pub mean_scored_percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    Quiz,
    Course,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityKind::Quiz => "quiz",
            ActivityKind::Course => "course",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub id: i64,
    pub ref_id: i64,
    pub status: i64,
    pub updated_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// Raw metadata text as stored; parsing is up to the consumer.
    pub meta: Option<String>,
    /// Course title when the record is a course activity with a catalog entry.
    pub title: Option<String>,
}

pub trait IdentityStore {
    fn student(&self, student_id: i64) -> StoreResult<Option<Student>>;
}

pub trait GroupStore {
    fn group(&self, group_id: i64) -> StoreResult<Option<Group>>;
}

pub trait MembershipStore {
    /// Source (a): class/group mapping joined with student-class assignments.
    fn class_members(&self, group_id: i64) -> StoreResult<Vec<ClassMember>>;

    /// Source (b): the raw list-valued attribute stored on the group.
    fn group_member_attribute(&self, group_id: i64, key: &str) -> StoreResult<Option<String>>;

    /// Source (c): students carrying the per-group membership attribute.
    fn students_with_attribute(&self, key: &str) -> StoreResult<Vec<i64>>;
}

pub trait AttemptStore {
    /// Primary aggregate over attempts with at least one graded item.
    fn attempt_rollup(&self, student_id: i64) -> StoreResult<AttemptRollup>;

    /// Attempts whose graded points sum above zero, filtered inside the
    /// per-attempt grouping.
    fn scored_attempts(&self, student_id: i64) -> StoreResult<Vec<AttemptScore>>;
}

pub trait ActivityLog {
    /// Records of one kind, most recently updated first.
    fn activities(&self, student_id: i64, kind: ActivityKind, status: Option<i64>) -> StoreResult<Vec<ActivityRecord>>;
}

/// Teacher-side lookups used to list teachers and the groups they lead.
pub trait LeadershipStore {
    /// Users whose capabilities name a teaching role, or who carry a
    /// leader, instructor or teacher attribute, sorted by display name.
    fn teacher_directory(&self) -> StoreResult<Vec<Student>>;
    fn classes_taught(&self, teacher_id: i64) -> StoreResult<Vec<(i64, String, i64)>>;
    fn user_attribute_keys(&self, user_id: i64, prefix: &str) -> StoreResult<Vec<String>>;
    fn user_attribute(&self, user_id: i64, key: &str) -> StoreResult<Option<String>>;
}

/// Parses a list-valued attribute into ids. Accepts integers and numeric
/// strings; anything that is not a JSON array is malformed.
pub fn parse_id_list(source_name: &'static str, raw: &str) -> StoreResult<Vec<i64>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| StoreError::Malformed {
            source_name,
            message: e.to_string(),
        })?;
    let Some(items) = value.as_array() else {
        return Err(StoreError::Malformed {
            source_name,
            message: format!("expected a list, got {}", json_kind(&value)),
        });
    };
    Ok(items.iter().filter_map(id_from_json).collect())
}

/// Positive integer ids, given as numbers or numeric strings.
pub fn id_from_json(v: &serde_json::Value) -> Option<i64> {
    let id = match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
