use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db;

pub const SETTINGS_KEY: &str = "dashboard.config";

/// What `completed_only_rate` reports when a student has attempts but none
/// with a nonzero score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletedRatePolicy {
    #[default]
    Zero,
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub completed_rate_policy: CompletedRatePolicy,
    pub no_course_label: String,
    pub group_members_key: String,
    pub student_group_key_prefix: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            completed_rate_policy: CompletedRatePolicy::Zero,
            no_course_label: "No Course Data".to_string(),
            group_members_key: "members".to_string(),
            student_group_key_prefix: "group_members_".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn student_group_key(&self, group_id: i64) -> String {
        format!("{}{}", self.student_group_key_prefix, group_id)
    }

    /// Applies a partial camelCase object on top of `self`. Unknown keys and
    /// wrongly typed values are rejected.
    pub fn merged(&self, patch: &serde_json::Value) -> Result<Self, String> {
        let Some(obj) = patch.as_object() else {
            return Err("config must be an object".to_string());
        };
        let mut base = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(m)) => m,
            _ => return Err("config is not serializable".to_string()),
        };
        for (k, v) in obj {
            if !base.contains_key(k) {
                return Err(format!("unknown config key: {}", k));
            }
            base.insert(k.clone(), v.clone());
        }
        let next: DashboardConfig = serde_json::from_value(serde_json::Value::Object(base))
            .map_err(|e| e.to_string())?;
        for (name, value) in [
            ("groupMembersKey", &next.group_members_key),
            ("studentGroupKeyPrefix", &next.student_group_key_prefix),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", name));
            }
        }
        Ok(next)
    }
}

/// Stored config merged over defaults. A stored value that no longer parses
/// is ignored so a bad write never takes the dashboard down.
pub fn load(conn: &Connection) -> DashboardConfig {
    match db::settings_get_json(conn, SETTINGS_KEY) {
        Ok(Some(v)) => match DashboardConfig::default().merged(&v) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "stored dashboard config is invalid; using defaults");
                DashboardConfig::default()
            }
        },
        Ok(None) => DashboardConfig::default(),
        Err(e) => {
            warn!(error = %e, "failed to read dashboard config; using defaults");
            DashboardConfig::default()
        }
    }
}

pub fn save(conn: &Connection, cfg: &DashboardConfig) -> anyhow::Result<()> {
    db::settings_set_json(conn, SETTINGS_KEY, &serde_json::to_value(cfg)?)
}

pub fn reset(conn: &Connection) -> anyhow::Result<()> {
    db::settings_delete(conn, SETTINGS_KEY)
}
