use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::DashboardConfig;
use crate::roster::RosterResolver;
use crate::store::{
    parse_id_list, Group, GroupStore, IdentityStore, LeadershipStore, MembershipStore, Student,
    StoreResult,
};

const LEADER_KEY_PREFIX: &str = "group_leader_";
const LEADER_LIST_KEY: &str = "group_leaders";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadershipSource {
    Class,
    LeaderAttribute,
    LeaderList,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherGroup {
    pub group_id: i64,
    pub name: String,
    pub status: String,
    pub source: LeadershipSource,
    pub students_count: usize,
}

pub struct TeacherGroupResolver<'a, S> {
    store: &'a S,
    config: &'a DashboardConfig,
}

impl<'a, S> TeacherGroupResolver<'a, S>
where
    S: LeadershipStore + GroupStore + MembershipStore + IdentityStore,
{
    pub fn new(store: &'a S, config: &'a DashboardConfig) -> Self {
        Self { store, config }
    }

    /// Everyone who looks like a teacher, whether or not they lead a group yet.
    pub fn teachers(&self) -> StoreResult<Vec<Student>> {
        let teachers = self.store.teacher_directory()?;
        debug!(count = teachers.len(), "teacher directory");
        Ok(teachers)
    }

    /// Groups led by `teacher_id`, sorted by name. The leader list attribute
    /// is only consulted when the class table and per-group leader attributes
    /// found nothing.
    pub fn groups_for_teacher(&self, teacher_id: i64) -> Vec<TeacherGroup> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for (_, class_name, group_id) in or_empty(teacher_id, "classes", self.store.classes_taught(teacher_id)) {
            if let Some(g) = self.existing_group(group_id) {
                if seen.insert(group_id) {
                    let name = format!("Class: {}", class_name);
                    out.push(self.entry(group_id, name, g.status, LeadershipSource::Class));
                }
            }
        }

        let keys = or_empty(
            teacher_id,
            "leader_attribute",
            self.store.user_attribute_keys(teacher_id, LEADER_KEY_PREFIX),
        );
        let attribute_ids = keys
            .iter()
            .filter_map(|k| k.strip_prefix(LEADER_KEY_PREFIX)?.parse::<i64>().ok());
        self.push_groups(attribute_ids, LeadershipSource::LeaderAttribute, &mut seen, &mut out);

        if out.is_empty() {
            let ids = or_empty(teacher_id, "leader_list", self.leader_list(teacher_id));
            self.push_groups(ids.into_iter(), LeadershipSource::LeaderList, &mut seen, &mut out);
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.group_id.cmp(&b.group_id)));
        out
    }

    fn leader_list(&self, teacher_id: i64) -> StoreResult<Vec<i64>> {
        match self.store.user_attribute(teacher_id, LEADER_LIST_KEY)? {
            Some(raw) => parse_id_list("user_meta", &raw),
            None => Ok(Vec::new()),
        }
    }

    fn push_groups(
        &self,
        ids: impl Iterator<Item = i64>,
        source: LeadershipSource,
        seen: &mut HashSet<i64>,
        out: &mut Vec<TeacherGroup>,
    ) {
        for group_id in ids {
            if seen.contains(&group_id) {
                continue;
            }
            if let Some(g) = self.existing_group(group_id) {
                seen.insert(group_id);
                out.push(self.entry(group_id, g.name, g.status, source));
            }
        }
    }

    fn entry(&self, group_id: i64, name: String, status: String, source: LeadershipSource) -> TeacherGroup {
        TeacherGroup {
            group_id,
            name,
            status,
            source,
            students_count: RosterResolver::new(self.store, self.config).resolve(group_id).len(),
        }
    }

    fn existing_group(&self, group_id: i64) -> Option<Group> {
        match self.store.group(group_id) {
            Ok(g) => g,
            Err(e) => {
                warn!(group_id, error = %e, "group lookup failed");
                None
            }
        }
    }
}

fn or_empty<T: Default>(teacher_id: i64, source: &str, r: StoreResult<T>) -> T {
    r.unwrap_or_else(|e| {
        warn!(teacher_id, source, error = %e, "leadership source skipped");
        T::default()
    })
}
