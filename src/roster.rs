use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::DashboardConfig;
use crate::store::{parse_id_list, IdentityStore, MembershipStore, Student, StoreResult};

/// Where a membership came from, in merge priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    ClassRoster,
    GroupAttribute,
    StudentAttribute,
}

impl SourceTag {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceTag::ClassRoster => "class_roster",
            SourceTag::GroupAttribute => "group_attribute",
            SourceTag::StudentAttribute => "student_attribute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub group_id: i64,
    #[serde(flatten)]
    pub student: Student,
    pub source: SourceTag,
    pub class_id: Option<i64>,
    pub class_name: Option<String>,
}

pub struct RosterResolver<'a, S> {
    store: &'a S,
    config: &'a DashboardConfig,
}

impl<'a, S> RosterResolver<'a, S>
where
    S: MembershipStore + IdentityStore,
{
    pub fn new(store: &'a S, config: &'a DashboardConfig) -> Self {
        Self { store, config }
    }

    /// Members of `group_id` from all three sources, one record per student,
    /// sorted by display name. The first source to name a student wins.
    /// Unknown groups and failing sources contribute nothing.
    pub fn resolve(&self, group_id: i64) -> Vec<MembershipRecord> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        let class_members = degrade(
            group_id,
            SourceTag::ClassRoster,
            self.store.class_members(group_id),
        );
        for m in class_members {
            if seen.insert(m.student.id) {
                merged.push(MembershipRecord {
                    group_id,
                    student: m.student,
                    source: SourceTag::ClassRoster,
                    class_id: Some(m.class_id),
                    class_name: Some(m.class_name),
                });
            }
        }

        let attribute_ids = degrade(
            group_id,
            SourceTag::GroupAttribute,
            self.group_attribute_ids(group_id),
        );
        self.push_by_id(group_id, SourceTag::GroupAttribute, attribute_ids, &mut seen, &mut merged);

        let key = self.config.student_group_key(group_id);
        let marked_ids = degrade(
            group_id,
            SourceTag::StudentAttribute,
            self.store.students_with_attribute(&key),
        );
        self.push_by_id(group_id, SourceTag::StudentAttribute, marked_ids, &mut seen, &mut merged);

        merged.sort_by(|a, b| {
            a.student
                .display_name
                .cmp(&b.student.display_name)
                .then(a.student.id.cmp(&b.student.id))
        });
        debug!(group_id, count = merged.len(), "roster resolved");
        merged
    }

    fn group_attribute_ids(&self, group_id: i64) -> StoreResult<Vec<i64>> {
        match self
            .store
            .group_member_attribute(group_id, &self.config.group_members_key)?
        {
            Some(raw) => parse_id_list("group_meta", &raw),
            None => Ok(Vec::new()),
        }
    }

    fn push_by_id(
        &self,
        group_id: i64,
        source: SourceTag,
        ids: Vec<i64>,
        seen: &mut HashSet<i64>,
        out: &mut Vec<MembershipRecord>,
    ) {
        for id in ids {
            if seen.contains(&id) {
                continue;
            }
            match self.store.student(id) {
                Ok(Some(student)) => {
                    seen.insert(id);
                    out.push(MembershipRecord {
                        group_id,
                        student,
                        source,
                        class_id: None,
                        class_name: None,
                    });
                }
                Ok(None) => {
                    debug!(group_id, student_id = id, source = source.as_str(), "member id has no identity");
                }
                Err(e) => {
                    warn!(group_id, student_id = id, source = source.as_str(), error = %e, "identity lookup failed");
                }
            }
        }
    }
}

fn degrade<T: Default>(group_id: i64, source: SourceTag, r: StoreResult<T>) -> T {
    r.unwrap_or_else(|e| {
        warn!(group_id, source = source.as_str(), error = %e, "membership source skipped");
        T::default()
    })
}
