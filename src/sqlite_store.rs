use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};

use crate::quiz_stats;
use crate::store::{
    ActivityKind, ActivityLog, ActivityRecord, AttemptRollup, AttemptScore, AttemptStore,
    ClassMember, Group, GroupStore, IdentityStore, LeadershipStore, MembershipStore, Student,
    StoreError, StoreResult,
};

/// All store traits over one workspace connection.
#[derive(Clone, Copy)]
pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

/// A missing table is a source outage, anything else is a real query failure.
fn classify(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &e {
        if msg.starts_with("no such table") {
            return StoreError::Unavailable(msg.clone());
        }
    }
    StoreError::Query(e)
}

fn student_from_row(r: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(offset)?,
        login: r.get(offset + 1)?,
        display_name: r.get(offset + 2)?,
        email: r.get(offset + 3)?,
    })
}

impl IdentityStore for SqliteStore<'_> {
    fn student(&self, student_id: i64) -> StoreResult<Option<Student>> {
        self.conn
            .query_row(
                "SELECT id, login, display_name, email FROM users WHERE id = ?",
                [student_id],
                |r| student_from_row(r, 0),
            )
            .optional()
            .map_err(classify)
    }
}

impl GroupStore for SqliteStore<'_> {
    fn group(&self, group_id: i64) -> StoreResult<Option<Group>> {
        self.conn
            .query_row(
                "SELECT id, name, status FROM learning_groups WHERE id = ?",
                [group_id],
                |r| {
                    Ok(Group {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        status: r.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(classify)
    }
}

impl MembershipStore for SqliteStore<'_> {
    fn class_members(&self, group_id: i64) -> StoreResult<Vec<ClassMember>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT u.id, u.login, u.display_name, u.email, c.id, c.name
                 FROM users u
                 JOIN student_classes sc ON sc.student_id = u.id
                 JOIN classes c ON c.id = sc.class_id
                 WHERE c.group_id = ?
                 ORDER BY u.display_name, u.id, c.id",
            )
            .map_err(classify)?;
        stmt.query_map([group_id], |r| {
            Ok(ClassMember {
                student: student_from_row(r, 0)?,
                class_id: r.get(4)?,
                class_name: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(classify)
    }

    fn group_member_attribute(&self, group_id: i64, key: &str) -> StoreResult<Option<String>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT meta_value FROM group_meta
                 WHERE group_id = ? AND meta_key = ?
                 ORDER BY rowid
                 LIMIT 1",
                (group_id, key),
                |r| r.get(0),
            )
            .optional()
            .map_err(classify)?;
        Ok(raw.flatten())
    }

    fn students_with_attribute(&self, key: &str) -> StoreResult<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT user_id FROM user_meta
                 WHERE meta_key = ?
                 ORDER BY user_id",
            )
            .map_err(classify)?;
        stmt.query_map([key], |r| r.get::<_, i64>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(classify)
    }
}

impl SqliteStore<'_> {
    // The per-attempt grouping runs in SQL; `scored_only` moves the zero-point
    // filter into that inner step.
    fn attempt_scores(&self, student_id: i64, scored_only: bool) -> StoreResult<Vec<AttemptScore>> {
        let having = if scored_only {
            "HAVING COUNT(*) > 0 AND SUM(points) > 0"
        } else {
            "HAVING COUNT(*) > 0"
        };
        let sql = format!(
            "SELECT a.attempt_ref, a.quiz_id, s.earned, s.total
             FROM quiz_attempts a
             JOIN (
               SELECT attempt_ref,
                      SUM(points) AS earned,
                      COUNT(*) AS total
               FROM quiz_attempt_items
               WHERE graded = 1
               GROUP BY attempt_ref
               {having}
             ) s ON s.attempt_ref = a.attempt_ref
             WHERE a.student_id = ?
             ORDER BY a.attempt_ref"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        stmt.query_map([student_id], |r| {
            Ok(AttemptScore {
                attempt_ref: r.get(0)?,
                quiz_id: r.get(1)?,
                earned_points: r.get(2)?,
                total_points: r.get(3)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(classify)
    }
}

impl AttemptStore for SqliteStore<'_> {
    fn attempt_rollup(&self, student_id: i64) -> StoreResult<AttemptRollup> {
        let scores = self.attempt_scores(student_id, false)?;
        Ok(quiz_stats::rollup_scores(&scores))
    }

    fn scored_attempts(&self, student_id: i64) -> StoreResult<Vec<AttemptScore>> {
        self.attempt_scores(student_id, true)
    }
}

impl ActivityLog for SqliteStore<'_> {
    fn activities(
        &self,
        student_id: i64,
        kind: ActivityKind,
        status: Option<i64>,
    ) -> StoreResult<Vec<ActivityRecord>> {
        let mut sql = String::from(
            "SELECT ac.id, ac.ref_id, ac.status, ac.updated_at, ac.completed_at, ac.meta, c.title
             FROM activity ac
             LEFT JOIN courses c ON c.id = ac.ref_id AND ac.activity_type = 'course'
             WHERE ac.student_id = ? AND ac.activity_type = ?",
        );
        let mut bind: Vec<Value> = vec![
            Value::Integer(student_id),
            Value::Text(kind.as_str().to_string()),
        ];
        if let Some(s) = status {
            sql.push_str(" AND ac.status = ?");
            bind.push(Value::Integer(s));
        }
        sql.push_str(" ORDER BY COALESCE(ac.updated_at, 0) DESC, ac.id DESC");

        let mut stmt = self.conn.prepare(&sql).map_err(classify)?;
        stmt.query_map(params_from_iter(bind), |r| {
            Ok(ActivityRecord {
                id: r.get(0)?,
                ref_id: r.get(1)?,
                status: r.get(2)?,
                updated_at: r.get(3)?,
                completed_at: r.get(4)?,
                meta: r.get(5)?,
                title: r.get(6)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(classify)
    }
}

/// Attribute holding a user's serialized role/capability set.
const CAPABILITIES_KEY: &str = "capabilities";

impl LeadershipStore for SqliteStore<'_> {
    fn teacher_directory(&self) -> StoreResult<Vec<Student>> {
        // instr over lower() rather than LIKE: role names contain '_'.
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT u.id, u.login, u.display_name, u.email
                 FROM users u
                 JOIN user_meta um ON um.user_id = u.id
                 WHERE (um.meta_key = ?1 AND (
                          instr(lower(um.meta_value), 'group_leader') > 0
                          OR instr(lower(um.meta_value), 'teacher') > 0
                          OR instr(lower(um.meta_value), 'instructor') > 0
                          OR instr(lower(um.meta_value), 'educator') > 0))
                    OR instr(lower(um.meta_key), 'group_leader') > 0
                    OR instr(lower(um.meta_key), 'instructor') > 0
                    OR instr(lower(um.meta_key), 'teacher') > 0
                 ORDER BY u.display_name, u.id",
            )
            .map_err(classify)?;
        stmt.query_map([CAPABILITIES_KEY], |r| student_from_row(r, 0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(classify)
    }

    fn classes_taught(&self, teacher_id: i64) -> StoreResult<Vec<(i64, String, i64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, group_id FROM classes
                 WHERE teacher_id = ? AND group_id IS NOT NULL
                 ORDER BY id",
            )
            .map_err(classify)?;
        stmt.query_map([teacher_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(classify)
    }

    fn user_attribute_keys(&self, user_id: i64, prefix: &str) -> StoreResult<Vec<String>> {
        // substr rather than LIKE: attribute prefixes contain '_'.
        let mut stmt = self
            .conn
            .prepare(
                "SELECT DISTINCT meta_key FROM user_meta
                 WHERE user_id = ?1 AND substr(meta_key, 1, length(?2)) = ?2
                 ORDER BY meta_key",
            )
            .map_err(classify)?;
        stmt.query_map((user_id, prefix), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(classify)
    }

    fn user_attribute(&self, user_id: i64, key: &str) -> StoreResult<Option<String>> {
        let raw: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT meta_value FROM user_meta
                 WHERE user_id = ? AND meta_key = ?
                 ORDER BY rowid
                 LIMIT 1",
                (user_id, key),
                |r| r.get(0),
            )
            .optional()
            .map_err(classify)?;
        Ok(raw.flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn missing_table_is_reported_unavailable() {
        let conn = conn();
        conn.execute("DROP TABLE student_classes", []).expect("drop");
        let store = SqliteStore::new(&conn);
        let e = store.class_members(1).expect_err("no table");
        assert!(matches!(e, StoreError::Unavailable(_)), "{e:?}");
    }

    #[test]
    fn attempt_grouping_ignores_ungraded_items() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO quiz_attempts(attempt_ref, student_id, quiz_id, created_at) VALUES
               (1, 7, 100, 10), (2, 7, 100, 20), (3, 7, 101, 30);
             INSERT INTO quiz_attempt_items(attempt_ref, question_id, points, graded) VALUES
               (1, 1, 1, 1), (1, 2, 0, 1), (1, 3, 5, 0),
               (2, 1, 0, 0),
               (3, 1, 0, 1), (3, 2, 0, 1), (3, 3, 0, 1), (3, 4, 0, 1);",
        )
        .expect("seed");
        let store = SqliteStore::new(&conn);

        let all = store.attempt_scores(7, false).expect("all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].attempt_ref, 1);
        assert_eq!(all[0].earned_points, 1.0);
        assert_eq!(all[0].total_points, 2.0);
        assert_eq!(all[1].total_points, 4.0);

        let scored = store.scored_attempts(7).expect("scored");
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].attempt_ref, 1);
    }

    #[test]
    fn attempt_total_is_the_graded_item_count() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO quiz_attempts(attempt_ref, student_id, quiz_id) VALUES (1, 7, 100);
             INSERT INTO quiz_attempt_items(attempt_ref, question_id, points, graded) VALUES
               (1, 1, 3, 1), (1, 2, 2, 1), (1, 3, 4, 0);",
        )
        .expect("seed");
        let store = SqliteStore::new(&conn);

        let all = store.attempt_scores(7, false).expect("all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].earned_points, 5.0);
        assert_eq!(all[0].total_points, 2.0);
    }

    #[test]
    fn activities_order_most_recent_first_and_filter_status() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO courses(id, title) VALUES (50, 'Algebra');
             INSERT INTO activity(id, student_id, ref_id, activity_type, status, updated_at) VALUES
               (1, 7, 50, 'course', 1, 100),
               (2, 7, 50, 'course', 0, 300),
               (3, 7, 9, 'quiz', 1, 200),
               (4, 7, 9, 'quiz', 0, 400);",
        )
        .expect("seed");
        let store = SqliteStore::new(&conn);

        let courses = store.activities(7, ActivityKind::Course, None).expect("courses");
        assert_eq!(courses.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(courses[0].title.as_deref(), Some("Algebra"));

        let passed = store.activities(7, ActivityKind::Quiz, Some(1)).expect("quiz");
        assert_eq!(passed.len(), 1);
        assert_eq!(passed[0].id, 3);
        assert_eq!(passed[0].title, None);
    }

    #[test]
    fn teacher_directory_matches_roles_and_leader_attributes() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO users(id, login, display_name, email) VALUES
               (1, 'zoe', 'Zoe Ziv', 'zoe@example.org'),
               (2, 'adi', 'Adi Bar', 'adi@example.org'),
               (3, 'kid', 'Kid Student', 'kid@example.org'),
               (4, 'mo', 'Mo Lead', 'mo@example.org'),
               (5, 'eve', 'Eve Edu', 'eve@example.org');
             INSERT INTO user_meta(user_id, meta_key, meta_value) VALUES
               (1, 'capabilities', '{\"School_Teacher\": true}'),
               (1, 'group_leader_10', '10'),
               (2, 'capabilities', '{\"stm_lms_instructor\": true}'),
               (3, 'capabilities', '{\"subscriber\": true}'),
               (3, 'group_members_10', '10'),
               (4, 'group_leaders', '[10]'),
               (5, 'capabilities', '{\"Educator\": true}'),
               (5, 'capabilities_note', 'teacher');",
        )
        .expect("seed");
        let store = SqliteStore::new(&conn);
        let ids: Vec<i64> = store
            .teacher_directory()
            .expect("directory")
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![2, 5, 4, 1]);
    }

    #[test]
    fn attribute_prefix_does_not_treat_underscore_as_wildcard() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO user_meta(user_id, meta_key, meta_value) VALUES
               (1, 'group_leader_5', '5'),
               (1, 'groupXleaderX6', '6');",
        )
        .expect("seed");
        let store = SqliteStore::new(&conn);
        let keys = store.user_attribute_keys(1, "group_leader_").expect("keys");
        assert_eq!(keys, vec!["group_leader_5".to_string()]);
    }
}
