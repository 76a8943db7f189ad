use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_id};
use crate::ipc::types::{AppState, Request};
use crate::sqlite_store::SqliteStore;
use crate::teachers::TeacherGroupResolver;
use serde_json::json;
use tracing::warn;

/// Teacher picker: everyone with a teaching role or leader attribute.
fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cfg = config::load(conn);
    let store = SqliteStore::new(conn);
    match TeacherGroupResolver::new(&store, &cfg).teachers() {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) if e.is_degradable() => {
            warn!(error = %e, "teacher directory unavailable");
            ok(&req.id, json!({ "teachers": [] }))
        }
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_groups_for_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let teacher_id = match required_id(req, "teacherId", "invalid_teacher_id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cfg = config::load(conn);
    let store = SqliteStore::new(conn);
    let groups = TeacherGroupResolver::new(&store, &cfg).groups_for_teacher(teacher_id);
    ok(&req.id, json!({ "teacherId": teacher_id, "groups": groups }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "groups.forTeacher" => Some(handle_groups_for_teacher(state, req)),
        _ => None,
    }
}
