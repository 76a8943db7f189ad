use crate::config;
use crate::dashboard::DashboardAssembler;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_id};
use crate::ipc::types::{AppState, Request};
use crate::sqlite_store::SqliteStore;
use crate::store::GroupStore;
use serde_json::json;
use tracing::warn;

/// `getGroupStudents`: the roster with quiz statistics and course progress
/// for every member. Unknown or empty groups answer with an empty list.
fn handle_group_students(state: &mut AppState, req: &Request) -> serde_json::Value {
    let group_id = match required_id(req, "groupId", "invalid_group_id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cfg = config::load(conn);
    let store = SqliteStore::new(conn);

    let group = store.group(group_id).unwrap_or_else(|e| {
        warn!(group_id, error = %e, "group metadata unavailable");
        None
    });
    let students = DashboardAssembler::new(&store, &cfg).assemble(group_id);
    ok(
        &req.id,
        json!({
            "groupId": group_id,
            "group": group,
            "students": students,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.groupStudents" => Some(handle_group_students(state, req)),
        _ => None,
    }
}
