use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_id};
use crate::ipc::types::{AppState, Request};
use crate::roster::RosterResolver;
use crate::sqlite_store::SqliteStore;
use crate::store::GroupStore;
use serde_json::json;

fn handle_groups_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let group_id = match required_id(req, "groupId", "invalid_group_id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match SqliteStore::new(conn).group(group_id) {
        Ok(group) => ok(&req.id, json!({ "group": group })),
        Err(e) if e.is_degradable() => ok(&req.id, json!({ "group": null })),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_roster_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let students = RosterResolver::new(&store, &cfg).resolve(group_id);
    ok(&req.id, json!({ "groupId": group_id, "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.get" => Some(handle_groups_get(state, req)),
        "roster.resolve" => Some(handle_roster_resolve(state, req)),
        _ => None,
    }
}
