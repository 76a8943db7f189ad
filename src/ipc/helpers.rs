use rusqlite::Connection;

use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::id_from_json;

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Positive integer id from `params[key]`, given as a number or a numeric
/// string. Anything else is rejected with `code` before any query runs.
pub fn required_id(req: &Request, key: &str, code: &str) -> Result<i64, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, code, format!("missing {}", key), None));
    };
    id_from_json(raw).ok_or_else(|| {
        err(
            &req.id,
            code,
            format!("{} must be a positive integer", key),
            Some(serde_json::json!({ key: raw })),
        )
    })
}
