use crate::config;
use crate::dashboard::DashboardAssembler;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_id};
use crate::ipc::types::{AppState, Request};
use crate::sqlite_store::SqliteStore;
use serde_json::json;

fn handle_student_query(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match required_id(req, "studentId", "invalid_student_id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let cfg = config::load(conn);
    let store = SqliteStore::new(conn);
    let assembler = DashboardAssembler::new(&store, &cfg);

    let want_stats = req.method != "students.courseProgress";
    let want_progress = req.method != "students.quizStats";

    let mut result = json!({ "studentId": student_id });
    if want_stats {
        match assembler.quiz_stats(student_id) {
            Ok(s) => result["quizStats"] = json!(s),
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        }
    }
    if want_progress {
        match assembler.course_progress(student_id) {
            Ok(p) => result["courseProgress"] = json!(p),
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        }
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.quizStats" | "students.courseProgress" | "students.quizData" => {
            Some(handle_student_query(state, req))
        }
        _ => None,
    }
}
