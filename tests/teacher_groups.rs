use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn groups_for_teacher_and_group_lookup() {
    let workspace = temp_dir("rosterd-teacher-groups");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    {
        let conn = Connection::open(workspace.join("rosterd.sqlite3")).expect("open db");
        conn.execute_batch(
            "INSERT INTO users(id, login, display_name, email) VALUES
               (5, 'tom', 'Tom Student', 'tom@school.test'),
               (77, 'orly', 'Orly Ben', 'orly@school.test'),
               (78, 'yael', 'Yael Dor', 'yael@school.test'),
               (79, 'avi', 'Avi Gal', 'avi@school.test');
             INSERT INTO learning_groups(id, name, status) VALUES
               (10, 'Science Club', 'publish'), (11, 'Art', 'draft'), (12, 'Chess', 'publish');
             INSERT INTO classes(id, name, group_id, teacher_id) VALUES (100, '7B', 10, 77);
             INSERT INTO group_meta(group_id, meta_key, meta_value) VALUES (11, 'members', '[5]');
             INSERT INTO user_meta(user_id, meta_key, meta_value) VALUES
               (5, 'capabilities', '{\"subscriber\": true}'),
               (77, 'group_leader_11', '11'),
               (78, 'group_leaders', '[12, \"10\"]'),
               (79, 'capabilities', '{\"school_teacher\": true}');",
        )
        .expect("seed");
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "groups.forTeacher",
        json!({ "teacherId": 77 }),
    );
    assert_eq!(res["teacherId"], 77);
    assert_eq!(
        res["groups"],
        json!([
            { "groupId": 11, "name": "Art", "status": "draft", "source": "leader_attribute", "studentsCount": 1 },
            { "groupId": 10, "name": "Class: 7B", "status": "publish", "source": "class", "studentsCount": 0 },
        ])
    );

    let fallback = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "groups.forTeacher",
        json!({ "teacherId": "78" }),
    );
    let names: Vec<&str> = fallback["groups"]
        .as_array()
        .map(|a| a.iter().filter_map(|g| g["name"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["Chess", "Science Club"]);

    let group = request_ok(&mut stdin, &mut reader, "4", "groups.get", json!({ "groupId": 12 }));
    assert_eq!(
        group["group"],
        json!({ "id": 12, "name": "Chess", "status": "publish" })
    );
    let missing = request_ok(&mut stdin, &mut reader, "5", "groups.get", json!({ "groupId": 99 }));
    assert!(missing["group"].is_null());

    // Teachers without any group still appear in the directory.
    let directory = request_ok(&mut stdin, &mut reader, "7", "teachers.list", json!({}));
    assert_eq!(
        directory["teachers"],
        json!([
            { "id": 79, "login": "avi", "displayName": "Avi Gal", "email": "avi@school.test" },
            { "id": 77, "login": "orly", "displayName": "Orly Ben", "email": "orly@school.test" },
            { "id": 78, "login": "yael", "displayName": "Yael Dor", "email": "yael@school.test" },
        ])
    );

    let bad = request(
        &mut stdin,
        &mut reader,
        "6",
        "groups.forTeacher",
        json!({ "teacherId": -1 }),
    );
    assert_eq!(bad["error"]["code"], "invalid_teacher_id");

    let _ = child.kill();
}
