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
    let exe = env!("CARGO_BIN_EXE_eljurd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn eljurd");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

struct School {
    admin: String,
    teacher: String,
    student: String,
    student_id: String,
    subject_id: String,
}

fn setup_school(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> School {
    let workspace = temp_dir("eljur-perms");
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "seed",
        "workspace.seed",
        json!({
            "adminName": "Admin",
            "adminEmail": "admin@eljur.local",
            "adminPassword": "AdminPass123"
        }),
    );
    let admin = request_ok(
        stdin,
        reader,
        "la",
        "auth.login",
        json!({ "email": "admin@eljur.local", "password": "AdminPass123" }),
    )["token"]
        .as_str()
        .expect("admin token")
        .to_string();

    request_ok(
        stdin,
        reader,
        "ct",
        "users.create",
        json!({
            "token": admin,
            "name": "Ivan Ivanovich",
            "email": "teacher@eljur.local",
            "password": "TeacherPass123",
            "role": "teacher"
        }),
    );
    let student_res = request_ok(
        stdin,
        reader,
        "cs",
        "users.create",
        json!({
            "token": admin,
            "name": "Petr Petrov",
            "email": "student@eljur.local",
            "password": "StudentPass123",
            "role": "student"
        }),
    );
    let student_id = student_res["profileId"].as_str().expect("profileId").to_string();

    let subject = request_ok(
        stdin,
        reader,
        "sub",
        "directory.createSubject",
        json!({ "token": admin, "name": "Math" }),
    );
    let subject_id = subject["subjectId"].as_str().expect("subjectId").to_string();

    let teacher = request_ok(
        stdin,
        reader,
        "lt",
        "auth.login",
        json!({ "email": "teacher@eljur.local", "password": "TeacherPass123" }),
    )["token"]
        .as_str()
        .expect("teacher token")
        .to_string();
    let student = request_ok(
        stdin,
        reader,
        "ls",
        "auth.login",
        json!({ "email": "student@eljur.local", "password": "StudentPass123" }),
    )["token"]
        .as_str()
        .expect("student token")
        .to_string();

    School {
        admin,
        teacher,
        student,
        student_id,
        subject_id,
    }
}

#[test]
fn grade_writes_gated_by_role() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = setup_school(&mut stdin, &mut reader);

    // A student identity is refused outright, not silently ignored.
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "s-write",
        "grades.create",
        json!({
            "token": school.student,
            "studentId": school.student_id,
            "subjectId": school.subject_id,
            "score": 5
        }),
    );
    assert_eq!(code, "forbidden");

    // The same write from the teacher goes through.
    let grade = request_ok(
        &mut stdin,
        &mut reader,
        "t-write",
        "grades.create",
        json!({
            "token": school.teacher,
            "studentId": school.student_id,
            "subjectId": school.subject_id,
            "score": 5
        }),
    );
    assert_eq!(grade["type"].as_str(), Some("homework"));
    let grade_id = grade["gradeId"].as_str().expect("gradeId").to_string();

    // Admins may write grades too.
    request_ok(
        &mut stdin,
        &mut reader,
        "a-update",
        "grades.update",
        json!({ "token": school.admin, "gradeId": grade_id, "score": 4 }),
    );

    let _ = child.kill();
}

#[test]
fn no_token_means_unauthenticated() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = setup_school(&mut stdin, &mut reader);

    for (method, params) in [
        ("users.list", json!({})),
        (
            "grades.create",
            json!({
                "studentId": school.student_id,
                "subjectId": school.subject_id,
                "score": 5
            }),
        ),
        ("reports.self", json!({})),
        ("directory.list", json!({ "token": "bogus-token" })),
    ] {
        let code = request_err_code(&mut stdin, &mut reader, "anon", method, params);
        assert_eq!(code, "unauthenticated", "method {}", method);
    }

    let _ = child.kill();
}

#[test]
fn score_and_reference_validation() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = setup_school(&mut stdin, &mut reader);

    for bad_score in [0, 1, 6, -2] {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            "bad-score",
            "grades.create",
            json!({
                "token": school.teacher,
                "studentId": school.student_id,
                "subjectId": school.subject_id,
                "score": bad_score
            }),
        );
        assert_eq!(code, "validation_error", "score {}", bad_score);
    }

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "dangling",
        "grades.create",
        json!({
            "token": school.teacher,
            "studentId": "no-such-student",
            "subjectId": school.subject_id,
            "score": 4
        }),
    );
    assert_eq!(code, "validation_error");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "upd-missing",
        "grades.update",
        json!({ "token": school.teacher, "gradeId": "no-such-grade", "score": 4 }),
    );
    assert_eq!(code, "not_found");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "del-missing",
        "grades.delete",
        json!({ "token": school.teacher, "gradeId": "no-such-grade" }),
    );
    assert_eq!(code, "not_found");

    let _ = child.kill();
}

#[test]
fn user_management_is_admin_only() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = setup_school(&mut stdin, &mut reader);

    for token in [&school.teacher, &school.student] {
        let code = request_err_code(
            &mut stdin,
            &mut reader,
            "mk-user",
            "users.create",
            json!({
                "token": token,
                "name": "X",
                "email": "x@eljur.local",
                "password": "p",
                "role": "teacher"
            }),
        );
        assert_eq!(code, "forbidden");

        let code = request_err_code(
            &mut stdin,
            &mut reader,
            "ls-user",
            "users.list",
            json!({ "token": token }),
        );
        assert_eq!(code, "forbidden");
    }

    let _ = child.kill();
}

#[test]
fn logout_invalidates_the_token() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let school = setup_school(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "out",
        "auth.logout",
        json!({ "token": school.teacher }),
    );
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "stale",
        "grades.create",
        json!({
            "token": school.teacher,
            "studentId": school.student_id,
            "subjectId": school.subject_id,
            "score": 3
        }),
    );
    assert_eq!(code, "unauthenticated");

    let _ = child.kill();
}

#[test]
fn wrong_credentials_rejected() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _school = setup_school(&mut stdin, &mut reader);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "badpw",
        "auth.login",
        json!({ "email": "teacher@eljur.local", "password": "wrong" }),
    );
    assert_eq!(code, "unauthenticated");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "nouser",
        "auth.login",
        json!({ "email": "ghost@eljur.local", "password": "wrong" }),
    );
    assert_eq!(code, "unauthenticated");

    let _ = child.kill();
}
