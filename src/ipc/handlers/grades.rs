use crate::auth::Operation;
use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn row_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, rusqlite::Error> {
    conn.query_row(sql, [id], |r| r.get(0))
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::WriteGrade) {
        return resp;
    }
    let student_id = match helpers::required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match helpers::required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_i64()) else {
        return err(&req.id, "validation_error", "score must be an integer", None);
    };
    if !calc::is_valid_score(score) {
        return err(
            &req.id,
            "validation_error",
            format!("score must be in {}..={}", calc::MIN_SCORE, calc::MAX_SCORE),
            None,
        );
    }

    let grade_type = helpers::param_str(req, "type")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("homework")
        .to_string();
    let date = match helpers::param_str(req, "date") {
        None => chrono::Utc::now().to_rfc3339(),
        Some(raw) => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(_) => raw.to_string(),
            Err(_) => {
                return err(
                    &req.id,
                    "validation_error",
                    "date must be an RFC 3339 timestamp",
                    None,
                )
            }
        },
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Dangling references are caller mistakes, not missing resources.
    match row_exists(conn, "SELECT EXISTS(SELECT 1 FROM students WHERE id = ?)", &student_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(&req.id, "validation_error", "studentId does not exist", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match row_exists(conn, "SELECT EXISTS(SELECT 1 FROM subjects WHERE id = ?)", &subject_id) {
        Ok(true) => {}
        Ok(false) => {
            return err(&req.id, "validation_error", "subjectId does not exist", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let grade_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, student_id, subject_id, score, type, date)
         VALUES (?, ?, ?, ?, ?, ?)",
        (&grade_id, &student_id, &subject_id, score, &grade_type, &date),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "gradeId": grade_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "score": score,
            "type": grade_type,
            "date": date,
        }),
    )
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::WriteGrade) {
        return resp;
    }
    let grade_id = match helpers::required_str(req, "gradeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(score) = req.params.get("score").and_then(|v| v.as_i64()) else {
        return err(&req.id, "validation_error", "score must be an integer", None);
    };
    if !calc::is_valid_score(score) {
        return err(
            &req.id,
            "validation_error",
            format!("score must be in {}..={}", calc::MIN_SCORE, calc::MAX_SCORE),
            None,
        );
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // Only the score is mutable on an existing grade.
    let updated = match conn.execute(
        "UPDATE grades SET score = ? WHERE id = ?",
        (score, &grade_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "grade not found", None);
    }

    ok(&req.id, json!({ "gradeId": grade_id, "score": score }))
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::WriteGrade) {
        return resp;
    }
    let grade_id = match helpers::required_str(req, "gradeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let deleted = match conn.execute("DELETE FROM grades WHERE id = ?", [&grade_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "grade not found", None);
    }

    ok(&req.id, json!({ "deleted": true }))
}

/// Raw grade rows for a group and subject, one entry per rostered student.
/// The aggregated view of the same data lives under reports.groupSubject.
fn handle_grades_list_group_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ReadGroupReport) {
        return resp;
    }
    let group_id = match helpers::required_str(req, "groupId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match helpers::required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match row_exists(conn, "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?)", &group_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "group not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match row_exists(conn, "SELECT EXISTS(SELECT 1 FROM subjects WHERE id = ?)", &subject_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "subject not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let mut roster_stmt = match conn.prepare(
        "SELECT s.id, u.name FROM students s
         JOIN users u ON u.id = s.user_id
         WHERE s.group_id = ?
         ORDER BY u.name, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let roster: Result<Vec<(String, String)>, _> = roster_stmt
        .query_map([&group_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect());
    let roster = match roster {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut grades_stmt = match conn.prepare(
        "SELECT id, score, type, date FROM grades
         WHERE student_id = ? AND subject_id = ?
         ORDER BY date, rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut students = Vec::with_capacity(roster.len());
    for (student_id, name) in roster {
        let grades: Result<Vec<serde_json::Value>, _> = grades_stmt
            .query_map([&student_id, &subject_id], |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "score": r.get::<_, i64>(1)?,
                    "type": r.get::<_, String>(2)?,
                    "date": r.get::<_, String>(3)?,
                }))
            })
            .and_then(|it| it.collect());
        let grades = match grades {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        students.push(json!({
            "studentId": student_id,
            "name": name,
            "grades": grades,
        }));
    }

    ok(&req.id, json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.create" => Some(handle_grades_create(state, req)),
        "grades.update" => Some(handle_grades_update(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.listGroupSubject" => Some(handle_grades_list_group_subject(state, req)),
        _ => None,
    }
}
