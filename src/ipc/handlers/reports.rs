use crate::auth::Operation;
use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub student_id: String,
    pub name: String,
    pub scores: Vec<i64>,
    pub average: f64,
    #[serde(rename = "final")]
    pub final_grade: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubjectRow {
    subject_id: String,
    subject_name: String,
    scores: Vec<i64>,
    average: f64,
    #[serde(rename = "final")]
    final_grade: Option<i64>,
}

fn student_scores(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<Vec<i64>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT score FROM grades
         WHERE student_id = ? AND subject_id = ?
         ORDER BY date, rowid",
    )?;
    stmt.query_map([student_id, subject_id], |r| r.get::<_, i64>(0))
        .and_then(|it| it.collect())
}

/// One row per rostered student, in display-name order (id as tie-break).
/// Students with no qualifying grades stay on the roster with empty scores
/// and no final grade.
fn assemble_group_report(
    conn: &Connection,
    group_id: &str,
    subject_id: &str,
) -> Result<Vec<ReportRow>, rusqlite::Error> {
    let mut roster_stmt = conn.prepare(
        "SELECT s.id, u.name FROM students s
         JOIN users u ON u.id = s.user_id
         WHERE s.group_id = ?
         ORDER BY u.name, s.id",
    )?;
    let roster: Vec<(String, String)> = roster_stmt
        .query_map([group_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect())?;

    let mut rows = Vec::with_capacity(roster.len());
    for (student_id, name) in roster {
        let scores = student_scores(conn, &student_id, subject_id)?;
        let summary = calc::aggregate(scores.iter().copied());
        rows.push(ReportRow {
            student_id,
            name,
            scores,
            average: summary.average,
            final_grade: summary.final_grade,
        });
    }
    Ok(rows)
}

/// Report rows in the exchange format: header plus one line per student,
/// scores comma-joined inside a quoted cell, average at two decimals, and
/// `-` standing in for a final grade that cannot be assigned yet.
pub fn render_csv(rows: &[ReportRow]) -> String {
    let mut out = String::from("Student,Grades,Average,Final\n");
    for row in rows {
        let grades_cell = row
            .scores
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let final_cell = match row.final_grade {
            Some(f) => f.to_string(),
            None => "-".to_string(),
        };
        out.push_str(&format!(
            "{},\"{}\",{},{}\n",
            row.name,
            grades_cell,
            calc::format_average(row.average),
            final_cell
        ));
    }
    out
}

fn check_group_subject(
    conn: &Connection,
    req: &Request,
    group_id: &str,
    subject_id: &str,
) -> Option<serde_json::Value> {
    let group_ok: Result<bool, _> = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?)",
        [group_id],
        |r| r.get(0),
    );
    match group_ok {
        Ok(true) => {}
        Ok(false) => return Some(err(&req.id, "not_found", "group not found", None)),
        Err(e) => return Some(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
    let subject_ok: Result<bool, _> = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM subjects WHERE id = ?)",
        [subject_id],
        |r| r.get(0),
    );
    match subject_ok {
        Ok(true) => None,
        Ok(false) => Some(err(&req.id, "not_found", "subject not found", None)),
        Err(e) => Some(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

fn handle_report_group_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Some(resp) = check_group_subject(conn, req, &group_id, &subject_id) {
        return resp;
    }

    match assemble_group_report(conn, &group_id, &subject_id) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_report_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Some(resp) = check_group_subject(conn, req, &group_id, &subject_id) {
        return resp;
    }

    match assemble_group_report(conn, &group_id, &subject_id) {
        Ok(rows) => ok(
            &req.id,
            json!({
                "csv": render_csv(&rows),
                "filename": format!("report_{}_{}.csv", group_id, subject_id),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// The caller's own record: one row per subject whether or not any grade
/// exists in it, plus overall statistics across subjects.
fn handle_report_self(state: &mut AppState, req: &Request) -> serde_json::Value {
    let caller = helpers::identity(state, req);
    let op = Operation::ReadOwnGrades {
        user_id: caller.map(|i| i.user_id).unwrap_or_default(),
    };
    let identity = match helpers::gate(state, req, &op) {
        Ok(i) => i,
        Err(resp) => return resp,
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // A student-role identity without a student row is a missing profile,
    // which is not the same thing as a denial or an empty record.
    let student_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE user_id = ?",
            [&identity.user_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = student_id else {
        return err(&req.id, "not_found", "student profile not found", None);
    };

    let mut subjects_stmt = match conn.prepare("SELECT id, name FROM subjects ORDER BY name, id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects: Result<Vec<(String, String)>, _> = subjects_stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect());
    let subjects = match subjects {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut rows = Vec::with_capacity(subjects.len());
    let mut all_scores: Vec<i64> = Vec::new();
    for (subject_id, subject_name) in subjects {
        let scores = match student_scores(conn, &student_id, &subject_id) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let summary = calc::aggregate(scores.iter().copied());
        all_scores.extend_from_slice(&scores);
        rows.push(SubjectRow {
            subject_id,
            subject_name,
            scores,
            average: summary.average,
            final_grade: summary.final_grade,
        });
    }

    let overall = calc::aggregate(all_scores.iter().copied());
    let excellent = all_scores.iter().filter(|&&s| s == 5).count();
    let good = all_scores.iter().filter(|&&s| s == 4).count();

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "rows": rows,
            "overall": {
                "average": overall.average,
                "total": overall.count,
                "excellent": excellent,
                "good": good,
            },
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.groupSubject" => Some(handle_report_group_subject(state, req)),
        "reports.exportCsv" => Some(handle_report_export_csv(state, req)),
        "reports.self" => Some(handle_report_self(state, req)),
        _ => None,
    }
}
