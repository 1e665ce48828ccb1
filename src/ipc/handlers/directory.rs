use crate::auth::Operation;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_create_group(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ManageUsers) {
        return resp;
    }
    let name = match helpers::required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(course) = req.params.get("course").and_then(|v| v.as_i64()) else {
        return err(&req.id, "validation_error", "course must be an integer", None);
    };
    if course < 1 {
        return err(&req.id, "validation_error", "course must be positive", None);
    }

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let group_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO groups(id, name, course) VALUES (?, ?, ?)",
        (&group_id, &name, course),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "groupId": group_id, "name": name, "course": course }),
    )
}

fn handle_create_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ManageUsers) {
        return resp;
    }
    let name = match helpers::required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, name) VALUES (?, ?)",
        (&subject_id, &name),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": subject_id, "name": name }))
}

/// Groups plus subjects in one shot, the picker data a report screen needs.
fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ReadGroupReport) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut groups_stmt = match conn.prepare("SELECT id, name, course FROM groups ORDER BY name, id")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let groups: Result<Vec<serde_json::Value>, _> = groups_stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "course": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect());
    let groups = match groups {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut subjects_stmt = match conn.prepare("SELECT id, name FROM subjects ORDER BY name, id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let subjects: Result<Vec<serde_json::Value>, _> = subjects_stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect());
    let subjects = match subjects {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "groups": groups, "subjects": subjects }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "directory.createGroup" => Some(handle_create_group(state, req)),
        "directory.createSubject" => Some(handle_create_subject(state, req)),
        "directory.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
