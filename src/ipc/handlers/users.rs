use crate::auth::{self, Operation, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ManageUsers) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, email, role FROM users ORDER BY name, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows: Result<Vec<serde_json::Value>, _> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect());
    match rows {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_users_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ManageUsers) {
        return resp;
    }

    let name = match helpers::required_str(req, "name") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match helpers::required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match helpers::required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role_raw = match helpers::required_str(req, "role") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let role = match Role::from_str(&role_raw) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "validation_error", e, None),
    };

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // The user row and its role profile row are one logical unit; the
    // transaction keeps a failed profile write from leaving a bare user.
    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    let taken: Result<bool, _> = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)",
        [&email],
        |r| r.get(0),
    );
    match taken {
        Ok(true) => return err(&req.id, "duplicate_email", "email already in use", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let user_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO users(id, name, email, credential_hash, role) VALUES (?, ?, ?, ?, ?)",
        (
            &user_id,
            &name,
            &email,
            auth::credential_hash(&password),
            role.to_string(),
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    let profile_id = match role {
        Role::Admin => None,
        Role::Teacher => {
            let id = Uuid::new_v4().to_string();
            if let Err(e) = tx.execute(
                "INSERT INTO teachers(id, user_id) VALUES (?, ?)",
                (&id, &user_id),
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
            Some(id)
        }
        Role::Student => {
            // Students start unassigned; the group is attached later through
            // users.assignGroup.
            let id = Uuid::new_v4().to_string();
            if let Err(e) = tx.execute(
                "INSERT INTO students(id, user_id, group_id) VALUES (?, ?, NULL)",
                (&id, &user_id),
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
            Some(id)
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "userId": user_id,
            "profileId": profile_id,
            "name": name,
            "email": email,
            "role": role.to_string(),
        }),
    )
}

fn handle_users_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ManageUsers) {
        return resp;
    }
    let user_id = match helpers::required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let Some(conn) = state.db.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let tx = match conn.transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };

    // Dependents first so the foreign keys hold at every step: grades, then
    // the student row, then the teacher row, then the user itself. Absent
    // profile rows delete zero rows, which is fine.
    if let Err(e) = tx.execute(
        "DELETE FROM grades WHERE student_id IN (SELECT id FROM students WHERE user_id = ?)",
        [&user_id],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE user_id = ?", [&user_id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    if let Err(e) = tx.execute("DELETE FROM teachers WHERE user_id = ?", [&user_id]) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let deleted = match tx.execute("DELETE FROM users WHERE id = ?", [&user_id]) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if deleted == 0 {
        // Dropping the transaction rolls the dependent deletes back.
        return err(&req.id, "not_found", "user not found", None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "deleted": true }))
}

fn handle_users_assign_group(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = helpers::gate(state, req, &Operation::ManageUsers) {
        return resp;
    }
    let user_id = match helpers::required_str(req, "userId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Absent or null groupId clears the assignment.
    let group_id = match req.params.get("groupId") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => return err(&req.id, "validation_error", "groupId must be a string", None),
        },
    };

    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let student_id: Option<String> = match conn
        .query_row("SELECT id FROM students WHERE user_id = ?", [&user_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = student_id else {
        return err(&req.id, "not_found", "student profile not found", None);
    };

    if let Some(gid) = &group_id {
        let exists: Result<bool, _> = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE id = ?)",
            [gid],
            |r| r.get(0),
        );
        match exists {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "group not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET group_id = ? WHERE id = ?",
        (&group_id, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "groupId": group_id }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "users.list" => Some(handle_users_list(state, req)),
        "users.create" => Some(handle_users_create(state, req)),
        "users.delete" => Some(handle_users_delete(state, req)),
        "users.assignGroup" => Some(handle_users_assign_group(state, req)),
        _ => None,
    }
}
