use crate::auth::{self, Identity, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::str::FromStr;
use uuid::Uuid;

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = match helpers::required_str(req, "email") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match helpers::required_str(req, "password") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let row: Option<(String, String, String, String)> = match conn
        .query_row(
            "SELECT id, name, credential_hash, role FROM users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // One failure shape for unknown email and bad password; callers learn
    // nothing about which accounts exist.
    let Some((user_id, name, stored_hash, role_raw)) = row else {
        return err(&req.id, "unauthenticated", "invalid credentials", None);
    };
    if !auth::verify_credential(&password, &stored_hash) {
        return err(&req.id, "unauthenticated", "invalid credentials", None);
    }
    let role = match Role::from_str(&role_raw) {
        Ok(r) => r,
        Err(e) => return err(&req.id, "db_query_failed", e, None),
    };

    let token = Uuid::new_v4().to_string();
    state.sessions.insert(
        token.clone(),
        Identity {
            user_id: user_id.clone(),
            role,
        },
    );

    ok(
        &req.id,
        json!({
            "token": token,
            "userId": user_id,
            "name": name,
            "role": role.to_string(),
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(token) = helpers::param_str(req, "token") else {
        return err(&req.id, "validation_error", "missing token", None);
    };
    let removed = state.sessions.remove(token).is_some();
    ok(&req.id, json!({ "loggedOut": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
