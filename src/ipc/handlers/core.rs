use crate::auth;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "validation_error", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // Tokens minted against a previous workspace would leak
            // identities across stores.
            state.sessions.clear();
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

/// Bootstrap the first admin account. Only valid while the users table is
/// empty; after that, accounts are managed through `users.create`.
fn handle_workspace_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match helpers::required_str(req, "adminName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let email = match helpers::required_str(req, "adminEmail") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let password = match helpers::required_str(req, "adminPassword") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let user_count: i64 = match conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if user_count > 0 {
        return err(
            &req.id,
            "validation_error",
            "workspace already has users",
            None,
        );
    }

    let user_id = Uuid::new_v4().to_string();
    let res = conn.execute(
        "INSERT INTO users(id, name, email, credential_hash, role) VALUES (?, ?, ?, ?, ?)",
        (
            &user_id,
            &name,
            &email,
            auth::credential_hash(&password),
            auth::Role::Admin.to_string(),
        ),
    );
    if let Err(e) = res {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "userId": user_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "workspace.seed" => Some(handle_workspace_seed(state, req)),
        _ => None,
    }
}
