use crate::auth::{self, AuthDenied, Identity, Operation};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

/// Resolve the caller's identity from `params.token`, if any.
pub fn identity(state: &AppState, req: &Request) -> Option<Identity> {
    let token = req.params.get("token")?.as_str()?;
    state.sessions.get(token).cloned()
}

/// Run the authorization gate for `op`. Returns the caller's identity on
/// allow, or a ready-to-send error envelope on deny. A denial is always a
/// distinct error, never an empty success.
pub fn gate(
    state: &AppState,
    req: &Request,
    op: &Operation,
) -> Result<Identity, serde_json::Value> {
    let caller = identity(state, req);
    match auth::authorize(caller.as_ref(), op) {
        Ok(()) => match caller {
            Some(i) => Ok(i),
            None => Err(err(&req.id, "unauthenticated", "no valid session token", None)),
        },
        Err(AuthDenied::Unauthenticated) => Err(err(
            &req.id,
            "unauthenticated",
            "no valid session token",
            None,
        )),
        Err(AuthDenied::Forbidden) => Err(err(
            &req.id,
            "forbidden",
            "operation not permitted for this role",
            None,
        )),
    }
}

pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

/// Required non-empty string param; trims surrounding whitespace.
pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    let raw = param_str(req, key).map(str::trim).unwrap_or("");
    if raw.is_empty() {
        return Err(err(
            &req.id,
            "validation_error",
            format!("missing {}", key),
            None,
        ));
    }
    Ok(raw.to_string())
}
