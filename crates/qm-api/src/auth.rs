use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::state::AppState;

/// The caller identity resolved by [`require_auth`], carried downstream as a
/// request extension. Handlers extract it with `Extension<Identity>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// Validates one of three schemes (bearer, basic, resource-password) and, on
/// success, resolves a caller identity and stashes it as a request
/// extension for handlers to read. A shared-secret-only bearer check would
/// gate access but can't tell callers apart; this additionally derives *who*
/// is calling, since ownership checks need an identity.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let identity = match header.as_deref() {
        Some(h) if h.starts_with("Bearer ") => {
            let token = &h["Bearer ".len()..];
            if token == state.auth_token.as_str() {
                let user = query_param(request.uri().query(), "user").unwrap_or_else(|| "api".to_string());
                Some(Identity(user))
            } else {
                None
            }
        }
        Some(h) if h.starts_with("Basic ") => basic_identity(&h["Basic ".len()..], &state.auth_token),
        Some(h) if h.starts_with("Resource ") => {
            resource_password_identity(&state, &h["Resource ".len()..]).await
        }
        _ => None,
    };

    match identity {
        Some(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        None => (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response(),
    }
}

fn basic_identity(encoded: &str, auth_token: &str) -> Option<Identity> {
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    (password == auth_token).then(|| Identity(user.to_string()))
}

async fn resource_password_identity(state: &AppState, credentials: &str) -> Option<Identity> {
    let (resource_pk, password) = credentials.split_once(':')?;
    let resource = state.repo.get_resource(&qm_domain::ResourceId::new(resource_pk)).await.ok()??;
    if resource.use_password.is_empty() || resource.use_password != password {
        return None;
    }
    resource.user.map(Identity)
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}
