//! Access guard for the Vida Plena server.
//!
//! The session token travels in an `HttpOnly` cookie bound to a
//! server-side session record. The guard only checks that the cookie
//! resolves to an identity; whether the owning account still exists is
//! the handler's responsibility.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{Json, Response},
};

use crate::routes::ErrorResponse;
use crate::session::{SessionStore, SESSION_TTL_SECS};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "plena_session";

/// Identity resolved from the session cookie, injected as a request
/// extension by [`require_session`].
#[derive(Debug, Clone)]
pub struct Identity(pub String);

/// Extract the session token from the request's `Cookie` header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Build the `Set-Cookie` value for a freshly issued session.
///
/// `HttpOnly` always; `Secure` only in production so local development
/// over plain HTTP keeps working.
pub fn session_cookie(token: &str, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; Max-Age={SESSION_TTL_SECS}; HttpOnly; SameSite=Lax"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build the `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Guard middleware for protected routes.
///
/// Resolves the session cookie and injects [`Identity`]; unauthenticated
/// requests are denied with a structured 401 before the handler runs.
pub async fn require_session(
    State(sessions): State<SessionStore>,
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let token = session_token(request.headers());

    let identity = match token {
        Some(ref token) => sessions.resolve(token).map_err(|e| {
            tracing::error!(error = %e, "Session lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Erro ao verificar sessão".into(),
                    code: "STORAGE_UNAVAILABLE".into(),
                }),
            )
        })?,
        None => None,
    };

    match identity {
        Some(user_name) => {
            request.extensions_mut().insert(Identity(user_name));
            Ok(next.run(request).await)
        }
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Não autenticado".into(),
                code: "AUTH_REQUIRED".into(),
            }),
        )),
    }
}
