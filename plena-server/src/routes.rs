//! Route handlers for the Vida Plena server.
//!
//! The HTTP surface keeps the paths and JSON field names the front-end
//! already speaks (Portuguese), while every error leaves the server as a
//! structured payload instead of embedded markup.

use crate::auth::{self, require_session, Identity};
use crate::chat::ChatService;
use crate::session::SessionStore;
use crate::store::{ProfileUpdate, UserSettings, UserStore};
use axum::{
    extract::{Extension, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Redirect, Response},
    routing::{delete, get, post},
    Form, Router,
};
use plena_common::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub users: UserStore,
    pub sessions: SessionStore,
    pub chat: Arc<ChatService>,
    /// Whether session cookies carry the `Secure` flag.
    pub secure_cookies: bool,
}

/// Error response payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Generic success payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

/// Registration form body.
#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub nome: String,
    pub email: String,
    pub senha: String,
}

/// Login form body.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub senha: String,
}

/// Session status for `GET /verificar-sessao`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatus {
    pub logado: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usuario: Option<String>,
    #[serde(rename = "imagemPerfil", skip_serializing_if = "Option::is_none")]
    pub imagem_perfil: Option<String>,
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub message: Option<String>,
}

/// Chat reply payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Profile payload for `GET /api/perfil`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub nome: String,
    pub email: String,
    #[serde(rename = "imagemPerfil")]
    pub imagem_perfil: Option<String>,
}

/// Profile update body. `imagemPerfil` distinguishes absent (left as is)
/// from null (cleared).
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub nome: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(rename = "imagemPerfil", default)]
    pub imagem_perfil: Option<Option<String>>,
    #[serde(rename = "senhaAtual", default)]
    pub senha_atual: Option<String>,
    #[serde(rename = "novaSenha", default)]
    pub nova_senha: Option<String>,
}

/// Newsletter subscription body.
#[derive(Debug, Deserialize)]
pub struct NewsletterRequest {
    #[serde(default)]
    pub email: Option<String>,
}

/// Newsletter subscription result.
#[derive(Debug, Serialize, Deserialize)]
pub struct NewsletterResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "alreadyExists", skip_serializing_if = "Option::is_none")]
    pub already_exists: Option<bool>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Convert a domain error into a structured HTTP error.
fn error_response(err: Error) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        }),
    )
}

fn internal_error(message: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
            code: "INTERNAL_ERROR".to_string(),
        }),
    )
}

/// Build the complete router.
pub fn build_routes(state: AppState) -> Router {
    let guarded = Router::new()
        .route(
            "/api/perfil",
            get(get_profile_handler).put(update_profile_handler),
        )
        .route(
            "/api/configuracoes",
            get(get_settings_handler).put(update_settings_handler),
        )
        .route("/api/conta", delete(delete_account_handler))
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            require_session,
        ));

    Router::new()
        .route("/registro", post(register_handler))
        .route("/login", post(login_handler))
        .route("/sair", get(logout_handler))
        .route("/verificar-sessao", get(check_session_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/reset", post(chat_reset_handler))
        .route("/newsletter", post(newsletter_handler))
        .route("/health", get(health_handler))
        .merge(guarded)
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth handlers
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /registro` — create an account, then send the user to login.
async fn register_handler(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Result<Redirect, ApiError> {
    let user = state
        .users
        .register(&form.nome, &form.email, &form.senha)
        .map_err(error_response)?;

    tracing::info!(user = %user.name, "Account registered");
    Ok(Redirect::to("/login"))
}

/// `POST /login` — verify credentials and issue a session cookie.
async fn login_handler(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    let user = state
        .users
        .verify_login(&form.email, &form.senha)
        .map_err(error_response)?;

    let Some(user) = user else {
        return Err(error_response(Error::Auth(
            "e-mail ou senha incorretos".into(),
        )));
    };

    let session = state.sessions.create(&user.name).map_err(error_response)?;
    let cookie = auth::session_cookie(&session.token, state.secure_cookies);

    tracing::info!(user = %user.name, "Login successful");

    let mut response = Redirect::to("/home").into_response();
    response.headers_mut().append(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie)
            .map_err(|_| internal_error("Erro ao emitir cookie de sessão"))?,
    );
    Ok(response)
}

/// `GET /sair` — destroy the session (best-effort) and redirect to login.
async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = auth::session_token(&headers) {
        if let Err(e) = state.sessions.destroy(&token) {
            tracing::warn!(error = %e, "Failed to destroy session on logout");
        }
    }

    let mut response = Redirect::to("/login").into_response();
    set_no_store(&mut response);
    clear_cookie(&mut response, state.secure_cookies);
    response
}

/// `GET /verificar-sessao` — report authentication state.
///
/// A valid token whose account has since disappeared reports as logged
/// out; storage hiccups degrade to logged out as well rather than
/// failing the page that polls this.
async fn check_session_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let status = resolve_account(&state, &headers).map_or_else(
        || SessionStatus {
            logado: false,
            usuario: None,
            imagem_perfil: None,
        },
        |user| SessionStatus {
            logado: true,
            usuario: Some(user.name),
            imagem_perfil: user.profile_image,
        },
    );

    let mut response = Json(status).into_response();
    set_no_store(&mut response);
    response
}

/// Resolve the cookie to a live account, tolerating absence at every step.
fn resolve_account(state: &AppState, headers: &HeaderMap) -> Option<crate::store::User> {
    let token = auth::session_token(headers)?;
    let name = state
        .sessions
        .resolve(&token)
        .map_err(|e| tracing::warn!(error = %e, "Session lookup failed"))
        .ok()??;
    state
        .users
        .find_by_name(&name)
        .map_err(|e| tracing::warn!(error = %e, "Account lookup failed"))
        .ok()?
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat handlers
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /api/chat` — forward a message to the shared conversation.
async fn chat_handler(
    State(state): State<AppState>,
    Json(body): Json<ChatMessage>,
) -> Result<Json<ChatReply>, ApiError> {
    let message = body.message.unwrap_or_default();
    let reply = state
        .chat
        .send_message(&message)
        .await
        .map_err(error_response)?;
    Ok(Json(ChatReply { reply }))
}

/// `POST /api/chat/reset` — reseed the conversation from the preamble.
async fn chat_reset_handler(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.chat.reset().await.map_err(error_response)?;
    Ok(Json(SuccessResponse {
        success: true,
        message: "Contexto da IA reiniciado com sucesso".into(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Profile and settings handlers (guarded)
// ─────────────────────────────────────────────────────────────────────────────

/// `GET /api/perfil`
async fn get_profile_handler(
    State(state): State<AppState>,
    Extension(Identity(name)): Extension<Identity>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .users
        .find_by_name(&name)
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::NotFound("usuário não encontrado".into())))?;

    Ok(Json(ProfileResponse {
        nome: user.name,
        email: user.email,
        imagem_perfil: user.profile_image,
    }))
}

/// `PUT /api/perfil` — merge profile fields; a rename repoints the live
/// session in the same logical operation.
async fn update_profile_handler(
    State(state): State<AppState>,
    Extension(Identity(name)): Extension<Identity>,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let update = ProfileUpdate {
        name: body.nome,
        email: body.email,
        profile_image: body.imagem_perfil,
        current_password: body.senha_atual,
        new_password: body.nova_senha,
    };

    let effective = state
        .users
        .update_profile(&name, &update)
        .map_err(error_response)?;

    if effective != name {
        state
            .sessions
            .rename(&name, &effective)
            .map_err(error_response)?;
        tracing::info!(from = %name, to = %effective, "Identity renamed");
    }

    Ok(Json(SuccessResponse {
        success: true,
        message: "Perfil atualizado com sucesso".into(),
    }))
}

/// `GET /api/configuracoes`
async fn get_settings_handler(
    State(state): State<AppState>,
    Extension(Identity(name)): Extension<Identity>,
) -> Result<Json<UserSettings>, ApiError> {
    let settings = state.users.settings(&name).map_err(error_response)?;
    Ok(Json(settings))
}

/// `PUT /api/configuracoes`
async fn update_settings_handler(
    State(state): State<AppState>,
    Extension(Identity(name)): Extension<Identity>,
    Json(settings): Json<UserSettings>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .users
        .update_settings(&name, &settings)
        .map_err(error_response)?;
    Ok(Json(SuccessResponse {
        success: true,
        message: "Configurações atualizadas com sucesso".into(),
    }))
}

/// `DELETE /api/conta` — remove the account and every session it owns.
async fn delete_account_handler(
    State(state): State<AppState>,
    Extension(Identity(name)): Extension<Identity>,
) -> Result<Response, ApiError> {
    let removed = state.users.delete(&name).map_err(error_response)?;
    if !removed {
        return Err(error_response(Error::NotFound(
            "usuário não encontrado".into(),
        )));
    }

    state
        .sessions
        .destroy_for_user(&name)
        .map_err(error_response)?;
    tracing::info!(user = %name, "Account deleted");

    let mut response = Json(SuccessResponse {
        success: true,
        message: "Conta excluída com sucesso".into(),
    })
    .into_response();
    clear_cookie(&mut response, state.secure_cookies);
    Ok(response)
}

// ─────────────────────────────────────────────────────────────────────────────
// Newsletter and health
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /newsletter` — subscribe an email, associating the logged-in
/// account when the request carries a resolvable session.
async fn newsletter_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NewsletterRequest>,
) -> Result<Json<NewsletterResponse>, ApiError> {
    let email = match body.email {
        Some(email) if !email.trim().is_empty() => email,
        _ => {
            return Err(error_response(Error::InvalidInput(
                "e-mail é obrigatório".into(),
            )))
        }
    };

    let account = resolve_account(&state, &headers);
    let inserted = state
        .users
        .subscribe_newsletter(&email, account.as_ref())
        .map_err(error_response)?;

    if inserted {
        Ok(Json(NewsletterResponse {
            success: true,
            message: "E-mail registrado com sucesso na newsletter!".into(),
            already_exists: None,
        }))
    } else {
        Ok(Json(NewsletterResponse {
            success: true,
            message: "E-mail já está cadastrado na newsletter.".into(),
            already_exists: Some(true),
        }))
    }
}

/// `GET /health`
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        service: "plena-server".into(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Response helpers
// ─────────────────────────────────────────────────────────────────────────────

fn set_no_store(response: &mut Response) {
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
    );
}

fn clear_cookie(response: &mut Response, secure: bool) {
    if let Ok(value) = HeaderValue::from_str(&auth::clear_session_cookie(secure)) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}
