use super::password::verify_password;
use super::session::{self, extract_session_cookie, SessionUser, SESSION_COOKIE};
use crate::app::AppState;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::storage::sqlite::interact;
use crate::types::column_enum;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Cookies are marked `Secure` unless the dashboard is served from localhost.
fn is_secure_deployment(public_origin: &str) -> bool {
    let host = public_origin
        .split("://")
        .nth(1)
        .unwrap_or(public_origin)
        .split('/')
        .next()
        .unwrap_or("");
    let host = host
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(h, _)| h)
        .unwrap_or(host);
    !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
}

fn session_cookie(token: &str, max_age: u64, secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}{secure_flag}")
}

fn clear_cookie(secure: bool) -> String {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{secure_flag}")
}

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    LoggedJson(input): LoggedJson<LoginRequest>,
) -> AppResult<Response> {
    let username = input.username.trim().to_string();
    if username.is_empty() || input.password.is_empty() {
        return Err(AppError::Validation("username and password are required".into()));
    }

    let password = input.password;
    let lookup = username.clone();
    // Hash verification is CPU-bound, so it runs on the blocking connection thread.
    let user = interact(&state.pool, move |conn| {
        let row = conn.query_row(
            "SELECT id, username, fio, role, password_hash FROM users WHERE username = ?1",
            [&lookup],
            |row| {
                Ok((
                    SessionUser {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        fio: row.get(2)?,
                        role: column_enum(row, 3)?,
                    },
                    row.get::<_, String>(4)?,
                ))
            },
        );
        match row {
            Ok((user, hash)) if verify_password(&password, &hash) => Ok(Some(user)),
            Ok(_) | Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    })
    .await?;

    let Some(user) = user else {
        tracing::warn!(username = %username, "failed login");
        return Err(AppError::Auth("invalid username or password".into()));
    };

    let ttl = state.config.auth.session_ttl_secs;
    let token = session::create_session(&state.pool, user.user_id, ttl).await?;
    let secure = is_secure_deployment(&state.config.server.public_origin);

    tracing::info!(user_id = user.user_id, role = %user.role, "login successful");

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie(&token, ttl, secure))],
        Json(serde_json::json!({ "user": user })),
    )
        .into_response())
}

/// POST /auth/logout
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(token) = extract_session_cookie(&headers) {
        state.sessions.invalidate(&token);
        if let Err(e) = session::delete_session(&state.pool, &token).await {
            tracing::warn!(error = %e, "failed to delete session on logout");
        }
    }

    let secure = is_secure_deployment(&state.config.server.public_origin);
    (
        StatusCode::OK,
        [(header::SET_COOKIE, clear_cookie(secure))],
        Json(serde_json::json!({ "status": "ok" })),
    )
        .into_response()
}

/// GET /v1/me
pub async fn me(Extension(user): Extension<SessionUser>) -> Json<SessionUser> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_origins_are_not_secure() {
        assert!(!is_secure_deployment("http://localhost:8080"));
        assert!(!is_secure_deployment("http://127.0.0.1"));
        assert!(!is_secure_deployment("http://[::1]:3000"));
        assert!(is_secure_deployment("https://plant.example.kz"));
    }

    #[test]
    fn test_cookie_format() {
        assert_eq!(
            session_cookie("tok", 60, true),
            "plantlog_session=tok; HttpOnly; SameSite=Lax; Path=/; Max-Age=60; Secure"
        );
        assert!(clear_cookie(false).contains("Max-Age=0"));
    }
}
