use crate::error::{AppError, AppResult};
use crate::storage::sqlite::{interact, unix_now};
use crate::types::{column_enum, Role};
use axum::{
    body::Body,
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use deadpool_sqlite::Pool;
use moka::sync::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

pub const SESSION_COOKIE: &str = "plantlog_session";

/// Injected into request extensions after successful session validation.
#[derive(Clone, Debug, Serialize)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
    pub fio: String,
    pub role: Role,
}

impl SessionUser {
    fn ensure(&self, allowed: bool) -> AppResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "role {} may not perform this action",
                self.role
            )))
        }
    }

    pub fn ensure_admin(&self) -> AppResult<()> {
        self.ensure(self.role == Role::Admin)
    }

    pub fn ensure_supervisor(&self) -> AppResult<()> {
        self.ensure(self.role.is_supervisor())
    }

    pub fn ensure_analytics(&self) -> AppResult<()> {
        self.ensure(self.role.can_view_analytics())
    }

    pub fn ensure_entry_logger(&self) -> AppResult<()> {
        self.ensure(self.role.can_log_entries())
    }

    /// Owners may touch their own records; supervisors may touch anyone's.
    pub fn ensure_owner_or_supervisor(&self, owner_id: Option<i64>) -> AppResult<()> {
        self.ensure(self.role.is_supervisor() || owner_id == Some(self.user_id))
    }
}

pub fn hash_token(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cached session lookup: token hash -> SessionUser.
pub struct SessionCache {
    cache: Cache<String, (SessionUser, i64)>,
    pool: Pool,
}

impl SessionCache {
    pub fn new(pool: Pool) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(60))
            .build();
        Self { cache, pool }
    }

    /// Resolve a plaintext cookie value. Checks cache, then DB.
    pub async fn resolve(&self, token: &str) -> Option<SessionUser> {
        let hash = hash_token(token);
        let now = unix_now();

        if let Some((user, expires_at)) = self.cache.get(&hash) {
            if expires_at > now {
                return Some(user);
            }
            self.cache.invalidate(&hash);
            return None;
        }

        let h = hash.clone();
        let found = interact(&self.pool, move |conn| {
            let row = conn.query_row(
                "SELECT u.id, u.username, u.fio, u.role, s.expires_at
                 FROM sessions s JOIN users u ON s.user_id = u.id
                 WHERE s.token = ?1 AND s.expires_at > ?2",
                rusqlite::params![h, now],
                |row| {
                    Ok((
                        SessionUser {
                            user_id: row.get(0)?,
                            username: row.get(1)?,
                            fio: row.get(2)?,
                            role: column_enum(row, 3)?,
                        },
                        row.get::<_, i64>(4)?,
                    ))
                },
            );
            match row {
                Ok(found) => Ok(Some(found)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await;

        match found {
            Ok(Some((user, expires_at))) => {
                self.cache.insert(hash, (user.clone(), expires_at));
                Some(user)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "session lookup failed");
                None
            }
        }
    }

    pub fn invalidate(&self, token: &str) {
        self.cache.invalidate(&hash_token(token));
    }

    /// Drop all cached sessions (used after an account is deleted).
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Extract the session cookie value from the Cookie header.
pub fn extract_session_cookie(headers: &axum::http::HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    let prefix = format!("{SESSION_COOKIE}=");
    for part in cookie_header.split(';') {
        let trimmed = part.trim();
        if let Some(value) = trimmed.strip_prefix(prefix.as_str()) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Session middleware for API routes; returns 401 JSON on failure.
pub async fn require_session_api(request: Request<Body>, next: Next) -> Result<Response, Response> {
    let sessions = request
        .extensions()
        .get::<Arc<SessionCache>>()
        .cloned()
        .ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "session cache not configured",
            )
                .into_response()
        })?;

    let token = extract_session_cookie(request.headers())
        .ok_or_else(|| AppError::Auth("authentication required".into()).into_response())?;

    let session_user = sessions
        .resolve(&token)
        .await
        .ok_or_else(|| AppError::Auth("invalid or expired session".into()).into_response())?;

    let mut request = request;
    request.extensions_mut().insert(session_user);
    Ok(next.run(request).await)
}

/// Create a session in the database and return the plaintext token.
pub async fn create_session(pool: &Pool, user_id: i64, ttl_secs: u64) -> AppResult<String> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);

    let now = unix_now();
    let expires_at = now + ttl_secs as i64;
    let token_hash = hash_token(&token);
    interact(pool, move |conn| {
        conn.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token_hash, user_id, now, expires_at],
        )?;
        Ok(())
    })
    .await?;

    Ok(token)
}

/// Delete a session from the database.
pub async fn delete_session(pool: &Pool, token: &str) -> AppResult<()> {
    let t = hash_token(token);
    interact(pool, move |conn| {
        conn.execute("DELETE FROM sessions WHERE token = ?1", rusqlite::params![t])?;
        Ok(())
    })
    .await
}

/// Periodically clean up expired sessions.
pub async fn session_cleanup_loop(pool: Pool) {
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        let now = unix_now();
        let result = interact(&pool, move |conn| {
            Ok(conn.execute(
                "DELETE FROM sessions WHERE expires_at < ?1",
                rusqlite::params![now],
            )?)
        })
        .await;
        match result {
            Ok(removed) if removed > 0 => tracing::info!(removed, "expired sessions removed"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "session cleanup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> SessionUser {
        SessionUser {
            user_id: 1,
            username: "u".into(),
            fio: "U".into(),
            role,
        }
    }

    #[test]
    fn test_cookie_extraction() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "theme=dark; plantlog_session=abc123; other=1".parse().unwrap(),
        );
        assert_eq!(extract_session_cookie(&headers).as_deref(), Some("abc123"));

        headers.insert(header::COOKIE, "plantlog_session=".parse().unwrap());
        assert_eq!(extract_session_cookie(&headers), None);
    }

    #[test]
    fn test_role_gates() {
        assert!(user(Role::Admin).ensure_admin().is_ok());
        assert!(user(Role::Director).ensure_admin().is_err());
        assert!(user(Role::Director).ensure_analytics().is_ok());
        assert!(user(Role::Employee).ensure_owner_or_supervisor(Some(1)).is_ok());
        assert!(user(Role::Employee).ensure_owner_or_supervisor(Some(2)).is_err());
        assert!(user(Role::ChiefTechnologist)
            .ensure_owner_or_supervisor(None)
            .is_ok());
    }

    #[test]
    fn test_token_hash_is_hex_sha256() {
        let h = hash_token("abc");
        assert_eq!(h.len(), 64);
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
