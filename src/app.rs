use crate::analytics::handler as analytics_handler;
use crate::auth::handler as auth_handler;
use crate::auth::session::{require_session_api, SessionCache};
use crate::batches::handler as batches_handler;
use crate::cache::handler as cache_handler;
use crate::cache::AnalyticsCache;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::storage::sqlite::interact;
use crate::{catalog, employees, entries, export, templates};
use axum::extract::State;
use axum::http::{header, Method};
use axum::routing::{delete, get, post, put};
use axum::{middleware, Json, Router};
use deadpool_sqlite::Pool;
use serde::Serialize;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// JSON bodies here are small forms; anything larger is refused.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared by every handler.
pub struct AppState {
    pub pool: Pool,
    pub cache: AnalyticsCache,
    pub sessions: Arc<SessionCache>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(pool: Pool, config: AppConfig) -> Self {
        Self {
            cache: AnalyticsCache::new(&config.cache),
            sessions: Arc::new(SessionCache::new(pool.clone())),
            pool,
            config,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db_ok: bool,
    pub cache_size: usize,
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_ok = interact(&state.pool, |conn| {
        Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?)
    })
        .await
        .is_ok();
    Json(HealthResponse {
        status: if db_ok { "ok".into() } else { "degraded".into() },
        db_ok,
        cache_size: state.cache.len(),
    })
}

pub fn build_router(state: Arc<AppState>) -> Result<Router, AppError> {
    let config = &state.config;

    let login_governor_conf = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.login_per_second)
        .burst_size(config.rate_limit.login_burst_size)
        .finish()
        .ok_or_else(|| AppError::Internal("invalid login rate limit settings".into()))?;

    // ── Auth routes (public, login rate-limited) ──
    let login_route = Router::new()
        .route("/auth/login", post(auth_handler::login))
        .layer(GovernorLayer::new(login_governor_conf));
    let public_routes = Router::new()
        .route("/auth/logout", post(auth_handler::logout))
        .route("/health", get(health))
        .merge(login_route);

    // ── Session-protected API; roles are checked in handlers ──
    let api_routes = Router::new()
        .route("/v1/me", get(auth_handler::me))
        // admin
        .route(
            "/v1/admin/employees",
            get(employees::list_employees).post(employees::create_employee),
        )
        .route("/v1/admin/employees/{id}", delete(employees::delete_employee))
        .route("/v1/admin/init-references", post(catalog::init_references))
        // catalog
        .route(
            "/v1/products",
            get(catalog::list_products).post(catalog::create_product),
        )
        .route("/v1/products/{id}", delete(catalog::delete_product))
        .route("/v1/equipment", get(catalog::list_equipment))
        .route("/v1/materials", get(catalog::list_materials))
        // entries
        .route("/v1/entries", post(entries::create_entry))
        .route("/v1/entries/today", get(entries::list_today))
        .route("/v1/entries/{id}", put(entries::update_entry))
        // batches
        .route(
            "/v1/batches",
            get(batches_handler::list_batches).post(batches_handler::create_batch),
        )
        .route("/v1/batches/duplicate-last", post(batches_handler::duplicate_last))
        .route(
            "/v1/batches/{id}",
            get(batches_handler::get_batch).put(batches_handler::update_batch),
        )
        .route(
            "/v1/batches/{id}/materials",
            post(batches_handler::add_batch_material),
        )
        .route("/v1/batches/{id}/complete", post(batches_handler::complete_batch))
        .route("/v1/batches/{id}/cancel", post(batches_handler::cancel_batch))
        .route("/v1/batches/{id}/pause", post(batches_handler::pause_batch))
        .route("/v1/batches/{id}/resume", post(batches_handler::resume_batch))
        // operator stations
        .route("/v1/operations/start", post(batches_handler::start_operation))
        .route("/v1/operations/{id}/stop", post(batches_handler::stop_operation))
        .route(
            "/v1/operations/dashboard",
            get(batches_handler::operations_dashboard),
        )
        // templates
        .route(
            "/v1/templates",
            get(templates::list_templates).post(templates::create_template),
        )
        .route(
            "/v1/templates/{id}/batches",
            post(templates::create_batch_from_template),
        )
        // analytics
        .route("/v1/analytics/dashboard", get(analytics_handler::get_dashboard))
        .route("/v1/analytics/consumption", get(analytics_handler::get_consumption))
        .route("/v1/analytics/daily", get(analytics_handler::get_daily))
        .route("/v1/analytics/weekly", get(analytics_handler::get_weekly))
        .route(
            "/v1/analytics/daily-materials",
            get(analytics_handler::get_daily_materials),
        )
        // export
        .route("/v1/export/batches", get(export::export_batches))
        .route("/v1/export/entries", get(export::export_entries))
        .route("/v1/export/analytics", get(export::export_analytics))
        // cache administration
        .route("/v1/cache/clear", post(cache_handler::clear_cache))
        .route("/v1/cache/status", get(cache_handler::cache_status))
        .layer(middleware::from_fn(require_session_api))
        .layer(axum::Extension(state.sessions.clone()));

    // CORS: restrict to the configured dashboard origin with credentials
    let origin = config
        .server
        .public_origin
        .parse()
        .map_err(|e| AppError::Internal(format!("invalid server.public_origin: {e}")))?;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::exact(origin))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::COOKIE])
        .allow_credentials(true);

    Ok(Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state))
}
