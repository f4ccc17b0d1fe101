use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::Connection;

/// Apply performance PRAGMAs to a SQLite connection.
pub fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -16384;
        PRAGMA busy_timeout = 5000;
        PRAGMA temp_store = MEMORY;
        ",
    )
}

/// Create a deadpool-sqlite connection pool.
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, deadpool_sqlite::CreatePoolError> {
    let db_path = config.path.clone();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if db_path.exists() {
            if let Err(e) =
                std::fs::set_permissions(&db_path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(error = %e, "failed to set database file permissions");
            }
        }
    }

    let mut cfg = Config::new(db_path);
    cfg.pool = Some(deadpool_sqlite::PoolConfig::new(config.pool_size.max(1)));
    cfg.create_pool(Runtime::Tokio1)
}

/// Initialize the pool: get a connection and apply pragmas + run migrations.
pub async fn init_pool(pool: &Pool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get().await?;
    conn.interact(|conn| {
        apply_pragmas(conn)?;
        crate::storage::migrations::run_migrations(conn)?;
        Ok::<_, rusqlite::Error>(())
    })
    .await??;
    Ok(())
}

/// Run `f` on a pooled connection. Foreign keys are per-connection in SQLite,
/// so they are switched on for every checkout.
pub async fn interact<T, F>(pool: &Pool, f: F) -> AppResult<T>
where
    F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    conn.interact(move |conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        f(conn)
    })
    .await?
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_pool() -> Pool {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let config = DatabaseConfig {
            path: tmp.path().to_path_buf(),
            pool_size: 1,
        };
        std::mem::forget(tmp);
        let pool = create_pool(&config).unwrap();
        init_pool(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_interact_returns_closure_result() {
        let pool = temp_pool().await;
        let one: i64 = interact(&pool, |conn| {
            Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?)
        })
        .await
        .unwrap();
        assert_eq!(one, 1);
    }

    #[tokio::test]
    async fn test_panicking_closure_maps_to_pool_error() {
        let pool = temp_pool().await;
        let result: AppResult<()> = interact(&pool, |_| panic!("boom")).await;
        assert!(matches!(result, Err(AppError::Pool(_))));
    }
}
