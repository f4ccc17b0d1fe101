use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub production: ProductionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin the dashboard is served from; drives CORS and the cookie `Secure` flag.
    #[serde(default = "default_public_origin")]
    pub public_origin: String,
}

fn default_public_origin() -> String {
    "http://localhost:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_password_iterations")]
    pub password_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            password_iterations: default_password_iterations(),
        }
    }
}

fn default_session_ttl() -> u64 {
    604800 // 7 days
}

fn default_password_iterations() -> u32 {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_login_per_second")]
    pub login_per_second: u64,
    #[serde(default = "default_login_burst_size")]
    pub login_burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_per_second: default_login_per_second(),
            login_burst_size: default_login_burst_size(),
        }
    }
}

fn default_login_per_second() -> u64 {
    5
}
fn default_login_burst_size() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_consumption_ttl")]
    pub consumption_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl(),
            consumption_ttl_secs: default_consumption_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_consumption_ttl() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProductionConfig {
    /// Minutes after creation during which an entry or batch may still be edited.
    #[serde(default = "default_edit_window")]
    pub edit_window_mins: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

impl Default for ProductionConfig {
    fn default() -> Self {
        Self {
            edit_window_mins: default_edit_window(),
            page_size: default_page_size(),
        }
    }
}

fn default_edit_window() -> i64 {
    30
}
fn default_page_size() -> i64 {
    50
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.default_ttl_secs == 0 || self.cache.consumption_ttl_secs == 0 {
            return Err("cache TTLs must be greater than zero. \
                 Set cache.default_ttl_secs / cache.consumption_ttl_secs in config.toml \
                 or via PLANTLOG__CACHE__* env vars."
                .to_string());
        }
        if self.production.page_size <= 0 {
            return Err("production.page_size must be positive".to_string());
        }
        if self.production.edit_window_mins < 0 {
            return Err("production.edit_window_mins must not be negative".to_string());
        }
        if self.auth.password_iterations < 10_000 {
            return Err("auth.password_iterations must be at least 10000".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (PLANTLOG__SERVER__PORT=8081, etc.)
        builder = builder.add_source(
            Environment::with_prefix("PLANTLOG")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                public_origin: default_public_origin(),
            },
            database: DatabaseConfig {
                path: PathBuf::from("plantlog.db"),
                pool_size: 4,
            },
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            production: ProductionConfig::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = sample();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cache.default_ttl_secs, 300);
        assert_eq!(cfg.cache.consumption_ttl_secs, 600);
        assert_eq!(cfg.production.edit_window_mins, 30);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut cfg = sample();
        cfg.cache.consumption_ttl_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_weak_password_iterations_rejected() {
        let mut cfg = sample();
        cfg.auth.password_iterations = 1_000;
        assert!(cfg.validate().is_err());
    }
}
