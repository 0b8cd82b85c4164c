//! Configuration management.
//!
//! Sensible defaults, environment variable overrides.

use std::env;
use std::path::PathBuf;
use tracing::info;

/// CORS configuration.
#[derive(Debug, Clone, Default)]
pub struct CorsConfig {
    /// Allowed origins (empty = allow all).
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    pub fn from_env() -> Self {
        let allowed_origins = env::var("TASKBOARD_CORS_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self { allowed_origins }
    }

    /// Convert to a tower-http CorsLayer.
    pub fn to_layer(&self) -> tower_http::cors::CorsLayer {
        use axum::http::HeaderValue;
        use tower_http::cors::{Any, CorsLayer};

        if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port.
    pub port: u16,
    /// Root directory for the embedded store.
    pub storage_path: PathBuf,
    /// Default page size for Task list queries when the client supplies no
    /// limit. Users default to unbounded.
    pub task_page_limit: usize,
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            storage_path: PathBuf::from("./taskboard-data"),
            task_page_limit: 100,
            cors: CorsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env::var("TASKBOARD_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let storage_path = env::var("TASKBOARD_STORAGE")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);

        let task_page_limit = env::var("TASKBOARD_TASK_PAGE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.task_page_limit);

        Self {
            port,
            storage_path,
            task_page_limit,
            cors: CorsConfig::from_env(),
        }
    }

    /// Log the effective configuration at startup.
    pub fn log(&self) {
        info!(port = self.port, "config: listen port");
        info!(path = %self.storage_path.display(), "config: storage path");
        info!(limit = self.task_page_limit, "config: task page limit");
        if self.cors.allowed_origins.is_empty() {
            info!("config: CORS allows all origins");
        } else {
            info!(origins = ?self.cors.allowed_origins, "config: CORS origins");
        }
    }
}
