use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;

use crate::constants::{DEFAULT_BACKEND_API_BASE_URL, DEFAULT_PROVIDER_PREFIX, DEFAULT_QUOTA};

/// CORS configuration mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsMode {
    /// Only allow localhost origins
    LocalhostOnly,
    /// Allow all origins (default, API clients authenticate with bearer tokens)
    AllowAll,
    /// Allow specific origins (comma-separated list)
    AllowList(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub users_table: String,
    pub backend_base_url: String,
    /// `None` leaves the completion proxy unconfigured (503 on every call)
    pub backend_api_key: Option<String>,
    pub backend_timeout: Duration,
    pub provider_prefix: String,
    /// Quota for new registrations; `None` means unlimited
    pub default_quota: Option<u64>,
    pub cors_mode: CorsMode,
    /// Basic-auth credentials guarding `/admin`; unset leaves it open
    pub admin_credentials: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("GATEWAY_PORT")
            .or_else(|_| env::var("PORT"))
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8002);

        let data_dir = env::var("GATEWAY_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("quota-gateway")
            });
        let database_name =
            env::var("GATEWAY_DATABASE_NAME").unwrap_or_else(|_| "api_service_db".to_string());
        let database_path = env::var("GATEWAY_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join(format!("{database_name}.db")));

        let users_table = env::var("GATEWAY_USERS_TABLE").unwrap_or_else(|_| "users".to_string());

        let backend_base_url = env::var("BACKEND_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BACKEND_API_BASE_URL.to_string());
        let backend_api_key = env::var("BACKEND_API_KEY")
            .or_else(|_| env::var("MY_BACKEND_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        let backend_timeout = Duration::from_secs(
            env::var("GATEWAY_BACKEND_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        );

        let provider_prefix = env::var("GATEWAY_PROVIDER_PREFIX")
            .unwrap_or_else(|_| DEFAULT_PROVIDER_PREFIX.to_string());

        let default_quota = parse_quota(env::var("GATEWAY_DEFAULT_QUOTA").ok().as_deref());

        // CORS configuration: "*" (default), "localhost", or comma-separated origins
        let cors_mode = parse_cors_mode(env::var("GATEWAY_CORS_ORIGINS").ok().as_deref());

        let admin_credentials = match (
            env::var("GATEWAY_ADMIN_USERNAME"),
            env::var("GATEWAY_ADMIN_PASSWORD"),
        ) {
            (Ok(user), Ok(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        };

        Self {
            host,
            port,
            database_path,
            users_table,
            backend_base_url,
            backend_api_key,
            backend_timeout,
            provider_prefix,
            default_quota,
            cors_mode,
            admin_credentials,
        }
    }
}

fn parse_quota(value: Option<&str>) -> Option<u64> {
    match value.map(str::trim) {
        None | Some("") => Some(DEFAULT_QUOTA),
        Some(v) if v.eq_ignore_ascii_case("unlimited") || v.eq_ignore_ascii_case("none") => None,
        Some(v) => Some(v.parse().unwrap_or(DEFAULT_QUOTA)),
    }
}

fn parse_cors_mode(value: Option<&str>) -> CorsMode {
    match value {
        None | Some("") | Some("*") => CorsMode::AllowAll,
        Some(v) if v.eq_ignore_ascii_case("localhost") => CorsMode::LocalhostOnly,
        Some(origins) => {
            CorsMode::AllowList(origins.split(',').map(|s| s.trim().to_string()).collect())
        }
    }
}
