mod auth;
mod config;
mod constants;
mod db;
mod error;
mod routes;
mod upstream;

use auth::{
    Accounts, Authenticator, ModelCatalog, TursoUserStore, UsageAccountant, UserStore,
};
use axum::ServiceExt;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use base64::Engine;
use clap::Parser;
use config::{Config, CorsMode};
use reqwest::Client;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::normalize_path::NormalizePath;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::UpstreamClient;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

pub struct AppState {
    pub accounts: Arc<Accounts>,
    pub authenticator: Authenticator,
    pub accountant: UsageAccountant,
    pub catalog: Arc<ModelCatalog>,
    /// `None` when no backend API key is configured
    pub upstream: Option<UpstreamClient>,
    /// Basic-auth credentials for `/admin`; `None` leaves it open
    pub admin_credentials: Option<(String, String)>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn UserStore>,
        catalog: ModelCatalog,
        default_quota: Option<u64>,
        upstream: Option<UpstreamClient>,
        admin_credentials: Option<(String, String)>,
    ) -> Self {
        let accounts = Arc::new(Accounts::new(store, default_quota));
        let catalog = Arc::new(catalog);
        Self {
            authenticator: Authenticator::new(accounts.clone()),
            accountant: UsageAccountant::new(accounts.clone(), catalog.clone()),
            accounts,
            catalog,
            upstream,
            admin_credentials,
        }
    }
}

#[derive(Parser)]
#[command(name = "quota-gateway")]
#[command(about = "OpenAI-compatible chat gateway with per-user quotas and usage accounting")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "GATEWAY_PORT")]
    port: Option<u16>,
}

/// Middleware for admin routes (HTTP Basic auth when credentials are configured)
async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some((username, password)) = &state.admin_credentials else {
        return next.run(request).await;
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let Some(auth_value) = auth_header else {
        return unauthorized_response();
    };

    let Some(encoded) = auth_value.strip_prefix("Basic ") else {
        return unauthorized_response();
    };

    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return unauthorized_response();
    };

    let Ok(credentials) = String::from_utf8(decoded) else {
        return unauthorized_response();
    };

    let Some((provided_user, provided_pass)) = credentials.split_once(':') else {
        return unauthorized_response();
    };

    // Constant-time comparison to prevent timing attacks
    let user_match = provided_user.as_bytes().ct_eq(username.as_bytes());
    let pass_match = provided_pass.as_bytes().ct_eq(password.as_bytes());

    if user_match.into() && pass_match.into() {
        next.run(request).await
    } else {
        unauthorized_response()
    }
}

fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"admin\"")],
        Json(json!({
            "error": {
                "message": "Unauthorized",
                "type": "authentication_error"
            }
        })),
    )
        .into_response()
}

fn cors_layer(mode: &CorsMode) -> CorsLayer {
    let cors_origins = mode.clone();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin_str) = origin.to_str() else {
                return false;
            };

            match &cors_origins {
                CorsMode::AllowAll => true,
                CorsMode::LocalhostOnly => {
                    let Ok(url) = url::Url::parse(origin_str) else {
                        return false;
                    };
                    matches!(
                        url.host_str(),
                        Some("localhost") | Some("127.0.0.1") | Some("[::1]")
                    )
                }
                CorsMode::AllowList(allowed) => allowed.iter().any(|a| a == origin_str),
            }
        }))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

pub fn build_router(state: Arc<AppState>, cors_mode: &CorsMode) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route(
            "/keys",
            post(routes::auth::create_key).get(routes::auth::list_keys),
        )
        .route("/keys/deactivate", put(routes::auth::deactivate_key))
        .route("/keys/activate", put(routes::auth::activate_key))
        .route("/profile", get(routes::auth::profile))
        .route("/test-key", get(routes::auth::test_key));

    let api_routes = Router::new()
        .route("/chat/completions", post(routes::openai::chat_completions))
        .route("/models", get(routes::openai::list_models));

    let admin_routes = Router::new()
        .route("/stats", get(routes::admin::stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health))
        .route("/version", get(routes::health::version))
        .nest("/auth", auth_routes)
        .nest("/v1/api", api_routes)
        .nest("/admin", admin_routes)
        .layer(cors_layer(cors_mode))
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let db = match db::init_db(&config.database_path, &config.users_table).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to initialize database: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Database at {} (table '{}')",
        config.database_path.display(),
        config.users_table
    );
    let store = Arc::new(TursoUserStore::new(db, config.users_table.clone()));

    let host = args.host.unwrap_or(config.host);
    let port = args.port.unwrap_or(config.port);

    // Shared HTTP client with connection pooling; call timeouts are applied per request
    let http_client = match Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create HTTP client: {e}");
            std::process::exit(1);
        }
    };

    let upstream = match config.backend_api_key {
        Some(api_key) => {
            info!(
                "Backend: {} (timeout {}s)",
                config.backend_base_url,
                config.backend_timeout.as_secs()
            );
            Some(UpstreamClient::new(
                http_client,
                &config.backend_base_url,
                api_key,
                config.backend_timeout,
            ))
        }
        None => {
            warn!("BACKEND_API_KEY is not set; chat completions will return 503");
            None
        }
    };

    if config.admin_credentials.is_none() {
        warn!(
            "GATEWAY_ADMIN_USERNAME/GATEWAY_ADMIN_PASSWORD not set; /admin/stats is unauthenticated"
        );
    }

    match config.default_quota {
        Some(quota) => info!("Default quota for new users: {quota} tokens"),
        None => info!("Default quota for new users: unlimited"),
    }

    let state = Arc::new(AppState::new(
        store,
        ModelCatalog::new(&config.provider_prefix),
        config.default_quota,
        upstream,
        config.admin_credentials,
    ));

    match &config.cors_mode {
        CorsMode::AllowAll => info!("CORS: Allowing all origins"),
        CorsMode::LocalhostOnly => info!("CORS: Localhost only"),
        CorsMode::AllowList(list) => info!("CORS: Allowing origins: {:?}", list),
    }

    let app = NormalizePath::trim_trailing_slash(build_router(state, &config.cors_mode));

    let addr: SocketAddr = match format!("{}:{}", host, port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid listen address {host}:{port}: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Starting quota-gateway v{}-{} (built {})",
        VERSION, GIT_HASH, BUILD_TIME
    );
    info!("Listening on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(
        listener,
        ServiceExt::<axum::extract::Request>::into_make_service(app),
    )
    .await
    {
        error!("Server error: {e}");
    }
}
