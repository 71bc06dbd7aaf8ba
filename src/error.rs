use std::time::Duration;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{message}")]
    Validation {
        message: String,
        param: Option<String>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("API key not valid")]
    InvalidCredential,

    #[error("Invalid username or password")]
    InvalidLogin,

    #[error("This API key is inactive.")]
    KeyInactive,

    #[error("This user account is inactive.")]
    AccountInactive,

    #[error("API usage quota exceeded.")]
    QuotaExceeded,

    #[error("Username already registered")]
    DuplicateUser,

    #[error("Backend API client not initialized")]
    BackendUnavailable,

    #[error("Backend API authentication error: {0}")]
    UpstreamAuth(String),

    #[error("Backend API error ({status}): {message}")]
    UpstreamApi { status: u16, message: String },

    #[error("Backend API did not respond within {}s", .0.as_secs())]
    UpstreamTimeout(Duration),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            param: None,
        }
    }

    pub fn invalid_param(param: &str, message: impl Into<String>) -> Self {
        GatewayError::Validation {
            message: message.into(),
            param: Some(param.to_string()),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation { .. } | GatewayError::DuplicateUser => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::MissingCredential
            | GatewayError::InvalidCredential
            | GatewayError::InvalidLogin
            | GatewayError::UpstreamAuth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::KeyInactive | GatewayError::AccountInactive => StatusCode::FORBIDDEN,
            GatewayError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamApi { .. }
            | GatewayError::Network(_)
            | GatewayError::Database(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `type` field in the error body
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation { .. } | GatewayError::NotFound(_) => "validation_error",
            GatewayError::MissingCredential
            | GatewayError::InvalidCredential
            | GatewayError::InvalidLogin
            | GatewayError::UpstreamAuth(_) => "authentication_error",
            GatewayError::KeyInactive | GatewayError::AccountInactive => "permission_error",
            GatewayError::QuotaExceeded => "quota_exceeded",
            GatewayError::DuplicateUser => "duplicate_user",
            GatewayError::UpstreamApi { .. } => "api_error",
            GatewayError::BackendUnavailable
            | GatewayError::UpstreamTimeout(_)
            | GatewayError::Network(_)
            | GatewayError::Database(_)
            | GatewayError::Internal(_) => "server_error",
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            GatewayError::NotFound(_) => Some("not_found"),
            GatewayError::MissingCredential => Some("missing_credential"),
            GatewayError::InvalidCredential => Some("invalid_api_key"),
            GatewayError::KeyInactive => Some("key_inactive"),
            GatewayError::AccountInactive => Some("account_inactive"),
            GatewayError::QuotaExceeded => Some("quota_exceeded"),
            GatewayError::BackendUnavailable => Some("backend_unavailable"),
            GatewayError::UpstreamTimeout(_) => Some("upstream_timeout"),
            _ => None,
        }
    }

    fn param(&self) -> Option<&str> {
        match self {
            GatewayError::Validation { param, .. } => param.as_deref(),
            _ => None,
        }
    }

    /// Render the uniform `{error: {message, type, param?, code?}}` body
    pub fn to_body(&self) -> Value {
        let mut error = Map::new();
        error.insert("message".into(), Value::String(self.to_string()));
        error.insert("type".into(), Value::String(self.error_type().into()));
        if let Some(param) = self.param() {
            error.insert("param".into(), Value::String(param.into()));
        }
        if let Some(code) = self.code() {
            error.insert("code".into(), Value::String(code.into()));
        }
        json!({ "error": error })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(self.to_body())).into_response();

        // Credential rejections carry a Bearer challenge
        if matches!(
            self,
            GatewayError::MissingCredential
                | GatewayError::InvalidCredential
                | GatewayError::KeyInactive
                | GatewayError::AccountInactive
        ) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}
