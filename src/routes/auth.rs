use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::warn;

use super::{
    authenticate, json_body, validate_email, validate_key_name, validate_password,
    validate_username,
};
use crate::AppState;
use crate::auth::{ApiKey, NewUser, User};
use crate::constants::PRIMARY_KEY_ID;
use crate::error::GatewayError;

// --- Request types ---

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
}

// --- Response types ---

#[derive(Serialize)]
pub struct UserInfo {
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub quota_left: Option<u64>,
    pub active: bool,
    pub user_id: String,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            quota_left: user.quota_left,
            active: user.active,
            user_id: user.user_id.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub user_info: UserInfo,
}

impl From<&User> for TokenResponse {
    fn from(user: &User) -> Self {
        Self {
            access_token: user.access_token.clone(),
            token_type: "bearer",
            user_info: user.into(),
        }
    }
}

/// Key metadata; `key` is only present right after creation
#[derive(Serialize)]
pub struct ApiKeyResponse {
    pub key_id: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
    pub active: bool,
}

impl ApiKeyResponse {
    fn metadata(key: &ApiKey) -> Self {
        Self {
            key_id: PRIMARY_KEY_ID,
            name: key.name.clone(),
            key: None,
            created_at: key.created_at,
            last_used: key.last_used,
            active: key.active,
        }
    }
}

#[derive(Serialize)]
pub struct ListKeysResponse {
    pub keys: Vec<ApiKeyResponse>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: &'static str,
}

// --- Handlers ---

pub async fn register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, GatewayError> {
    let body = json_body(payload)?;
    validate_username(&body.username)?;
    validate_email(&body.email)?;
    validate_password(&body.password)?;

    let user = state
        .accounts
        .register(NewUser {
            username: body.username,
            email: body.email,
            password: body.password,
            full_name: body.full_name,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(TokenResponse::from(&user))))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, GatewayError> {
    let body = json_body(payload)?;
    let user = state.accounts.login(&body.username, &body.password).await?;
    Ok(Json(TokenResponse::from(&user)))
}

/// Replace the caller's API key with a fresh one
pub async fn create_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Result<Json<ApiKeyResponse>, GatewayError> {
    let ctx = authenticate(&headers, &state).await?;
    let body = json_body(payload)?;
    validate_key_name(&body.name)?;

    let key = match state
        .accounts
        .issue_api_key(&ctx.user, body.name.trim().to_string())
        .await
    {
        Ok(key) => key,
        Err(e) => {
            warn!("{e}");
            e.user
                .api_key
                .clone()
                .ok_or_else(|| GatewayError::Internal("issued key missing from record".into()))?
        }
    };

    Ok(Json(ApiKeyResponse {
        key: Some(key.key.clone()),
        ..ApiKeyResponse::metadata(&key)
    }))
}

pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ListKeysResponse>, GatewayError> {
    let ctx = authenticate(&headers, &state).await?;
    let keys = ctx
        .user
        .api_key
        .iter()
        .map(ApiKeyResponse::metadata)
        .collect();
    Ok(Json(ListKeysResponse { keys }))
}

async fn set_key_active(
    state: &AppState,
    headers: &HeaderMap,
    active: bool,
) -> Result<Json<StatusResponse>, GatewayError> {
    let ctx = authenticate(headers, state).await?;
    let has_key = match state.accounts.set_api_key_active(&ctx, active).await {
        Ok(updated) => updated.is_some(),
        Err(e) => {
            warn!("{e}");
            true
        }
    };

    if !has_key {
        return Err(GatewayError::NotFound("API key not found".into()));
    }

    Ok(Json(StatusResponse {
        status: "success",
        message: if active {
            "API key activated successfully"
        } else {
            "API key deactivated successfully"
        },
    }))
}

pub async fn deactivate_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, GatewayError> {
    set_key_active(&state, &headers, false).await
}

pub async fn activate_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, GatewayError> {
    set_key_active(&state, &headers, true).await
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    let ctx = authenticate(&headers, &state).await?;
    // Show the pending `last_used` stamp for a key-authenticated caller
    let mut user = ctx.user.clone();
    ctx.stamp_key(&mut user);

    Ok(Json(json!({
        "username": user.username,
        "email": user.email,
        "full_name": user.full_name,
        "user_id": user.user_id,
        "quota_left": user.quota_left,
        "request_count": user.request_count,
        "total_input_tokens": user.total_input_tokens,
        "total_output_tokens": user.total_output_tokens,
        "total_cost": user.total_cost,
        "model_usage": user.model_usage,
        "api_key": user.api_key.as_ref().map(ApiKeyResponse::metadata),
        "account_created_at": user.account_created_at,
        "last_login": user.last_login,
        "login_count": user.login_count,
        "active": user.active,
    })))
}

pub async fn test_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, GatewayError> {
    let ctx = authenticate(&headers, &state).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "API key is valid",
        "user_info": {
            "username": ctx.user.username,
            "user_id": ctx.user.user_id,
            "quota_left": ctx.user.quota_left,
        }
    })))
}
