use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

use super::authenticate;
use crate::AppState;
use crate::auth::{AuthContext, ModelRoute, TokenDelta};
use crate::constants::DEFAULT_MODEL;
use crate::error::GatewayError;
use crate::upstream::relay_chat_stream;

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let models: Vec<Value> = state
        .catalog
        .external_ids()
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": "quota-gateway"
            })
        })
        .collect();

    Json(json!({
        "object": "list",
        "data": models
    }))
}

/// A chat request after validation, with the model already remapped
struct PreparedChat {
    body: Value,
    route: ModelRoute,
    stream: bool,
}

fn prepare_chat(raw: &[u8], state: &AppState) -> Result<PreparedChat, GatewayError> {
    let mut body: Value = serde_json::from_slice(raw)
        .map_err(|e| GatewayError::validation(format!("Invalid request body: {e}")))?;
    let Some(object) = body.as_object_mut() else {
        return Err(GatewayError::validation(
            "Invalid request body: expected a JSON object",
        ));
    };

    let model = match object.get("model") {
        None | Some(Value::Null) => DEFAULT_MODEL.to_string(),
        Some(Value::String(m)) if !m.trim().is_empty() => m.clone(),
        Some(_) => {
            return Err(GatewayError::invalid_param(
                "model",
                "model must be a non-empty string",
            ));
        }
    };

    if !object
        .get("messages")
        .and_then(|m| m.as_array())
        .is_some_and(|m| !m.is_empty())
    {
        return Err(GatewayError::invalid_param(
            "messages",
            "messages must be a non-empty array",
        ));
    }

    let stream = object
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false);

    let route = state.catalog.route(&model);
    object.insert("model".into(), Value::String(route.upstream.clone()));

    Ok(PreparedChat {
        body,
        route,
        stream,
    })
}

async fn record_usage(state: &AppState, ctx: &AuthContext, route: &ModelRoute, delta: TokenDelta) {
    if let Err(e) = state.accountant.record(ctx, route, delta).await {
        warn!("{e}");
    }
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    raw: Bytes,
) -> Result<Response, GatewayError> {
    let ctx = authenticate(&headers, &state).await?;
    let Some(upstream) = state.upstream.as_ref() else {
        return Err(GatewayError::BackendUnavailable);
    };
    let chat = prepare_chat(&raw, &state)?;

    info!(
        "Chat completion for '{}' | Model '{}' -> '{}' | stream={}",
        ctx.user.username, chat.route.external, chat.route.upstream, chat.stream
    );

    if chat.stream {
        let body_stream = upstream.open_stream(&chat.body).await?;

        // Token counts are not tracked for streamed calls; count the request now
        record_usage(&state, &ctx, &chat.route, TokenDelta::REQUEST_ONLY).await;

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(relay_chat_stream(body_stream)))
            .map_err(|e| GatewayError::Internal(format!("Failed to build stream response: {e}")))
    } else {
        let response = upstream.complete(&chat.body).await?;
        let delta = TokenDelta::from_openai_usage(response.get("usage"));
        record_usage(&state, &ctx, &chat.route, delta).await;
        Ok(Json(response).into_response())
    }
}
