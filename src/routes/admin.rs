use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;

#[derive(Serialize)]
pub struct StatsResponse {
    pub users_count: u64,
    pub message: String,
}

/// Registered user count; falls back to the mirror when the store is down
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let (users_count, source) = match state.accounts.store().count().await {
        Ok(count) => (count, "store"),
        Err(e) => {
            warn!("Counting users in store failed: {e}");
            (state.accounts.cache().user_count().await as u64, "memory")
        }
    };

    Json(StatsResponse {
        users_count,
        message: format!("{users_count} registered users ({source})"),
    })
}
