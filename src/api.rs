// src/api.rs
//! Read-only HTTP status surface over the shared registry.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tokio::sync::Mutex;

use crate::monitor::{MonitorRegistry, SourceView};

pub type SharedRegistry = Arc<Mutex<MonitorRegistry>>;

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/sources", get(list_sources))
        .with_state(state)
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceView>> {
    let registry = state.registry.lock().await;
    Json(registry.list())
}
