//! Attempt history endpoint (this service run only).

use crate::capture::History;
use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};

pub fn router(history: History) -> Router {
    Router::new().route("/", get(list_history)).with_state(history)
}

async fn list_history(State(history): State<History>) -> Json<Value> {
    let records = history.list().await;
    Json(json!({
        "count": records.len(),
        "attempts": records,
    }))
}
