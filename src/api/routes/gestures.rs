//! Gesture catalog endpoints.

use crate::api::error::{ApiError, ApiResult};
use crate::gesture::{self, Gesture};
use axum::{extract::Path, extract::State, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Clone)]
pub struct GesturesState {
    pub reference_dir: PathBuf,
}

pub fn router(state: GesturesState) -> Router {
    Router::new()
        .route("/", get(list_gestures))
        .route("/:name", get(get_gesture))
        .with_state(state)
}

async fn list_gestures(State(state): State<GesturesState>) -> Json<Value> {
    let gestures: Vec<Value> = gesture::all()
        .iter()
        .map(|g| gesture_json(g, &state))
        .collect();
    Json(json!({ "gestures": gestures }))
}

async fn get_gesture(
    State(state): State<GesturesState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let gesture = Gesture::find(&name)
        .ok_or_else(|| ApiError::not_found(format!("Unknown gesture: {name}")))?;
    Ok(Json(gesture_json(gesture, &state)))
}

fn gesture_json(gesture: &Gesture, state: &GesturesState) -> Value {
    let reference = gesture.reference_clip(&state.reference_dir);
    json!({
        "name": gesture.name,
        "label": gesture.label,
        "reference_clip": reference,
        "reference_available": reference.exists(),
    })
}
