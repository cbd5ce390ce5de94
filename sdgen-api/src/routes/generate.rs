use crate::{gen, SharedAppState};
use sdgen_core::GenerationResult;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing, Json, Router,
};
use serde_json::{json, Value};

pub fn router() -> Router<SharedAppState> {
    Router::new().route("/generate", routing::post(generate_image))
}

/// Generates a single image. Invalid requests are answered with a JSON
/// `null` and status 200.
async fn generate_image(State(state): State<SharedAppState>, body: Bytes) -> Response {
    let input: Value = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => {
            log::error!("[/generate] invalid json body - {e}");
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON body - {e}")).into_response();
        }
    };

    log::info!("{}", json!({ "endpoint": "/generate", "input": &input }));

    let output: Option<GenerationResult> = match gen::generate_and_save_image(&state, &input).await
    {
        Ok(result) => Some(result),
        Err(e) if e.is_rejection() => {
            log::warn!("[/generate] request rejected - {e}");
            None
        }
        Err(e) => {
            log::error!("[/generate] generation failed - {e}");
            return e.into_response();
        }
    };

    log::info!("{}", json!({ "endpoint": "/generate", "output": &output }));

    Json(output).into_response()
}
