use crate::SharedAppState;

use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Rejects every request whose `X-Api-Key` header is missing or differs from
/// the configured key. Runs before routing, so no handler sees the request.
pub async fn require_api_key<B>(
    State(state): State<SharedAppState>,
    request: Request<B>,
    next: Next<B>,
) -> Response {
    let authorized = request
        .headers()
        .get(API_KEY_HEADER)
        .map(|key| key.as_bytes() == state.config.api_key.as_bytes())
        .unwrap_or(false);

    if !authorized {
        log::warn!(
            "rejecting {} {} - invalid api key",
            request.method(),
            request.uri().path()
        );
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    next.run(request).await
}
