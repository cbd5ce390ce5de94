//! Plaintext side server used next to the HTTPS listener. It only serves
//! ACME challenge files for certificate renewals.
use axum::{
    handler::HandlerWithoutStateExt,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{self, MethodRouter},
    Router,
};
use std::path::Path;
use tower_http::services::ServeDir;

pub const PLEASE_USE_HTTPS: &str = "Bad Request. Please use HTTPS!";

/// `GET /.well-known/*` is served from `acme_dir`; any other request,
/// including missing challenge files, gets a 400.
pub fn router(acme_dir: impl AsRef<Path>) -> Router {
    let files = ServeDir::new(acme_dir).fallback(please_use_https.into_service());
    let challenges: MethodRouter = routing::get_service(files).fallback(please_use_https);

    Router::new()
        .nest_service("/.well-known", challenges)
        .fallback(please_use_https)
}

async fn please_use_https() -> Response {
    (StatusCode::BAD_REQUEST, PLEASE_USE_HTTPS).into_response()
}
