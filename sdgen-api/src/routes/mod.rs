pub mod acme;
pub mod generate;

use crate::{auth, SharedAppState};

use axum::{middleware, Router};

/// The authenticated API served on the primary listener.
pub fn router(state: SharedAppState) -> Router {
    Router::new()
        .merge(generate::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state)
}
