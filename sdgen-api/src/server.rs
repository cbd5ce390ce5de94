use crate::routes::{self, acme};
use crate::{Error, Result, SharedAppState};

use axum::Router;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tower_http::classify::ServerErrorsFailureClass;
use tracing::{Level, Span};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// The primary application: authenticated API with request tracing.
pub fn app(state: SharedAppState) -> Router {
    routes::router(state).layer(
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(Level::INFO))
            .on_failure(|_error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {})
            .on_response(
                |rsp: &axum::response::Response, latency: Duration, _span: &Span| {
                    tracing::info!("{} {}ms", rsp.status(), latency.as_millis());
                },
            ),
    )
}

/// Runs the primary listener until a shutdown signal arrives.
///
/// In plaintext mode only the API is served on the HTTP port. Otherwise the
/// API is served over TLS and the ACME side server runs on the HTTP port
/// for as long as the primary listener is up.
pub async fn serve(state: SharedAppState) -> Result<()> {
    let config = state.config.clone();
    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    let app = app(state);

    if config.http_only {
        let addr = SocketAddr::new(config.host, config.http_port);
        log::info!("listening on http://{addr}");
        return axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .map_err(Error::ServerError);
    }

    let cert_dir = config
        .https_cert_path
        .as_ref()
        .ok_or(Error::MissingCertificate)?;
    let tls_config = RustlsConfig::from_pem_file(
        cert_dir.join("fullchain.pem"),
        cert_dir.join("privkey.pem"),
    )
    .await
    .map_err(Error::ServerInitializationError)?;

    let addr = SocketAddr::new(config.host, config.https_port);
    log::info!("listening on https://{addr}");
    let primary = axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service());

    with_acme_server(
        &config.acme_dir,
        SocketAddr::new(config.host, config.http_port),
        Handle::new(),
        primary,
    )
    .await
    .map_err(Error::ServerError)
}

/// Serves the plaintext ACME router on `addr` while `primary` runs, then shuts
/// it down through `handle` and returns the primary's output.
pub async fn with_acme_server<F, T>(
    acme_dir: &Path,
    addr: SocketAddr,
    handle: Handle,
    primary: F,
) -> T
where
    F: Future<Output = T>,
{
    let redirect = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(acme::router(acme_dir).into_make_service());
    log::info!("plaintext acme server listening on http://{addr}");
    let redirect = tokio::spawn(async move {
        if let Err(e) = redirect.await {
            log::error!("plaintext acme server failed - {e}");
        }
    });

    let output = primary.await;

    log::info!("stopping plaintext acme server");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    if let Err(e) = redirect.await {
        log::error!("plaintext acme server task failed - {e}");
    }

    output
}

async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C - {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler - {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("received Ctrl+C, shutting down"),
        _ = terminate => log::info!("received SIGTERM, shutting down"),
    }

    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
}
