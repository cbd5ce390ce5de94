use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use axum_server::Handle;
use sdgen_api::routes::acme::{self, PLEASE_USE_HTTPS};
use sdgen_api::server;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use tower::ServiceExt;

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn challenge_app() -> (tempfile::TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("acme-challenge")).unwrap();
    std::fs::write(dir.path().join("acme-challenge").join("token123"), "token123.key").unwrap();
    let app = acme::router(dir.path());
    (dir, app)
}

#[tokio::test]
async fn serves_challenge_files_without_api_key() {
    let (_dir, app) = challenge_app();

    let (status, body) = send(&app, Method::GET, "/.well-known/acme-challenge/token123").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "token123.key");
}

#[tokio::test]
async fn everything_else_is_a_bad_request() {
    let (_dir, app) = challenge_app();

    let cases = [
        (Method::GET, "/"),
        (Method::GET, "/generate"),
        (Method::POST, "/generate"),
        (Method::PUT, "/anything/else"),
        (Method::DELETE, "/"),
        (Method::GET, "/.well-known/acme-challenge/missing"),
        (Method::POST, "/.well-known/acme-challenge/token123"),
        (Method::PATCH, "/.well-known/acme-challenge/token123"),
    ];

    for (method, uri) in cases {
        let (status, body) = send(&app, method.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{method} {uri}");
        assert_eq!(body, PLEASE_USE_HTTPS, "{method} {uri}");
    }
}

#[tokio::test]
async fn missing_acme_directory_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = acme::router(dir.path().join("does-not-exist"));

    let (status, body) = send(&app, Method::GET, "/.well-known/acme-challenge/token").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, PLEASE_USE_HTTPS);
}

fn raw_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    write!(stream, "GET {path} HTTP/1.0\r\nHost: localhost\r\n\r\n").unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn side_server_lives_as_long_as_primary() {
    let (dir, _) = challenge_app();
    let side = Handle::new();
    let primary = Handle::new();
    let local: SocketAddr = "127.0.0.1:0".parse().unwrap();

    let primary_server = axum_server::bind(local)
        .handle(primary.clone())
        .serve(Router::new().into_make_service());

    let control = async {
        let side_addr = side.listening().await.unwrap();
        primary.listening().await.unwrap();

        let (challenge, other) = tokio::task::spawn_blocking(move || {
            (
                raw_get(side_addr, "/.well-known/acme-challenge/token123"),
                raw_get(side_addr, "/generate"),
            )
        })
        .await
        .unwrap();
        assert!(challenge.starts_with("HTTP/1."), "{challenge}");
        assert!(challenge.lines().next().unwrap().contains(" 200 "), "{challenge}");
        assert!(challenge.ends_with("token123.key"), "{challenge}");
        assert!(other.lines().next().unwrap().contains(" 400 "), "{other}");
        assert!(other.ends_with(PLEASE_USE_HTTPS), "{other}");

        primary.graceful_shutdown(None);
        side_addr
    };

    let (result, side_addr) = tokio::join!(
        server::with_acme_server(dir.path(), local, side.clone(), primary_server),
        control,
    );

    assert!(result.is_ok());
    assert!(TcpStream::connect(side_addr).is_err());
}
