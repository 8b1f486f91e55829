//! End-to-end HTTP coverage for the two request shapes unit tests can't
//! reach without a real socket: a client request that gets forwarded
//! upstream and replies with the upstream's answer, and one where the
//! upstream never answers at all.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::routing::any;
use axum::Router as AxumRouter;
use supernode_runtime::{
    DestinationConfig, GlobalContext, Handler3, Method, PostponeRegistry, Router as RuntimeRouter, StateMachine,
    UpstreamManager, WorkerPool,
};
use supernode_server::state::{dispatch, AppState};
use supernode_types::{Input, Output, Status, Vars};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Reads one HTTP/1.1 request and echoes its body with a suffix appended,
/// just enough wire protocol for `reqwest` to parse a reply.
async fn spawn_echo_upstream(suffix: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = socket.read(&mut buf).await.unwrap();
        let request = String::from_utf8_lossy(&buf[..n]);
        let body_start = request.find("\r\n\r\n").map(|i| i + 4).unwrap_or(request.len());
        let reply_body = format!("{}{suffix}", &request[body_start..]);
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply_body.len(),
            reply_body
        );
        let _ = socket.write_all(response.as_bytes()).await;
    });
    format!("http://{addr}")
}

/// Accepts but never answers, forcing the client-side request timeout.
async fn spawn_silent_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });
    format!("http://{addr}")
}

fn app_state(default_dest: DestinationConfig) -> AppState {
    let mut router = RuntimeRouter::new();
    router
        .route(
            "/forward",
            &[Method::Post],
            Handler3::new("forward").with_pre(|_vars: Vars, input: Input, _ctx, mut output: Output| async move {
                output.body = input.body;
                (Status::Forward, output)
            }),
        )
        .unwrap();
    let armed = Arc::new(router.arm());
    let pool = WorkerPool::new(2, 8, Duration::from_secs(60));
    let upstream = Arc::new(UpstreamManager::new(default_dest, HashMap::new()).unwrap());
    let postpone = Arc::new(PostponeRegistry::new());
    let sm = Arc::new(StateMachine::new(pool, upstream, postpone, Duration::from_secs(5), Duration::from_secs(5)));
    AppState { router: armed, sm, global: Arc::new(GlobalContext::new()) }
}

fn request(body: &'static str) -> axum::extract::Request {
    axum::extract::Request::builder()
        .method("POST")
        .uri("/forward")
        .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9))))
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn forwarded_request_returns_the_upstreams_reply() {
    let base_uri = spawn_echo_upstream("-ack").await;
    let dest = DestinationConfig { base_uri, max_connections: 4, keep_alive: true, timeout: Duration::from_secs(2) };
    let state = app_state(dest);
    let app = AxumRouter::new().fallback(any(dispatch)).with_state(state);

    let response = app.oneshot(request("ping")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&body[..], b"ping-ack");
}

#[tokio::test]
async fn forwarded_request_surfaces_an_upstream_timeout_as_an_error_response() {
    let base_uri = spawn_silent_upstream().await;
    let dest = DestinationConfig { base_uri, max_connections: 4, keep_alive: true, timeout: Duration::from_millis(100) };
    let state = app_state(dest);
    let app = AxumRouter::new().fallback(any(dispatch)).with_state(state);

    let response = app.oneshot(request("ping")).await.unwrap();
    assert_eq!(response.status(), 500);
}
