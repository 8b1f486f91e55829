//! `AppState`: the shared collaborators every request needs, plus the one
//! axum fallback handler that bridges an HTTP request into a `Task` driven
//! through the state machine and back out to an HTTP response.
//!
//! Shaped like `sem_os_server::router::build_router`'s `Arc<dyn
//! CoreService>` extension, except the thing being shared is the whole
//! task-execution core rather than a single service trait: axum's own
//! routing only decides "is this worth dispatching at all" (it doesn't —
//! every path lands on the one fallback below), and the real method/path
//! matching, phase execution, and postpone/forward handling all happen
//! inside `supernode_runtime`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method as HttpMethod, StatusCode};
use axum::response::{IntoResponse, Response};
use supernode_runtime::{ArmedRouter, GlobalContext, Method, StateMachine, Task};
use supernode_types::{ContextValue, Input, Output, TaskKind, Vars};

use crate::error::TaskError;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ArmedRouter>,
    pub sm: Arc<StateMachine>,
    pub global: Arc<GlobalContext>,
}

fn http_method(m: &HttpMethod) -> Option<Method> {
    Method::parse(m.as_str())
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect()
}

/// Counters read back by `handlers::sys_info`, named after the running-info
/// fields the original implementation's `/sys_info` handler reports.
fn incr_counter(global: &GlobalContext, key: &str) {
    global.apply(key, ContextValue::Int(0), |current| ContextValue::Int(current.as_int().unwrap_or(0) + 1));
}

fn count_terminal_status(global: &GlobalContext, status: supernode_types::Status) {
    use supernode_types::Status;
    let key = match status {
        Status::Ok => "sys_info.http_resp_status_ok",
        Status::Busy => "sys_info.http_resp_status_busy",
        Status::Drop => "sys_info.http_resp_status_drop",
        Status::Error | Status::InternalError | Status::Stop => "sys_info.http_resp_status_error",
        Status::None | Status::Again | Status::Forward | Status::Postpone => return,
    };
    incr_counter(global, key);
}

/// Every call site here is already past the task's `Exit` state, so the
/// response it decorates is always the terminal reply — never one chunk
/// of an in-flight `Again` stream.
fn apply_response_headers(mut response: Response, output: &Output) -> Response {
    for (key, value) in &output.headers {
        if let (Ok(name), Ok(val)) = (
            axum::http::HeaderName::try_from(key.as_str()),
            axum::http::HeaderValue::try_from(value.as_str()),
        ) {
            response.headers_mut().insert(name, val);
        }
    }
    response
        .headers_mut()
        .insert(axum::http::header::CONNECTION, axum::http::HeaderValue::from_static("close"));
    response
}

/// The one axum route every request lands on. Matches against the custom
/// `ArmedRouter`, builds a `Task`, drives it through the state machine, and
/// renders the terminal `Status`/`Output` as an HTTP response.
pub async fn dispatch(State(state): State<AppState>, req: axum::extract::Request) -> Response {
    let method = req.method().clone();
    let Some(runtime_method) = http_method(&method) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let uri = req.uri().clone();
    let headers = collect_headers(req.headers());
    let query = uri.query().unwrap_or("").to_string();

    incr_counter(&state.global, "sys_info.http_request_total");

    let Some(matched) = state.router.matches(runtime_method, uri.path()) else {
        incr_counter(&state.global, "sys_info.http_request_unrouted");
        return StatusCode::NOT_FOUND.into_response();
    };
    incr_counter(&state.global, "sys_info.http_request_routed");
    let vars: Vars = matched.vars;
    let handler = matched.handler.clone();

    let body = match axum::body::to_bytes(req.into_body(), 16 * 1024 * 1024).await {
        Ok(b) => b.to_vec(),
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let input = Input { method: method.to_string(), uri: uri.path().to_string(), query, headers, body, resp_code: 0 };

    let task = Task::new(TaskKind::Client, handler, vars, input, state.global.clone());

    let (chunk_tx, mut chunk_rx) = tokio::sync::mpsc::unbounded_channel::<Vec<u8>>();
    task.attach_chunk_sink(chunk_tx);

    let driver_task = task.clone();
    let sm = state.sm.clone();
    let mut driver = tokio::spawn(async move { sm.drive(driver_task).await });

    let mut chunks: Vec<Bytes> = Vec::new();
    loop {
        tokio::select! {
            biased;
            maybe_chunk = chunk_rx.recv() => {
                match maybe_chunk {
                    Some(bytes) => chunks.push(Bytes::from(bytes)),
                    None => {}
                }
            }
            result = &mut driver => {
                if let Err(e) = result {
                    tracing::error!(task_id = %task.id, error = %e, "state machine task panicked");
                }
                break;
            }
        }
    }
    while let Ok(bytes) = chunk_rx.try_recv() {
        chunks.push(Bytes::from(bytes));
    }

    let status = task.last_status().normalize();
    count_terminal_status(&state.global, status);
    let output = task.output();
    chunks.push(Bytes::from(output.body.clone()));

    if status.is_terminal_failure() {
        let message = String::from_utf8_lossy(&output.body).into_owned();
        return TaskError::new(status, message).into_response();
    }

    let http_code = output.resp_code.max(status.terminal_http_code().unwrap_or(200));
    let status_code = StatusCode::from_u16(http_code).unwrap_or(StatusCode::OK);

    let response = if chunks.len() > 1 {
        // More than one chunk means the handler used `Status::Again` at
        // least once — frame the whole thing as a chunked transfer instead
        // of buffering it behind a Content-Length.
        let stream = tokio_stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>));
        Response::builder().status(status_code).body(Body::from_stream(stream)).expect("static response parts")
    } else {
        let body = chunks.pop().unwrap_or_default();
        Response::builder().status(status_code).body(Body::from(body)).expect("static response parts")
    };

    apply_response_headers(response, &output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::routing::any;
    use axum::Router;
    use std::time::Duration;
    use supernode_runtime::{Handler3, PostponeRegistry, Router as RuntimeRouter, UpstreamManager, WorkerPool};
    use supernode_types::Status;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut router = RuntimeRouter::new();
        router
            .route(
                "/echo",
                &[Method::Get],
                Handler3::new("echo").with_pre(|_vars: Vars, _input: Input, _ctx, mut output: Output| async move {
                    output.body = b"hi".to_vec();
                    (Status::Ok, output)
                }),
            )
            .unwrap();
        let armed = Arc::new(router.arm());
        let pool = WorkerPool::new(1, 4, Duration::from_secs(60));
        let default_dest = supernode_runtime::DestinationConfig {
            base_uri: "http://127.0.0.1:0".to_string(),
            max_connections: 1,
            keep_alive: true,
            timeout: Duration::from_secs(1),
        };
        let upstream = Arc::new(UpstreamManager::new(default_dest, HashMap::new()).unwrap());
        let postpone = Arc::new(PostponeRegistry::new());
        let sm = Arc::new(StateMachine::new(pool, upstream, postpone, Duration::from_secs(5), Duration::from_secs(5)));
        AppState { router: armed, sm, global: Arc::new(GlobalContext::new()) }
    }

    #[tokio::test]
    async fn unmatched_route_is_404() {
        let state = test_state();
        let app = Router::new().fallback(any(dispatch)).with_state(state);
        let response = app
            .oneshot(
                axum::extract::Request::builder()
                    .uri("/nope")
                    .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9))))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn matched_route_end_to_end() {
        let state = test_state();
        let app = Router::new().fallback(any(dispatch)).with_state(state);
        let response = app
            .oneshot(
                axum::extract::Request::builder()
                    .uri("/echo")
                    .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 9))))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(axum::http::header::CONNECTION).unwrap(), "close");
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"hi");
    }
}
