//! HTTP front end.
//!
//! Every request is served against the mapping set that is live when it
//! arrives. A reload publishes a whole new [`RequestMatcher`]; requests
//! already in flight finish against the one they started with.

use crate::executor::{Executor, Fallback};
use crate::mapping::MappingSet;
use crate::matcher::{canonical_method, MockRequest, RequestMatcher};
use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::SERVER;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::Router;
use http_body_util::LengthLimitError;
use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tracing::{info, warn};

struct ServerState {
    live: ArcSwap<RequestMatcher>,
    generation: AtomicU64,
    /// Serializes publications so generations follow publish order
    publish_lock: Mutex<()>,
    executor: Executor,
    max_body_bytes: usize,
    requests_total: AtomicU64,
}

/// Shared handle to the running mock server. Cheap to clone.
#[derive(Clone)]
pub struct MockServer {
    state: Arc<ServerState>,
}

impl MockServer {
    pub fn new(matcher: RequestMatcher, executor: Executor, max_body_bytes: usize) -> Self {
        log_mappings(matcher.mapping_set());
        Self {
            state: Arc::new(ServerState {
                live: ArcSwap::from_pointee(matcher),
                generation: AtomicU64::new(0),
                publish_lock: Mutex::new(()),
                executor,
                max_body_bytes,
                requests_total: AtomicU64::new(0),
            }),
        }
    }

    /// Replace the live mapping set. Returns the new generation.
    pub fn publish(&self, matcher: RequestMatcher) -> u64 {
        let _guard = self
            .state
            .publish_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        log_mappings(matcher.mapping_set());
        self.state.live.store(Arc::new(matcher));
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation, "Published mapping set");
        generation
    }

    /// Number of publications since start; `0` is the initial set.
    pub fn generation(&self) -> u64 {
        self.state.generation.load(Ordering::SeqCst)
    }

    /// The live matcher.
    pub fn current(&self) -> Arc<RequestMatcher> {
        self.state.live.load_full()
    }

    /// Total requests received.
    pub fn total_requests(&self) -> u64 {
        self.state.requests_total.load(Ordering::Relaxed)
    }

    /// Router answering every path and method.
    pub fn router(&self) -> Router {
        Router::new().fallback(handle).with_state(self.clone())
    }
}

async fn handle(State(server): State<MockServer>, request: Request<Body>) -> Response {
    let state = &server.state;
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            let kind = if exceeds_limit(&e) {
                Fallback::PayloadTooLarge
            } else {
                Fallback::BadRequest
            };
            warn!(
                method = %parts.method,
                uri = %parts.uri,
                status = kind.status().as_u16(),
                error = %e,
                "Failed to read request body"
            );
            let mut response = kind.response();
            response
                .headers
                .insert(SERVER, state.executor.server_name().clone());
            return response.into_response();
        }
    };

    let request = MockRequest {
        method: canonical_method(&parts.method),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        body,
        remote_addr,
    };

    let matcher = state.live.load_full();
    state
        .executor
        .handle(&matcher, &request)
        .await
        .into_response()
}

/// Whether a body read failed on the size cap rather than on the transport.
fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

/// Log every mapped URI with its methods, sorted by URI.
pub fn log_mappings(set: &MappingSet) {
    let mut grouped = set.methods_by_uri();
    grouped.sort_by(|a, b| a.0.cmp(b.0));
    for (uri, methods) in grouped {
        let methods: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
        info!(uri = %uri, methods = ?methods, "Mapped");
    }
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, server: MockServer, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(address = %addr, "Mock server listening");

    let app = server
        .router()
        .into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Mock server stopped");
    Ok(())
}

/// Resolves on Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForwardError;
    use crate::executor::{Forwarder, MockResponse};
    use crate::mapping::Loader;
    use crate::source::MemorySource;
    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;
    use url::Url;

    struct NoForwarder;

    #[async_trait]
    impl Forwarder for NoForwarder {
        async fn forward(&self, target: Url, _: &MockRequest) -> Result<MockResponse, ForwardError> {
            Err(ForwardError::InvalidTarget(target.to_string()))
        }
    }

    fn matcher(mappings: &str) -> RequestMatcher {
        let src = MemorySource::new().with_file("/base/mappings.json", mappings);
        let set = Loader::with_source("/base/mappings.json", Arc::new(src))
            .load()
            .unwrap();
        RequestMatcher::new(Arc::new(set)).unwrap()
    }

    fn server(mappings: &str, max_body_bytes: usize) -> MockServer {
        let executor = Executor::new(Arc::new(NoForwarder), "mock-test");
        MockServer::new(matcher(mappings), executor, max_body_bytes)
    }

    async fn send(server: &MockServer, method: Method, uri: &str, body: &'static str) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body))
            .unwrap();
        server.router().oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_serves_live_set() {
        let server = server(r#"[{"uri":"/hello","method":"POST","policies":[{"returns":{"body":"OK"}}]}]"#, 1024);

        let response = send(&server, Method::POST, "/hello", "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[SERVER], "mock-test");

        assert_eq!(
            send(&server, Method::GET, "/hello", "").await.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(server.total_requests(), 2);
    }

    #[tokio::test]
    async fn test_publish_swaps_matcher() {
        let server = server(r#"[{"uri":"/v1"}]"#, 1024);
        assert_eq!(server.generation(), 0);

        assert_eq!(server.publish(matcher(r#"[{"uri":"/v2"}]"#)), 1);
        assert_eq!(server.generation(), 1);
        assert_eq!(send(&server, Method::GET, "/v1", "").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(send(&server, Method::GET, "/v2", "").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_aborted_body_is_bad_request() {
        let server = server(r#"[{"uri":"/upload"}]"#, 1024 * 1024);
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
            Ok("abc"),
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
        ];
        let request = Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[SERVER], "mock-test");
    }

    #[tokio::test]
    async fn test_lowercase_method_is_normalized() {
        let server = server(r#"[{"uri":"/hello","method":"POST","policies":[{"returns":{"body":"OK"}}]}]"#, 1024);
        let method = Method::from_bytes(b"post").unwrap();
        assert_eq!(send(&server, method, "/hello", "").await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let server = server(r#"[{"uri":"/upload"}]"#, 4);
        let response = send(&server, Method::POST, "/upload", "too long").await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()[SERVER], "mock-test");
    }
}
