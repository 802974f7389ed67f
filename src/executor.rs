//! Policy execution.
//!
//! Turns a matched policy into a response: a canned `returns`/`redirects`
//! answer, a forward to a remote URL, or a re-dispatch of the request to
//! another local path.

use crate::error::{ExecuteError, ForwardError};
use crate::mapping::{Command, Interval, Returns};
use crate::matcher::{canonical_method, MatchOutcome, MockRequest, RequestMatcher};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{
    CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, SERVER, TRANSFER_ENCODING,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::{Host, Url};

/// `Server` header value unless configured otherwise.
pub const DEFAULT_SERVER_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Internal re-dispatches allowed for one request.
pub const MAX_FORWARD_HOPS: usize = 8;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_SERVER: HeaderName = HeaderName::from_static("x-forwarded-server");

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Built-in answers for requests no mapping handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    NotFound,
    NoPolicyMatched,
    MethodNotAllowed,
    BadRequest,
    PayloadTooLarge,
    InternalServerError,
    BadGateway,
}

impl Fallback {
    pub fn status(self) -> StatusCode {
        match self {
            Fallback::NotFound => StatusCode::NOT_FOUND,
            Fallback::NoPolicyMatched => StatusCode::BAD_REQUEST,
            Fallback::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Fallback::BadRequest => StatusCode::BAD_REQUEST,
            Fallback::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Fallback::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Fallback::BadGateway => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Fallback::NotFound => "Not Found",
            Fallback::NoPolicyMatched => "No policy matched",
            Fallback::MethodNotAllowed => "Method Not Allowed",
            Fallback::BadRequest => "Bad Request",
            Fallback::PayloadTooLarge => "Payload Too Large",
            Fallback::InternalServerError => "Internal Server Error",
            Fallback::BadGateway => "Bad Gateway",
        }
    }

    /// `{"statusCode":<code>,"message":"<text>"}` as JSON.
    pub fn response(self) -> MockResponse {
        let body = format!(
            r#"{{"statusCode":{},"message":"{}"}}"#,
            self.status().as_u16(),
            self.message()
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        MockResponse {
            status: self.status(),
            headers,
            body: Bytes::from(body),
        }
    }
}

/// Performs outbound calls for remote `forwards`.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, target: Url, request: &MockRequest) -> Result<MockResponse, ForwardError>;
}

/// [`Forwarder`] over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpForwarder {
    /// Redirects from upstream are relayed, not followed.
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            max_body_bytes,
        })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, target: Url, request: &MockRequest) -> Result<MockResponse, ForwardError> {
        let mut headers = request.headers.clone();
        strip_transport_headers(&mut headers);
        headers.remove(HOST);
        if let Some(addr) = request.remote_addr {
            if let Ok(value) = HeaderValue::from_str(&addr.ip().to_string()) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        let mut response = self
            .client
            .request(request.method.clone(), target)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(ForwardError::BodyTooLarge(self.max_body_bytes));
        }

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_transport_headers(&mut headers);

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(ForwardError::BodyTooLarge(self.max_body_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(MockResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }
}

/// Headers describing the connection rather than the message.
fn strip_transport_headers(headers: &mut HeaderMap) {
    for name in [CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING] {
        headers.remove(name);
    }
}

type Dispatch<'a> = Pin<Box<dyn Future<Output = Result<MockResponse, ExecuteError>> + Send + 'a>>;

/// Executes policies against one [`RequestMatcher`] snapshot.
pub struct Executor {
    forwarder: Arc<dyn Forwarder>,
    server_name: HeaderValue,
    listen_port: Option<u16>,
}

impl Executor {
    /// An unusable `server_name` falls back to [`DEFAULT_SERVER_NAME`].
    pub fn new(forwarder: Arc<dyn Forwarder>, server_name: &str) -> Self {
        let server_name = HeaderValue::from_str(server_name)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_SERVER_NAME));
        Self {
            forwarder,
            server_name,
            listen_port: None,
        }
    }

    /// Remote forwards to this port on a local address are refused.
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn server_name(&self) -> &HeaderValue {
        &self.server_name
    }

    /// Answer one request. Never fails: errors become fallback responses.
    pub async fn handle(&self, matcher: &RequestMatcher, request: &MockRequest) -> MockResponse {
        let mut response = match self.dispatch(matcher, request, 0).await {
            Ok(response) => response,
            Err(ExecuteError::Forward(e)) => {
                warn!(method = %request.method, uri = %request.uri(), error = %e, "Forward failed");
                Fallback::BadGateway.response()
            }
            Err(e) => {
                error!(method = %request.method, uri = %request.uri(), error = %e, "Failed to execute policy");
                Fallback::InternalServerError.response()
            }
        };

        response
            .headers
            .entry(SERVER)
            .or_insert_with(|| self.server_name.clone());
        if canonical_method(&request.method) == Method::HEAD {
            response.body = Bytes::new();
        }
        response
    }

    fn dispatch<'a>(
        &'a self,
        matcher: &'a RequestMatcher,
        request: &'a MockRequest,
        hops: usize,
    ) -> Dispatch<'a> {
        Box::pin(async move {
            let matched = match matcher.find(request) {
                MatchOutcome::Matched(matched) => matched,
                MatchOutcome::NoPolicy => return Ok(fallback(Fallback::NoPolicyMatched, request)),
                MatchOutcome::MethodNotAllowed => {
                    return Ok(fallback(Fallback::MethodNotAllowed, request))
                }
                MatchOutcome::NotFound => return Ok(fallback(Fallback::NotFound, request)),
            };

            let cmd = matched.policy.cmd_type();
            match &matched.policy.command {
                Command::Returns(returns) | Command::Redirects(returns) => {
                    wait(returns.latency).await;
                    let response = render_returns(returns)?;
                    if hops == 0 {
                        info!(
                            cmd = %cmd,
                            status = response.status.as_u16(),
                            method = %request.method,
                            uri = %request.uri(),
                            "Served"
                        );
                    }
                    Ok(response)
                }
                Command::Forwards(forwards) => {
                    wait(forwards.latency).await;
                    let (response, target) = if forwards.is_remote() {
                        self.forward_remote(&forwards.path, request).await?
                    } else {
                        self.forward_local(matcher, &forwards.path, request, hops).await?
                    };
                    info!(
                        cmd = %cmd,
                        status = response.status.as_u16(),
                        method = %request.method,
                        uri = %request.uri(),
                        target = %target,
                        "Served"
                    );
                    Ok(response)
                }
            }
        })
    }

    /// The request's query replaces the target's.
    async fn forward_remote(
        &self,
        path: &str,
        request: &MockRequest,
    ) -> Result<(MockResponse, String), ExecuteError> {
        let mut target =
            Url::parse(path).map_err(|_| ForwardError::InvalidTarget(path.to_string()))?;
        target.set_query(request.query.as_deref());
        if self.is_own_address(&target) {
            return Err(ForwardError::SelfForward(target.to_string()).into());
        }

        let shown = target.to_string();
        let mut response = self.forwarder.forward(target, request).await?;
        response.headers.remove(SERVER);
        response
            .headers
            .insert(X_FORWARDED_SERVER, self.server_name.clone());
        Ok((response, shown))
    }

    /// Re-dispatch with the same method, headers and body to another path.
    async fn forward_local(
        &self,
        matcher: &RequestMatcher,
        path: &str,
        request: &MockRequest,
        hops: usize,
    ) -> Result<(MockResponse, String), ExecuteError> {
        if hops >= MAX_FORWARD_HOPS {
            return Err(ForwardError::TooManyHops(MAX_FORWARD_HOPS).into());
        }

        let (target_path, target_query) = match path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path, None),
        };
        let mut next = request.clone();
        next.path = if target_path.starts_with('/') {
            target_path.to_string()
        } else {
            resolve_relative(&request.path, target_path)
        };
        next.query = match (target_query, request.query.as_deref()) {
            (Some(own), Some(orig)) => Some(format!("{}&{}", own, orig)),
            (Some(own), None) => Some(own.to_string()),
            (None, orig) => orig.map(str::to_string),
        };

        let shown = next.uri();
        debug!(from = %request.uri(), to = %shown, hops = hops + 1, "Forwarding locally");
        let response = self.dispatch(matcher, &next, hops + 1).await?;
        Ok((response, shown))
    }

    fn is_own_address(&self, target: &Url) -> bool {
        let Some(port) = self.listen_port else {
            return false;
        };
        let local = match target.host() {
            Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(Host::Ipv4(ip)) => ip.is_loopback() || ip.is_unspecified(),
            Some(Host::Ipv6(ip)) => ip.is_loopback() || ip.is_unspecified(),
            None => false,
        };
        local && target.port_or_known_default() == Some(port)
    }
}

fn fallback(kind: Fallback, request: &MockRequest) -> MockResponse {
    info!(
        status = kind.status().as_u16(),
        method = %request.method,
        uri = %request.uri(),
        "{}",
        kind.message()
    );
    kind.response()
}

/// Headers declared by the policy replace any earlier value of that name.
fn render_returns(returns: &Returns) -> Result<MockResponse, ExecuteError> {
    let mut headers = HeaderMap::new();
    for pair in &returns.headers {
        let name = HeaderName::from_bytes(pair.name.as_bytes())
            .map_err(|_| ExecuteError::InvalidHeader(pair.name.clone()))?;
        headers.remove(&name);
        for value in &pair.values {
            let value = HeaderValue::from_str(value)
                .map_err(|_| ExecuteError::InvalidHeader(pair.name.clone()))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(MockResponse {
        status: returns.status,
        headers,
        body: returns.body.clone(),
    })
}

async fn wait(latency: Option<Interval>) {
    if let Some(latency) = latency {
        let delay = latency.draw();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "Applying latency");
            tokio::time::sleep(delay).await;
        }
    }
}

/// `target` relative to the parent of `base`, with dot segments removed.
fn resolve_relative(base: &str, target: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let parts = base.split('/').chain(std::iter::once("..")).chain(target.split('/'));
    for segment in parts {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}
