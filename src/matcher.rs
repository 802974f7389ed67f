//! Request matching logic.
//!
//! Finds the mapping for a request by URI and method, then the first policy
//! whose `when` clause holds.

use crate::error::CompileError;
use crate::json::JsonMatcher;
use crate::mapping::compiler::PATH;
use crate::mapping::{BodyMatcher, Mapping, MappingSet, Matchers, MethodFilter, Policy, When};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};

static URI_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\d+)\}").expect("valid regex"));

/// A buffered inbound request, detached from the HTTP framework.
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub method: Method,
    /// Path as received, still percent-encoded
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
}

impl MockRequest {
    /// Request for `path_and_query` with no headers and an empty body.
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        Self {
            method: canonical_method(&method),
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    /// Append a header; invalid names or values are skipped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let name = HeaderName::from_bytes(name.as_bytes());
        if let (Ok(name), Ok(value)) = (name, HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Path and query as sent by the client.
    pub fn uri(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Query parameters, followed by the fields of a form-encoded body.
    fn params(&self) -> HashMap<String, Vec<String>> {
        let mut params: HashMap<String, Vec<String>> = HashMap::new();
        if let Some(query) = &self.query {
            for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
                params.entry(name.into_owned()).or_default().push(value.into_owned());
            }
        }
        if self.has_form_body() {
            for (name, value) in url::form_urlencoded::parse(&self.body) {
                params.entry(name.into_owned()).or_default().push(value.into_owned());
            }
        }
        params
    }

    fn has_form_body(&self) -> bool {
        let carries_body = matches!(self.method, Method::POST | Method::PUT | Method::PATCH);
        carries_body
            && self
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| {
                    ct.trim_start()
                        .to_ascii_lowercase()
                        .starts_with("application/x-www-form-urlencoded")
                })
    }

    fn header_values(&self) -> HashMap<String, Vec<String>> {
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in &self.headers {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        headers
    }
}

/// Result of matching one request.
#[derive(Debug)]
pub enum MatchOutcome<'a> {
    Matched(Matched<'a>),
    /// The URI and method matched but no policy's `when` held
    NoPolicy,
    /// The URI matched but no mapping accepts the method
    MethodNotAllowed,
    NotFound,
}

#[derive(Debug)]
pub struct Matched<'a> {
    pub mapping: &'a Mapping,
    pub policy: &'a Policy,
    /// A `HEAD` request answered by a `GET` mapping
    pub head: bool,
}

struct UriPattern {
    regex: Regex,
    /// Variable index for each capture group, in group order
    vars: Vec<String>,
    mappings: Vec<usize>,
}

/// Index over one [`MappingSet`]. Immutable; a reload builds a new one.
pub struct RequestMatcher {
    set: Arc<MappingSet>,
    direct: HashMap<String, Vec<usize>>,
    patterns: Vec<UriPattern>,
}

impl RequestMatcher {
    pub fn new(set: Arc<MappingSet>) -> Result<Self, CompileError> {
        let mut direct: HashMap<String, Vec<usize>> = HashMap::new();
        let mut patterns: Vec<(String, UriPattern)> = Vec::new();

        for (idx, mapping) in set.mappings.iter().enumerate() {
            if !mapping.has_path_vars() {
                direct.entry(mapping.uri.clone()).or_default().push(idx);
                continue;
            }
            match patterns.iter_mut().find(|(uri, _)| *uri == mapping.uri) {
                Some((_, pattern)) => pattern.mappings.push(idx),
                None => {
                    let mut pattern = compile_uri_pattern(&mapping.uri)?;
                    pattern.mappings.push(idx);
                    patterns.push((mapping.uri.clone(), pattern));
                }
            }
        }

        Ok(Self {
            set,
            direct,
            patterns: patterns.into_iter().map(|(_, p)| p).collect(),
        })
    }

    /// An index over no mappings; every request is `NotFound`.
    pub fn empty() -> Self {
        Self {
            set: Arc::new(MappingSet::default()),
            direct: HashMap::new(),
            patterns: Vec::new(),
        }
    }

    pub fn mapping_set(&self) -> &Arc<MappingSet> {
        &self.set
    }

    pub fn find(&self, request: &MockRequest) -> MatchOutcome<'_> {
        let path = canonical_path(&request.path);
        let method = canonical_method(&request.method);

        let mut candidates: Vec<(&[usize], Option<HashMap<String, Vec<String>>>)> = Vec::new();
        if let Some(mappings) = self.direct.get(&path) {
            candidates.push((mappings.as_slice(), None));
        }
        for pattern in &self.patterns {
            if let Some(vars) = pattern.capture(&path) {
                candidates.push((pattern.mappings.as_slice(), Some(vars)));
            }
        }

        let uri_matched = !candidates.is_empty();
        for (mappings, path_vars) in candidates {
            let Some((mapping, head)) = self.select_mapping(mappings, &method) else {
                continue;
            };

            let observed = Observed::of(request);
            return match select_policy(mapping, &observed, path_vars.as_ref()) {
                Some(policy) => MatchOutcome::Matched(Matched {
                    mapping,
                    policy,
                    head,
                }),
                None => MatchOutcome::NoPolicy,
            };
        }

        if uri_matched {
            MatchOutcome::MethodNotAllowed
        } else {
            MatchOutcome::NotFound
        }
    }

    /// Method-specific mappings win over `Any`; `HEAD` falls back to `GET`.
    fn select_mapping(&self, mappings: &[usize], method: &Method) -> Option<(&Mapping, bool)> {
        let pick = |method: &Method| {
            let candidates = || mappings.iter().map(|&idx| &self.set.mappings[idx]);
            candidates()
                .find(|m| matches!(&m.method, MethodFilter::Only(only) if only == method))
                .or_else(|| candidates().find(|m| m.method.matches(method)))
        };

        if let Some(mapping) = pick(method) {
            return Some((mapping, false));
        }
        if *method == Method::HEAD {
            return pick(&Method::GET).map(|mapping| (mapping, true));
        }
        None
    }
}

impl fmt::Debug for RequestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMatcher")
            .field("mappings", &self.set.len())
            .field("direct", &self.direct.len())
            .field("patterns", &self.patterns.len())
            .finish()
    }
}

impl UriPattern {
    fn capture(&self, path: &str) -> Option<HashMap<String, Vec<String>>> {
        let caps = self.regex.captures(path)?;
        let mut vars = HashMap::with_capacity(self.vars.len());
        for (group, name) in self.vars.iter().enumerate() {
            if let Some(m) = caps.get(group + 1) {
                let value = percent_decode_str(m.as_str()).decode_utf8_lossy().into_owned();
                vars.insert(name.clone(), vec![value]);
            }
        }
        Some(vars)
    }
}

/// `/users/{0}/posts/{1}` becomes `^/users/(.+?)/posts/(.+?)$`.
fn compile_uri_pattern(uri: &str) -> Result<UriPattern, CompileError> {
    let mut pattern = String::from("^");
    let mut vars = Vec::new();
    let mut last = 0;
    for caps in URI_VAR.captures_iter(uri) {
        let (Some(whole), Some(index)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        pattern.push_str(&regex::escape(&uri[last..whole.start()]));
        pattern.push_str("(.+?)");
        vars.push(index.as_str().to_string());
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&uri[last..]));
    pattern.push('$');

    Ok(UriPattern {
        regex: Regex::new(&pattern)?,
        vars,
        mappings: Vec::new(),
    })
}

/// Upper-case a method token so `post` and `POST` are the same method.
pub fn canonical_method(method: &Method) -> Method {
    let token = method.as_str();
    if !token.bytes().any(|b| b.is_ascii_lowercase()) {
        return method.clone();
    }
    Method::from_bytes(token.to_ascii_uppercase().as_bytes()).unwrap_or_else(|_| method.clone())
}

/// Re-encode a request path the way mapping URIs are encoded, so that
/// `/a%20b` and `/a b` look up the same mapping.
pub fn canonical_path(raw: &str) -> String {
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    utf8_percent_encode(&decoded, PATH).to_string()
}

/// Request data a `when` clause can inspect, extracted once per request.
struct Observed<'r> {
    params: HashMap<String, Vec<String>>,
    headers: HashMap<String, Vec<String>>,
    body: &'r [u8],
}

impl<'r> Observed<'r> {
    fn of(request: &'r MockRequest) -> Self {
        Self {
            params: request.params(),
            headers: request.header_values(),
            body: &request.body,
        }
    }
}

fn select_policy<'a>(
    mapping: &'a Mapping,
    observed: &Observed<'_>,
    path_vars: Option<&HashMap<String, Vec<String>>>,
) -> Option<&'a Policy> {
    mapping.policies.iter().find(|policy| match &policy.when {
        None => true,
        Some(when) => when_holds(when, observed, path_vars),
    })
}

fn when_holds(
    when: &When,
    observed: &Observed<'_>,
    path_vars: Option<&HashMap<String, Vec<String>>>,
) -> bool {
    if let Some(vars) = path_vars {
        if !matchers_hold(&when.path_vars, vars) {
            return false;
        }
    }
    matchers_hold(&when.params, &observed.params)
        && matchers_hold(&when.headers, &observed.headers)
        && when.body.as_ref().map_or(true, |m| body_matches(m, observed.body))
}

fn matchers_hold(matchers: &Matchers, observed: &HashMap<String, Vec<String>>) -> bool {
    let values_of = |name: &str| observed.get(name).map(Vec::as_slice).unwrap_or_default();

    matchers
        .values
        .iter()
        .all(|pair| same_multiset(&pair.values, values_of(&pair.name)))
        && matchers
            .regexps
            .iter()
            .all(|pair| values_of(&pair.name).iter().any(|v| pair.regex.is_match(v)))
        && matchers
            .jsons
            .iter()
            .all(|pair| any_json_matches(&pair.json, values_of(&pair.name)))
}

fn any_json_matches(matcher: &JsonMatcher, values: &[String]) -> bool {
    values.iter().any(|v| matcher.matches_bytes(v.as_bytes()))
}

/// Equal as multisets: order ignored, duplicate counts respected.
fn same_multiset(expected: &[String], actual: &[String]) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    let mut expected: Vec<&str> = expected.iter().map(String::as_str).collect();
    let mut actual: Vec<&str> = actual.iter().map(String::as_str).collect();
    expected.sort_unstable();
    actual.sort_unstable();
    expected == actual
}

fn body_matches(matcher: &BodyMatcher, body: &[u8]) -> bool {
    match matcher {
        BodyMatcher::Bytes(expected) => expected.as_ref() == body,
        BodyMatcher::Regex(re) => re.is_match(&String::from_utf8_lossy(body)),
        BodyMatcher::Json(json) => json.matches_bytes(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Loader;
    use crate::source::MemorySource;

    fn matcher(mappings: &str) -> RequestMatcher {
        let src = MemorySource::new().with_file("/base/mappings.json", mappings);
        let set = Loader::with_source("/base/mappings.json", Arc::new(src))
            .load()
            .unwrap();
        RequestMatcher::new(Arc::new(set)).unwrap()
    }

    fn status_of(outcome: &MatchOutcome<'_>) -> &'static str {
        match outcome {
            MatchOutcome::Matched(_) => "matched",
            MatchOutcome::NoPolicy => "no-policy",
            MatchOutcome::MethodNotAllowed => "405",
            MatchOutcome::NotFound => "404",
        }
    }

    fn policy_status(outcome: &MatchOutcome<'_>) -> u16 {
        match outcome {
            MatchOutcome::Matched(m) => match &m.policy.command {
                crate::mapping::Command::Returns(r) => r.status.as_u16(),
                _ => 0,
            },
            _ => 0,
        }
    }

    #[test]
    fn test_uri_and_method_outcomes() {
        let m = matcher(r#"[{"uri":"/hello","method":"POST"}]"#);

        assert_eq!(status_of(&m.find(&MockRequest::new(Method::POST, "/hello"))), "matched");
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::GET, "/hello"))), "405");
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::POST, "/hello/"))), "404");
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::POST, "/other"))), "404");
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let m = matcher(r#"[{"uri":"/hello","method":"POST"}]"#);
        let lower = Method::from_bytes(b"post").unwrap();

        let request = MockRequest::new(lower.clone(), "/hello");
        assert_eq!(request.method, Method::POST);
        assert_eq!(status_of(&m.find(&request)), "matched");

        let mut raw = MockRequest::new(Method::GET, "/hello");
        raw.method = lower;
        assert_eq!(status_of(&m.find(&raw)), "matched");
        assert_eq!(canonical_method(&Method::from_bytes(b"purge").unwrap()).as_str(), "PURGE");
    }

    #[test]
    fn test_method_specific_mapping_wins() {
        let m = matcher(
            r#"[
                {"uri":"/m","policies":[{"returns":{"statusCode":201}}]},
                {"uri":"/m","method":"GET","policies":[{"returns":{"statusCode":202}}]}
            ]"#,
        );
        assert_eq!(policy_status(&m.find(&MockRequest::new(Method::GET, "/m"))), 202);
        assert_eq!(policy_status(&m.find(&MockRequest::new(Method::DELETE, "/m"))), 201);
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let m = matcher(r#"[{"uri":"/h","method":"GET"}]"#);
        match m.find(&MockRequest::new(Method::HEAD, "/h")) {
            MatchOutcome::Matched(matched) => assert!(matched.head),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_params_are_multisets() {
        let m = matcher(
            r#"[{"uri":"/p","policies":[{"when":{"params":{"p":["a","b"]}}}]}]"#,
        );
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::GET, "/p?p=b&p=a"))), "matched");
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::GET, "/p?p=a"))), "no-policy");
        assert_eq!(
            status_of(&m.find(&MockRequest::new(Method::GET, "/p?p=a&p=b&p=b"))),
            "no-policy"
        );
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::GET, "/p"))), "no-policy");
    }

    #[test]
    fn test_form_body_contributes_params() {
        let m = matcher(
            r#"[{"uri":"/f","policies":[{"when":{"params":{"a":"1","b":"two words"}}}]}]"#,
        );
        let req = MockRequest::new(Method::POST, "/f?a=1")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body("b=two+words");
        assert_eq!(status_of(&m.find(&req)), "matched");

        let req = MockRequest::new(Method::POST, "/f?a=1").with_body("b=two+words");
        assert_eq!(status_of(&m.find(&req)), "no-policy");
    }

    #[test]
    fn test_headers_regex_and_json() {
        let m = matcher(
            r#"[{"uri":"/h","policies":[{"when":{"headers":{
                "X-Token":{"@regexp":"^tk-\\d+$"},
                "X-Meta":{"@json":{"role":"admin"}}
            }}}]}]"#,
        );
        let ok = MockRequest::new(Method::GET, "/h")
            .with_header("x-token", "tk-12")
            .with_header("x-meta", r#"{"role":"admin","id":3}"#);
        assert_eq!(status_of(&m.find(&ok)), "matched");

        let bad = MockRequest::new(Method::GET, "/h")
            .with_header("x-token", "tk-ab")
            .with_header("x-meta", r#"{"role":"admin"}"#);
        assert_eq!(status_of(&m.find(&bad)), "no-policy");

        let missing = MockRequest::new(Method::GET, "/h").with_header("x-token", "tk-1");
        assert_eq!(status_of(&m.find(&missing)), "no-policy");
    }

    #[test]
    fn test_body_matchers() {
        let m = matcher(
            r#"[{"uri":"/b","policies":[
                {"when":{"body":"exact"},"returns":{"statusCode":201}},
                {"when":{"body":{"@regexp":"^re"}},"returns":{"statusCode":202}},
                {"when":{"body":{"@json":{"k":[null,2]}}},"returns":{"statusCode":203}}
            ]}]"#,
        );
        let find = |body: &'static str| {
            policy_status(&m.find(&MockRequest::new(Method::POST, "/b").with_body(body)))
        };
        assert_eq!(find("exact"), 201);
        assert_eq!(find("regex"), 202);
        assert_eq!(find(r#"{"k":[9,2,3]}"#), 203);
        assert_eq!(find(r#"{"k":[9,3]}"#), 0);
    }

    #[test]
    fn test_path_variables() {
        let m = matcher(
            r#"[{"uri":"/users/{id}/posts/{post}","policies":[
                {"when":{"pathVars":{"id":"42","post":{"@regexp":"^\\d+$"}}},"returns":{"statusCode":201}},
                {"returns":{"statusCode":202}}
            ]}]"#,
        );
        let status = |path: &str| policy_status(&m.find(&MockRequest::new(Method::GET, path)));
        assert_eq!(status("/users/42/posts/7"), 201);
        assert_eq!(status("/users/42/posts/x"), 202);
        assert_eq!(status("/users/1/posts/7"), 202);
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::GET, "/users/42"))), "404");
    }

    #[test]
    fn test_exact_uri_before_pattern() {
        let m = matcher(
            r#"[
                {"uri":"/items/{id}","policies":[{"returns":{"statusCode":202}}]},
                {"uri":"/items/new","policies":[{"returns":{"statusCode":201}}]}
            ]"#,
        );
        assert_eq!(policy_status(&m.find(&MockRequest::new(Method::GET, "/items/new"))), 201);
        assert_eq!(policy_status(&m.find(&MockRequest::new(Method::GET, "/items/9"))), 202);
    }

    #[test]
    fn test_encoded_paths_match() {
        let m = matcher(r#"[{"uri":"/a b/ü"}]"#);
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::GET, "/a%20b/%C3%BC"))), "matched");
        assert_eq!(canonical_path("/a b"), "/a%20b");
        assert_eq!(canonical_path("/x%2Cy"), "/x,y");
    }

    #[test]
    fn test_empty_matcher() {
        let m = RequestMatcher::empty();
        assert_eq!(status_of(&m.find(&MockRequest::new(Method::GET, "/"))), "404");
    }
}
