//! Compiled mapping definitions.
//!
//! A [`MappingSet`] is built once per load and never mutated afterwards; a
//! reload builds a new one and replaces the old set wholesale.

pub mod compiler;
pub mod loader;

pub use loader::Loader;

use crate::json::JsonMatcher;
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use rand::Rng;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Every mapping loaded from one root file.
#[derive(Debug, Clone, Default)]
pub struct MappingSet {
    pub mappings: Vec<Mapping>,
    /// Files that contributed, relative to `base_dir`, root file first
    pub filenames: Vec<PathBuf>,
    pub base_dir: PathBuf,
}

impl MappingSet {
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Methods declared per URI, in mapping order.
    pub fn methods_by_uri(&self) -> Vec<(&str, Vec<&MethodFilter>)> {
        let mut grouped: Vec<(&str, Vec<&MethodFilter>)> = Vec::new();
        for mapping in &self.mappings {
            match grouped.iter_mut().find(|(uri, _)| *uri == mapping.uri) {
                Some((_, methods)) => methods.push(&mapping.method),
                None => grouped.push((&mapping.uri, vec![&mapping.method])),
            }
        }
        grouped
    }
}

/// A URI and method filter with its candidate policies.
#[derive(Debug, Clone)]
pub struct Mapping {
    /// Percent-encoded path; path variables appear as `{0}`, `{1}`, ...
    pub uri: String,
    pub method: MethodFilter,
    pub policies: Vec<Policy>,
}

impl Mapping {
    pub fn has_path_vars(&self) -> bool {
        self.uri.contains('{')
    }
}

/// Which request methods a mapping accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    Any,
    Only(Method),
}

impl MethodFilter {
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(m) => m == method,
        }
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodFilter::Any => write!(f, "*"),
            MethodFilter::Only(m) => write!(f, "{}", m),
        }
    }
}

/// One conditional response rule.
#[derive(Debug, Clone)]
pub struct Policy {
    pub when: Option<When>,
    pub command: Command,
}

impl Policy {
    /// Unconditional empty `200 OK`.
    pub fn ok() -> Self {
        Self {
            when: None,
            command: Command::Returns(Returns::new(StatusCode::OK)),
        }
    }

    pub fn cmd_type(&self) -> CmdType {
        match self.command {
            Command::Returns(_) => CmdType::Returns,
            Command::Forwards(_) => CmdType::Forwards,
            Command::Redirects(_) => CmdType::Redirects,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdType {
    Returns,
    Forwards,
    Redirects,
}

impl CmdType {
    pub const ALL: [CmdType; 3] = [CmdType::Returns, CmdType::Forwards, CmdType::Redirects];

    pub fn as_str(&self) -> &'static str {
        match self {
            CmdType::Returns => "returns",
            CmdType::Forwards => "forwards",
            CmdType::Redirects => "redirects",
        }
    }
}

impl fmt::Display for CmdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Returns(Returns),
    Forwards(Forwards),
    /// A `returns` with a `Location` header and a redirect status
    Redirects(Returns),
}

/// Predicate over an inbound request. All parts must hold.
#[derive(Debug, Clone, Default)]
pub struct When {
    /// Header names are lowercase
    pub headers: Matchers,
    pub params: Matchers,
    /// Names are canonical path-variable indices
    pub path_vars: Matchers,
    pub body: Option<BodyMatcher>,
}

/// Matchers over one multi-valued request source.
#[derive(Debug, Clone, Default)]
pub struct Matchers {
    pub values: Vec<NameValuesPair>,
    pub regexps: Vec<NameRegexPair>,
    pub jsons: Vec<NameJsonPair>,
}

impl Matchers {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.regexps.is_empty() && self.jsons.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameValuesPair {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NameRegexPair {
    pub name: String,
    pub regex: Regex,
}

#[derive(Debug, Clone)]
pub struct NameJsonPair {
    pub name: String,
    pub json: JsonMatcher,
}

#[derive(Debug, Clone)]
pub enum BodyMatcher {
    Bytes(Bytes),
    Regex(Regex),
    Json(JsonMatcher),
}

/// A synthesized response.
#[derive(Debug, Clone)]
pub struct Returns {
    pub status: StatusCode,
    pub headers: Vec<NameValuesPair>,
    pub body: Bytes,
    pub latency: Option<Interval>,
}

impl Returns {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
            latency: None,
        }
    }
}

/// A forward to an absolute URL or to another local path.
#[derive(Debug, Clone)]
pub struct Forwards {
    pub path: String,
    pub latency: Option<Interval>,
}

impl Forwards {
    pub fn is_remote(&self) -> bool {
        is_remote_path(&self.path)
    }
}

pub(crate) fn is_remote_path(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Millisecond bounds for simulated latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    min: u64,
    max: u64,
}

impl Interval {
    /// `None` unless `min <= max`.
    pub fn new(min: u64, max: u64) -> Option<Self> {
        (min <= max).then_some(Self { min, max })
    }

    pub fn fixed(millis: u64) -> Self {
        Self {
            min: millis,
            max: millis,
        }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    /// A uniformly random duration within the bounds.
    pub fn draw(&self) -> Duration {
        let millis = if self.min == self.max {
            self.min
        } else {
            rand::thread_rng().gen_range(self.min..=self.max)
        };
        Duration::from_millis(millis)
    }
}
