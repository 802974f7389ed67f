//! Error types shared across the mapping compiler and the request engine.

use crate::json::JsonPath;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A JSON value could not be converted to the requested type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValueError {
    /// Name of the field being read; empty for anonymous values
    pub name: String,
}

impl ValueError {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "cannot interpret value as json value")
        } else {
            write!(f, "cannot read value of name '{}'", self.name)
        }
    }
}

/// JSON-path parsing and directed mutation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid json-path '{path}' at offset {offset}")]
    Parse { path: String, offset: usize },

    #[error("cannot set value on json-path \"{path}\": {reason}")]
    Conflict { path: String, reason: &'static str },
}

/// Why a template string could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderFailure {
    #[error("placeholder is not complete")]
    Incomplete,
    #[error("placeholder has an empty name")]
    EmptyName,
    #[error("var '{0}' is not defined")]
    Undefined(String),
    #[error("invalid format '{0}' for var")]
    BadFormat(String),
    #[error("var '{0}' cannot be rendered as text")]
    NotText(String),
}

/// Template rendering error, located by template file and JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RenderError {
    pub file: Option<PathBuf>,
    pub path: JsonPath,
    #[source]
    pub reason: RenderFailure,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot render the template on json-path \"{}\"", self.path)?;
        if let Some(file) = &self.file {
            write!(f, " in the file '{}'", file.display())?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// What went wrong while compiling mapping definitions.
#[derive(Debug, Error)]
pub enum CompileErrorKind {
    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("{0}")]
    Invalid(String),

    #[error("invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("included file isn't inside the base directory")]
    OutsideBaseDir,

    #[error("found a cyclic template application: {0}")]
    CyclicTemplate(String),

    #[error("commands [returns, forwards, redirects] can only be used one at a time")]
    AmbiguousCommand,
}

/// Structured compile error carrying the offending file and JSON path.
#[derive(Debug, Error)]
pub struct CompileError {
    pub file: Option<PathBuf>,
    pub path: Option<JsonPath>,
    #[source]
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub fn new(kind: impl Into<CompileErrorKind>) -> Self {
        Self {
            file: None,
            path: None,
            kind: kind.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(CompileErrorKind::Invalid(message.into()))
    }

    /// Attach a JSON path unless one is already known.
    ///
    /// Errors already attributed to a file keep their location, so failures
    /// raised inside an included file are not relocated to the includer.
    pub fn at(mut self, path: &JsonPath) -> Self {
        if self.path.is_none() && self.file.is_none() {
            self.path = Some(path.clone());
        }
        self
    }

    /// Attach the file being compiled unless one is already known.
    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        if self.file.is_none() {
            self.file = Some(file.into());
        }
        self
    }
}

macro_rules! compile_error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for CompileError {
                fn from(err: $source) -> Self {
                    Self::new(err)
                }
            }
        )*
    };
}

compile_error_from!(
    CompileErrorKind,
    std::io::Error,
    serde_json::Error,
    csv::Error,
    regex::Error,
    RenderError,
    ValueError,
    PathError,
);

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "cannot parse the value on json-path \"{}\"", path)?,
            None => write!(f, "cannot parse json data")?,
        }
        if let Some(file) = &self.file {
            write!(f, " in the file '{}'", file.display())?;
        }
        write!(f, ": {}", self.kind)
    }
}

/// Outbound or internal forwarding failures. Always answered with `502`.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid forward target '{0}'")]
    InvalidTarget(String),

    #[error("refusing to forward to the server's own address '{0}'")]
    SelfForward(String),

    #[error("forwarding exceeded {0} internal hops")]
    TooManyHops(usize),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upstream response exceeds {0} bytes")]
    BodyTooLarge(usize),
}

/// Failure while executing a matched policy.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("invalid response header '{0}'")]
    InvalidHeader(String),
}
