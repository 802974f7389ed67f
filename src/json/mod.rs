//! Extended JSON value model.
//!
//! Raw JSON text only ever produces the plain variants. The two extended
//! variants, [`Value::Regex`] and [`Value::Matcher`], are created by the
//! directive pipeline and never survive into a rendered response body: they
//! marshal to `null`.

mod matcher;
mod path;

pub use matcher::JsonMatcher;
pub use path::{JsonPath, Segment};

use crate::error::{PathError, ValueError};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A JSON value, extended with compiled patterns.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    /// Compiled `@regexp` directive
    Regex(Regex),
    /// `@json` directive, a partial-match pattern
    Matcher(JsonMatcher),
}

impl Value {
    /// Parse raw JSON bytes. Never yields extended variants.
    pub fn parse(bytes: &[u8]) -> Result<Value, serde_json::Error> {
        let raw: serde_json::Value = serde_json::from_slice(bytes)?;
        Ok(Value::from(raw))
    }

    /// Name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Regex(_) => "regexp",
            Value::Matcher(_) => "json-matcher",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Textual form of any non-null value.
    pub fn to_text(&self, name: &str) -> Result<String, ValueError> {
        match self {
            Value::Null => Err(ValueError::new(name)),
            Value::String(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }

    /// Numbers, or strings holding a number.
    pub fn to_number(&self, name: &str) -> Result<f64, ValueError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::String(s) => s.trim().parse().map_err(|_| ValueError::new(name)),
            _ => Err(ValueError::new(name)),
        }
    }

    pub fn to_boolean(&self, name: &str) -> Result<bool, ValueError> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(ValueError::new(name)),
        }
    }

    pub fn to_object(&self, name: &str) -> Result<&Object, ValueError> {
        self.as_object().ok_or_else(|| ValueError::new(name))
    }

    pub fn to_array(&self, name: &str) -> Result<&[Value], ValueError> {
        self.as_array().ok_or_else(|| ValueError::new(name))
    }

    /// Wraps a non-array value into a one-element array.
    pub fn into_array(self) -> Vec<Value> {
        match self {
            Value::Array(a) => a,
            other => vec![other],
        }
    }

    /// Look up a nested value.
    pub fn get_path(&self, path: &JsonPath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (Segment::Key(k), Value::Object(o)) => o.get(k)?,
                (Segment::Index(i), Value::Array(a)) => a.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Plain JSON, with extended variants replaced by `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Regex(_) | Value::Matcher(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(a) => serde_json::Value::Array(a.iter().map(Value::to_json).collect()),
            Value::Object(o) => serde_json::Value::Object(
                o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Compact JSON encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Canonical textual form of a number: integral values have no fraction.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    /// Canonical textual form: strings are unquoted, containers are compact JSON.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
            Value::Regex(r) => write!(f, "{}", r.as_str()),
            Value::Matcher(m) => write!(f, "{}", m.pattern()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Regex(a), Value::Regex(b)) => a.as_str() == b.as_str(),
            (Value::Matcher(a), Value::Matcher(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(o)
    }
}

/// A JSON object; member names are unique and iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Object(BTreeMap<String, Value>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Member value, `Null` when absent.
    pub fn value(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.0.get(name).unwrap_or(&NULL)
    }

    pub fn get_text(&self, name: &str) -> Result<String, ValueError> {
        self.value(name).to_text(name)
    }

    pub fn get_number(&self, name: &str) -> Result<f64, ValueError> {
        self.value(name).to_number(name)
    }

    pub fn get_object(&self, name: &str) -> Result<&Object, ValueError> {
        self.value(name).to_object(name)
    }

    pub fn get_array(&self, name: &str) -> Result<&[Value], ValueError> {
        self.value(name).to_array(name)
    }

    /// Returns a copy of this object with `value` stored at `path`.
    ///
    /// Missing intermediate objects and arrays are created on demand; arrays
    /// are padded with `null`. The receiver is left untouched.
    pub fn set_by_path(&self, path: &JsonPath, value: Value) -> Result<Object, PathError> {
        let root = Value::Object(self.clone());
        match set_in(root, path.segments(), value, path)? {
            Value::Object(o) => Ok(o),
            _ => Err(PathError::Conflict {
                path: path.to_string(),
                reason: "the root must remain an object",
            }),
        }
    }

    pub fn get_by_path(&self, path: &JsonPath) -> Option<&Value> {
        let (first, rest) = path.segments().split_first()?;
        let Segment::Key(key) = first else {
            return None;
        };
        self.get(key)?.get_path(&JsonPath::from_segments(rest.to_vec()))
    }
}

fn set_in(
    current: Value,
    segments: &[Segment],
    value: Value,
    full: &JsonPath,
) -> Result<Value, PathError> {
    let Some((segment, rest)) = segments.split_first() else {
        return Ok(value);
    };

    match segment {
        Segment::Key(key) => {
            let mut object = match current {
                Value::Object(o) => o,
                Value::Null => Object::new(),
                _ => {
                    return Err(PathError::Conflict {
                        path: full.to_string(),
                        reason: "a name segment requires an object",
                    })
                }
            };
            let child = object.remove(key).unwrap_or(Value::Null);
            object.insert(key.clone(), set_in(child, rest, value, full)?);
            Ok(Value::Object(object))
        }
        Segment::Index(idx) => {
            let mut array = match current {
                Value::Array(a) => a,
                Value::Null => Vec::new(),
                _ => {
                    return Err(PathError::Conflict {
                        path: full.to_string(),
                        reason: "an index segment requires an array",
                    })
                }
            };
            if array.len() <= *idx {
                array.resize(idx + 1, Value::Null);
            }
            let child = std::mem::replace(&mut array[*idx], Value::Null);
            array[*idx] = set_in(child, rest, value, full)?;
            Ok(Value::Array(array))
        }
    }
}

impl Deref for Object {
    type Target = BTreeMap<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Object {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl FromIterator<(String, Value)> for Object {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Object(iter.into_iter().collect())
    }
}

impl IntoIterator for Object {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Object {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
