//! Partial JSON matching.

use super::{format_number, Value};

/// A JSON value used as a partial-match pattern.
///
/// Every key or index present in the pattern must match its counterpart in
/// the candidate; extra candidate members are ignored. Scalars are compared
/// loosely: a number pattern accepts the same number written as a string, a
/// string pattern accepts the textual form of a number or boolean, and a
/// regex pattern is applied to the textual form of any scalar. `null` inside
/// a pattern array matches anything at that position.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonMatcher(Box<Value>);

impl JsonMatcher {
    pub fn new(pattern: Value) -> Self {
        Self(Box::new(pattern))
    }

    pub fn pattern(&self) -> &Value {
        &self.0
    }

    pub fn into_pattern(self) -> Value {
        *self.0
    }

    pub fn matches(&self, candidate: &Value) -> bool {
        matches_value(&self.0, candidate)
    }

    /// Parse `bytes` as JSON and match; unparsable input never matches.
    pub fn matches_bytes(&self, bytes: &[u8]) -> bool {
        Value::parse(bytes)
            .map(|candidate| self.matches(&candidate))
            .unwrap_or(false)
    }
}

fn matches_value(pattern: &Value, candidate: &Value) -> bool {
    match pattern {
        Value::Null => candidate.is_null(),
        Value::Object(expected) => match candidate {
            Value::Object(actual) => expected
                .iter()
                .all(|(key, p)| matches_value(p, actual.value(key))),
            _ => false,
        },
        Value::Array(expected) => match candidate {
            Value::Array(actual) => expected.iter().enumerate().all(|(idx, p)| {
                if p.is_null() {
                    return true;
                }
                actual.get(idx).is_some_and(|c| matches_value(p, c))
            }),
            _ => false,
        },
        Value::Number(n) => match candidate {
            Value::Number(c) => (n - c).abs() < 1e-9,
            Value::String(s) => format_number(*n) == *s,
            _ => false,
        },
        Value::String(s) => match candidate {
            Value::String(c) => s == c,
            Value::Number(c) => *s == format_number(*c),
            Value::Bool(c) => *s == c.to_string(),
            _ => false,
        },
        Value::Bool(b) => match candidate {
            Value::Bool(c) => b == c,
            Value::String(s) => b.to_string() == *s,
            _ => false,
        },
        Value::Regex(re) => match candidate {
            Value::String(s) => re.is_match(s),
            Value::Number(n) => re.is_match(&format_number(*n)),
            Value::Bool(b) => re.is_match(&b.to_string()),
            Value::Regex(other) => re.as_str() == other.as_str(),
            _ => false,
        },
        Value::Matcher(inner) => matches_value(inner.pattern(), candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn json(text: &str) -> Value {
        Value::parse(text.as_bytes()).unwrap()
    }

    fn matcher(text: &str) -> JsonMatcher {
        JsonMatcher::new(json(text))
    }

    #[test]
    fn test_partial_object_match() {
        assert!(matcher(r#"{"a":1}"#).matches(&json(r#"{"a":1,"b":2}"#)));
        assert!(!matcher(r#"{"a":1,"b":2}"#).matches(&json(r#"{"a":1}"#)));
        assert!(matcher(r#"{"a":{"b":[1]}}"#).matches(&json(r#"{"a":{"b":[1,2],"c":0}}"#)));
        assert!(!matcher(r#"{"a":1}"#).matches(&json("[1]")));
    }

    #[test]
    fn test_array_null_is_wildcard() {
        let m = matcher("[null, 2]");
        assert!(m.matches(&json("[\"anything\", 2, 3]")));
        assert!(!m.matches(&json("[1, 3]")));
        assert!(!m.matches(&json("[1]")));
    }

    #[test]
    fn test_scalar_coercion() {
        assert!(matcher("12").matches(&json("\"12\"")));
        assert!(matcher("\"12\"").matches(&json("12")));
        assert!(matcher("\"true\"").matches(&json("true")));
        assert!(matcher("true").matches(&json("\"true\"")));
        assert!(!matcher("true").matches(&json("1")));
        assert!(!matcher("null").matches(&json("0")));
    }

    #[test]
    fn test_regex_inside_pattern() {
        let mut pattern = crate::json::Object::new();
        pattern.insert("id".into(), Value::Regex(Regex::new(r"^\d+$").unwrap()));
        let m = JsonMatcher::new(Value::Object(pattern));

        assert!(m.matches(&json(r#"{"id":"42"}"#)));
        assert!(m.matches(&json(r#"{"id":42}"#)));
        assert!(!m.matches(&json(r#"{"id":"x42"}"#)));
        assert!(!m.matches(&json(r#"{}"#)));
    }

    #[test]
    fn test_matches_bytes() {
        let m = matcher(r#"{"user":"alice"}"#);
        assert!(m.matches_bytes(br#"{"user":"alice","age":3}"#));
        assert!(!m.matches_bytes(b"not json"));
    }
}
