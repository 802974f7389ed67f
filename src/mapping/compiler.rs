//! Turns mapping documents into [`Mapping`] values.

use super::{
    is_remote_path, BodyMatcher, CmdType, Command, Forwards, Interval, Mapping, Matchers,
    MethodFilter, NameJsonPair, NameRegexPair, NameValuesPair, Policy, Returns, When,
};
use crate::directive::{self, Context, BODY_STAGES, WHEN_STAGES};
use crate::error::{CompileError, CompileErrorKind};
use crate::json::{JsonPath, Object, Segment, Value};
use axum::http::header::{HeaderName, HeaderValue, LOCATION};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

/// RFC 7230 token characters.
static METHOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[-!#$%&'*+._`|~\da-z]+$").expect("valid regex"));

static PATH_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}").expect("valid regex"));

/// Characters escaped in URI paths: everything but unreserved characters,
/// `/` and the sub-delimiters allowed in a path segment.
pub(crate) const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b',')
    .remove(b':')
    .remove(b';')
    .remove(b'=')
    .remove(b'@');

/// Compile a mappings document: an array of mappings, or an object
/// `{"@type":"mappings","mappings":[...]}`. Errors are attributed to `file`.
pub fn compile_mappings(
    doc: Value,
    ctx: &mut Context<'_>,
    file: &Path,
) -> Result<Vec<Mapping>, CompileError> {
    Compiler {
        ctx,
        path: JsonPath::root(),
    }
    .document(doc)
    .map_err(|e| e.in_file(file))
}

struct Compiler<'c, 'a> {
    ctx: &'c mut Context<'a>,
    path: JsonPath,
}

impl Compiler<'_, '_> {
    /// Run `f` one segment deeper; unlocated errors are pinned to that segment.
    fn nested<T>(
        &mut self,
        segment: Segment,
        f: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        self.path.push(segment);
        let result = f(self).map_err(|e| e.at(&self.path));
        self.path.pop();
        result
    }

    fn field<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        self.nested(Segment::key(name), f)
    }

    fn document(&mut self, doc: Value) -> Result<Vec<Mapping>, CompileError> {
        match doc {
            Value::Array(items) => self.mapping_list(items),
            Value::Object(object) => {
                self.field("@type", |_| match object.get_text("@type") {
                    Ok(t) if t == "mappings" => Ok(()),
                    _ => Err(CompileError::invalid(
                        "a mappings file must be an array or declare \"@type\": \"mappings\"",
                    )),
                })?;
                let items = object.value("mappings").clone().into_array();
                self.field("mappings", |c| c.mapping_list(items))
            }
            _ => Err(CompileError::invalid(
                "a mappings file must be an array or an object",
            )),
        }
    }

    fn mapping_list(&mut self, items: Vec<Value>) -> Result<Vec<Mapping>, CompileError> {
        items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| self.nested(Segment::Index(idx), |c| c.mapping(item)))
            .collect()
    }

    fn mapping(&mut self, item: Value) -> Result<Mapping, CompileError> {
        let object = item.to_object("")?;

        let raw_uri = self.field("uri", |_| {
            let uri = object.get_text("uri")?;
            encode_uri(&uri)
        })?;

        let method = if object.has("method") {
            self.field("method", |_| parse_method(&object.get_text("method")?))?
        } else {
            MethodFilter::Any
        };

        let policies = match object.value("policies") {
            Value::Null => vec![Policy::ok()],
            raw => {
                let items = raw.clone().into_array();
                self.field("policies", |c| {
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(idx, item)| {
                            c.nested(Segment::Index(idx), |c| c.policy(item, &raw_uri))
                        })
                        .collect::<Result<Vec<_>, _>>()
                })?
            }
        };

        let (uri, policies) = number_path_vars(&raw_uri, policies);
        Ok(Mapping {
            uri,
            method,
            policies,
        })
    }

    fn policy(&mut self, item: Value, mapping_uri: &str) -> Result<Policy, CompileError> {
        let object = item.to_object("")?;

        let when = match object.get("when") {
            Some(raw) => {
                let raw = raw.clone();
                Some(self.field("when", |c| c.when(raw))?)
            }
            None => None,
        };

        let declared: Vec<CmdType> = CmdType::ALL
            .into_iter()
            .filter(|cmd| object.has(cmd.as_str()))
            .collect();

        let command = match declared.as_slice() {
            [] => Command::Returns(Returns::new(StatusCode::OK)),
            [cmd] => {
                let raw = object.value(cmd.as_str()).clone();
                self.field(cmd.as_str(), |c| {
                    let raw = raw.to_object(cmd.as_str())?;
                    match cmd {
                        CmdType::Returns => c.returns(raw).map(Command::Returns),
                        CmdType::Redirects => c.redirects(raw).map(Command::Redirects),
                        CmdType::Forwards => c.forwards(raw, mapping_uri).map(Command::Forwards),
                    }
                })?
            }
            _ => return Err(CompileError::new(CompileErrorKind::AmbiguousCommand)),
        };

        Ok(Policy { when, command })
    }

    fn when(&mut self, raw: Value) -> Result<When, CompileError> {
        let processed = directive::apply(raw, WHEN_STAGES, self.ctx, &self.path)?;
        let object = processed.to_object("when")?;

        let mut when = When::default();
        if object.has("headers") {
            when.headers = self.field("headers", |_| {
                let mut matchers = divide_matchers(object.get_object("headers")?);
                for pair in &mut matchers.values {
                    pair.name.make_ascii_lowercase();
                }
                for pair in &mut matchers.regexps {
                    pair.name.make_ascii_lowercase();
                }
                for pair in &mut matchers.jsons {
                    pair.name.make_ascii_lowercase();
                }
                Ok(matchers)
            })?;
        }
        if object.has("params") {
            when.params = self.field("params", |_| Ok(divide_matchers(object.get_object("params")?)))?;
        }
        if object.has("pathVars") {
            when.path_vars = self.field("pathVars", |_| {
                let matchers = divide_matchers(object.get_object("pathVars")?);
                if !matchers.jsons.is_empty() {
                    return Err(CompileError::invalid("@json cannot be used on path variables"));
                }
                Ok(matchers)
            })?;
        }
        if let Some(body) = object.get("body") {
            when.body = Some(match body {
                Value::Regex(re) => BodyMatcher::Regex(re.clone()),
                Value::Matcher(m) => BodyMatcher::Json(m.clone()),
                Value::String(s) => BodyMatcher::Bytes(Bytes::from(s.clone())),
                other => BodyMatcher::Bytes(Bytes::from(other.to_bytes())),
            });
        }
        Ok(when)
    }

    fn returns(&mut self, object: &Object) -> Result<Returns, CompileError> {
        let mut returns = Returns::new(StatusCode::OK);

        if object.has("statusCode") {
            returns.status = self.field("statusCode", |_| {
                let code = object.get_number("statusCode")?;
                if code.fract() != 0.0 || !(100.0..=999.0).contains(&code) {
                    return Err(CompileError::invalid("statusCode must be an integer in 100..=999"));
                }
                StatusCode::from_u16(code as u16)
                    .map_err(|_| CompileError::invalid("invalid statusCode"))
            })?;
        }

        if object.has("headers") {
            returns.headers = self.field("headers", |_| {
                let raw = object.get_object("headers")?;
                let mut headers = Vec::with_capacity(raw.len());
                for (name, values) in raw {
                    if HeaderName::from_bytes(name.as_bytes()).is_err() {
                        return Err(CompileError::invalid(format!("invalid header name '{}'", name)));
                    }
                    let values = values_as_text(values);
                    if let Some(bad) = values.iter().find(|v| HeaderValue::from_str(v).is_err()) {
                        return Err(CompileError::invalid(format!(
                            "invalid value '{}' for header '{}'",
                            bad, name
                        )));
                    }
                    headers.push(NameValuesPair {
                        name: name.clone(),
                        values,
                    });
                }
                Ok(headers)
            })?;
        }

        if let Some(raw) = object.get("body") {
            let raw = raw.clone();
            returns.body = self.field("body", |c| {
                let body = directive::apply(raw, BODY_STAGES, c.ctx, &c.path)?;
                match body {
                    Value::Null => Ok(Bytes::new()),
                    Value::String(s) => Ok(Bytes::from(s)),
                    v @ (Value::Object(_) | Value::Array(_)) => Ok(Bytes::from(v.to_bytes())),
                    _ => Err(CompileError::invalid(
                        "body must be a string, an object, an array or an @file directive",
                    )),
                }
            })?;
        }

        returns.latency = self.latency(object)?;
        Ok(returns)
    }

    fn redirects(&mut self, object: &Object) -> Result<Returns, CompileError> {
        let location = self.field("path", |_| {
            let path = object.get_text("path")?;
            if path.is_empty() || HeaderValue::from_str(&path).is_err() {
                return Err(CompileError::invalid("redirect path must be a non-empty header value"));
            }
            Ok(path)
        })?;

        let mut returns = Returns::new(StatusCode::FOUND);
        returns.headers.push(NameValuesPair {
            name: LOCATION.as_str().to_string(),
            values: vec![location],
        });
        returns.latency = self.latency(object)?;
        Ok(returns)
    }

    fn forwards(&mut self, object: &Object, mapping_uri: &str) -> Result<Forwards, CompileError> {
        let path = self.field("path", |_| {
            let path = object.get_text("path")?;
            if path.is_empty() {
                return Err(CompileError::invalid("forward path cannot be empty"));
            }
            if is_remote_path(&path) {
                url::Url::parse(&path)
                    .map_err(|e| CompileError::invalid(format!("invalid forward url: {}", e)))?;
            } else if is_static_self_forward(&path, mapping_uri) {
                return Err(CompileError::invalid(format!(
                    "forward path '{}' points back to its own mapping",
                    path
                )));
            }
            Ok(path)
        })?;

        Ok(Forwards {
            path,
            latency: self.latency(object)?,
        })
    }

    fn latency(&mut self, object: &Object) -> Result<Option<Interval>, CompileError> {
        match object.get("latency") {
            None => Ok(None),
            Some(raw) => self.field("latency", |_| parse_latency(raw).map(Some)),
        }
    }
}

fn parse_method(raw: &str) -> Result<MethodFilter, CompileError> {
    if !METHOD.is_match(raw) {
        return Err(CompileError::invalid(format!("invalid http method '{}'", raw)));
    }
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
        .map(MethodFilter::Only)
        .map_err(|_| CompileError::invalid(format!("invalid http method '{}'", raw)))
}

fn parse_latency(raw: &Value) -> Result<Interval, CompileError> {
    let millis = |v: &Value| match v {
        Value::Number(n) if *n >= 0.0 => Some(*n as u64),
        _ => None,
    };
    let interval = match raw {
        Value::Number(_) => millis(raw).map(Interval::fixed),
        Value::Array(items) => match items.as_slice() {
            [single] => millis(single).map(Interval::fixed),
            [min, max] => match (millis(min), millis(max)) {
                (Some(min), Some(max)) => Interval::new(min, max),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    };
    interval.ok_or_else(|| {
        CompileError::invalid("latency must be a number or an interval [min, max] with min <= max")
    })
}

/// Percent-encode literal path text, keeping `{name}` segments verbatim.
pub(crate) fn encode_uri(uri: &str) -> Result<String, CompileError> {
    if !uri.starts_with('/') {
        return Err(CompileError::invalid("uri must start with '/'"));
    }

    let mut encoded = String::with_capacity(uri.len());
    let mut last = 0;
    for var in PATH_VAR.find_iter(uri) {
        encoded.extend(utf8_percent_encode(&uri[last..var.start()], PATH));
        encoded.push_str(var.as_str());
        last = var.end();
    }
    encoded.extend(utf8_percent_encode(&uri[last..], PATH));
    Ok(encoded)
}

fn is_static_self_forward(path: &str, mapping_uri: &str) -> bool {
    if !path.starts_with('/') || PATH_VAR.is_match(mapping_uri) {
        return false;
    }
    let target = path.split(['?', '#']).next().unwrap_or(path);
    encode_uri(target).is_ok_and(|target| target == mapping_uri)
}

/// Replace `{name}` variables with positional `{0}`, `{1}`, ... and rename
/// the policies' path-variable matchers to match.
fn number_path_vars(uri: &str, mut policies: Vec<Policy>) -> (String, Vec<Policy>) {
    let mut indices: HashMap<String, usize> = HashMap::new();
    let numbered = PATH_VAR
        .replace_all(uri, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            let name = &token[1..token.len() - 1];
            let next = indices.len();
            let idx = *indices.entry(name.to_string()).or_insert(next);
            format!("{{{}}}", idx)
        })
        .into_owned();

    let rename = |name: &mut String| {
        if let Some(idx) = indices.get(name.as_str()) {
            *name = idx.to_string();
        }
    };
    let order = |name: &str| name.parse::<usize>().unwrap_or(0);

    for when in policies.iter_mut().filter_map(|p| p.when.as_mut()) {
        let vars = &mut when.path_vars;
        vars.values.iter_mut().for_each(|p| rename(&mut p.name));
        vars.regexps.iter_mut().for_each(|p| rename(&mut p.name));
        vars.values.sort_by_key(|p| order(&p.name));
        vars.regexps.sort_by_key(|p| order(&p.name));
    }
    (numbered, policies)
}

/// Split a name→value(s) object into exact, regex and JSON matchers.
///
/// Only the first regex and first JSON matcher per name take effect.
fn divide_matchers(object: &Object) -> Matchers {
    let mut matchers = Matchers::default();
    for (name, raw) in object {
        let mut plain = Vec::new();
        let mut has_regex = false;
        let mut has_json = false;
        for value in raw.clone().into_array() {
            match value {
                Value::Regex(regex) if !has_regex => {
                    has_regex = true;
                    matchers.regexps.push(NameRegexPair {
                        name: name.clone(),
                        regex,
                    });
                }
                Value::Matcher(json) if !has_json => {
                    has_json = true;
                    matchers.jsons.push(NameJsonPair {
                        name: name.clone(),
                        json,
                    });
                }
                Value::Regex(_) | Value::Matcher(_) => {}
                other => plain.push(other),
            }
        }
        if !plain.is_empty() {
            matchers.values.push(NameValuesPair {
                name: name.clone(),
                values: values_as_text(&Value::Array(plain)),
            });
        }
    }
    matchers
}

/// Each element's text; `null` becomes the empty string.
fn values_as_text(raw: &Value) -> Vec<String> {
    raw.clone()
        .into_array()
        .iter()
        .map(|v| match v {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn compile(source: &MemorySource, doc: &str) -> Result<Vec<Mapping>, CompileError> {
        let mut ctx = Context::new(source, "/base");
        let doc = Value::parse(doc.as_bytes()).unwrap();
        compile_mappings(doc, &mut ctx, Path::new("mappings.json"))
    }

    fn returns(policy: &Policy) -> &Returns {
        match &policy.command {
            Command::Returns(r) | Command::Redirects(r) => r,
            Command::Forwards(_) => panic!("expected returns"),
        }
    }

    #[test]
    fn test_minimal_mapping() {
        let src = MemorySource::new();
        let mappings = compile(&src, r#"[{"uri":"/hello"}]"#).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].uri, "/hello");
        assert_eq!(mappings[0].method, MethodFilter::Any);
        assert_eq!(mappings[0].policies.len(), 1);
        assert_eq!(returns(&mappings[0].policies[0]).status, StatusCode::OK);
    }

    #[test]
    fn test_typed_mappings_document() {
        let src = MemorySource::new();
        let mappings = compile(
            &src,
            r#"{"@type":"mappings","mappings":{"uri":"/one","method":"post"}}"#,
        )
        .unwrap();
        assert_eq!(mappings[0].method, MethodFilter::Only(Method::POST));

        let err = compile(&src, r#"{"@type":"main","mappings":[]}"#).unwrap_err();
        assert_eq!(err.path.unwrap().to_string(), "$.@type");
    }

    #[test]
    fn test_uri_encoding_and_path_vars() {
        let src = MemorySource::new();
        let mappings = compile(
            &src,
            r#"[{"uri":"/a b/{id}/x/{name}/{id}","policies":[{"when":{"pathVars":{"name":"n","id":{"@regexp":"^\\d+$"}}}}]}]"#,
        )
        .unwrap();
        let mapping = &mappings[0];
        assert_eq!(mapping.uri, "/a%20b/{0}/x/{1}/{0}");

        let when = mapping.policies[0].when.as_ref().unwrap();
        assert_eq!(when.path_vars.values[0].name, "1");
        assert_eq!(when.path_vars.regexps[0].name, "0");
    }

    #[test]
    fn test_equivalent_path_var_names() {
        let src = MemorySource::new();
        let a = compile(&src, r#"[{"uri":"/{a}/{b}"}]"#).unwrap();
        let b = compile(&src, r#"[{"uri":"/{x}/{y}"}]"#).unwrap();
        assert_eq!(a[0].uri, "/{0}/{1}");
        assert_eq!(a[0].uri, b[0].uri);
    }

    #[test]
    fn test_uri_must_start_with_slash() {
        let src = MemorySource::new();
        let err = compile(&src, r#"[{"uri":"hello"}]"#).unwrap_err();
        assert_eq!(err.path.unwrap().to_string(), "$[0].uri");
        assert_eq!(err.file.unwrap(), Path::new("mappings.json"));
    }

    #[test]
    fn test_invalid_method() {
        let src = MemorySource::new();
        let err = compile(&src, r#"[{"uri":"/","method":"GE T"}]"#).unwrap_err();
        assert_eq!(err.path.unwrap().to_string(), "$[0].method");
    }

    #[test]
    fn test_ambiguous_commands() {
        let src = MemorySource::new();
        let err = compile(
            &src,
            r#"[{"uri":"/","policies":[{"returns":{},"forwards":{"path":"/x"}}]}]"#,
        )
        .unwrap_err();
        assert!(matches!(err.kind, CompileErrorKind::AmbiguousCommand));
        assert_eq!(err.path.as_ref().unwrap().to_string(), "$[0].policies[0]");
        assert!(err.to_string().contains("[returns, forwards, redirects]"));
    }

    #[test]
    fn test_returns_fields() {
        let src = MemorySource::new().with_file("/base/page.html", "<p>hi</p>");
        let mappings = compile(
            &src,
            r#"[{"uri":"/r","policies":[
                {"when":{"params":{"v":"1"}},"returns":{"statusCode":201,"headers":{"X-A":["1","2"],"X-B":3},"body":{"ok":true},"latency":[10,20]}},
                {"when":{"params":{"v":"2"}},"returns":{"body":{"@file":"page.html"},"latency":5}},
                {"returns":{"body":"plain"}}
            ]}]"#,
        )
        .unwrap();
        let policies = &mappings[0].policies;

        let first = returns(&policies[0]);
        assert_eq!(first.status, StatusCode::CREATED);
        assert_eq!(first.headers[0].values, vec!["1", "2"]);
        assert_eq!(first.headers[1].values, vec!["3"]);
        assert_eq!(first.body, Bytes::from_static(br#"{"ok":true}"#));
        assert_eq!(first.latency, Interval::new(10, 20));

        let second = returns(&policies[1]);
        assert_eq!(second.body, Bytes::from_static(b"<p>hi</p>"));
        assert_eq!(second.latency, Some(Interval::fixed(5)));

        assert_eq!(returns(&policies[2]).body, Bytes::from_static(b"plain"));
    }

    #[test]
    fn test_latency_validation() {
        let src = MemorySource::new();
        for bad in [r#"[30,10]"#, r#""fast""#, r#"[1,2,3]"#, r#"-1"#] {
            let doc = format!(
                r#"[{{"uri":"/","policies":[{{"returns":{{"latency":{}}}}}]}}]"#,
                bad
            );
            let err = compile(&src, &doc).unwrap_err();
            assert_eq!(
                err.path.unwrap().to_string(),
                "$[0].policies[0].returns.latency",
                "latency {}",
                bad
            );
        }
    }

    #[test]
    fn test_redirects() {
        let src = MemorySource::new();
        let mappings = compile(
            &src,
            r#"[{"uri":"/old","policies":[{"redirects":{"path":"/new"}}]}]"#,
        )
        .unwrap();
        let policy = &mappings[0].policies[0];
        assert_eq!(policy.cmd_type(), CmdType::Redirects);
        let r = returns(policy);
        assert_eq!(r.status, StatusCode::FOUND);
        assert_eq!(r.headers[0].name, "location");
        assert_eq!(r.headers[0].values, vec!["/new"]);

        assert!(compile(&src, r#"[{"uri":"/old","policies":[{"redirects":{"path":""}}]}]"#).is_err());
    }

    #[test]
    fn test_forwards() {
        let src = MemorySource::new();
        let mappings = compile(
            &src,
            r#"[{"uri":"/f","policies":[
                {"when":{"params":{"r":"1"}},"forwards":{"path":"https://example.com/api"}},
                {"forwards":{"path":"/other","latency":1}}
            ]}]"#,
        )
        .unwrap();
        let Command::Forwards(remote) = &mappings[0].policies[0].command else {
            panic!("expected forwards");
        };
        assert!(remote.is_remote());
        let Command::Forwards(local) = &mappings[0].policies[1].command else {
            panic!("expected forwards");
        };
        assert!(!local.is_remote());
        assert_eq!(local.latency, Some(Interval::fixed(1)));
    }

    #[test]
    fn test_static_self_forward_rejected() {
        let src = MemorySource::new();
        let err = compile(
            &src,
            r#"[{"uri":"/loop","policies":[{"forwards":{"path":"/loop?x=1"}}]}]"#,
        )
        .unwrap_err();
        assert_eq!(
            err.path.unwrap().to_string(),
            "$[0].policies[0].forwards.path"
        );
    }

    #[test]
    fn test_when_matchers() {
        let src = MemorySource::new();
        let mappings = compile(
            &src,
            r#"[{"uri":"/w","policies":[{"when":{
                "headers":{"X-Token":["a",{"@regexp":"^b"},{"@regexp":"^ignored"}]},
                "params":{"q":[1,null],"f":{"@json":{"a":1}}},
                "body":{"@json":{"k":"v"}}
            }}]}]"#,
        )
        .unwrap();
        let when = mappings[0].policies[0].when.as_ref().unwrap();

        assert_eq!(when.headers.values[0].name, "x-token");
        assert_eq!(when.headers.values[0].values, vec!["a"]);
        assert_eq!(when.headers.regexps.len(), 1);
        assert_eq!(when.headers.regexps[0].regex.as_str(), "^b");

        assert_eq!(when.params.values[0].name, "q");
        assert_eq!(when.params.values[0].values, vec!["1", ""]);
        assert_eq!(when.params.jsons[0].name, "f");

        assert!(matches!(when.body, Some(BodyMatcher::Json(_))));
    }

    #[test]
    fn test_first_json_matcher_per_name_wins() {
        let src = MemorySource::new();
        let mappings = compile(
            &src,
            r#"[{"uri":"/w","policies":[{"when":{
                "params":{"f":[{"@json":{"a":1}},{"@json":{"b":2}}]}
            }}]}]"#,
        )
        .unwrap();
        let when = mappings[0].policies[0].when.as_ref().unwrap();

        assert_eq!(when.params.jsons.len(), 1);
        let first = &when.params.jsons[0].json;
        assert!(first.matches_bytes(br#"{"a":1}"#));
        assert!(!first.matches_bytes(br#"{"b":2}"#));
        assert!(when.params.values.is_empty());
    }

    #[test]
    fn test_path_var_json_rejected() {
        let src = MemorySource::new();
        let err = compile(
            &src,
            r#"[{"uri":"/{id}","policies":[{"when":{"pathVars":{"id":{"@json":1}}}}]}]"#,
        )
        .unwrap_err();
        assert_eq!(
            err.path.unwrap().to_string(),
            "$[0].policies[0].when.pathVars"
        );
    }
}
