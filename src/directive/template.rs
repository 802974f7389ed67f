//! Template rendering.
//!
//! A template is a JSON subtree whose strings may contain `@{name}` or
//! `@{name:%fmt}` placeholders. `@@` is a literal `@`. A string consisting of
//! exactly one unformatted placeholder takes the variable's value as-is,
//! keeping its JSON type; every other string renders to text.

use super::vars::Vars;
use crate::error::{CompileError, RenderError, RenderFailure};
use crate::json::{format_number, JsonPath, Object, Segment, Value};
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

static FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^%([-+ 0])?(\d+)?(?:\.(\d+))?([tdeEfgsqxX])$").expect("valid regex")
});

/// A parsed template file.
#[derive(Debug, Clone)]
pub struct Template {
    content: Value,
    defaults: Vars,
    file: Option<PathBuf>,
}

impl Template {
    pub fn new(content: Value, defaults: Vars) -> Self {
        Self {
            content,
            defaults,
            file: None,
        }
    }

    /// Build a template from a processed `{"@type":"template",...}` document.
    pub fn from_document(doc: &Value, file: PathBuf) -> Result<Self, CompileError> {
        let object = doc
            .as_object()
            .ok_or_else(|| CompileError::invalid("a template file must be a json object"))?;

        let type_path = JsonPath::root().child(Segment::key("@type"));
        if object.get_text("@type").ok().as_deref() != Some("template") {
            return Err(
                CompileError::invalid("a template file must declare \"@type\": \"template\"")
                    .at(&type_path),
            );
        }

        let content = object.value("template");
        if !matches!(content, Value::Object(_) | Value::Array(_) | Value::String(_)) {
            return Err(CompileError::invalid("template content must be an object, array or string")
                .at(&JsonPath::root().child(Segment::key("template"))));
        }

        let defaults = match object.get("vars") {
            Some(v) => Vars::from_object(v.to_object("vars")?)
                .map_err(|e| e.at(&JsonPath::root().child(Segment::key("vars"))))?,
            None => Vars::default(),
        };

        Ok(Self {
            content: content.clone(),
            defaults,
            file: Some(file),
        })
    }

    pub fn file(&self) -> Option<&PathBuf> {
        self.file.as_ref()
    }

    /// Render once per record, in record order.
    pub fn render_all(&self, records: &[Vars]) -> Result<Vec<Value>, RenderError> {
        records
            .iter()
            .map(|vars| self.render(&self.content, vars, &mut JsonPath::root()))
            .collect()
    }

    fn render(&self, value: &Value, vars: &Vars, path: &mut JsonPath) -> Result<Value, RenderError> {
        match value {
            Value::Object(object) => {
                let mut rendered = Object::new();
                for (name, member) in object {
                    path.push(Segment::key(name.as_str()));
                    let key = self.render_text(name, vars, path)?;
                    let member = self.render(member, vars, path)?;
                    path.pop();
                    rendered.insert(key, member);
                }
                Ok(Value::Object(rendered))
            }
            Value::Array(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    path.push(Segment::Index(idx));
                    rendered.push(self.render(item, vars, path)?);
                    path.pop();
                }
                Ok(Value::Array(rendered))
            }
            Value::String(s) => self.render_string(s, vars, path),
            other => Ok(other.clone()),
        }
    }

    fn render_text(&self, s: &str, vars: &Vars, path: &JsonPath) -> Result<String, RenderError> {
        Ok(match self.render_string(s, vars, path)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    fn render_string(&self, s: &str, vars: &Vars, path: &JsonPath) -> Result<Value, RenderError> {
        let fail = |reason: RenderFailure| RenderError {
            file: self.file.clone(),
            path: path.clone(),
            reason,
        };

        let pieces = parse_pieces(s).map_err(fail)?;
        if let [Piece::Var { name, format: None }] = pieces.as_slice() {
            return self
                .lookup(vars, name)
                .cloned()
                .ok_or_else(|| fail(RenderFailure::Undefined(name.clone())));
        }

        let mut out = String::with_capacity(s.len());
        for piece in &pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Var { name, format } => {
                    let value = self
                        .lookup(vars, name)
                        .ok_or_else(|| fail(RenderFailure::Undefined(name.clone())))?;
                    let text = format_var(name, value, format.as_deref()).map_err(fail)?;
                    out.push_str(&text);
                }
            }
        }
        Ok(Value::String(out))
    }

    fn lookup<'a>(&'a self, vars: &'a Vars, name: &str) -> Option<&'a Value> {
        vars.get(name).or_else(|| self.defaults.get(name))
    }
}

#[derive(Debug, PartialEq)]
enum Piece {
    Text(String),
    Var { name: String, format: Option<String> },
}

fn parse_pieces(s: &str) -> Result<Vec<Piece>, RenderFailure> {
    let mut pieces = Vec::new();
    let mut text = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '@' {
            text.push(c);
            continue;
        }
        match chars.next() {
            None => return Err(RenderFailure::Incomplete),
            Some('@') => text.push('@'),
            Some('{') => {
                let mut body = String::new();
                loop {
                    match chars.next() {
                        None => return Err(RenderFailure::Incomplete),
                        Some('}') => break,
                        Some(c) => body.push(c),
                    }
                }
                let (name, format) = match body.split_once(':') {
                    Some((name, "")) => (name, None),
                    Some((name, format)) => (name, Some(format.to_string())),
                    None => (body.as_str(), None),
                };
                if name.is_empty() {
                    return Err(RenderFailure::EmptyName);
                }
                if !text.is_empty() {
                    pieces.push(Piece::Text(std::mem::take(&mut text)));
                }
                pieces.push(Piece::Var {
                    name: name.to_string(),
                    format,
                });
            }
            Some(other) => {
                text.push('@');
                text.push(other);
            }
        }
    }

    if !text.is_empty() {
        pieces.push(Piece::Text(text));
    }
    Ok(pieces)
}

/// Parsed `%[flag][width][.precision]verb`.
struct FormatSpec {
    flag: Option<char>,
    width: usize,
    precision: Option<usize>,
    verb: char,
}

impl FormatSpec {
    fn parse(format: &str) -> Option<FormatSpec> {
        let caps = FORMAT.captures(format)?;
        Some(FormatSpec {
            flag: caps.get(1).and_then(|m| m.as_str().chars().next()),
            width: match caps.get(2) {
                Some(m) => m.as_str().parse().ok()?,
                None => 0,
            },
            precision: match caps.get(3) {
                Some(m) => Some(m.as_str().parse().ok()?),
                None => None,
            },
            verb: caps.get(4)?.as_str().chars().next()?,
        })
    }

    fn pad(&self, body: String, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        match self.flag {
            Some('-') => format!("{}{}", body, " ".repeat(fill)),
            Some('0') if numeric => {
                let (sign, digits) = match body.chars().next() {
                    Some(c @ ('-' | '+' | ' ')) => (c.to_string(), &body[1..]),
                    _ => (String::new(), body.as_str()),
                };
                format!("{}{}{}", sign, "0".repeat(fill), digits)
            }
            _ => format!("{}{}", " ".repeat(fill), body),
        }
    }

    fn sign(&self, negative: bool) -> &'static str {
        match (negative, self.flag) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }
}

fn format_var(name: &str, value: &Value, format: Option<&str>) -> Result<String, RenderFailure> {
    let Some(format) = format else {
        return match value {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s.clone()),
            Value::Number(_) | Value::Bool(_) => Ok(value.to_string()),
            _ => Err(RenderFailure::NotText(name.to_string())),
        };
    };
    let bad = || RenderFailure::BadFormat(format.to_string());
    let spec = FormatSpec::parse(format).ok_or_else(bad)?;

    match value {
        Value::Null => format_text(&spec, "").ok_or_else(bad),
        Value::String(s) => format_text(&spec, s).ok_or_else(bad),
        Value::Bool(b) => match spec.verb {
            't' | 's' => Ok(spec.pad(b.to_string(), false)),
            'q' => Ok(spec.pad(quote(&b.to_string()), false)),
            _ => Err(bad()),
        },
        Value::Number(n) => format_float(&spec, *n).ok_or_else(bad),
        _ => Err(RenderFailure::NotText(name.to_string())),
    }
}

fn format_text(spec: &FormatSpec, s: &str) -> Option<String> {
    let truncated: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    let body = match spec.verb {
        's' => truncated,
        'q' => quote(&truncated),
        'x' => truncated.bytes().map(|b| format!("{:02x}", b)).collect(),
        'X' => truncated.bytes().map(|b| format!("{:02X}", b)).collect(),
        _ => return None,
    };
    Some(spec.pad(body, false))
}

fn format_float(spec: &FormatSpec, n: f64) -> Option<String> {
    let sign = spec.sign(n.is_sign_negative() && n != 0.0);
    let abs = n.abs();
    let body = match spec.verb {
        'd' => format!("{}", abs.trunc() as i128),
        'x' => format!("{:x}", abs.trunc() as i128),
        'X' => format!("{:X}", abs.trunc() as i128),
        'f' => format!("{:.*}", spec.precision.unwrap_or(6), abs),
        'e' => exponent(abs, spec.precision.unwrap_or(6), false),
        'E' => exponent(abs, spec.precision.unwrap_or(6), true),
        'g' => general(abs, spec.precision),
        's' => format_number(abs),
        'q' => return Some(spec.pad(quote(&format_number(n)), false)),
        _ => return None,
    };
    Some(spec.pad(format!("{}{}", sign, body), true))
}

/// `1.500000e+03` style.
fn exponent(abs: f64, precision: usize, upper: bool) -> String {
    let rendered = format!("{:.*e}", precision, abs);
    let (mantissa, exp) = rendered.split_once('e').unwrap_or((rendered.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

/// Shortest of fixed and exponent notation.
fn general(abs: f64, precision: Option<usize>) -> String {
    let Some(p) = precision else {
        return if abs != 0.0 && !(1e-4..1e21).contains(&abs) {
            trim_exponent(&exponent(abs, 16, false))
        } else {
            format!("{}", abs)
        };
    };
    let p = p.max(1);
    if abs == 0.0 {
        return "0".to_string();
    }
    let exp = abs.log10().floor() as i32;
    if exp < -4 || exp >= p as i32 {
        trim_exponent(&exponent(abs, p - 1, false))
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        trim_zeros(format!("{:.*}", decimals, abs))
    }
}

fn trim_zeros(s: String) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

fn trim_exponent(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => format!("{}e{}", trim_zeros(mantissa.to_string()), exp),
        None => s.to_string(),
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::vars::parse_records;

    fn template(json: &str) -> Template {
        Template::new(Value::parse(json.as_bytes()).unwrap(), Vars::default())
    }

    fn records(json: &str) -> Vec<Vars> {
        parse_records(&Value::parse(json.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_whole_placeholder_keeps_type() {
        let t = template(r#"{"id":"@{id}","label":"user-@{id}","flag":"@{on}"}"#);
        let out = t.render_all(&records(r#"[{"id":7,"on":true}]"#)).unwrap();
        assert_eq!(
            out,
            vec![Value::parse(br#"{"id":7,"label":"user-7","flag":true}"#).unwrap()]
        );
    }

    #[test]
    fn test_one_output_per_record() {
        let t = template(r#""@{n}""#);
        assert_eq!(t.render_all(&records(r#"[{"n":1},{"n":2},{"n":3}]"#)).unwrap().len(), 3);
        assert!(t.render_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_escape_and_keys() {
        let t = template(r#"{"@{k}":"mail@@host @ x"}"#);
        let out = t.render_all(&records(r#"[{"k":"key"}]"#)).unwrap();
        assert_eq!(out[0], Value::parse(br#"{"key":"mail@host @ x"}"#).unwrap());
    }

    #[test]
    fn test_defaults_and_null() {
        let defaults = Vars::from_object(
            Value::parse(br#"{"greeting":"hi"}"#).unwrap().as_object().unwrap(),
        )
        .unwrap();
        let t = Template::new(Value::from("@{greeting}, @{name}!"), defaults);
        let out = t.render_all(&records(r#"[{"name":null}]"#)).unwrap();
        assert_eq!(out[0], Value::from("hi, !"));
    }

    #[test]
    fn test_render_failures() {
        let vars = records(r#"[{"a":1,"o":{"x":1}}]"#);
        let cases = [
            ("@{a", RenderFailure::Incomplete),
            ("tail @", RenderFailure::Incomplete),
            ("@{}", RenderFailure::EmptyName),
            ("x @{missing}", RenderFailure::Undefined("missing".into())),
            ("x @{a:%z}", RenderFailure::BadFormat("%z".into())),
            ("x @{o}", RenderFailure::NotText("o".into())),
        ];
        for (input, expected) in cases {
            let err = Template::new(Value::from(input), Vars::default())
                .render_all(&vars)
                .unwrap_err();
            assert_eq!(err.reason, expected, "input {:?}", input);
        }
    }

    #[test]
    fn test_error_path_points_into_template() {
        let t = template(r#"{"list":["ok","@{nope}x"]}"#);
        let err = t.render_all(&records(r#"[{}]"#)).unwrap_err();
        assert_eq!(err.path.to_string(), "$.list[1]");
    }

    #[test]
    fn test_format_specifiers() {
        let vars = records(r#"[{"n":42,"f":3.14159,"s":"ab","b":false,"neg":-5}]"#);
        let render = |s: &str| {
            Template::new(Value::from(s), Vars::default())
                .render_all(&vars)
                .unwrap()
                .remove(0)
        };
        assert_eq!(render("@{n:%05d}"), Value::from("00042"));
        assert_eq!(render("@{neg:%05d}"), Value::from("-0005"));
        assert_eq!(render("@{n:%+d}"), Value::from("+42"));
        assert_eq!(render("@{n:%x}"), Value::from("2a"));
        assert_eq!(render("@{f:%.2f}"), Value::from("3.14"));
        assert_eq!(render("@{n:%e}"), Value::from("4.200000e+01"));
        assert_eq!(render("@{f:%g}"), Value::from("3.14159"));
        assert_eq!(render("@{s:%-4s}|"), Value::from("ab  |"));
        assert_eq!(render("@{s:%4s}"), Value::from("  ab"));
        assert_eq!(render("@{s:%q}"), Value::from("\"ab\""));
        assert_eq!(render("@{b:%t}"), Value::from("false"));
    }
}
