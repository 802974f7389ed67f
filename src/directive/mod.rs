//! Directive pipeline.
//!
//! Directives are JSON object keys starting with `@` that rewrite the value
//! they appear in before it is parsed into mappings:
//!
//! - `@comment` is removed wherever it appears.
//! - `{"@file": "path"}` becomes the text of that file.
//! - `{"@regexp": "pattern"}` becomes a compiled regex.
//! - `{"@json": value}` becomes a partial-match pattern. Inside the pattern,
//!   keys starting with `$` are json-paths into the pattern itself and `$$`
//!   escapes a literal `$`.
//! - `{"@template": "file", "@vars": ...}` is replaced by the template
//!   rendered once per vars record.
//!
//! Each stage is a plain function over a value; call sites choose which
//! stages to run and in what order.

pub mod template;
pub mod vars;

use crate::error::{CompileError, CompileErrorKind};
use crate::json::{JsonMatcher, JsonPath, Object, Segment, Value};
use crate::source::FileSource;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use template::Template;
use tracing::debug;
use vars::Vars;

pub const D_COMMENT: &str = "@comment";
pub const D_FILE: &str = "@file";
pub const D_REGEXP: &str = "@regexp";
pub const D_JSON: &str = "@json";
pub const D_TEMPLATE: &str = "@template";
pub const D_VARS: &str = "@vars";

/// One transform of the directive pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RemoveComment,
    LoadFile,
    ParseRegexp,
    ToJsonMatcher,
    RenderTemplate,
}

/// Stages applied to a policy's `when` clause.
pub const WHEN_STAGES: &[Stage] = &[Stage::ToJsonMatcher, Stage::ParseRegexp, Stage::LoadFile];

/// Stages applied to a `returns.body` value.
pub const BODY_STAGES: &[Stage] = &[Stage::LoadFile];

/// Stages applied to every document as it is read.
pub const DOCUMENT_STAGES: &[Stage] = &[Stage::RemoveComment, Stage::RenderTemplate];

impl Stage {
    fn run(self, value: Value, ctx: &mut Context<'_>, path: &mut JsonPath) -> Result<Value, CompileError> {
        match self {
            Stage::RemoveComment => Ok(remove_comments(value)),
            Stage::LoadFile => load_files(value, ctx, path),
            Stage::ParseRegexp => parse_regexps(value, ctx, path),
            Stage::ToJsonMatcher => to_json_matchers(value, path),
            Stage::RenderTemplate => render_templates(value, ctx, path),
        }
    }
}

/// Run `stages` in order over `value`, located at `at` in its document.
pub fn apply(
    value: Value,
    stages: &[Stage],
    ctx: &mut Context<'_>,
    at: &JsonPath,
) -> Result<Value, CompileError> {
    stages.iter().try_fold(value, |value, stage| {
        let mut path = at.clone();
        stage.run(value, ctx, &mut path)
    })
}

/// State of one compile pass: file access, caches, and the files read so far.
///
/// Every file reference resolves against the base directory and must stay
/// inside it. Caches live only as long as the context.
pub struct Context<'a> {
    source: &'a dyn FileSource,
    base_dir: PathBuf,
    texts: HashMap<PathBuf, String>,
    regexps: HashMap<String, Regex>,
    templates: HashMap<PathBuf, Rc<Template>>,
    vars: HashMap<PathBuf, Rc<Vec<Vars>>>,
    loaded: Vec<PathBuf>,
    template_stack: Vec<PathBuf>,
}

impl<'a> Context<'a> {
    pub fn new(source: &'a dyn FileSource, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            base_dir: normalize(&base_dir.into()),
            texts: HashMap::new(),
            regexps: HashMap::new(),
            templates: HashMap::new(),
            vars: HashMap::new(),
            loaded: Vec::new(),
            template_stack: Vec::new(),
        }
    }

    pub fn source(&self) -> &'a dyn FileSource {
        self.source
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a file reference against the base directory.
    pub fn resolve(&self, name: impl AsRef<Path>) -> Result<PathBuf, CompileError> {
        let resolved = normalize(&self.base_dir.join(name));
        if resolved.starts_with(&self.base_dir) {
            Ok(resolved)
        } else {
            Err(CompileError::new(CompileErrorKind::OutsideBaseDir))
        }
    }

    /// A path relative to the base directory, for display and watching.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.base_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Note a file as contributing to the result.
    pub fn record(&mut self, path: &Path) {
        let relative = self.relative(path);
        if !self.loaded.contains(&relative) {
            self.loaded.push(relative);
        }
    }

    /// Files read so far, relative to the base directory, in first-read order.
    pub fn loaded(&self) -> &[PathBuf] {
        &self.loaded
    }

    pub fn into_loaded(self) -> Vec<PathBuf> {
        self.loaded
    }

    /// Read and record a file.
    pub fn read(&mut self, path: &Path) -> Result<Vec<u8>, CompileError> {
        let bytes = self
            .source
            .read(path)
            .map_err(|e| CompileError::new(e).in_file(self.relative(path)))?;
        self.record(path);
        debug!(file = %self.relative(path).display(), bytes = bytes.len(), "Read file");
        Ok(bytes)
    }

    /// Read a file as JSON and run the document stages over it.
    pub fn read_document(&mut self, path: &Path) -> Result<Value, CompileError> {
        let relative = self.relative(path);
        let bytes = self.read(path)?;
        let raw = Value::parse(&bytes).map_err(|e| CompileError::new(e).in_file(&relative))?;
        apply(raw, DOCUMENT_STAGES, self, &JsonPath::root()).map_err(|e| e.in_file(&relative))
    }

    fn read_text(&mut self, name: &str) -> Result<String, CompileError> {
        let path = self.resolve(name)?;
        if let Some(text) = self.texts.get(&path) {
            return Ok(text.clone());
        }
        let bytes = self.read(&path)?;
        let text = String::from_utf8(bytes).map_err(|_| {
            CompileError::invalid("file content is not valid UTF-8").in_file(self.relative(&path))
        })?;
        self.texts.insert(path, text.clone());
        Ok(text)
    }

    fn regexp(&mut self, pattern: &str) -> Result<Regex, CompileError> {
        if let Some(re) = self.regexps.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern)?;
        self.regexps.insert(pattern.to_string(), re.clone());
        Ok(re)
    }

    fn template(&mut self, name: &str) -> Result<Rc<Template>, CompileError> {
        let path = self.resolve(name)?;
        if let Some(template) = self.templates.get(&path) {
            return Ok(Rc::clone(template));
        }

        let relative = self.relative(&path);
        if self.template_stack.contains(&path) {
            let chain = self
                .template_stack
                .iter()
                .chain(std::iter::once(&path))
                .map(|p| self.relative(p).display().to_string())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(CompileError::new(CompileErrorKind::CyclicTemplate(chain)).in_file(relative));
        }

        self.template_stack.push(path.clone());
        let doc = self.read_document(&path);
        self.template_stack.pop();

        let template = Rc::new(
            Template::from_document(&doc?, relative.clone()).map_err(|e| e.in_file(&relative))?,
        );
        self.templates.insert(path, Rc::clone(&template));
        Ok(template)
    }

    fn vars_file(&mut self, name: &str) -> Result<Rc<Vec<Vars>>, CompileError> {
        let path = self.resolve(name)?;
        if let Some(records) = self.vars.get(&path) {
            return Ok(Rc::clone(records));
        }

        let relative = self.relative(&path);
        let is_csv = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        let bytes = self.read(&path)?;
        let records = if is_csv {
            vars::parse_csv(&bytes)
        } else {
            Value::parse(&bytes)
                .map_err(CompileError::from)
                .and_then(|doc| vars::parse_document(&remove_comments(doc)))
        };
        let records = records.map_err(|e| e.in_file(&relative))?;

        let records = Rc::new(records);
        self.vars.insert(path, Rc::clone(&records));
        Ok(records)
    }
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Map every member of an object or element of an array.
fn map_children<F>(value: Value, path: &mut JsonPath, mut f: F) -> Result<Value, CompileError>
where
    F: FnMut(Value, &mut JsonPath) -> Result<Value, CompileError>,
{
    match value {
        Value::Object(object) => {
            let mut mapped = Object::new();
            for (name, member) in object {
                path.push(Segment::key(name.as_str()));
                let member = f(member, path)?;
                path.pop();
                mapped.insert(name, member);
            }
            Ok(Value::Object(mapped))
        }
        Value::Array(items) => {
            let mut mapped = Vec::with_capacity(items.len());
            for (idx, item) in items.into_iter().enumerate() {
                path.push(Segment::Index(idx));
                mapped.push(f(item, path)?);
                path.pop();
            }
            Ok(Value::Array(mapped))
        }
        other => Ok(other),
    }
}

/// Read the string argument of a directive.
fn directive_arg(object: &Object, directive: &str, path: &JsonPath) -> Result<String, CompileError> {
    object
        .get_text(directive)
        .map_err(|e| CompileError::new(e).at(&path.child(Segment::key(directive))))
}

fn remove_comments(value: Value) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .filter(|(name, _)| name != D_COMMENT)
                .map(|(name, member)| (name, remove_comments(member)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(remove_comments).collect()),
        other => other,
    }
}

fn load_files(value: Value, ctx: &mut Context<'_>, path: &mut JsonPath) -> Result<Value, CompileError> {
    if let Value::Object(object) = &value {
        if object.has(D_FILE) {
            let name = directive_arg(object, D_FILE, path)?;
            let text = ctx.read_text(&name).map_err(|e| e.at(path))?;
            return Ok(Value::String(text));
        }
    }
    map_children(value, path, |v, p| load_files(v, ctx, p))
}

fn parse_regexps(value: Value, ctx: &mut Context<'_>, path: &mut JsonPath) -> Result<Value, CompileError> {
    match value {
        Value::Object(object) if object.has(D_REGEXP) => {
            let pattern = directive_arg(&object, D_REGEXP, path)?;
            let re = ctx.regexp(&pattern).map_err(|e| e.at(path))?;
            Ok(Value::Regex(re))
        }
        Value::Matcher(matcher) => {
            let pattern = parse_regexps(matcher.into_pattern(), ctx, path)?;
            Ok(Value::Matcher(JsonMatcher::new(pattern)))
        }
        other => map_children(other, path, |v, p| parse_regexps(v, ctx, p)),
    }
}

fn to_json_matchers(value: Value, path: &mut JsonPath) -> Result<Value, CompileError> {
    match value {
        Value::Object(mut object) if object.has(D_JSON) => {
            let pattern = object.remove(D_JSON).unwrap_or(Value::Null);
            path.push(Segment::key(D_JSON));
            let pattern = raw_pattern(pattern, path);
            path.pop();
            Ok(Value::Matcher(JsonMatcher::new(pattern?)))
        }
        other => map_children(other, path, to_json_matchers),
    }
}

/// Build the pattern under `@json`, applying `$` json-path keys.
fn raw_pattern(value: Value, path: &mut JsonPath) -> Result<Value, CompileError> {
    let Value::Object(object) = value else {
        return map_children(value, path, to_json_matchers);
    };

    let mut result = Object::new();
    let mut deferred = Vec::new();
    for (name, member) in object {
        path.push(Segment::key(name.as_str()));
        let member = to_json_matchers(member, path)?;
        path.pop();

        if let Some(literal) = name.strip_prefix("$$") {
            result.insert(format!("${}", literal), member);
        } else if name.starts_with('$') {
            deferred.push((name, member));
        } else {
            result.insert(name, member);
        }
    }

    for (expr, member) in deferred {
        let at = path.child(Segment::key(expr.as_str()));
        let target = JsonPath::parse(&expr).map_err(|e| CompileError::new(e).at(&at))?;
        result = result
            .set_by_path(&target, member)
            .map_err(|e| CompileError::new(e).at(&at))?;
    }
    Ok(Value::Object(result))
}

/// A template directive's output before it is placed in its parent.
enum Rendered {
    Value(Value),
    Fanout(Vec<Value>),
}

fn render_templates(value: Value, ctx: &mut Context<'_>, path: &mut JsonPath) -> Result<Value, CompileError> {
    Ok(match render_node(value, ctx, path)? {
        Rendered::Value(v) => v,
        Rendered::Fanout(items) => Value::Array(items),
    })
}

fn render_node(value: Value, ctx: &mut Context<'_>, path: &mut JsonPath) -> Result<Rendered, CompileError> {
    match value {
        Value::Object(object) if object.has(D_TEMPLATE) => {
            apply_template(&object, ctx, path).map(Rendered::Fanout)
        }
        Value::Object(object) => {
            let mut rendered = Object::new();
            for (name, member) in object {
                path.push(Segment::key(name.as_str()));
                let member = match render_node(member, ctx, path)? {
                    Rendered::Value(v) => v,
                    Rendered::Fanout(items) => collapse(items),
                };
                path.pop();
                rendered.insert(name, member);
            }
            Ok(Rendered::Value(Value::Object(rendered)))
        }
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for (idx, item) in items.into_iter().enumerate() {
                path.push(Segment::Index(idx));
                match render_node(item, ctx, path)? {
                    Rendered::Value(v) => rendered.push(v),
                    Rendered::Fanout(items) => rendered.extend(items),
                }
                path.pop();
            }
            Ok(Rendered::Value(Value::Array(rendered)))
        }
        other => Ok(Rendered::Value(other)),
    }
}

/// A fan-out placed in a single field: nothing, one value, or an array.
fn collapse(mut items: Vec<Value>) -> Value {
    match items.len() {
        0 => Value::Null,
        1 => items.pop().unwrap_or(Value::Null),
        _ => Value::Array(items),
    }
}

fn apply_template(object: &Object, ctx: &mut Context<'_>, path: &JsonPath) -> Result<Vec<Value>, CompileError> {
    let name = directive_arg(object, D_TEMPLATE, path)?;
    let template = ctx.template(&name).map_err(|e| e.at(path))?;

    let records = if object.has("vars") {
        let at = path.child(Segment::key("vars"));
        Rc::new(vars::parse_records(object.value("vars")).map_err(|e| e.at(&at))?)
    } else {
        let at = path.child(Segment::key(D_VARS));
        match object.value(D_VARS) {
            Value::String(file) => ctx.vars_file(file).map_err(|e| e.at(&at))?,
            Value::Array(_) | Value::Object(_) => {
                Rc::new(vars::parse_records(object.value(D_VARS)).map_err(|e| e.at(&at))?)
            }
            _ => {
                return Err(CompileError::invalid(format!(
                    "{} requires \"vars\" or \"{}\"",
                    D_TEMPLATE, D_VARS
                ))
                .at(path))
            }
        }
    };

    template
        .render_all(&records)
        .map_err(|e| CompileError::new(e).at(path))
}
