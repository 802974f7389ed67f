//! Variable records for template rendering.

use crate::error::CompileError;
use crate::json::{Object, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static VAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

const BOM: char = '\u{feff}';

/// One name→value record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    table: HashMap<String, Value>,
}

impl Vars {
    /// Build a record from a JSON object, checking every name.
    pub fn from_object(object: &Object) -> Result<Self, CompileError> {
        let mut table = HashMap::with_capacity(object.len());
        for (name, value) in object {
            if !VAR_NAME.is_match(name) {
                return Err(CompileError::invalid(format!("invalid name for var: '{}'", name)));
            }
            table.insert(name.clone(), value.clone());
        }
        Ok(Self { table })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.table.get(name)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Parse an inline records value: an array of objects, or a single object.
pub fn parse_records(value: &Value) -> Result<Vec<Vars>, CompileError> {
    let records = match value {
        Value::Array(items) => items.as_slice(),
        other => std::slice::from_ref(other),
    };
    records
        .iter()
        .map(|record| Vars::from_object(record.to_object("vars")?))
        .collect()
}

/// Parse a `{"@type":"vars","vars":[...]}` document.
pub fn parse_document(doc: &Value) -> Result<Vec<Vars>, CompileError> {
    let object = doc
        .as_object()
        .ok_or_else(|| CompileError::invalid("a vars file must be a json object"))?;
    if object.get_text("@type").ok().as_deref() != Some("vars") {
        return Err(CompileError::invalid("a vars file must declare \"@type\": \"vars\""));
    }
    parse_records(object.value("vars"))
}

/// Parse CSV records; the header row supplies the names.
///
/// Cells holding valid JSON are stored as the parsed value, anything else as
/// a plain string. Rows shorter than the header leave the missing names unset.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<Vars>, CompileError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = reader.records();
    let mut names: Vec<String> = match rows.next() {
        Some(header) => header?.iter().map(str::to_string).collect(),
        None => return Ok(Vec::new()),
    };
    if let Some(first) = names.first_mut() {
        *first = first.trim_start_matches(BOM).to_string();
    }

    let mut records = Vec::new();
    for row in rows {
        let row = row?;
        let table = names
            .iter()
            .zip(row.iter())
            .map(|(name, cell)| {
                let value = Value::parse(cell.as_bytes()).unwrap_or_else(|_| Value::from(cell));
                (name.clone(), value)
            })
            .collect();
        records.push(Vars { table });
    }
    Ok(records)
}
