//! TOML adapter: reading with typed coercion, writing with key-order discipline.
//!
//! Persisted artifacts are deterministic: tables are rewritten with keys
//! ordered by a fixed priority vector and lexicographically after that, so
//! writing the same data twice produces byte-identical files. All writes go
//! through a temporary file in the destination directory followed by an
//! atomic rename, so an interrupted write never leaves a partial artifact
//! in place.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use toml::{Table, Value};

use crate::error::{Error, Result};

/// Fixed key ordering for persisted tables; unknown keys follow, sorted
/// lexicographically.
const KEY_PRIORITY: &[&str] = &[
    "name",
    "uuid",
    "host_version",
    "project_hash",
    "version",
    "git-tree-sha1",
    "path",
    "pinned",
    "repo",
    "repo-url",
    "repo-rev",
    "repo-subdir",
    "deps",
    "weakdeps",
    "extras",
    "sources",
    "compat",
    "targets",
    "workspace",
    "manifest",
    "packages",
];

fn key_rank(key: &str) -> (usize, &str) {
    match KEY_PRIORITY.iter().position(|k| *k == key) {
        Some(i) => (i, ""),
        None => (KEY_PRIORITY.len(), key),
    }
}

/// Read and parse a TOML file into a dynamic table.
pub fn read_table(path: &Path) -> Result<Table> {
    let content = fs::read_to_string(path)?;
    content
        .parse::<Table>()
        .map_err(|e| Error::parse(path, e.to_string()))
}

/// Rebuild a table (recursively) in canonical key order.
pub fn ordered(table: &Table) -> Table {
    let mut keys: Vec<&String> = table.keys().collect();
    keys.sort_by_key(|k| key_rank(k));
    let mut out = Table::new();
    for key in keys {
        if let Some(value) = table.get(key.as_str()) {
            out.insert(key.clone(), ordered_value(value));
        }
    }
    out
}

fn ordered_value(value: &Value) -> Value {
    match value {
        Value::Table(t) => Value::Table(ordered(t)),
        Value::Array(items) => Value::Array(items.iter().map(ordered_value).collect()),
        other => other.clone(),
    }
}

/// Serialize a table with an optional header comment and atomically replace
/// `path` with the result.
pub fn write_table(path: &Path, table: &Table, header: Option<&str>) -> Result<()> {
    let body = toml::to_string_pretty(&ordered(table))
        .map_err(|e| Error::parse(path, e.to_string()))?;
    let mut content = String::new();
    if let Some(header) = header {
        content.push_str(header);
        content.push('\n');
    }
    content.push_str(&body);
    write_temp_then_rename(path, content.as_bytes())
}

/// Write `content` to a sibling temporary file, then rename into place.
pub fn write_temp_then_rename(path: &Path, content: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Typed coercion helpers. Failures name the offending field and file so
/// schema errors surface without stack context.
pub fn as_str<'a>(path: &Path, field: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::schema(path, field, "a string"))
}

pub fn as_bool(path: &Path, field: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::schema(path, field, "a boolean"))
}

pub fn as_table<'a>(path: &Path, field: &str, value: &'a Value) -> Result<&'a Table> {
    value
        .as_table()
        .ok_or_else(|| Error::schema(path, field, "a table"))
}

pub fn as_array<'a>(path: &Path, field: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| Error::schema(path, field, "an array"))
}

pub fn required<'a>(path: &Path, table: &'a Table, field: &str) -> Result<&'a Value> {
    table.get(field).ok_or_else(|| Error::missing(path, field))
}
