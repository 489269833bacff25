use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::fs_utils::write_atomic;

pub(crate) fn parse_properties(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

pub fn read_properties(path: &Path) -> Result<Option<BTreeMap<String, String>>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(parse_properties(&raw))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read properties file: {}", path.display()))
        }
    }
}

pub fn write_properties(path: &Path, properties: &BTreeMap<String, String>) -> Result<()> {
    let mut payload = String::new();
    for (key, value) in properties {
        payload.push_str(&format!("{key}={value}\n"));
    }
    write_atomic(path, payload.as_bytes())
        .with_context(|| format!("failed to write properties file: {}", path.display()))
}

/// Sets one key, keeping every other line's key and value.
pub fn set_property(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut properties = read_properties(path)?.unwrap_or_default();
    properties.insert(key.to_string(), value.to_string());
    write_properties(path, &properties)
}
