use crate::error::DatastoreError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Property names understood by the adapters in this crate.
pub mod prop {
    /// Wipe the storage directory before opening.
    pub const DROP_DATA: &str = "dropdata";
    pub const DROP_DATA_DEFAULT: bool = false;

    pub const LSMDB_DIR: &str = "lsmdb.dir";
    /// Directory name used by go-ycsb property files; read when `lsmdb.dir`
    /// is unset.
    pub const GOLSM_DIR: &str = "golsm.dir";
    pub const LSMDB_DIR_DEFAULT: &str = "/tmp/lsmdb";

    /// Upper bound on the number of fields in one encoded row.
    pub const CODEC_MAX_FIELD_COUNT: &str = "codec.max_field_count";
    /// Upper bound on the size in bytes of one field value.
    pub const CODEC_MAX_FIELD_SIZE: &str = "codec.max_field_size";
}

/// Flat string properties handed to a database factory.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key = value` (or `key: value`) lines. Blank lines and lines
    /// starting with `#` or `!` are skipped; a line without a separator sets
    /// the key to an empty value.
    pub fn parse(text: &str) -> Self {
        let mut props = Properties::new();
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = match line.find(|c: char| c == '=' || c == ':') {
                Some(idx) => (&line[..idx], &line[idx + 1..]),
                None => (line, ""),
            };
            props.set(key.trim(), value.trim());
        }
        props
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(invalid(key, value)),
            },
        }
    }

    pub fn get_optional_usize(&self, key: &str) -> Result<Option<usize>> {
        self.get(key)
            .map(|value| usize::from_str(value).map_err(|_| invalid(key, value)))
            .transpose()
    }
}

fn invalid(key: &str, value: &str) -> DatastoreError {
    DatastoreError::Config {
        key: key.to_string(),
        value: value.to_string(),
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (key, value) in iter {
            props.set(key, value);
        }
        props
    }
}
