//! YAML document loading and typed navigation
//!
//! A [`ConfigTree`] is the parsed form of one configuration document. It is
//! read-only after load; stage records copy values out of it through
//! [`ConfigNode`] accessors, which fail on absent keys instead of defaulting.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use super::validate::ValidationError;
use super::ConfigError;
use crate::error::Result;

/// A parsed configuration document
#[derive(Debug, Clone)]
pub struct ConfigTree {
    source: PathBuf,
    root: Value,
}

impl ConfigTree {
    /// Load and parse a YAML document
    ///
    /// Fails with [`ConfigError::Empty`] when the document holds no data
    /// (an empty file, only comments, or an explicit `null`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let tree = Self::parse(path, &content)?;
        tracing::info!("YAML file '{}' loaded successfully", path.display());
        Ok(tree)
    }

    /// Parse a document already held in memory; `source` is used in messages
    pub fn parse(source: impl Into<PathBuf>, content: &str) -> Result<Self> {
        let source = source.into();
        if content.trim().is_empty() {
            return Err(ConfigError::Empty { path: source }.into());
        }

        let root: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: source.clone(),
            message: e.to_string(),
        })?;

        match root {
            Value::Null => Err(ConfigError::Empty { path: source }.into()),
            Value::Mapping(ref m) if m.is_empty() => Err(ConfigError::Empty { path: source }.into()),
            Value::Mapping(_) => Ok(Self { source, root }),
            _ => Err(ConfigError::Parse {
                path: source,
                message: "top-level value must be a mapping".to_string(),
            }
            .into()),
        }
    }

    /// Path the document was loaded from
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Root node of the document
    pub fn root(&self) -> ConfigNode<'_> {
        ConfigNode {
            key_path: String::new(),
            value: &self.root,
        }
    }

    /// Shorthand for `self.root().section(key)`
    pub fn section(&self, key: &str) -> std::result::Result<ConfigNode<'_>, ValidationError> {
        self.root().section(key)
    }

    /// The whole document as JSON
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.root)?)
    }
}

/// A borrowed position inside a [`ConfigTree`]
///
/// Keeps the dotted key path so that errors name the exact missing entry
/// (e.g. `data_ingestion.unzip_dir`).
#[derive(Debug, Clone)]
pub struct ConfigNode<'a> {
    key_path: String,
    value: &'a Value,
}

type NodeResult<T> = std::result::Result<T, ValidationError>;

impl<'a> ConfigNode<'a> {
    fn full_key(&self, key: &str) -> String {
        if self.key_path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.key_path, key)
        }
    }

    fn wrong_type(&self, key: &str, expected: &'static str) -> ValidationError {
        ValidationError::WrongType {
            key: self.full_key(key),
            expected,
        }
    }

    /// Raw value under `key`; absent and `null` entries are both missing
    pub fn get(&self, key: &str) -> NodeResult<&'a Value> {
        match self.value.get(key) {
            Some(Value::Null) | None => Err(ValidationError::MissingKey(self.full_key(key))),
            Some(v) => Ok(v),
        }
    }

    /// Whether `key` is present at all, null included
    pub fn has_key(&self, key: &str) -> bool {
        self.value.get(key).is_some()
    }

    /// Whether `key` holds a non-null value
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Nested mapping under `key`
    pub fn section(&self, key: &str) -> NodeResult<ConfigNode<'a>> {
        let value = self.get(key)?;
        if !value.is_mapping() {
            return Err(self.wrong_type(key, "mapping"));
        }
        Ok(ConfigNode {
            key_path: self.full_key(key),
            value,
        })
    }

    pub fn string(&self, key: &str) -> NodeResult<String> {
        self.get(key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.wrong_type(key, "string"))
    }

    pub fn path(&self, key: &str) -> NodeResult<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    pub fn f64(&self, key: &str) -> NodeResult<f64> {
        self.get(key)?
            .as_f64()
            .ok_or_else(|| self.wrong_type(key, "number"))
    }

    pub fn bool(&self, key: &str) -> NodeResult<bool> {
        self.get(key)?
            .as_bool()
            .ok_or_else(|| self.wrong_type(key, "boolean"))
    }

    pub fn usize(&self, key: &str) -> NodeResult<usize> {
        self.get(key)?
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| self.wrong_type(key, "non-negative integer"))
    }

    pub fn usize_list(&self, key: &str) -> NodeResult<Vec<usize>> {
        let seq = self
            .get(key)?
            .as_sequence()
            .ok_or_else(|| self.wrong_type(key, "list of integers"))?;
        seq.iter()
            .map(|v| v.as_u64().map(|n| n as usize))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.wrong_type(key, "list of integers"))
    }

    /// Any scalar rendered as text; `None` when the key is absent or null
    pub fn optional_string(&self, key: &str) -> NodeResult<Option<String>> {
        match self.value.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(self.wrong_type(key, "scalar")),
        }
    }

    pub fn optional_f64(&self, key: &str) -> NodeResult<Option<f64>> {
        if self.contains(key) {
            self.f64(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn optional_bool(&self, key: &str) -> NodeResult<Option<bool>> {
        if self.contains(key) {
            self.bool(key).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn optional_usize(&self, key: &str) -> NodeResult<Option<usize>> {
        if self.contains(key) {
            self.usize(key).map(Some)
        } else {
            Ok(None)
        }
    }
}
