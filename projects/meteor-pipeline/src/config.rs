// Property store
//
// Dotted keys (`normalizer.size.masking`) are resolved against a JSON document,
// walking nested objects. Overrides given as `key=value` win over the document.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropertyError {
    #[error("failed to read properties file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse properties file {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("property `{key}` has unparsable value `{value}`")]
    Parse { key: String, value: String },
    #[error("invalid override `{0}`, expected key=value")]
    Override(String),
}

#[derive(Debug, Clone, Default)]
pub struct Properties {
    root: Value,
    overrides: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(root: Value) -> Self {
        Self {
            root,
            overrides: BTreeMap::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, PropertyError> {
        let content = fs::read_to_string(path).map_err(|source| PropertyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let root = serde_json::from_str(&content).map_err(|source| PropertyError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_json(root))
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.overrides.insert(key.to_string(), value.to_string());
    }

    /// Applies a `key=value` override.
    pub fn apply_override(&mut self, pair: &str) -> Result<(), PropertyError> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| PropertyError::Override(pair.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(PropertyError::Override(pair.to_string()));
        }
        self.set(key, value.trim());
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value.clone());
        }
        find(&self.root, key).map(value_to_string)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.lookup(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str, default: i64) -> Result<i64, PropertyError> {
        match self.lookup(key) {
            Some(raw) => raw.trim().parse().map_err(|_| PropertyError::Parse {
                key: key.to_string(),
                value: raw,
            }),
            None => Ok(default),
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64, PropertyError> {
        match self.lookup(key) {
            Some(raw) => raw.trim().parse().map_err(|_| PropertyError::Parse {
                key: key.to_string(),
                value: raw,
            }),
            None => Ok(default),
        }
    }

    /// Accepts `true`/`false` or any integer (non-zero is true).
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, PropertyError> {
        let Some(raw) = self.lookup(key) else {
            return Ok(default);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => other
                .parse::<i64>()
                .map(|v| v != 0)
                .map_err(|_| PropertyError::Parse {
                    key: key.to_string(),
                    value: raw.clone(),
                }),
        }
    }
}

fn find<'a>(node: &'a Value, key: &str) -> Option<&'a Value> {
    let object = node.as_object()?;
    if let Some(value) = object.get(key) {
        return Some(value);
    }
    for (idx, _) in key.match_indices('.') {
        if let Some(child) = object.get(&key[..idx]) {
            if let Some(value) = find(child, &key[idx + 1..]) {
                return Some(value);
            }
        }
    }
    None
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => String::from(if *b { "1" } else { "0" }),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_and_flat_keys() {
        let props = Properties::from_json(json!({
            "normalizer": {
                "gray": 1,
                "size": { "masking": "0, 0, 100, 50" }
            },
            "normalizer.wide.masking": [1, 2, 3, 4],
        }));

        assert_eq!(props.get_string("normalizer.size.masking", ""), "0, 0, 100, 50");
        assert_eq!(props.get_string("normalizer.wide.masking", ""), "1,2,3,4");
        assert_eq!(props.get_int("normalizer.gray", 0).unwrap(), 1);
        assert_eq!(props.get_string("normalizer.missing.masking", "none"), "none");
        assert!(!props.contains("normalizer.size.gray"));
    }

    #[test]
    fn test_overrides_win() {
        let mut props = Properties::from_json(json!({ "source": { "fps": 25 } }));
        props.apply_override("source.fps = 50").unwrap();
        assert_eq!(props.get_f64("source.fps", 30.0).unwrap(), 50.0);

        assert!(props.apply_override("no-equals-sign").is_err());
        assert!(props.apply_override("=1").is_err());
    }

    #[test]
    fn test_bool_parsing() {
        let mut props = Properties::new();
        props.set("a", "1");
        props.set("b", "false");
        props.set("c", "yes please");
        assert!(props.get_bool("a", false).unwrap());
        assert!(!props.get_bool("b", true).unwrap());
        assert!(props.get_bool("missing", true).unwrap());
        assert!(matches!(
            props.get_bool("c", false),
            Err(PropertyError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.json");
        std::fs::write(&path, r#"{"detector": {"diff": {"frames": 3}}}"#).unwrap();
        let props = Properties::load(&path).unwrap();
        assert_eq!(props.get_int("detector.diff.frames", 2).unwrap(), 3);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Properties::load(&path),
            Err(PropertyError::Json { .. })
        ));
        assert!(matches!(
            Properties::load(&dir.path().join("absent.json")),
            Err(PropertyError::Io { .. })
        ));
    }
}
