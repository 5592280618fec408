//! Parameter store
//!
//! Parameters live in one YAML document with a top-level mapping per node
//! namespace:
//!
//! ```yaml
//! dock_tracker:
//!   control_frequency: 50.0
//!   profile_percent: 0.2
//! navigation_main:
//!   timeout_a: 1.0
//! ```
//!
//! Nodes read values through a [`ParamNamespace`], asking for each key with
//! a default. A missing or mistyped key falls back to its default and marks
//! the fetch as failed, which the node reports but never treats as fatal.

use crate::error::{NavError, Result};
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Where the parameters were loaded from
#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Inline,
}

/// Shared, reloadable parameter tree
#[derive(Debug)]
pub struct ParamStore {
    source: Source,
    root: RwLock<Mapping>,
}

impl ParamStore {
    /// Store with no parameters; every lookup yields its default
    pub fn empty() -> Arc<Self> {
        Arc::new(ParamStore {
            source: Source::Inline,
            root: RwLock::new(Mapping::new()),
        })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Arc<Self>> {
        Ok(Arc::new(ParamStore {
            source: Source::Inline,
            root: RwLock::new(parse_root(yaml)?),
        }))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let root = read_file(&path)?;
        Ok(Arc::new(ParamStore {
            source: Source::File(path),
            root: RwLock::new(root),
        }))
    }

    /// Re-read the backing file. Inline stores keep their current values.
    pub fn reload(&self) -> Result<()> {
        if let Source::File(path) = &self.source {
            let root = read_file(path)?;
            *self.root.write().unwrap_or_else(|e| e.into_inner()) = root;
        }
        Ok(())
    }

    /// Overwrite one value, creating the namespace if needed
    pub fn set<T: Serialize>(&self, namespace: &str, key: &str, value: T) -> Result<()> {
        let value = serde_yaml::to_value(value)?;
        let mut root = self.root.write().unwrap_or_else(|e| e.into_inner());
        let ns = root
            .entry(Value::from(namespace))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        match ns {
            Value::Mapping(map) => {
                map.insert(Value::from(key), value);
                Ok(())
            }
            _ => Err(NavError::Config(format!(
                "namespace `{}` is not a mapping",
                namespace
            ))),
        }
    }

    pub fn namespace(self: &Arc<Self>, namespace: &str) -> ParamNamespace {
        ParamNamespace {
            store: Arc::clone(self),
            namespace: namespace.to_string(),
        }
    }

    fn lookup(&self, namespace: &str, key: &str) -> Option<Value> {
        let root = self.root.read().unwrap_or_else(|e| e.into_inner());
        root.get(namespace).and_then(|ns| ns.get(key)).cloned()
    }
}

fn parse_root(yaml: &str) -> Result<Mapping> {
    match serde_yaml::from_str::<Value>(yaml)? {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        _ => Err(NavError::Config(
            "parameter document must be a mapping of namespaces".to_string(),
        )),
    }
}

fn read_file(path: &Path) -> Result<Mapping> {
    let text = std::fs::read_to_string(path).map_err(|source| NavError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_root(&text)
}

/// View of one node's parameters
#[derive(Debug, Clone)]
pub struct ParamNamespace {
    store: Arc<ParamStore>,
    namespace: String,
}

impl ParamNamespace {
    pub fn name(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<ParamStore> {
        &self.store
    }

    /// Typed lookup. `Ok(None)` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.lookup(&self.namespace, key) {
            None => Ok(None),
            Some(value) => serde_yaml::from_value(value)
                .map(Some)
                .map_err(|e| NavError::Param {
                    key: format!("{}/{}", self.namespace, key),
                    reason: e.to_string(),
                }),
        }
    }

    /// Value for `key`, or `default` when absent or unreadable.
    /// The flag is false when the default had to be used.
    pub fn param<T: DeserializeOwned>(&self, key: &str, default: T) -> (T, bool) {
        match self.get(key) {
            Ok(Some(value)) => (value, true),
            Ok(None) => (default, false),
            Err(e) => {
                warn!("{}", e);
                (default, false)
            }
        }
    }

    /// Start a multi-key fetch that remembers whether every key was found
    pub fn fetch(&self) -> ParamFetch<'_> {
        ParamFetch {
            params: self,
            ok: true,
        }
    }
}

/// Accumulates the result of several `param` lookups
pub struct ParamFetch<'a> {
    params: &'a ParamNamespace,
    ok: bool,
}

impl ParamFetch<'_> {
    pub fn get<T: DeserializeOwned>(&mut self, key: &str, default: T) -> T {
        let (value, found) = self.params.param(key, default);
        self.ok &= found;
        value
    }

    pub fn ok(&self) -> bool {
        self.ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
dock_tracker:
  control_frequency: 25.0
  active: false
  profile_percent: "lots"
"#;

    #[test]
    fn present_keys_are_read() {
        let store = ParamStore::from_yaml_str(YAML).unwrap();
        let params = store.namespace("dock_tracker");
        assert_eq!(params.param("control_frequency", 50.0), (25.0, true));
        assert_eq!(params.param("active", true), (false, true));
    }

    #[test]
    fn missing_and_mistyped_keys_fall_back() {
        let store = ParamStore::from_yaml_str(YAML).unwrap();
        let params = store.namespace("dock_tracker");
        assert_eq!(params.param("stop_tolerance", 0.005), (0.005, false));
        assert_eq!(params.param("profile_percent", 0.2), (0.2, false));
        assert!(params.get::<f64>("profile_percent").is_err());

        let other = store.namespace("unknown");
        assert_eq!(other.param("anything", 1u32), (1, false));
    }

    #[test]
    fn fetch_reports_any_miss() {
        let store = ParamStore::from_yaml_str(YAML).unwrap();
        let params = store.namespace("dock_tracker");

        let mut fetch = params.fetch();
        let _: f64 = fetch.get("control_frequency", 50.0);
        assert!(fetch.ok());
        let _: f64 = fetch.get("linear_max_velocity", 0.3);
        assert!(!fetch.ok());
    }

    #[test]
    fn set_creates_namespace() {
        let store = ParamStore::empty();
        store.set("sim", "rate", 20.0).unwrap();
        assert_eq!(store.namespace("sim").param("rate", 100.0), (20.0, true));
    }

    #[test]
    fn non_mapping_document_is_rejected() {
        assert!(ParamStore::from_yaml_str("- 1\n- 2\n").is_err());
        assert!(ParamStore::from_yaml_str("").is_ok());
    }

    #[test]
    fn reload_picks_up_file_changes() {
        let path = std::env::temp_dir().join(format!(
            "dockbot_params_{}_{}.yaml",
            std::process::id(),
            line!()
        ));
        std::fs::write(&path, "sim:\n  rate: 10.0\n").unwrap();
        let store = ParamStore::from_file(&path).unwrap();
        assert_eq!(store.namespace("sim").param("rate", 0.0), (10.0, true));

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "sim:\n  rate: 40.0").unwrap();
        drop(file);
        store.reload().unwrap();
        assert_eq!(store.namespace("sim").param("rate", 0.0), (40.0, true));

        std::fs::remove_file(&path).unwrap();
        assert!(store.reload().is_err());
    }
}
