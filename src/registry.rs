use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use crate::context::Context;

/// Stage name under which a module is usable from every stage.
pub const ANY_STAGE: &str = "*";

/// Raw declarative configuration of one module item.
pub type ModuleParams = Mapping;

/// Keys resolved into some stage during the current run.
pub type LoadedModules = BTreeSet<ModuleKey>;

/// A runnable unit of the pipeline.
pub trait Module: Send + Sync {
    fn run(&self, ctx: &mut Context) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid module kind: {0:?}")]
    InvalidKind(String),

    #[error("{0}")]
    Decode(serde_yaml::Error),
}

/// `stage:type` compound key of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleKey {
    pub stage: String,
    pub kind: String,
}

impl ModuleKey {
    pub fn new(stage: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stage, self.kind)
    }
}

impl FromStr for ModuleKey {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((stage, kind)) if !stage.is_empty() && !kind.is_empty() => {
                Ok(Self::new(stage, kind))
            }
            _ => Err(RegistryError::InvalidKind(s.to_string())),
        }
    }
}

type ModuleConstructor =
    Arc<dyn Fn(Option<&ModuleParams>) -> Result<Box<dyn Module>, RegistryError> + Send + Sync>;

pub struct Registration {
    constructor: ModuleConstructor,
    dependencies: Vec<ModuleKey>,
}

impl Registration {
    /// Instantiates the module's defaults, overlaid with `params` if given.
    pub fn create(&self, params: Option<&ModuleParams>) -> Result<Box<dyn Module>, RegistryError> {
        (self.constructor)(params)
    }

    pub fn dependencies(&self) -> &[ModuleKey] {
        &self.dependencies
    }
}

/// Maps `stage:type` keys to module constructors. Built once during start-up
/// and shared read-only by every pipeline.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: HashMap<ModuleKey, Registration>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.known_modules().iter().map(|k| k.to_string()).collect();
        f.debug_struct("ModuleRegistry").field("modules", &keys).finish()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor. A later registration for the same key
    /// replaces the earlier one.
    pub fn register<F>(
        &mut self,
        stage: &str,
        kind: &str,
        dependencies: Vec<ModuleKey>,
        constructor: F,
    ) where
        F: Fn(Option<&ModuleParams>) -> Result<Box<dyn Module>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.entries.insert(
            ModuleKey::new(stage, kind),
            Registration {
                constructor: Arc::new(constructor),
                dependencies,
            },
        );
    }

    /// Registers a serde-configurable module type whose `Default` is the
    /// default configuration.
    pub fn register_module<T>(&mut self, stage: &str, kind: &str, dependencies: Vec<ModuleKey>)
    where
        T: Module + Default + Serialize + DeserializeOwned + 'static,
    {
        self.register(stage, kind, dependencies, |params| {
            Ok(Box::new(configure::<T>(params)?) as Box<dyn Module>)
        });
    }

    /// Resolves `kind` for `stage`, falling back to a wildcard registration.
    pub fn lookup(&self, stage: &str, kind: &str) -> Option<(&ModuleKey, &Registration)> {
        [stage, ANY_STAGE]
            .into_iter()
            .find_map(|candidate| self.entries.get_key_value(&ModuleKey::new(candidate, kind)))
    }

    /// Declared dependencies of `key` that are not in `loaded`. Unregistered
    /// keys have no missing dependencies.
    pub fn missing_dependencies(&self, key: &ModuleKey, loaded: &LoadedModules) -> Vec<ModuleKey> {
        self.entries
            .get(key)
            .map(|registration| {
                registration
                    .dependencies
                    .iter()
                    .filter(|dep| !loaded.contains(*dep))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependencies(&self, key: &ModuleKey) -> &[ModuleKey] {
        self.entries
            .get(key)
            .map(|registration| registration.dependencies.as_slice())
            .unwrap_or_default()
    }

    pub fn known_modules(&self) -> Vec<&ModuleKey> {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        keys
    }
}

/// Builds `T` from its defaults with every key of `params` (except `type`)
/// replacing the matching default field.
pub fn configure<T>(params: Option<&ModuleParams>) -> Result<T, RegistryError>
where
    T: Default + Serialize + DeserializeOwned,
{
    let defaults = T::default();
    let Some(params) = params else {
        return Ok(defaults);
    };

    let mut merged = match serde_yaml::to_value(&defaults).map_err(RegistryError::Decode)? {
        Value::Mapping(mapping) => mapping,
        _ => Mapping::new(),
    };
    for (key, value) in params {
        if key.as_str() == Some("type") {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }

    serde_yaml::from_value(Value::Mapping(merged)).map_err(RegistryError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(default, deny_unknown_fields)]
    struct Sample {
        id: String,
        builds: Vec<String>,
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                id: "default".into(),
                builds: vec!["a".into()],
            }
        }
    }

    #[test]
    fn overlay_replaces_only_given_fields() {
        let params: ModuleParams = serde_yaml::from_str("type: sample\nid: custom\n").unwrap();
        let sample: Sample = configure(Some(&params)).unwrap();
        assert_eq!(sample.id, "custom");
        assert_eq!(sample.builds, vec!["a".to_string()]);
    }

    #[test]
    fn overlay_rejects_unknown_fields() {
        let params: ModuleParams = serde_yaml::from_str("bogus: 1\n").unwrap();
        assert!(configure::<Sample>(Some(&params)).is_err());
    }

    #[test]
    fn kind_parsing() {
        let key: ModuleKey = "setup:git".parse().unwrap();
        assert_eq!(key, ModuleKey::new("setup", "git"));
        assert!("setup".parse::<ModuleKey>().is_err());
        assert!(":git".parse::<ModuleKey>().is_err());
    }
}
