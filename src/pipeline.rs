use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info, info_span};

use crate::context::Context;
use crate::observability::MetricsCollector;
use crate::recipe::Recipe;
use crate::registry::{LoadedModules, Module, ModuleKey, ModuleParams, ModuleRegistry, RegistryError};

/// Modules injected into every pipeline unless already configured.
pub const DEFAULT_MODULES: [&str; 4] = [
    "setup:env",
    "setup:project",
    "setup:git",
    "setup:skip_publish",
];

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot parse pipeline definition: {0}")]
    Parse(serde_yaml::Error),

    #[error("pipeline definition is not a map")]
    NotAMap,

    #[error("definition of `{stage}` is not a sequence")]
    NotASequence { stage: String },

    #[error("item #{index} of `{stage}` definition is not a map")]
    NotAMapping { stage: String, index: usize },

    #[error("type not defined")]
    MissingType,

    #[error("type is not a string")]
    InvalidType,

    #[error("definition {stage}, item #{index}: {error}")]
    Definition {
        stage: String,
        index: usize,
        error: Box<PipelineError>,
    },

    #[error("unknown module {stage}:{kind}")]
    UnknownModule { stage: String, kind: String },

    #[error("module {key} already loaded")]
    DuplicateModule { key: ModuleKey },

    #[error("cannot decode module {key}: {error}")]
    Decode { key: ModuleKey, error: RegistryError },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("stage {stage}: {module}: missing dependencies {}", join_keys(.missing))]
    MissingDependencies {
        stage: String,
        module: String,
        missing: Vec<ModuleKey>,
    },

    #[error("stage {stage}: {module}: {error:#}")]
    Execution {
        stage: String,
        module: String,
        error: anyhow::Error,
    },
}

fn join_keys(keys: &[ModuleKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type SkipPredicate = Box<dyn Fn(&Context) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Skipped,
    Completed,
}

struct StageModule {
    kind: String,
    key: ModuleKey,
    module: Box<dyn Module>,
}

/// One named phase of the pipeline and its resolved modules, in
/// declaration order.
pub struct Stage {
    name: String,
    plural: String,
    registry: Arc<ModuleRegistry>,
    modules: Vec<StageModule>,
    skip: Option<SkipPredicate>,
    loaded: BTreeSet<ModuleKey>,
    metrics: MetricsCollector,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("plural", &self.plural)
            .field("modules", &self.module_types())
            .field("skippable", &self.skip.is_some())
            .finish()
    }
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        plural: impl Into<String>,
        registry: Arc<ModuleRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            plural: plural.into(),
            registry,
            modules: Vec::new(),
            skip: None,
            loaded: BTreeSet::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(predicate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plural(&self) -> &str {
        &self.plural
    }

    pub fn module_types(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.kind.as_str()).collect()
    }

    pub fn module_keys(&self) -> impl Iterator<Item = &ModuleKey> {
        self.modules.iter().map(|m| &m.key)
    }

    pub fn loaded(&self) -> &BTreeSet<ModuleKey> {
        &self.loaded
    }

    pub fn is_loaded(&self, key: &ModuleKey) -> bool {
        self.loaded.contains(key)
    }

    pub fn should_skip(&self, ctx: &Context) -> bool {
        self.skip.as_ref().is_some_and(|predicate| predicate(ctx))
    }

    /// Resolves `kind` for this stage and appends it. With `enforce_once` a
    /// module that is already part of the stage is rejected.
    pub fn add_module(
        &mut self,
        kind: &str,
        params: Option<&ModuleParams>,
        enforce_once: bool,
    ) -> Result<(), PipelineError> {
        let registry = Arc::clone(&self.registry);
        let (key, registration) =
            registry
                .lookup(&self.name, kind)
                .ok_or_else(|| PipelineError::UnknownModule {
                    stage: self.name.clone(),
                    kind: kind.to_string(),
                })?;

        if enforce_once && self.loaded.contains(key) {
            return Err(PipelineError::DuplicateModule { key: key.clone() });
        }

        let module = registration
            .create(params)
            .map_err(|error| PipelineError::Decode {
                key: key.clone(),
                error,
            })?;

        debug!(stage = self.name.as_str(), module = %key, "Module resolved");
        self.modules.push(StageModule {
            kind: kind.to_string(),
            key: key.clone(),
            module,
        });
        self.loaded.insert(key.clone());
        Ok(())
    }

    /// Populates the stage from its section of the declarative document.
    pub fn load(&mut self, section: &Value) -> Result<(), PipelineError> {
        let Value::Sequence(items) = section else {
            return Err(PipelineError::NotASequence {
                stage: self.name.clone(),
            });
        };

        for (idx, item) in items.iter().enumerate() {
            self.load_item(idx + 1, item)?;
        }
        Ok(())
    }

    /// Adds a single document item; `index` is 1-based.
    pub fn load_item(&mut self, index: usize, item: &Value) -> Result<(), PipelineError> {
        let Value::Mapping(params) = item else {
            return Err(PipelineError::NotAMapping {
                stage: self.name.clone(),
                index,
            });
        };

        item_type(params)
            .and_then(|kind| self.add_module(kind, Some(params), false))
            .map_err(|error| PipelineError::Definition {
                stage: self.name.clone(),
                index,
                error: Box::new(error),
            })
    }

    /// Runs every module in order unless the skip predicate holds. The first
    /// failure aborts the stage.
    pub fn run(
        &self,
        ctx: &mut Context,
        loaded: &LoadedModules,
    ) -> Result<StageOutcome, PipelineError> {
        let banner = self.name.to_uppercase();
        let span = info_span!("stage", stage = self.name.as_str());
        let _guard = span.enter();
        info!("====> {banner}");
        let started = Instant::now();

        if self.should_skip(ctx) {
            info!("SKIPPED");
            self.metrics.record_skip(&self.name);
            info!("<==== {banner} done in {:?}", started.elapsed());
            return Ok(StageOutcome::Skipped);
        }

        let timer = self.metrics.start_stage(&self.name);
        for entry in &self.modules {
            let missing = self.registry.missing_dependencies(&entry.key, loaded);
            if !missing.is_empty() {
                return Err(PipelineError::MissingDependencies {
                    stage: self.name.clone(),
                    module: entry.kind.clone(),
                    missing,
                });
            }
            self.run_module(entry, ctx)?;
        }
        info!("<==== {banner} done in {:?}", timer.elapsed());

        Ok(StageOutcome::Completed)
    }

    fn run_module(&self, entry: &StageModule, ctx: &mut Context) -> Result<(), PipelineError> {
        let span = info_span!("module", module = entry.kind.as_str());
        let _guard = span.enter();
        info!("----> {}", entry.kind);

        let timer = self.metrics.start_module(&entry.key.to_string());
        entry
            .module
            .run(ctx)
            .map_err(|error| PipelineError::Execution {
                stage: self.name.clone(),
                module: entry.kind.clone(),
                error,
            })?;

        info!("<---- {} done in {:?}", entry.kind, timer.elapsed());
        Ok(())
    }
}

fn item_type(params: &ModuleParams) -> Result<&str, PipelineError> {
    match params.get("type") {
        None => Err(PipelineError::MissingType),
        Some(Value::String(kind)) => Ok(kind.as_str()),
        Some(_) => Err(PipelineError::InvalidType),
    }
}

/// Ordered stages executed strictly in sequence.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
    metrics: MetricsCollector,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        let metrics = MetricsCollector::new();
        let stages = stages
            .into_iter()
            .map(|mut stage| {
                stage.metrics = metrics.clone();
                stage
            })
            .collect();
        Self { stages, metrics }
    }

    /// Loads every stage section found in `document`. Keys that match no
    /// stage label are ignored.
    pub fn load(&mut self, document: &Value) -> Result<(), PipelineError> {
        let sections = match document {
            Value::Null => return Ok(()),
            Value::Mapping(sections) => sections,
            _ => return Err(PipelineError::NotAMap),
        };

        for (label, section) in sections {
            let Some(label) = label.as_str() else {
                continue;
            };
            let Some(stage) = self.stages.iter_mut().find(|s| s.plural == label) else {
                debug!(label, "Ignoring unknown pipeline section");
                continue;
            };
            stage.load(section)?;
        }
        Ok(())
    }

    /// Adds `stage:type` to its stage unless it is already there.
    pub fn load_default(&mut self, kind: &str) -> Result<(), PipelineError> {
        let key: ModuleKey = kind.parse()?;
        if let Some(stage) = self.stage_by_name_mut(&key.stage) {
            stage.add_module(&key.kind, None, true)?;
        }
        Ok(())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stages_mut(&mut self) -> &mut [Stage] {
        &mut self.stages
    }

    pub fn stage_by_name(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn stage_by_name_mut(&mut self, name: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|stage| stage.name == name)
    }

    /// Every module key resolved into any stage.
    pub fn loaded_modules(&self) -> LoadedModules {
        self.stages
            .iter()
            .flat_map(|stage| stage.loaded.iter().cloned())
            .collect()
    }

    /// Resolved modules of every stage, in execution order.
    pub fn modules(&self) -> Vec<&ModuleKey> {
        self.stages
            .iter()
            .flat_map(|stage| stage.module_keys())
            .collect()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Runs the pipeline against a fresh context and hands it back.
    pub fn run(&self) -> Result<Context, PipelineError> {
        let mut ctx = Context::new();
        self.run_with(&mut ctx)?;
        Ok(ctx)
    }

    pub fn run_with(&self, ctx: &mut Context) -> Result<(), PipelineError> {
        self.metrics.start_run();
        let started = Instant::now();
        let loaded = self.loaded_modules();

        let result = self
            .stages
            .iter()
            .try_for_each(|stage| stage.run(ctx, &loaded).map(|_| ()));

        self.metrics.record_total_duration(started.elapsed());
        result
    }
}

/// The standard `setup`, `build` and `publish` stages. Publishing is skipped
/// unless the context enables it.
pub fn default_stages(registry: Arc<ModuleRegistry>) -> Vec<Stage> {
    vec![
        Stage::new("setup", "setups", Arc::clone(&registry)),
        Stage::new("build", "builds", Arc::clone(&registry)),
        Stage::new("publish", "publishes", registry).with_skip(|ctx| !ctx.publish),
    ]
}

/// Builds the standard pipeline from `recipe` and injects the default
/// modules that the document did not configure.
pub fn load_build_pipeline(
    registry: Arc<ModuleRegistry>,
    recipe: &Recipe,
) -> Result<Pipeline, PipelineError> {
    let mut pipeline = Pipeline::new(default_stages(registry));
    pipeline.load(&recipe.document)?;
    inject_defaults(&mut pipeline)?;
    Ok(pipeline)
}

pub(crate) fn inject_defaults(pipeline: &mut Pipeline) -> Result<(), PipelineError> {
    for kind in DEFAULT_MODULES {
        match pipeline.load_default(kind) {
            Ok(()) => {}
            Err(PipelineError::DuplicateModule { key }) => {
                debug!(module = %key, "Default module already configured");
            }
            Err(PipelineError::UnknownModule { stage, kind }) => {
                debug!(stage, kind, "Default module not registered");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
