pub mod artifact;
pub mod context;
pub mod modules;
pub mod observability;
pub mod pipeline;
pub mod recipe;
pub mod registry;
pub mod template;
pub mod validation;

pub use artifact::{Artifact, ArtifactFormat, Catalog, OsArch};
pub use context::{Context, Env};
pub use pipeline::{Pipeline, PipelineError, Stage, load_build_pipeline};
pub use recipe::Recipe;
pub use registry::{Module, ModuleKey, ModuleRegistry};
