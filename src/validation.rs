use std::sync::Arc;

use serde::Serialize;
use serde_yaml::Value;

use crate::pipeline::{Pipeline, PipelineError, default_stages, inject_defaults};
use crate::recipe::Recipe;
use crate::registry::ModuleRegistry;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Checks a pipeline document without running it, collecting every problem
/// instead of stopping at the first one.
pub fn validate_recipe(recipe: &Recipe, registry: Arc<ModuleRegistry>) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut pipeline = Pipeline::new(default_stages(Arc::clone(&registry)));

    let sections = match &recipe.document {
        Value::Null => None,
        Value::Mapping(sections) => Some(sections),
        _ => {
            report.errors.push(PipelineError::NotAMap.to_string());
            return report;
        }
    };

    for (label, section) in sections.into_iter().flatten() {
        let Some(label) = label.as_str() else {
            report
                .warnings
                .push("Ignoring section with a non-string label".into());
            continue;
        };
        let Some(stage) = pipeline
            .stages()
            .iter()
            .position(|stage| stage.plural() == label)
        else {
            report
                .warnings
                .push(format!("Unknown section '{label}' is ignored"));
            continue;
        };
        report.merge(validate_section(&mut pipeline, stage, section));
    }

    if let Err(err) = inject_defaults(&mut pipeline) {
        report.errors.push(err.to_string());
    }

    report.merge(validate_dependencies(&pipeline, &registry));
    report
}

fn validate_section(pipeline: &mut Pipeline, stage_idx: usize, section: &Value) -> ValidationReport {
    let mut report = ValidationReport::default();
    let Some(stage) = pipeline.stages_mut().get_mut(stage_idx) else {
        return report;
    };

    let Value::Sequence(items) = section else {
        report.errors.push(
            PipelineError::NotASequence {
                stage: stage.name().to_string(),
            }
            .to_string(),
        );
        return report;
    };

    for (idx, item) in items.iter().enumerate() {
        if let Err(err) = stage.load_item(idx + 1, item) {
            report.errors.push(err.to_string());
        }
    }

    if items.is_empty() {
        report
            .warnings
            .push(format!("Section '{}' has no modules", stage.plural()));
    }

    report
}

fn validate_dependencies(pipeline: &Pipeline, registry: &ModuleRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();
    let loaded = pipeline.loaded_modules();

    for stage in pipeline.stages() {
        for key in stage.module_keys() {
            let missing = registry.missing_dependencies(key, &loaded);
            if !missing.is_empty() {
                let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
                report.errors.push(format!(
                    "Module {key} requires {} which no stage provides",
                    names.join(", ")
                ));
            }
        }
    }

    report
}
