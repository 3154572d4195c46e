use std::sync::Arc;

use anyhow::Result;
use shipline::context::Context;
use shipline::modules;
use shipline::recipe::Recipe;
use shipline::registry::{Module, ModuleKey, ModuleRegistry};
use shipline::validation::validate_recipe;

fn build_registry() -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    modules::register_defaults(&mut registry);
    Arc::new(registry)
}

struct Noop;

impl Module for Noop {
    fn run(&self, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}

#[test]
fn valid_pipeline_passes() {
    let recipe = Recipe::parse(
        r#"
builds:
  - type: go
    goos: [linux, darwin]
    goarch: [amd64, arm64]
  - type: zip
    files: ["README*", "LICENSE"]
  - type: tar
    compression: gz
    id: tarball
  - type: upx
    args: [--best]
  - type: checksum
    algorithm: sha512
publishes:
  - type: scp
    target: files@example.com:/srv/releases
  - type: artifact
    owner: acme
    name: demo
    builds: [archive, tarball, checksum]
    token_env: RELEASE_TOKEN
"#,
    )
    .unwrap();

    let report = validate_recipe(&recipe, build_registry());

    assert!(report.is_ok(), "unexpected errors: {:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn every_broken_item_is_reported() {
    let recipe = Recipe::parse(
        r#"
builds:
  - type: nope
  - type: checksum
    algorithm: md5
setups:
  - name: demo
"#,
    )
    .unwrap();

    let report = validate_recipe(&recipe, build_registry());

    assert!(!report.is_ok());
    assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
    assert_eq!(
        report.errors[0],
        "definition build, item #1: unknown module build:nope"
    );
    assert!(
        report.errors[1].starts_with("definition build, item #2: cannot decode module build:checksum"),
        "{}",
        report.errors[1]
    );
    assert_eq!(
        report.errors[2],
        "definition setup, item #1: type not defined"
    );
}

#[test]
fn unknown_fields_are_rejected() {
    let recipe = Recipe::parse("builds:\n  - type: zip\n    compresion: store\n").unwrap();

    let report = validate_recipe(&recipe, build_registry());

    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("compresion"), "{}", report.errors[0]);
}

#[test]
fn unknown_and_empty_sections_warn() {
    let recipe = Recipe::parse("releases:\n  - type: show\npublishes: []\n").unwrap();

    let report = validate_recipe(&recipe, build_registry());

    assert!(report.is_ok(), "{:?}", report.errors);
    assert!(
        report
            .warnings
            .contains(&"Unknown section 'releases' is ignored".to_string())
    );
    assert!(
        report
            .warnings
            .contains(&"Section 'publishes' has no modules".to_string())
    );
}

#[test]
fn non_map_document_is_an_error() {
    let recipe = Recipe::parse("- builds\n").unwrap();

    let report = validate_recipe(&recipe, build_registry());

    assert_eq!(report.errors, vec!["pipeline definition is not a map".to_string()]);
}

#[test]
fn unsatisfied_dependencies_are_reported() {
    let mut registry = ModuleRegistry::new();
    registry.register(
        "build",
        "compile",
        vec![ModuleKey::new("setup", "prep")],
        |_| Ok(Box::new(Noop) as Box<dyn Module>),
    );
    let recipe = Recipe::parse("builds:\n  - type: compile\n").unwrap();

    let report = validate_recipe(&recipe, Arc::new(registry));

    assert_eq!(
        report.errors,
        vec!["Module build:compile requires setup:prep which no stage provides".to_string()]
    );
}
