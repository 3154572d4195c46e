use shipline::artifact::{Artifact, Catalog, CatalogError, NOARCH, OsArch};
use shipline::context::{Env, GitData};
use shipline::template::{TemplateData, TemplateError};

fn build(id: &str, os: &str, arch: &str) -> Artifact {
    Artifact::new(id, format!("{id}-{os}-{arch}"), format!("dist/{id}-{os}-{arch}"))
        .with_target(&OsArch::new(os, arch))
}

fn catalog(artifacts: Vec<Artifact>) -> Catalog {
    let mut catalog = Catalog::new();
    for artifact in artifacts {
        catalog.add(artifact);
    }
    catalog
}

#[test]
fn catalog_keeps_insertion_order_per_id() {
    let catalog = catalog(vec![
        build("default", "windows", "amd64"),
        build("archive", "linux", "amd64"),
        build("default", "linux", "amd64"),
    ]);

    let names: Vec<&str> = catalog
        .by_id("default")
        .iter()
        .map(|artifact| artifact.filename.as_str())
        .collect();
    assert_eq!(names, vec!["default-windows-amd64", "default-linux-amd64"]);
    assert!(catalog.by_id("missing").is_empty());
    assert_eq!(catalog.len(), 3);
}

#[test]
fn grouping_buckets_by_target_and_honours_skip() {
    let catalog = catalog(vec![
        build("default", "linux", "amd64"),
        build("default", "windows", "amd64"),
        build("extra", "linux", "amd64"),
        Artifact::new("notes", "CHANGELOG.md", "dist/CHANGELOG.md"),
    ]);

    let groups = catalog.group_by_os_arch(&["default", "extra", "notes"], &["windows-amd64"]);

    assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["linux-amd64", NOARCH]);
    let linux: Vec<&str> = groups
        .get("linux-amd64")
        .unwrap()
        .iter()
        .map(|artifact| artifact.id.as_str())
        .collect();
    assert_eq!(linux, vec!["default", "extra"]);
    assert_eq!(groups.get(NOARCH).unwrap().len(), 1);
}

#[test]
fn arm_revision_is_part_of_the_group_key() {
    let mut armv7 = build("default", "linux", "arm");
    armv7.arm_version = Some(7);
    let catalog = catalog(vec![armv7, build("default", "linux", "amd64")]);

    let groups = catalog.group_by_os_arch(&["default"], &[]);

    assert_eq!(
        groups.keys().collect::<Vec<_>>(),
        vec!["linux-amd64", "linux-armv7"]
    );
}

#[test]
fn rectangular_builds_pass_validation() {
    let catalog = catalog(vec![
        build("default", "linux", "amd64"),
        build("default", "windows", "amd64"),
        build("extra", "linux", "amd64"),
        build("extra", "windows", "amd64"),
    ]);

    let groups = catalog.group_by_os_arch(&["default", "extra"], &[]);
    assert_eq!(groups.validate_rectangular(), Ok(()));
}

#[test]
fn empty_selection_is_valid() {
    let catalog = Catalog::new();
    let groups = catalog.group_by_os_arch(&["default"], &[]);
    assert!(groups.is_empty());
    assert_eq!(groups.validate_rectangular(), Ok(()));
}

#[test]
fn build_without_artifacts_lists_every_target() {
    let catalog = catalog(vec![
        build("good", "linux", "amd64"),
        build("good", "windows", "amd64"),
    ]);

    let err = catalog
        .group_by_os_arch(&["good", "bad"], &[])
        .validate_rectangular()
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "no targets found for builds linux-amd64, windows-amd64"
    );
}

#[test]
fn build_missing_one_target_names_it() {
    let catalog = catalog(vec![
        build("good", "linux", "amd64"),
        build("good", "windows", "amd64"),
        build("bad", "linux", "amd64"),
    ]);

    let err = catalog
        .group_by_os_arch(&["good", "bad"], &[])
        .validate_rectangular()
        .unwrap_err();

    assert_eq!(
        err,
        CatalogError::MissingTargets {
            build: "bad".into(),
            missing: vec!["windows-amd64".into()],
        }
    );
    assert_eq!(
        err.to_string(),
        "build bad is missing os-arch target windows-amd64"
    );
}

#[test]
fn uneven_targets_are_rejected() {
    let catalog = catalog(vec![
        build("default", "linux", "amd64"),
        build("default", "linux", "amd64"),
        build("default", "windows", "amd64"),
    ]);

    let err = catalog
        .group_by_os_arch(&["default"], &[])
        .validate_rectangular()
        .unwrap_err();

    assert!(matches!(err, CatalogError::UnevenTargets { found: 1, expected: 2, .. }));
}

#[test]
fn templates_render_target_fields_and_environment() {
    let mut env = Env::new();
    env.set("CHANNEL", "beta");
    let git = GitData {
        tag: "v1.2.0".into(),
        ..GitData::default()
    };
    let mut data = TemplateData::new(&env, &git);
    data.project_name = "demo".into();
    data.version = "v1.2.0".into();
    data.set_target(&OsArch::new("linux", "arm").with_arm_version(6));
    data.ext = ".zip".into();

    let rendered = data
        .render(
            "test",
            "{{ProjectName}}-{{ .Version }}-{{OS}}-{{ArchName}}{{Ext}} {{Git.Tag}} $CHANNEL {{Env.CHANNEL}}",
        )
        .unwrap();

    assert_eq!(rendered, "demo-v1.2.0-linux-armv6.zip v1.2.0 beta beta");
}

#[test]
fn templates_reject_unknown_and_malformed_placeholders() {
    let env = Env::new();
    let git = GitData::default();
    let data = TemplateData::new(&env, &git);

    assert_eq!(
        data.render("output", "{{Nope}}").unwrap_err(),
        TemplateError::UnknownField {
            name: "output".into(),
            field: "Nope".into(),
        }
    );
    assert!(matches!(
        data.render("output", "{{Version").unwrap_err(),
        TemplateError::Malformed { .. }
    ));
}
