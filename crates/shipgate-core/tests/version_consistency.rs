//! Workspace manifest checks: shared version, member list, binary name.

use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .unwrap()
        .to_path_buf()
}

fn manifest(dir: &Path) -> toml::Value {
    std::fs::read_to_string(dir.join("Cargo.toml"))
        .unwrap()
        .parse()
        .unwrap()
}

fn members() -> Vec<String> {
    manifest(&workspace_root())["workspace"]["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap().to_string())
        .collect()
}

#[test]
fn members_inherit_workspace_version() {
    let root = workspace_root();
    for member in members() {
        let doc = manifest(&root.join(&member));
        let inherits = doc["package"]["version"]
            .get("workspace")
            .and_then(|v| v.as_bool());
        assert_eq!(inherits, Some(true), "{member} pins its own version");
    }
}

#[test]
fn internal_dependencies_come_from_workspace_table() {
    let root = workspace_root();
    for member in members() {
        let doc = manifest(&root.join(&member));
        let Some(deps) = doc.get("dependencies").and_then(|d| d.as_table()) else {
            continue;
        };
        for (name, spec) in deps.iter().filter(|(n, _)| n.starts_with("shipgate-")) {
            assert_eq!(
                spec.get("workspace").and_then(|v| v.as_bool()),
                Some(true),
                "{member} depends on {name} outside the workspace table"
            );
        }
    }
}

#[test]
fn cli_binary_is_named_shipgate() {
    let doc = manifest(&workspace_root().join("crates/shipgate-cli"));
    let bins = doc["bin"].as_array().unwrap();
    assert!(bins.iter().any(|b| b["name"].as_str() == Some("shipgate")));
}

#[test]
fn library_version_matches_workspace() {
    let doc = manifest(&workspace_root());
    assert_eq!(
        doc["workspace"]["package"]["version"].as_str(),
        Some(shipgate_core::VERSION)
    );
    assert_eq!(shipgate_core::VERSION, env!("CARGO_PKG_VERSION"));
}
