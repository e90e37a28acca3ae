//! Workspace manifest consistency.
//!
//! Every package key a member inherits with `<key>.workspace = true` must be
//! defined in the root `[workspace.package]` table, otherwise no member of
//! the workspace loads.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("e2e-tests lives two levels below the workspace root")
        .to_path_buf()
}

/// Keys set in `[section]` of a manifest.
fn section_keys(manifest: &str, section: &str) -> BTreeSet<String> {
    let header = format!("[{section}]");
    manifest
        .lines()
        .map(str::trim)
        .skip_while(|line| *line != header)
        .skip(1)
        .take_while(|line| !line.starts_with('['))
        .filter_map(|line| line.split_once('=').map(|(key, _)| key.trim().to_string()))
        .filter(|key| !key.is_empty() && !key.starts_with('#'))
        .collect()
}

#[test]
fn test_inherited_package_keys_are_defined() {
    let root = workspace_root();
    let root_manifest = fs::read_to_string(root.join("Cargo.toml")).unwrap();
    let defined = section_keys(&root_manifest, "workspace.package");
    assert!(defined.contains("version"));

    let mut members = 0;
    for entry in fs::read_dir(root.join("crates")).unwrap() {
        let manifest_path = entry.unwrap().path().join("Cargo.toml");
        let Ok(manifest) = fs::read_to_string(&manifest_path) else {
            continue;
        };
        members += 1;
        for key in section_keys(&manifest, "package") {
            if let Some(inherited) = key.strip_suffix(".workspace") {
                assert!(
                    defined.contains(inherited),
                    "{} inherits `{}` but the workspace does not define it",
                    manifest_path.display(),
                    inherited
                );
            }
        }
    }
    assert!(members >= 7);
}
