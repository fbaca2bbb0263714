use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
        dir.path().join("assetpack.toml"),
        "entries = [\"src/index.js\"]\n\n[project]\nname = \"demo\"\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_build_writes_bundles() {
    let dir = project();
    fs::write(dir.path().join("src/index.js"), "import \"./dep\";\n").unwrap();
    fs::write(dir.path().join("src/dep.js"), "module.exports = 42;\n").unwrap();

    Command::cargo_bin("assetpack")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("assetpack.toml"))
        .args(["build", "--no-cache"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Built 1 bundle(s)"));

    assert!(dir.path().join("dist/index.js").is_file());
    assert!(dir.path().join("dist/manifest.json").is_file());
    assert!(!dir.path().join(".assetpack-cache").exists());
}

#[test]
fn test_build_reports_unresolved_imports() {
    let dir = project();
    fs::write(dir.path().join("src/index.js"), "import \"./nowhere\";\n").unwrap();

    Command::cargo_bin("assetpack")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("assetpack.toml"))
        .args(["build", "--no-cache"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("./nowhere"));

    assert!(!dir.path().join("dist/index.js").exists());
}

#[test]
fn test_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("assetpack")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("assetpack.toml"))
        .arg("build")
        .assert()
        .failure();
}
