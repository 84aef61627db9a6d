//! End-to-end tests for the `depotsync` binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const MANIFEST: &str = r#"{
    "version": 2,
    "depot": {
        "items": [
            {"type": "DepotFile", "path": "bin/game.exe",
             "chunks": [{"compressedMd5": "aabbccdd00112233445566778899eeff", "size": 6, "compressedSize": 4}]},
            {"type": "DepotFile", "path": "__redist/vcredist.exe", "flags": ["support"],
             "chunks": [{"compressedMd5": "ddbbccdd00112233445566778899eeff", "size": 3, "compressedSize": 3}]}
        ]
    }
}"#;

fn depotsync(temp: &TempDir, args: &[&str]) -> Output {
    let config = temp.path().join("no-config.ini");
    Command::new(env!("CARGO_BIN_EXE_depotsync"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .output()
        .unwrap()
}

fn write_manifest(dir: &Path) -> String {
    let path = dir.join("manifest.json");
    fs::write(&path, MANIFEST).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_inspect_prints_summary() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(temp.path());

    let output = depotsync(&temp, &["inspect", &manifest]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Files:      2"));
}

#[test]
fn test_plan_skips_support_files() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(temp.path());

    let output = depotsync(
        &temp,
        &["plan", &manifest, "--base-url", "https://cdn", "--skip-support"],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Chunks:     1"));
    assert!(stdout.contains("https://cdn/aa/bb/aabbccdd00112233445566778899eeff"));
}

#[test]
fn test_verify_damaged_install_exits_with_two() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(temp.path());
    let install = temp.path().join("install");
    fs::create_dir_all(install.join("bin")).unwrap();
    fs::write(install.join("bin/game.exe"), b"short").unwrap();

    let output = depotsync(&temp, &["verify", &manifest, install.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_verify_intact_install_succeeds() {
    let temp = TempDir::new().unwrap();
    let manifest = write_manifest(temp.path());
    let install = temp.path().join("install");
    fs::create_dir_all(install.join("bin")).unwrap();
    fs::create_dir_all(install.join("__redist")).unwrap();
    fs::write(install.join("bin/game.exe"), b"sixbyt").unwrap();
    fs::write(install.join("__redist/vcredist.exe"), b"abc").unwrap();

    let output = depotsync(&temp, &["verify", &manifest, install.to_str().unwrap()]);
    assert!(output.status.success());
}

#[test]
fn test_missing_manifest_exits_with_one() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("absent.json");

    let output = depotsync(&temp, &["inspect", missing.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_snapshot_clear_then_show() {
    let temp = TempDir::new().unwrap();
    let install = temp.path().join("install");
    fs::create_dir_all(install.join(".DownloadInfo")).unwrap();
    fs::write(
        install.join(".DownloadInfo/depot_bytes.json"),
        r#"{"bytesDownloaded":4096,"completedDepotIds":[1]}"#,
    )
    .unwrap();
    let dir = install.to_str().unwrap();

    let shown = depotsync(&temp, &["snapshot", "show", dir]);
    assert!(shown.status.success());
    assert!(String::from_utf8_lossy(&shown.stdout).contains("4.00 KB"));

    let cleared = depotsync(&temp, &["snapshot", "clear", dir]);
    assert!(cleared.status.success());
    assert!(!install.join(".DownloadInfo/depot_bytes.json").exists());
}

#[test]
fn test_select_uses_configured_language_and_platform() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("no-config.ini"),
        "[download]\nlanguage = de-DE\nbitness = 64\nplatform = osx\n",
    )
    .unwrap();
    let product = temp.path().join("product.json");
    fs::write(
        &product,
        r#"{
            "baseProductId": "1000",
            "installDirectory": "Game",
            "depots": [
                {"productId": "1000", "languages": ["Neutral"], "manifest": "common", "size": 10},
                {"productId": "1000", "languages": ["de-DE"], "manifest": "de64", "size": 5, "osBitness": ["64"]},
                {"productId": "1000", "languages": ["de-DE"], "manifest": "de32", "size": 5, "osBitness": ["32"]},
                {"productId": "1000", "languages": ["en-US"], "manifest": "en", "size": 5}
            ],
            "products": [{"productId": "1000", "name": "Game"}]
        }"#,
    )
    .unwrap();
    let builds = temp.path().join("builds.json");
    fs::write(
        &builds,
        r#"{"items": [
            {"build_id": "11", "os": "windows", "generation": 2},
            {"build_id": "12", "os": "osx", "generation": 2}
        ]}"#,
    )
    .unwrap();

    let output = depotsync(
        &temp,
        &[
            "select",
            &product.to_string_lossy(),
            "--builds",
            &builds.to_string_lossy(),
        ],
    );
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Build 12"));
    assert!(stdout.contains("2 of 4 depot(s) for de-DE"));
    assert!(stdout.contains("de64"));
    assert!(!stdout.contains("de32"));
}
