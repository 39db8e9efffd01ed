//! Exit statuses of the binary: 2 for usage errors, 1 for failed runs.

use rstest::rstest;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A working directory with a manifest and nothing else, so no stray
/// `lectern.toml` or user configuration is picked up.
struct Workspace {
    root: TempDir,
}
impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let package = url::Url::from_file_path(root.path().join("missing.zip")).unwrap().to_string();
        let manifest = serde_json::json!({
            "Biologia": {
                "package": package,
                "resources": [{ "id": "r1", "title": "Intro", "path": "intro.html", "role": "content" }]
            },
            "Fisica": {
                "package": package,
                "resources": [{ "id": "a1", "path": "logo.png", "role": "asset" }]
            }
        });
        std::fs::write(root.path().join("manifest.json"), manifest.to_string()).unwrap();
        std::fs::create_dir(root.path().join("home")).unwrap();
        Self { root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn run(&self, args: &[&str]) -> Output {
        let home = self.path("home");
        Command::new(env!("CARGO_BIN_EXE_lectern"))
            .current_dir(self.root.path())
            .env_clear()
            .env("HOME", &home)
            .env("XDG_CONFIG_HOME", &home)
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .args(["--output-dir", "out", "--scratch-root", "scratch", "-q"])
            .args(args)
            .output()
            .unwrap()
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    entries.map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect()
}

#[test]
fn listing_subjects_succeeds() {
    let workspace = Workspace::new();
    let output = workspace.run(&["--list"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Biologia\nFisica\n");
}

#[rstest]
#[case::unknown_subject(&["Quimica"])]
#[case::subject_without_content(&["Fisica"])]
#[case::missing_config_file(&["--config", "nowhere.toml", "Biologia"])]
#[case::missing_manifest(&["--manifest", "nowhere.json", "Biologia"])]
fn usage_errors_exit_with_2(#[case] args: &[&str]) {
    let workspace = Workspace::new();
    let output = workspace.run(args);
    assert_eq!(output.status.code(), Some(2), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error: "));
    assert!(listing(&workspace.path("out")).is_empty());
}

#[test]
fn invalid_config_value_exits_with_2() {
    let workspace = Workspace::new();
    let config = workspace.write("bad.toml", "[epub]\nmodified = \"yesterday\"\n");
    let output = workspace.run(&["--config", config.to_str().unwrap(), "Biologia"]);
    assert_eq!(output.status.code(), Some(2), "{}", String::from_utf8_lossy(&output.stderr));
}

#[cfg(unix)]
#[test]
fn failed_run_exits_with_1_and_leaves_no_scratch() {
    let workspace = Workspace::new();
    // Any executable will do: the run fails fetching the package, before the
    // first page is printed.
    let config = workspace.write("chrome.toml", "[render]\nchrome = \"/bin/sh\"\n");
    let output = workspace.run(&["--config", config.to_str().unwrap(), "Biologia"]);
    assert_eq!(output.status.code(), Some(1), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stderr).contains("could not fetch the subject's package"));
    assert!(listing(&workspace.path("out")).is_empty());
    assert!(listing(&workspace.path("scratch")).is_empty());
}
