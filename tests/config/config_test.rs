//! Coverage for config parsing, env overrides and path resolution.

use std::collections::HashMap;
use std::path::PathBuf;

use armature::config::{config_dir, config_path_with, Config, CONFIG_PATH_ENV};
use armature::logs::pipeline::DEFAULT_BATCH_SIZE;

fn resolver(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn empty_config_uses_defaults() {
    let config = Config::from_toml("").expect("empty config should parse");

    assert_eq!(config.helper.elevate, "pkexec");
    assert_eq!(config.helper.program, "aa-caller");
    assert_eq!(
        config.paths.profile_dirs,
        vec![
            PathBuf::from("/etc/apparmor.d/"),
            PathBuf::from("/var/lib/snapd/apparmor/profiles/")
        ]
    );
    assert_eq!(config.paths.abstractions_dir, PathBuf::from("/etc/apparmor.d/abstractions"));
    assert!(config.paths.log_sources.is_empty());
    assert_eq!(config.ingest.batch_size, DEFAULT_BATCH_SIZE);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let toml_str = r#"
[helper]
program = "/usr/libexec/aa-caller"

[paths]
log_sources = ["/var/log/kern.log"]
"#;
    let config = Config::from_toml(toml_str).expect("config should parse");

    assert_eq!(config.helper.program, "/usr/libexec/aa-caller");
    assert_eq!(config.helper.elevate, "pkexec");
    assert_eq!(config.paths.log_sources, vec![PathBuf::from("/var/log/kern.log")]);
    assert_eq!(config.paths.profile_dirs.len(), 2);
}

#[test]
fn invalid_toml_is_error() {
    assert!(Config::from_toml("[helper\nprogram =").is_err());
}

#[test]
fn empty_elevate_runs_helper_directly() {
    let config = Config::from_toml("[helper]\nelevate = \"\"\n").expect("config should parse");
    let helper = config.helper.command();
    assert!(helper.elevate.is_none());
    assert_eq!(helper.argv("-s", &[]), vec!["aa-caller", "-s"]);
}

#[test]
fn default_helper_command_elevates() {
    let helper = Config::default().helper.command();
    assert_eq!(helper.elevate.as_deref(), Some("pkexec"));
}

#[test]
fn env_overrides_apply() {
    let mut config = Config::default();
    config.apply_overrides(resolver(&[
        ("ARMATURE_HELPER", "/opt/aa-caller"),
        ("ARMATURE_ELEVATE", "sudo"),
        ("ARMATURE_PROFILE_DIRS", "/a::/b"),
        ("ARMATURE_ABSTRACTIONS_DIR", "/a/abstractions"),
        ("ARMATURE_BATCH_SIZE", "64"),
    ]));

    assert_eq!(config.helper.program, "/opt/aa-caller");
    assert_eq!(config.helper.elevate, "sudo");
    assert_eq!(config.paths.profile_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    assert_eq!(config.paths.abstractions_dir, PathBuf::from("/a/abstractions"));
    assert_eq!(config.ingest.batch_size, 64);
}

#[test]
fn invalid_batch_size_override_is_ignored() {
    for value in ["0", "-3", "lots"] {
        let mut config = Config::default();
        config.apply_overrides(resolver(&[("ARMATURE_BATCH_SIZE", value)]));
        assert_eq!(config.ingest.batch_size, DEFAULT_BATCH_SIZE, "value {value}");
    }
}

#[test]
fn explicit_config_path_env_wins() {
    let path = config_path_with(resolver(&[(CONFIG_PATH_ENV, "/tmp/armature.toml")]))
        .expect("path should resolve");
    assert_eq!(path, PathBuf::from("/tmp/armature.toml"));
}

#[test]
fn default_config_path_is_under_config_dir() {
    let path = config_path_with(resolver(&[])).expect("path should resolve");
    let dir = config_dir().expect("config dir should resolve");
    assert_eq!(path, dir.join("config.toml"));
    assert!(dir.ends_with(".config/armature"));
}

#[test]
fn load_reads_explicit_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[ingest]\nbatch_size = 10\n").expect("write");

    let config = Config::load(Some(path.as_path())).expect("config should load");

    // ARMATURE_BATCH_SIZE is not set in the test environment.
    assert_eq!(config.ingest.batch_size, 10);
}

#[test]
fn load_missing_explicit_file_uses_defaults() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Config::load(Some(tmp.path().join("absent.toml").as_path())).expect("defaults");
    assert_eq!(config.helper.program, "aa-caller");
}
