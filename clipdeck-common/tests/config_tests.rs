//! Configuration resolution and loading tests

use clipdeck_common::config::{load_toml_or_default, resolve_config_path};
use clipdeck_common::Error;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
struct Sample {
    sample_rate: u32,
    device: String,
}

/// CLI argument wins over everything else
#[test]
fn test_cli_argument_has_priority() {
    let path = resolve_config_path(Some(Path::new("/tmp/explicit.toml")), "CLIPDECK_TEST_UNSET_VAR")
        .unwrap();
    assert_eq!(path, Path::new("/tmp/explicit.toml"));
}

/// Environment variable is used when no CLI argument is given
#[test]
fn test_env_var_used_without_cli() {
    std::env::set_var("CLIPDECK_TEST_CONFIG_ENV", "/tmp/from_env.toml");
    let path = resolve_config_path(None, "CLIPDECK_TEST_CONFIG_ENV").unwrap();
    assert_eq!(path, Path::new("/tmp/from_env.toml"));
    std::env::remove_var("CLIPDECK_TEST_CONFIG_ENV");
}

/// Missing file yields defaults instead of failing
#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let loaded: Sample = load_toml_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(loaded, Sample::default());
}

/// Present file is parsed, unknown keys fall back to defaults
#[test]
fn test_file_is_parsed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "sample_rate = 48000").unwrap();

    let loaded: Sample = load_toml_or_default(&path).unwrap();
    assert_eq!(loaded.sample_rate, 48000);
    assert_eq!(loaded.device, "");
}

/// Malformed TOML surfaces as a TOML error
#[test]
fn test_malformed_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "sample_rate = = 1").unwrap();

    let result: Result<Sample, _> = load_toml_or_default(&path);
    assert!(matches!(result, Err(Error::Toml(_))));
}
