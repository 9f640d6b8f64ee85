// tests/config_load.rs
use std::{env, fs};

use billwatch::config::{AppConfig, LogFormat, ScanStrategy, ENV_CONFIG_PATH, ENV_CONGRESS_API_KEY};
use serial_test::serial;

#[serial]
#[test]
fn explicit_path_then_env_then_default_file() {
    // Isolate CWD so a real config/ in the repo does not interfere
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::remove_var(ENV_CONFIG_PATH);

    // Nothing on disk -> defaults
    let cfg = AppConfig::load(None).unwrap();
    assert_eq!(cfg.scan.strategy, ScanStrategy::Listing);
    assert_eq!(cfg.log_format, LogFormat::Compact);

    // Default location is picked up
    fs::create_dir_all("config").unwrap();
    fs::write("config/billwatch.toml", "log_format = \"json\"\n").unwrap();
    assert_eq!(AppConfig::load(None).unwrap().log_format, LogFormat::Json);

    // Env wins over the default file
    let env_file = tmp.path().join("env.toml");
    fs::write(&env_file, "[scan]\nstrategy = \"range\"\ninterval_secs = 60\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, env_file.display().to_string());
    let cfg = AppConfig::load(None).unwrap();
    assert_eq!(cfg.scan.strategy, ScanStrategy::Range);
    assert_eq!(cfg.scan.interval_secs, 60);

    // Explicit path wins over env
    let explicit = tmp.path().join("explicit.toml");
    fs::write(&explicit, "[congress]\ncongress = 118\n").unwrap();
    let cfg = AppConfig::load(Some(&explicit)).unwrap();
    assert_eq!(cfg.current_congress(), 118);

    // Env pointing nowhere is an error
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
    assert!(AppConfig::load(None).is_err());

    env::remove_var(ENV_CONFIG_PATH);
    env::set_current_dir(&old).unwrap();
}

#[serial]
#[test]
fn api_key_comes_from_env_only() {
    env::remove_var(ENV_CONGRESS_API_KEY);
    assert!(AppConfig::congress_api_key().is_err());
    env::set_var(ENV_CONGRESS_API_KEY, "  ");
    assert!(AppConfig::congress_api_key().is_err());
    env::set_var(ENV_CONGRESS_API_KEY, "abc123");
    assert_eq!(AppConfig::congress_api_key().unwrap(), "abc123");
    env::remove_var(ENV_CONGRESS_API_KEY);
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(AppConfig::from_toml_str("[scan]\nmax_pages = \"many\"").is_err());
}
