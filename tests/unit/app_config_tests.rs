/*!
 * Tests for configuration loading and validation
 */

use anyhow::Result;
use std::fs;

use narravox::app_config::{Config, LogLevel};
use crate::common;

/// A missing config file is created with defaults
#[test]
fn test_load_or_create_withMissingFile_shouldWriteDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("conf.json");

    let config = Config::load_or_create(&path)?;
    assert!(path.exists());
    assert_eq!(config.scheduler.max_concurrent_requests, 10);
    assert_eq!(config.narration.assignment_tag, "ASSIGN_VOICE");

    let reloaded = Config::load_or_create(&path)?;
    assert_eq!(reloaded.narration.default_speaker, config.narration.default_speaker);
    Ok(())
}

/// Fields missing from the file fall back to their defaults
#[test]
fn test_load_or_create_withPartialFile_shouldFillDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        temp_dir.path(),
        "conf.json",
        r#"{ "scheduler": { "max_concurrent_requests": 3 }, "log_level": "debug" }"#,
    )?;

    let config = Config::load_or_create(&path)?;
    assert_eq!(config.scheduler.max_concurrent_requests, 3);
    assert_eq!(config.scheduler.retry_delays_ms.first(), Some(&500));
    assert_eq!(config.scheduler.retry_delays_ms.last(), Some(&10000));
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.narration.block_tags, vec!["Audiobook".to_string()]);
    assert!(config.validate().is_ok());
    Ok(())
}

#[test]
fn test_load_or_create_withInvalidJson_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("conf.json");
    fs::write(&path, "{ not json")?;

    assert!(Config::load_or_create(&path).is_err());
    Ok(())
}

#[test]
fn test_validate_withInvalidSettings_shouldFail() {
    let mut config = Config::default();
    config.scheduler.max_concurrent_requests = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.scheduler.retry_delays_ms.clear();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.image.width = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.narration.image_marker = "  ".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.speech.endpoint = "not a url".to_string();
    assert!(config.validate().is_err());
}
