use cancerdetect_daemon::config::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.general.notifications);
    assert_eq!(config.training.tick_interval(), Duration::from_millis(500));
    assert_eq!(config.analysis.tick_interval(), Duration::from_millis(1500));
    assert_eq!(config.training.max_increment, 15.0);
    assert_eq!(config.scoring.benign_min, 0.2);
    assert_eq!(config.scoring.malignant_max, 0.4);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_from_toml() {
    let toml_content = r#"
[general]
notifications = false
default_model_name = "Derm Mock"
seed = 42

[training]
tick_interval_ms = 100
max_increment = 20.0
accuracy_min = 80.0
accuracy_max = 90.0

[analysis]
tick_interval_ms = 250

[scoring]
benign_min = 0.3
benign_max = 0.7
malignant_min = 0.0
malignant_max = 0.3
"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml_content.as_bytes()).unwrap();
    let config = Config::load(file.path()).unwrap();
    assert!(!config.general.notifications);
    assert_eq!(config.general.seed, Some(42));
    assert_eq!(config.training.max_increment, 20.0);
    assert_eq!(config.analysis.tick_interval_ms, 250);
    // [intake] omitted falls back to the default extensions
    assert!(config.intake.extensions.iter().any(|e| e == "png"));
}

#[test]
fn test_rejects_empty_scoring_range() {
    let toml_content = r#"
[general]
notifications = true
default_model_name = "m"

[training]
tick_interval_ms = 500
max_increment = 15.0
accuracy_min = 85.0
accuracy_max = 95.0

[analysis]
tick_interval_ms = 1500

[scoring]
benign_min = 0.8
benign_max = 0.2
malignant_min = 0.0
malignant_max = 0.4
"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml_content.as_bytes()).unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_rejects_infinite_scoring_bound() {
    let toml_content = r#"
[general]
notifications = true
default_model_name = "m"

[training]
tick_interval_ms = 500
max_increment = 15.0
accuracy_min = 85.0
accuracy_max = 95.0

[analysis]
tick_interval_ms = 1500

[scoring]
benign_min = 0.2
benign_max = inf
malignant_min = 0.0
malignant_max = 0.4
"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml_content.as_bytes()).unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_validate_rejects_non_finite_training_bounds() {
    let mut config = Config::default();
    config.training.max_increment = f64::INFINITY;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.training.max_increment = f64::NAN;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.training.accuracy_max = f64::INFINITY;
    assert!(config.validate().is_err());

    // finite bounds whose width overflows
    let mut config = Config::default();
    config.scoring.malignant_min = -f64::MAX;
    config.scoring.malignant_max = f64::MAX;
    assert!(config.validate().is_err());
}

#[test]
fn test_save_config() {
    let mut config = Config::default();
    config.general.seed = Some(7);
    config.training.tick_interval_ms = 50;
    let file = NamedTempFile::new().unwrap();
    config.save(file.path()).unwrap();
    let loaded = Config::load(file.path()).unwrap();
    assert_eq!(loaded.general.seed, Some(7));
    assert_eq!(loaded.training.tick_interval_ms, 50);
    assert_eq!(loaded.scoring, config.scoring);
}
