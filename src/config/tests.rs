//! Integration tests for config module

use super::*;
use crate::error::Error;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const PARAMS: &str = r#"
AUGMENTATION: true
IMAGE_SIZE: [224, 224, 3]
BATCH_SIZE: 16
INCLUDE_TOP: false
EPOCHS: 5
CLASSES: 2
WEIGHTS: imagenet
LEARNING_RATE: 0.01
"#;

fn architecture(root: &Path) -> String {
    let r = root.display();
    format!(
        r#"
artifacts_root: {r}/artifacts

data_ingestion:
  root_dir: {r}/artifacts/data_ingestion
  source_URL: https://drive.google.com/file/d/1vlhZ5c7abUKF8xXERIw6m9Te8fW7ohw3/view?usp=sharing
  local_data_file: {r}/artifacts/data_ingestion/data.zip
  unzip_dir: {r}/artifacts/data_ingestion

prepare_base_model:
  root_dir: {r}/artifacts/prepare_base_model
  base_model_path: {r}/artifacts/prepare_base_model/base_model.json
  updated_base_model_path: {r}/artifacts/prepare_base_model/base_model_updated.json

training:
  root_dir: {r}/artifacts/training
  trained_model_path: {r}/artifacts/training/model.json

evaluation:
  root_dir: {r}/artifacts/evaluation
  score_file: {r}/artifacts/evaluation/scores.json
  mlflow_uri: {r}/mlruns
"#
    )
}

fn write_documents(tmp: &TempDir, config: &str, params: &str) -> (PathBuf, PathBuf) {
    let config_path = tmp.path().join("config.yaml");
    let params_path = tmp.path().join("params.yaml");
    fs::write(&config_path, config).unwrap();
    fs::write(&params_path, params).unwrap();
    (config_path, params_path)
}

fn manager(tmp: &TempDir) -> ConfigurationManager {
    let (config_path, params_path) = write_documents(tmp, &architecture(tmp.path()), PARAMS);
    ConfigurationManager::new(config_path, params_path).unwrap()
}

#[test]
fn test_construction_provisions_artifacts_root() {
    let tmp = TempDir::new().unwrap();
    let _manager = manager(&tmp);
    assert!(tmp.path().join("artifacts").is_dir());
}

#[test]
fn test_accessors_are_idempotent() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    assert_eq!(
        manager.get_data_ingestion_config().unwrap(),
        manager.get_data_ingestion_config().unwrap()
    );
    assert_eq!(
        manager.get_prepare_base_model_config().unwrap(),
        manager.get_prepare_base_model_config().unwrap()
    );
    assert_eq!(
        manager.get_training_config().unwrap(),
        manager.get_training_config().unwrap()
    );
    assert_eq!(
        manager.get_evaluation_config().unwrap(),
        manager.get_evaluation_config().unwrap()
    );
}

#[test]
fn test_accessors_provision_stage_roots() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    manager.get_data_ingestion_config().unwrap();
    manager.get_prepare_base_model_config().unwrap();
    manager.get_training_config().unwrap();
    manager.get_evaluation_config().unwrap();

    for stage in ["data_ingestion", "prepare_base_model", "training", "evaluation"] {
        assert!(tmp.path().join("artifacts").join(stage).is_dir(), "{stage}");
    }
}

#[test]
fn test_training_data_joins_unzip_dir() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    let ingestion = manager.get_data_ingestion_config().unwrap();
    let training = manager.get_training_config().unwrap();
    let evaluation = manager.get_evaluation_config().unwrap();

    let expected = ingestion.unzip_dir.join("kidney-ct-scan-image");
    assert_eq!(training.training_data, expected);
    assert_eq!(evaluation.training_data, expected);
}

#[test]
fn test_evaluation_paths_come_from_documents() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    let training = manager.get_training_config().unwrap();
    let evaluation = manager.get_evaluation_config().unwrap();

    assert_eq!(evaluation.path_of_model, training.trained_model_path);
    assert_eq!(
        evaluation.score_file,
        tmp.path().join("artifacts/evaluation/scores.json")
    );
    assert_eq!(evaluation.all_params["EPOCHS"], serde_json::json!(5));
}

#[test]
fn test_optional_params_default() {
    let tmp = TempDir::new().unwrap();
    let manager = manager(&tmp);

    let prepare = manager.get_prepare_base_model_config().unwrap();
    assert_eq!(prepare.freeze_policy, FreezePolicy::All);
    assert_eq!(prepare.params_weights, WeightSource::Bundled);
    assert_eq!(prepare.params_seed, DEFAULT_SEED);

    let training = manager.get_training_config().unwrap();
    assert_eq!(training.params_validation_split, DEFAULT_VALIDATION_SPLIT);
}

#[test]
fn test_freeze_till_override() {
    let tmp = TempDir::new().unwrap();
    let params = format!("{PARAMS}FREEZE_ALL: false\nFREEZE_TILL: 4\n");
    let (config_path, params_path) = write_documents(&tmp, &architecture(tmp.path()), &params);
    let manager = ConfigurationManager::new(config_path, params_path).unwrap();

    let prepare = manager.get_prepare_base_model_config().unwrap();
    assert_eq!(prepare.freeze_policy, FreezePolicy::AllButLast(4));
}

#[test]
fn test_zero_freeze_till_freezes_nothing() {
    let tmp = TempDir::new().unwrap();
    let params = format!("{PARAMS}FREEZE_ALL: false\nFREEZE_TILL: 0\n");
    let (config_path, params_path) = write_documents(&tmp, &architecture(tmp.path()), &params);
    let manager = ConfigurationManager::new(config_path, params_path).unwrap();

    let prepare = manager.get_prepare_base_model_config().unwrap();
    assert_eq!(prepare.freeze_policy, FreezePolicy::None);
}

#[test]
fn test_missing_section_fails_accessor() {
    let tmp = TempDir::new().unwrap();
    let config = architecture(tmp.path());
    let config = config
        .split("evaluation:")
        .next()
        .unwrap()
        .to_string();
    let (config_path, params_path) = write_documents(&tmp, &config, PARAMS);
    let manager = ConfigurationManager::new(config_path, params_path).unwrap();

    assert!(manager.get_training_config().is_ok());
    let err = manager.get_evaluation_config().unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::MissingKey(ref key)) if key == "evaluation"
    ));
}

#[test]
fn test_missing_param_fails_accessor() {
    let tmp = TempDir::new().unwrap();
    let params = PARAMS.replace("EPOCHS: 5\n", "");
    let (config_path, params_path) = write_documents(&tmp, &architecture(tmp.path()), &params);
    let manager = ConfigurationManager::new(config_path, params_path).unwrap();

    let err = manager.get_training_config().unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::MissingKey(ref key)) if key == "EPOCHS"
    ));
}

#[test]
fn test_empty_params_document_is_configuration_error() {
    let tmp = TempDir::new().unwrap();
    let (config_path, params_path) = write_documents(&tmp, &architecture(tmp.path()), "");

    let err = ConfigurationManager::new(config_path, params_path).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::Empty { .. })));
}

#[test]
fn test_invalid_value_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let params = PARAMS.replace("BATCH_SIZE: 16", "BATCH_SIZE: 0");
    let (config_path, params_path) = write_documents(&tmp, &architecture(tmp.path()), &params);
    let manager = ConfigurationManager::new(config_path, params_path).unwrap();

    let err = manager.get_training_config().unwrap_err();
    assert!(matches!(
        err,
        Error::Validation(ValidationError::InvalidBatchSize(0))
    ));
}
