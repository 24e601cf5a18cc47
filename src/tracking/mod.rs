//! Experiment tracking
//!
//! Provides the `ExperimentTracker` trait and two backends:
//!
//! - `FileTracker`: run directories under a local root (`file:` URIs and
//!   bare paths)
//! - `MlflowTracker`: an MLflow tracking server over its REST API
//!   (`http(s)` URIs)
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use kidney_classifier::tracking::{tracker_for_uri, RunStatus};
//!
//! let mut tracker = tracker_for_uri("file:mlruns").unwrap();
//! let run = tracker.start_run("evaluation", "first").unwrap();
//! let metrics = BTreeMap::from([("loss".to_string(), 0.42)]);
//! tracker.log_metrics(&run, &metrics).unwrap();
//! tracker.end_run(&run, RunStatus::Finished).unwrap();
//! ```

mod file;
mod mlflow;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub use file::FileTracker;
pub use mlflow::MlflowTracker;

/// Where tracked runs end up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingBackend {
    /// Local directory store; models are never registered
    File,
    /// Tracking server reachable over HTTP
    Remote,
}

impl TrackingBackend {
    pub fn is_remote(&self) -> bool {
        matches!(self, TrackingBackend::Remote)
    }
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// Identifies a started run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub experiment_id: String,
    pub run_id: String,
    pub run_name: String,
}

/// Trait for experiment tracking backends
///
/// A run is opened with `start_run`, receives params, metrics and model
/// artifacts, and is closed with `end_run`. Callers must close every run
/// they start, also when logging fails.
pub trait ExperimentTracker: Send {
    fn backend(&self) -> TrackingBackend;

    /// Open a run in `experiment`, creating the experiment if needed
    fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<RunHandle>;

    /// Record string-valued parameters
    fn log_params(&mut self, run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()>;

    /// Record final metric values
    fn log_metrics(&mut self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> Result<()>;

    /// Store `model_file` under `artifact_path` and, when
    /// `registered_name` is given, register it as a new model version
    fn log_model(
        &mut self,
        run: &RunHandle,
        artifact_path: &str,
        model_file: &Path,
        registered_name: Option<&str>,
    ) -> Result<()>;

    fn end_run(&mut self, run: &RunHandle, status: RunStatus) -> Result<()>;
}

/// Pick a backend from a tracking URI
///
/// `http://` and `https://` select [`MlflowTracker`]; `file:` URIs and bare
/// paths select [`FileTracker`].
pub fn tracker_for_uri(uri: &str) -> Result<Box<dyn ExperimentTracker>> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(Error::Tracking("tracking URI is empty".to_string()));
    }
    let lower = uri.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(Box::new(MlflowTracker::new(uri)?));
    }
    Ok(Box::new(FileTracker::new(file_uri_path(uri))))
}

/// Directory named by a `file:` URI or a bare path
pub fn file_uri_path(uri: &str) -> PathBuf {
    let path = uri
        .strip_prefix("file://")
        .or_else(|| uri.strip_prefix("file:"))
        .unwrap_or(uri);
    PathBuf::from(path)
}

/// Flatten a JSON document into dotted string parameters
///
/// Nested mappings become `outer.inner` keys; arrays and scalars are kept as
/// their JSON text, except strings which are kept verbatim.
pub fn flatten_params(value: &serde_json::Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    flatten_into(None, value, &mut out);
    out
}

fn flatten_into(prefix: Option<&str>, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    match (value, prefix) {
        (serde_json::Value::Object(map), _) => {
            for (key, child) in map {
                let key = match prefix {
                    Some(p) => format!("{p}.{key}"),
                    None => key.clone(),
                };
                flatten_into(Some(&key), child, out);
            }
        }
        (serde_json::Value::String(s), Some(key)) => {
            out.insert(key.to_string(), s.clone());
        }
        (other, Some(key)) => {
            out.insert(key.to_string(), other.to_string());
        }
        (_, None) => {}
    }
}

/// Content-derived run identifier: 32 hex chars
pub fn run_id(experiment: &str, run_name: &str, started: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(experiment.as_bytes());
    hasher.update([0]);
    hasher.update(run_name.as_bytes());
    hasher.update([0]);
    hasher.update(started.to_rfc3339().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}
