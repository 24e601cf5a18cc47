//! Local directory tracking backend
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<experiment_id>/meta.json
//! <root>/<experiment_id>/<run_id>/meta.json
//! <root>/<experiment_id>/<run_id>/params.json
//! <root>/<experiment_id>/<run_id>/metrics.json
//! <root>/<experiment_id>/<run_id>/artifacts/<artifact_path>/<file>
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{run_id, ExperimentTracker, RunHandle, RunStatus, TrackingBackend};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExperimentMeta {
    experiment_id: String,
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunMeta {
    run_id: String,
    run_name: String,
    experiment_id: String,
    status: RunStatus,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    registered_models: Vec<String>,
}

/// Tracker writing JSON files under a root directory
#[derive(Debug, Clone)]
pub struct FileTracker {
    root: PathBuf,
}

impl FileTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one run's files
    pub fn run_dir(&self, run: &RunHandle) -> PathBuf {
        self.root.join(&run.experiment_id).join(&run.run_id)
    }

    fn experiment_id(name: &str) -> String {
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        digest[..16].to_string()
    }

    fn read_meta(&self, run: &RunHandle) -> Result<RunMeta> {
        read_json(&self.run_dir(run).join("meta.json"))?
            .ok_or_else(|| Error::Tracking(format!("run {} not found", run.run_id)))
    }

    /// Merge `entries` into a JSON map file
    fn merge_map<V>(&self, run: &RunHandle, file: &str, entries: &BTreeMap<String, V>) -> Result<()>
    where
        V: Serialize + DeserializeOwned + Clone,
    {
        let path = self.run_dir(run).join(file);
        let mut map: BTreeMap<String, V> = read_json(&path)?.unwrap_or_default();
        map.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        write_json(&path, &map)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

impl ExperimentTracker for FileTracker {
    fn backend(&self) -> TrackingBackend {
        TrackingBackend::File
    }

    fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<RunHandle> {
        let experiment_id = Self::experiment_id(experiment);
        let exp_dir = self.root.join(&experiment_id);
        fs::create_dir_all(&exp_dir)?;
        let exp_meta = exp_dir.join("meta.json");
        if !exp_meta.exists() {
            write_json(
                &exp_meta,
                &ExperimentMeta {
                    experiment_id: experiment_id.clone(),
                    name: experiment.to_string(),
                    created_at: Utc::now(),
                },
            )?;
        }

        let started = Utc::now();
        let run = RunHandle {
            experiment_id,
            run_id: run_id(experiment, run_name, started),
            run_name: run_name.to_string(),
        };
        let dir = self.run_dir(&run);
        fs::create_dir_all(dir.join("artifacts"))?;
        write_json(
            &dir.join("meta.json"),
            &RunMeta {
                run_id: run.run_id.clone(),
                run_name: run.run_name.clone(),
                experiment_id: run.experiment_id.clone(),
                status: RunStatus::Running,
                start_time: started,
                end_time: None,
                registered_models: Vec::new(),
            },
        )?;
        info!("Started run '{}' ({}) in {}", run_name, run.run_id, dir.display());
        Ok(run)
    }

    fn log_params(&mut self, run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()> {
        self.merge_map(run, "params.json", params)
    }

    fn log_metrics(&mut self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.merge_map(run, "metrics.json", metrics)
    }

    fn log_model(
        &mut self,
        run: &RunHandle,
        artifact_path: &str,
        model_file: &Path,
        registered_name: Option<&str>,
    ) -> Result<()> {
        let file_name = model_file
            .file_name()
            .ok_or_else(|| Error::artifact(model_file, "model path has no file name"))?;
        if !model_file.is_file() {
            return Err(Error::artifact(model_file, "model file not found"));
        }
        let dest_dir = self.run_dir(run).join("artifacts").join(artifact_path);
        fs::create_dir_all(&dest_dir)?;
        let bytes = fs::copy(model_file, dest_dir.join(file_name))?;
        debug!("Logged model artifact {} ({bytes} bytes)", model_file.display());

        if let Some(name) = registered_name {
            let mut meta = self.read_meta(run)?;
            meta.registered_models.push(name.to_string());
            write_json(&self.run_dir(run).join("meta.json"), &meta)?;
        }
        Ok(())
    }

    fn end_run(&mut self, run: &RunHandle, status: RunStatus) -> Result<()> {
        let mut meta = self.read_meta(run)?;
        meta.status = status;
        meta.end_time = Some(Utc::now());
        write_json(&self.run_dir(run).join("meta.json"), &meta)?;
        info!("Run {} ended with status {}", run.run_id, status.as_str());
        Ok(())
    }
}
