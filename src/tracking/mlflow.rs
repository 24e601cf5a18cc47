//! MLflow tracking server backend (REST API 2.0)

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{ExperimentTracker, RunHandle, RunStatus, TrackingBackend};
use crate::error::{Error, Result};

const USERNAME_VAR: &str = "MLFLOW_TRACKING_USERNAME";
const PASSWORD_VAR: &str = "MLFLOW_TRACKING_PASSWORD";
const TOKEN_VAR: &str = "MLFLOW_TRACKING_TOKEN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Credentials {
    None,
    Basic { username: String, password: Option<String> },
    Bearer(String),
}

impl Credentials {
    fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        match (var(USERNAME_VAR), var(PASSWORD_VAR), var(TOKEN_VAR)) {
            (Some(username), password, _) => Credentials::Basic { username, password },
            (None, _, Some(token)) => Credentials::Bearer(token),
            _ => Credentials::None,
        }
    }

    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::None => request,
            Credentials::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            Credentials::Bearer(token) => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

/// Client for an MLflow tracking server
#[derive(Debug, Clone)]
pub struct MlflowTracker {
    base_url: String,
    client: Client,
    credentials: Credentials,
}

impl MlflowTracker {
    /// Credentials come from `MLFLOW_TRACKING_USERNAME` and
    /// `MLFLOW_TRACKING_PASSWORD`, or `MLFLOW_TRACKING_TOKEN`
    pub fn new(tracking_uri: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Tracking(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(tracking_uri, client))
    }

    pub fn with_client(tracking_uri: &str, client: Client) -> Self {
        Self {
            base_url: tracking_uri.trim_end_matches('/').to_string(),
            client,
            credentials: Credentials::from_env(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{path}", self.base_url)
    }

    fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
        self.credentials
            .apply(request)
            .send()
            .map_err(|e| Error::Tracking(format!("{what}: {e}")))
    }

    /// Parse a successful JSON reply or turn the failure into an error
    fn reply(what: &str, response: Response) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| Error::Tracking(format!("{what}: {e}")))?;
        if !status.is_success() {
            let detail = serde_json::from_str::<ApiError>(&body)
                .map(|e| format!("{} {}", e.error_code, e.message))
                .unwrap_or(body);
            return Err(Error::Tracking(format!("{what} returned {status}: {}", detail.trim())));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| Error::Tracking(format!("{what}: invalid reply: {e}")))
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self.send(path, self.client.post(self.endpoint(path)).json(body))?;
        Self::reply(path, response)
    }

    fn experiment_id(&self, name: &str) -> Result<String> {
        let path = "experiments/get-by-name";
        let response = self.send(
            path,
            self.client
                .get(self.endpoint(path))
                .query(&[("experiment_name", name)]),
        )?;
        if response.status() != StatusCode::NOT_FOUND {
            let reply = Self::reply(path, response)?;
            if let Some(id) = reply["experiment"]["experiment_id"].as_str() {
                return Ok(id.to_string());
            }
        }

        info!("Creating experiment '{name}'");
        let reply = self.post("experiments/create", &json!({ "name": name }))?;
        reply["experiment_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Tracking("experiments/create: missing experiment_id".to_string()))
    }

    fn upload_artifact(&self, run: &RunHandle, artifact_path: &str, file: &Path) -> Result<()> {
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::artifact(file, "model path has no file name"))?;
        let bytes = fs::read(file).map_err(|e| Error::artifact(file, e.to_string()))?;
        let url = format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}/artifacts/{}/{}",
            self.base_url,
            run.experiment_id,
            run.run_id,
            artifact_path.trim_matches('/'),
            file_name
        );
        let size = bytes.len();
        let response = self.send("artifact upload", self.client.put(url).body(bytes))?;
        Self::reply("artifact upload", response)?;
        debug!("Uploaded {file_name} ({size} bytes)");
        Ok(())
    }

    fn register_model(&self, run: &RunHandle, artifact_path: &str, name: &str) -> Result<()> {
        match self.post("registered-models/create", &json!({ "name": name })) {
            Ok(_) => info!("Registered model '{name}'"),
            Err(Error::Tracking(msg)) if msg.contains("RESOURCE_ALREADY_EXISTS") => {
                debug!("Registered model '{name}' already exists")
            }
            Err(e) => return Err(e),
        }
        let reply = self.post(
            "model-versions/create",
            &json!({
                "name": name,
                "source": format!("runs:/{}/{}", run.run_id, artifact_path.trim_matches('/')),
                "run_id": run.run_id,
            }),
        )?;
        let version = reply["model_version"]["version"].as_str().unwrap_or("?");
        info!("Created version {version} of model '{name}'");
        Ok(())
    }
}

impl ExperimentTracker for MlflowTracker {
    fn backend(&self) -> TrackingBackend {
        TrackingBackend::Remote
    }

    fn start_run(&mut self, experiment: &str, run_name: &str) -> Result<RunHandle> {
        let experiment_id = self.experiment_id(experiment)?;
        let reply = self.post(
            "runs/create",
            &json!({
                "experiment_id": experiment_id,
                "run_name": run_name,
                "start_time": Utc::now().timestamp_millis(),
                "tags": [{ "key": "mlflow.runName", "value": run_name }],
            }),
        )?;
        let run_id = reply["run"]["info"]["run_id"]
            .as_str()
            .ok_or_else(|| Error::Tracking("runs/create: missing run_id".to_string()))?;
        info!("Started MLflow run '{run_name}' ({run_id})");
        Ok(RunHandle {
            experiment_id,
            run_id: run_id.to_string(),
            run_name: run_name.to_string(),
        })
    }

    fn log_params(&mut self, run: &RunHandle, params: &BTreeMap<String, String>) -> Result<()> {
        let params: Vec<Value> = params
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect();
        self.post("runs/log-batch", &json!({ "run_id": run.run_id, "params": params }))?;
        Ok(())
    }

    fn log_metrics(&mut self, run: &RunHandle, metrics: &BTreeMap<String, f64>) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        let metrics: Vec<Value> = metrics
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value, "timestamp": timestamp, "step": 0 }))
            .collect();
        self.post("runs/log-batch", &json!({ "run_id": run.run_id, "metrics": metrics }))?;
        Ok(())
    }

    fn log_model(
        &mut self,
        run: &RunHandle,
        artifact_path: &str,
        model_file: &Path,
        registered_name: Option<&str>,
    ) -> Result<()> {
        self.upload_artifact(run, artifact_path, model_file)?;
        if let Some(name) = registered_name {
            self.register_model(run, artifact_path, name)?;
        }
        Ok(())
    }

    fn end_run(&mut self, run: &RunHandle, status: RunStatus) -> Result<()> {
        let result = self.post(
            "runs/update",
            &json!({
                "run_id": run.run_id,
                "status": status.as_str(),
                "end_time": Utc::now().timestamp_millis(),
            }),
        );
        if let Err(e) = &result {
            warn!("Could not close run {}: {e}", run.run_id);
        }
        result.map(|_| ())
    }
}
