use anyhow::{anyhow, Context, Result};
use mlsync_core::{MetricHistorySource, RawExperiment, RawMetricPoint, RawRun};
use serde::Deserialize;
use serde_json::json;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const SEARCH_MAX_RESULTS: u32 = 50_000;

/// Thin blocking client for the MLflow tracking REST API. `root` points at
/// the server's `/api` prefix.
pub struct MlflowApi {
    root: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct ExperimentsResponse {
    #[serde(default)]
    experiments: Vec<RawExperiment>,
}

#[derive(Debug, Deserialize)]
struct RunsResponse {
    #[serde(default)]
    runs: Vec<RawRun>,
}

#[derive(Debug, Deserialize)]
struct MetricHistoryResponse {
    #[serde(default)]
    metrics: Vec<RawMetricPoint>,
}

impl MlflowApi {
    pub fn new(root: impl Into<String>) -> MlflowApi {
        MlflowApi {
            root: root.into().trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Probe the server root until it answers, with a bounded number of
    /// attempts one second apart. The Python original shelled out to start
    /// `mlflow ui`; here the user is told to start the server themselves.
    pub fn wait_until_ready(&self, max_attempts: u32) -> Result<()> {
        let server_root = self.root.trim_end_matches("/api").to_string();
        for attempt in 0..max_attempts {
            match self.client.head(&server_root).send() {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    debug!(status = %response.status(), "tracking server answered but is not ready")
                }
                Err(err) => {
                    if attempt > 0 && attempt % 5 == 0 {
                        warn!(attempt, error = %err, "tracking server is not up yet");
                    }
                }
            }
            thread::sleep(Duration::from_secs(1));
        }
        Err(anyhow!(
            "MLflow server at {server_root} did not come up; start it with `mlflow ui` and retry"
        ))
    }

    pub fn list_experiments(&self) -> Result<Vec<RawExperiment>> {
        let url = format!("{}/2.0/mlflow/experiments/list", self.root);
        let response: ExperimentsResponse = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("listing experiments from {url}"))?
            .json()
            .context("decoding experiments list")?;
        Ok(response.experiments)
    }

    pub fn search_runs(&self, experiment_id: &str) -> Result<Vec<RawRun>> {
        let url = format!("{}/2.0/mlflow/runs/search", self.root);
        let response: RunsResponse = self
            .client
            .post(&url)
            .json(&json!({
                "experiment_ids": [experiment_id],
                "max_results": SEARCH_MAX_RESULTS,
            }))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("searching runs for experiment {experiment_id}"))?
            .json()
            .context("decoding run search results")?;
        Ok(response.runs)
    }

    pub fn metric_history(&self, run_id: &str, metric_key: &str) -> Result<Vec<RawMetricPoint>> {
        let url = format!("{}/2.0/mlflow/metrics/get-history", self.root);
        let response: MetricHistoryResponse = self
            .client
            .get(&url)
            .query(&[("run_id", run_id), ("metric_key", metric_key)])
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("fetching history of metric {metric_key} for run {run_id}"))?
            .json()
            .context("decoding metric history")?;
        Ok(response.metrics)
    }
}

impl MetricHistorySource for MlflowApi {
    fn metric_history(&self, run_id: &str, metric_key: &str) -> Result<Vec<RawMetricPoint>> {
        MlflowApi::metric_history(self, run_id, metric_key)
    }
}
