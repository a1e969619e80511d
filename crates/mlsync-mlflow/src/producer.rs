use crate::api::MlflowApi;
use anyhow::Result;
use mlsync_core::{Producer, RawRun, Report, ReportFormat, SnapshotFormatter};
use std::collections::BTreeMap;
use tracing::debug;

pub struct MlflowProducer {
    api: MlflowApi,
    formatter: SnapshotFormatter,
}

impl MlflowProducer {
    pub fn new(api: MlflowApi, format: ReportFormat) -> MlflowProducer {
        MlflowProducer {
            api,
            formatter: SnapshotFormatter::new(format),
        }
    }

    pub fn api(&self) -> &MlflowApi {
        &self.api
    }
}

impl Producer for MlflowProducer {
    fn pull(&self, detailed_metrics: bool) -> Result<Report> {
        let experiments = self.api.list_experiments()?;
        let mut runs_by_experiment: BTreeMap<String, Vec<RawRun>> = BTreeMap::new();
        for experiment in &experiments {
            let Some(experiment_id) = experiment
                .fields
                .get("experiment_id")
                .and_then(|v| v.as_str())
            else {
                continue;
            };
            let runs = self.api.search_runs(experiment_id)?;
            runs_by_experiment.insert(experiment_id.to_string(), runs);
        }
        debug!(
            experiments = experiments.len(),
            "pulled snapshot from tracking server"
        );
        self.formatter
            .format_in(&experiments, &runs_by_experiment, detailed_metrics, Some(&self.api))
    }
}
