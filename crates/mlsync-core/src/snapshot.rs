use crate::error::SyncError;
use crate::format::{CompiledFormat, FieldTag, ReportFormat, UnmatchedPolicy};
use crate::report::{
    Experiment, Field, MetricHistory, MetricHistorySource, RawExperiment, RawField, RawRun,
    Report, Run,
};
use crate::value::{coerce, FieldType, FieldValue};
use anyhow::Result;
use std::collections::BTreeMap;

/// Converts raw backend snapshots into the canonical Report shape, applying
/// the compiled report format and the per-tag unmatched policies.
pub struct SnapshotFormatter {
    format: CompiledFormat,
}

impl SnapshotFormatter {
    pub fn new(format: ReportFormat) -> SnapshotFormatter {
        SnapshotFormatter {
            format: format.compile(),
        }
    }

    pub fn compiled(&self) -> &CompiledFormat {
        &self.format
    }

    pub fn format_in(
        &self,
        experiments: &[RawExperiment],
        runs_by_experiment: &BTreeMap<String, Vec<RawRun>>,
        detailed_metrics: bool,
        history_source: Option<&dyn MetricHistorySource>,
    ) -> Result<Report> {
        let mut report = Report::default();
        for raw in experiments {
            let experiment = self.format_experiment(raw)?;
            let raw_runs = runs_by_experiment
                .get(&experiment.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let mut experiment = experiment;
            experiment.runs = self.format_runs(raw_runs, detailed_metrics, history_source)?;
            // Experiments with no runs never surface to the diff engine.
            if !experiment.runs.is_empty() {
                report.insert(experiment);
            }
        }
        Ok(report)
    }

    fn format_experiment(&self, raw: &RawExperiment) -> Result<Experiment> {
        let key = &self.format.experiment.key;
        let name = raw
            .fields
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                SyncError::ContractViolation(format!(
                    "experiment is missing its required key field '{key}'"
                ))
            })?
            .to_string();

        let mut fields = BTreeMap::new();
        let mut id = String::new();
        for (field_key, raw_value) in &raw.fields {
            let value = FieldValue::from_json(raw_value);
            match self.format.experiment.values.get(field_key) {
                Some(spec) => {
                    if spec.alias == "id" {
                        id = value.to_string();
                    }
                    fields.insert(spec.alias.clone(), value);
                }
                None => {
                    if self.format.experiment_unmatched == UnmatchedPolicy::Add {
                        fields.insert(field_key.clone(), value);
                    }
                }
            }
        }

        Ok(Experiment {
            name,
            id,
            fields,
            runs: BTreeMap::new(),
        })
    }

    fn format_runs(
        &self,
        raw_runs: &[RawRun],
        detailed_metrics: bool,
        history_source: Option<&dyn MetricHistorySource>,
    ) -> Result<BTreeMap<String, Run>> {
        let mut runs = BTreeMap::new();
        for (run_index, raw) in raw_runs.iter().enumerate() {
            let key = &self.format.run.key;
            let run_id = raw
                .info
                .get(key)
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    SyncError::ContractViolation(format!(
                        "run is missing its required key field '{key}'"
                    ))
                })?
                .to_string();

            let mut run = Run::default();
            for (field_key, raw_value) in &raw.info {
                let value = FieldValue::from_json(raw_value);
                self.place_field(&mut run, field_key, value, FieldTag::Info, None);
            }

            let groups: [(FieldTag, &[RawField]); 3] = [
                (FieldTag::Metrics, &raw.data.metrics),
                (FieldTag::Params, &raw.data.params),
                (FieldTag::Tags, &raw.data.tags),
            ];
            for (tag, group) in groups {
                for raw_field in group {
                    let history = if tag == FieldTag::Metrics && detailed_metrics {
                        match history_source {
                            Some(source) => {
                                let points = source.metric_history(&run_id, &raw_field.key)?;
                                MetricHistory::from_points(&points)
                            }
                            None => None,
                        }
                    } else {
                        None
                    };
                    let value = FieldValue::from_json(&raw_field.value);
                    self.place_field(&mut run, &raw_field.key, value, tag, history);
                }
            }

            self.finalize_run(&mut run, &run_id, run_index);
            runs.insert(run_id, run);
        }
        Ok(runs)
    }

    fn place_field(
        &self,
        run: &mut Run,
        key: &str,
        value: FieldValue,
        tag: FieldTag,
        history: Option<MetricHistory>,
    ) {
        match self.format.run.values.get(key) {
            Some(spec) => {
                let coerced = coerce(value, spec.field_type);
                run.insert(Field {
                    key: key.to_string(),
                    alias: spec.alias.clone(),
                    field_type: spec.field_type,
                    tag: spec.tag,
                    description: spec.description.clone(),
                    value: coerced,
                    history,
                });
            }
            None => {
                if self.format.policy_for(tag) == UnmatchedPolicy::Add {
                    run.insert(Field {
                        key: key.to_string(),
                        alias: key.to_string(),
                        field_type: value.runtime_type(),
                        tag,
                        description: String::new(),
                        value,
                        history,
                    });
                }
            }
        }
    }

    fn finalize_run(&self, run: &mut Run, run_id: &str, run_index: usize) {
        if run.get("Name").is_none() {
            // Positional only; stable within a single pull, not across pulls.
            run.insert(Field {
                key: "Name".to_string(),
                alias: "Name".to_string(),
                field_type: FieldType::Str,
                tag: FieldTag::Info,
                description: "The name of the run".to_string(),
                value: FieldValue::Str(format!("Run {run_index}")),
                history: None,
            });
        }
        if run.get("uid").is_none() {
            run.insert(Field {
                key: "uid".to_string(),
                alias: "uid".to_string(),
                field_type: FieldType::Str,
                tag: FieldTag::Info,
                description: "The unique ID of the run".to_string(),
                value: FieldValue::Str(run_id.to_string()),
                history: None,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RawMetricPoint;
    use serde_json::json;

    fn formatter() -> SnapshotFormatter {
        let yaml = "\
elements:
  run_name:
    alias: Name
    type: str
    tag: info
  status:
    alias: status
    type: select
    tag: info
  start_time:
    alias: Started
    type: timestamp
    tag: info
  accuracy:
    alias: Accuracy
    type: float
    tag: metrics
  lr:
    alias: Learning Rate
    type: float
    tag: params
policies:
  info: ignore
  metrics: add
  params: ignore
  tags: ignore
";
        SnapshotFormatter::new(ReportFormat::from_yaml(yaml).unwrap())
    }

    fn raw_experiment(name: &str, id: &str) -> RawExperiment {
        serde_json::from_value(json!({
            "name": name,
            "experiment_id": id,
            "lifecycle_stage": "active",
        }))
        .unwrap()
    }

    fn raw_run(run_id: &str) -> RawRun {
        serde_json::from_value(json!({
            "info": {"run_id": run_id, "run_name": run_id, "status": "RUNNING"},
            "data": {
                "metrics": [{"key": "accuracy", "value": 0.97}, {"key": "loss", "value": 0.03}],
                "params": [{"key": "lr", "value": "0.001"}],
                "tags": [{"key": "mlflow.user", "value": "kartik"}],
            },
        }))
        .unwrap()
    }

    #[test]
    fn maps_matched_fields_under_alias() {
        let runs = BTreeMap::from([("0".to_string(), vec![raw_run("r1")])]);
        let report = formatter()
            .format_in(&[raw_experiment("exp1", "0")], &runs, false, None)
            .unwrap();
        let run = &report.get("exp1").unwrap().runs["r1"];
        assert_eq!(run.get("Accuracy").unwrap().value, FieldValue::Float(0.97));
        assert_eq!(run.get("Accuracy").unwrap().key, "accuracy");
        assert_eq!(
            run.get("status").unwrap().value,
            FieldValue::Str("RUNNING".into())
        );
        // params policy is ignore, but lr is a declared element and survives
        assert_eq!(
            run.get("Learning Rate").unwrap().value,
            FieldValue::Float(0.001)
        );
    }

    #[test]
    fn unmatched_policy_governs_unknown_fields() {
        let runs = BTreeMap::from([("0".to_string(), vec![raw_run("r1")])]);
        let report = formatter()
            .format_in(&[raw_experiment("exp1", "0")], &runs, false, None)
            .unwrap();
        let run = &report.get("exp1").unwrap().runs["r1"];
        // metrics policy add: loss kept verbatim with its runtime type
        let loss = run.get("loss").unwrap();
        assert_eq!(loss.value, FieldValue::Float(0.03));
        assert_eq!(loss.field_type, FieldType::Float);
        // tags policy ignore: dropped
        assert!(run.get("mlflow.user").is_none());
    }

    #[test]
    fn empty_experiments_are_pruned() {
        let runs = BTreeMap::from([("0".to_string(), vec![raw_run("r1")])]);
        let report = formatter()
            .format_in(
                &[raw_experiment("exp1", "0"), raw_experiment("empty", "1")],
                &runs,
                false,
                None,
            )
            .unwrap();
        assert!(report.get("exp1").is_some());
        assert!(report.get("empty").is_none());
    }

    #[test]
    fn synthesizes_name_from_positional_index() {
        let raw: RawRun = serde_json::from_value(json!({
            "info": {"run_id": "r3", "status": "FINISHED"},
            "data": {},
        }))
        .unwrap();
        let runs = BTreeMap::from([(
            "0".to_string(),
            vec![raw_run("r1"), raw_run("r2"), raw],
        )]);
        let report = formatter()
            .format_in(&[raw_experiment("exp1", "0")], &runs, false, None)
            .unwrap();
        let run = &report.get("exp1").unwrap().runs["r3"];
        assert_eq!(run.get("Name").unwrap().value, FieldValue::Str("Run 2".into()));
        assert_eq!(run.get("uid").unwrap().value, FieldValue::Str("r3".into()));
    }

    #[test]
    fn missing_run_key_is_a_contract_violation() {
        let raw: RawRun = serde_json::from_value(json!({
            "info": {"status": "RUNNING"},
            "data": {},
        }))
        .unwrap();
        let runs = BTreeMap::from([("0".to_string(), vec![raw])]);
        let err = formatter()
            .format_in(&[raw_experiment("exp1", "0")], &runs, false, None)
            .unwrap_err();
        assert!(err.to_string().contains("run_id"));
    }

    struct FixedHistory;

    impl MetricHistorySource for FixedHistory {
        fn metric_history(&self, _run_id: &str, metric_key: &str) -> Result<Vec<RawMetricPoint>> {
            Ok(vec![
                RawMetricPoint {
                    key: metric_key.to_string(),
                    value: 0.5,
                    timestamp: 100,
                    step: 0,
                },
                RawMetricPoint {
                    key: metric_key.to_string(),
                    value: 0.97,
                    timestamp: 200,
                    step: 1,
                },
            ])
        }
    }

    #[test]
    fn detailed_metrics_attach_parallel_sequences() {
        let runs = BTreeMap::from([("0".to_string(), vec![raw_run("r1")])]);
        let report = formatter()
            .format_in(&[raw_experiment("exp1", "0")], &runs, true, Some(&FixedHistory))
            .unwrap();
        let run = &report.get("exp1").unwrap().runs["r1"];
        let history = run.get("Accuracy").unwrap().history.as_ref().unwrap();
        assert_eq!(history.values, vec![0.5, 0.97]);
        assert_eq!(history.timestamps, vec![100, 200]);
        assert_eq!(history.steps, vec![0, 1]);
        // params never carry history
        assert!(run.get("Learning Rate").unwrap().history.is_none());
    }
}
