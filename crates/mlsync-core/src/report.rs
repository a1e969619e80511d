use crate::format::FieldTag;
use crate::value::{FieldType, FieldValue};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricHistory {
    pub key: String,
    pub values: Vec<f64>,
    pub timestamps: Vec<i64>,
    pub steps: Vec<i64>,
}

impl MetricHistory {
    pub fn from_points(points: &[RawMetricPoint]) -> Option<MetricHistory> {
        let first = points.first()?;
        let mut history = MetricHistory {
            key: first.key.clone(),
            values: Vec::with_capacity(points.len()),
            timestamps: Vec::with_capacity(points.len()),
            steps: Vec::with_capacity(points.len()),
        };
        for point in points {
            history.values.push(point.value);
            history.timestamps.push(point.timestamp);
            history.steps.push(point.step);
        }
        Some(history)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub key: String,
    pub alias: String,
    pub field_type: FieldType,
    pub tag: FieldTag,
    pub description: String,
    pub value: FieldValue,
    pub history: Option<MetricHistory>,
}

// One tracked execution. Rebuilt wholesale on every formatter pass; fields are
// keyed by alias.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Run {
    pub fields: BTreeMap<String, Field>,
}

impl Run {
    pub fn get(&self, alias: &str) -> Option<&Field> {
        self.fields.get(alias)
    }

    pub fn insert(&mut self, field: Field) {
        self.fields.insert(field.alias.clone(), field);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experiment {
    pub name: String,
    pub id: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub runs: BTreeMap<String, Run>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Report {
    pub experiments: BTreeMap<String, Experiment>,
}

impl Report {
    pub fn get(&self, experiment_name: &str) -> Option<&Experiment> {
        self.experiments.get(experiment_name)
    }

    pub fn insert(&mut self, experiment: Experiment) {
        self.experiments.insert(experiment.name.clone(), experiment);
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

// Canonical raw shapes the producer adapter deserializes wire payloads into.

#[derive(Debug, Clone, Deserialize)]
pub struct RawExperiment {
    #[serde(flatten)]
    pub fields: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRun {
    pub info: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub data: RawRunData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRunData {
    #[serde(default)]
    pub metrics: Vec<RawField>,
    #[serde(default)]
    pub params: Vec<RawField>,
    #[serde(default)]
    pub tags: Vec<RawField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawField {
    pub key: String,
    pub value: JsonValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMetricPoint {
    pub key: String,
    pub value: f64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub step: i64,
}

/// Access to a metric's full time series, needed only when detailed metrics
/// are requested during formatting.
pub trait MetricHistorySource {
    fn metric_history(&self, run_id: &str, metric_key: &str) -> Result<Vec<RawMetricPoint>>;
}
