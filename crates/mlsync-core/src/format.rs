use crate::error::SyncError;
use crate::value::FieldType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldTag {
    Info,
    Metrics,
    Params,
    Tags,
}

impl FieldTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldTag::Info => "info",
            FieldTag::Metrics => "metrics",
            FieldTag::Params => "params",
            FieldTag::Tags => "tags",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    Add,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub alias: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub tag: FieldTag,
    #[serde(default)]
    pub description: String,
}

/// The user-declared report format: which raw backend fields map to which
/// report keys, and what happens to fields the format does not mention.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportFormat {
    pub elements: BTreeMap<String, ElementSpec>,
    pub policies: BTreeMap<FieldTag, UnmatchedPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubFormat {
    pub key: String,
    pub values: BTreeMap<String, ElementSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormat {
    pub experiment: SubFormat,
    pub experiment_unmatched: UnmatchedPolicy,
    pub run: SubFormat,
    pub policies: BTreeMap<FieldTag, UnmatchedPolicy>,
    // alias -> raw backend key, for consumers translating back to producer fields
    pub alias_table: BTreeMap<String, String>,
}

impl ReportFormat {
    pub fn from_yaml(text: &str) -> Result<ReportFormat, SyncError> {
        let value: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| SyncError::Config(format!("report format is not valid YAML: {e}")))?;
        let mapping = value
            .as_mapping()
            .ok_or_else(|| SyncError::Config("report format must be a mapping".to_string()))?;
        for section in ["elements", "policies"] {
            if !mapping.contains_key(serde_yaml::Value::from(section)) {
                return Err(SyncError::Config(format!(
                    "report format is missing required section '{section}'"
                )));
            }
        }
        serde_yaml::from_value(value)
            .map_err(|e| SyncError::Config(format!("invalid report format: {e}")))
    }

    pub fn compile(self) -> CompiledFormat {
        let mut experiment_values = BTreeMap::new();
        experiment_values.insert(
            "name".to_string(),
            ElementSpec {
                alias: "name".to_string(),
                field_type: FieldType::Str,
                tag: FieldTag::Info,
                description: "The name of the experiment".to_string(),
            },
        );
        experiment_values.insert(
            "experiment_id".to_string(),
            ElementSpec {
                alias: "id".to_string(),
                field_type: FieldType::Str,
                tag: FieldTag::Info,
                description: "ID of the experiment".to_string(),
            },
        );

        let alias_table = self
            .elements
            .iter()
            .map(|(key, spec)| (spec.alias.clone(), key.clone()))
            .collect();

        CompiledFormat {
            experiment: SubFormat {
                key: "name".to_string(),
                values: experiment_values,
            },
            experiment_unmatched: UnmatchedPolicy::Add,
            run: SubFormat {
                key: "run_id".to_string(),
                values: self.elements,
            },
            policies: self.policies,
            alias_table,
        }
    }
}

impl CompiledFormat {
    pub fn policy_for(&self, tag: FieldTag) -> UnmatchedPolicy {
        self.policies
            .get(&tag)
            .copied()
            .unwrap_or(UnmatchedPolicy::Ignore)
    }
}
