use crate::api::NotionApi;
use crate::state::{ExperimentState, NotionState};
use anyhow::Result;
use mlsync_core::{Experiment, Field, FieldTag, FieldType, FieldValue, Report, Run};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use tracing::warn;

/// One experiment rendered into Notion's shapes: a database property schema
/// plus one property map per run, keyed by run uid.
#[derive(Debug, Clone, Default)]
pub struct NotionTable {
    pub properties: Map<String, JsonValue>,
    pub rows: BTreeMap<String, Map<String, JsonValue>>,
}

pub fn format_out(report: &Report) -> BTreeMap<String, NotionTable> {
    let mut tables = BTreeMap::new();
    for (name, experiment) in &report.experiments {
        let mut table = NotionTable::default();
        // Database schema is the superset of properties across all runs.
        for run in experiment.runs.values() {
            for field in run.fields.values() {
                if !table.properties.contains_key(&field.alias) {
                    table
                        .properties
                        .insert(field.alias.clone(), property_schema(field));
                }
            }
        }
        for (run_uid, run) in &experiment.runs {
            let mut row = Map::new();
            for field in run.fields.values() {
                if let Some(value) = property_value(field) {
                    row.insert(field.alias.clone(), value);
                }
            }
            table.rows.insert(run_uid.clone(), row);
        }
        tables.insert(name.clone(), table);
    }
    tables
}

fn status_options() -> JsonValue {
    json!([
        {"name": "FINISHED", "color": "green"},
        {"name": "FAILED", "color": "red"},
        {"name": "RUNNING", "color": "green"},
        {"name": "SCHEDULED", "color": "purple"},
        {"name": "KILLED", "color": "pink"},
        {"name": "UNFINISHED", "color": "orange"},
    ])
}

fn property_schema(field: &Field) -> JsonValue {
    if field.alias == "Name" {
        return json!({"title": {}});
    }
    if field.field_type == FieldType::Select {
        if field.key == "status" {
            return json!({"select": {"options": status_options()}});
        }
        return json!({"select": {}});
    }
    match &field.value {
        FieldValue::Int(_) | FieldValue::Float(_) => json!({"number": {"format": "number"}}),
        FieldValue::Bool(_) => json!({"checkbox": {}}),
        FieldValue::Str(_) => json!({"rich_text": {}}),
        FieldValue::Null => match field.field_type {
            FieldType::Int | FieldType::Float => json!({"number": {"format": "number"}}),
            FieldType::Bool => json!({"checkbox": {}}),
            _ => json!({"rich_text": {}}),
        },
    }
}

fn property_value(field: &Field) -> Option<JsonValue> {
    if field.value.is_null() {
        return None;
    }
    if field.alias == "Name" {
        return Some(json!({"title": [{"text": {"content": field.value.to_string()}}]}));
    }
    if field.field_type == FieldType::Select {
        return Some(json!({"select": {"name": field.value.to_string()}}));
    }
    match &field.value {
        FieldValue::Int(i) => Some(json!({"number": i})),
        FieldValue::Float(f) if f.is_finite() => Some(json!({"number": f})),
        FieldValue::Float(_) => None,
        FieldValue::Bool(b) => Some(json!({"checkbox": b})),
        FieldValue::Str(s) => Some(json!({"rich_text": [{"text": {"content": s}}]})),
        FieldValue::Null => None,
    }
}

/// Rebuild a Report and a fresh handle map from the destination's current
/// contents. Rows are keyed by their stored uid property, falling back to the
/// page title.
pub fn format_in(
    api: &NotionApi,
    search_results: &JsonValue,
    root_page_id: &str,
) -> Result<(Report, NotionState)> {
    let mut report = Report::default();
    let mut state = NotionState::default();

    let databases = search_results["results"].as_array().cloned().unwrap_or_default();
    for database in &databases {
        if database["parent"]["page_id"].as_str() != Some(root_page_id) {
            continue;
        }
        let Some(name) = database["title"][0]["text"]["content"].as_str() else {
            continue;
        };
        let Some(database_id) = database["id"].as_str() else {
            continue;
        };

        let mut experiment = Experiment {
            name: name.to_string(),
            id: database_id.to_string(),
            fields: BTreeMap::from([
                ("name".to_string(), FieldValue::Str(name.to_string())),
                ("id".to_string(), FieldValue::Str(database_id.to_string())),
            ]),
            runs: BTreeMap::new(),
        };
        let mut experiment_state = ExperimentState {
            database_id: database_id.to_string(),
            pages: BTreeMap::new(),
        };

        let pages = api.query_database(database_id)?;
        for page in pages["results"].as_array().cloned().unwrap_or_default() {
            let Some(page_id) = page["id"].as_str() else {
                continue;
            };
            let mut run = Run::default();
            let properties = page["properties"].as_object().cloned().unwrap_or_default();
            for (property_name, property) in &properties {
                let value = read_property(property);
                run.insert(Field {
                    key: property_name.clone(),
                    alias: property_name.clone(),
                    field_type: value.runtime_type(),
                    tag: FieldTag::Info,
                    description: String::new(),
                    value,
                    history: None,
                });
            }
            let run_uid = run
                .get("uid")
                .and_then(|f| f.value.as_str())
                .or_else(|| run.get("Name").and_then(|f| f.value.as_str()))
                .unwrap_or(page_id)
                .to_string();
            experiment_state
                .pages
                .insert(run_uid.clone(), page_id.to_string());
            experiment.runs.insert(run_uid, run);
        }

        state.experiments.insert(name.to_string(), experiment_state);
        // Kept even when it has no rows: the handle map must still know the
        // database so later updates land in it.
        report.insert(experiment);
    }

    Ok((report, state))
}

fn read_property(property: &JsonValue) -> FieldValue {
    match property["type"].as_str() {
        Some("title") => FieldValue::Str(
            property["title"][0]["text"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        ),
        Some("rich_text") => FieldValue::Str(
            property["rich_text"][0]["text"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        ),
        Some("number") => FieldValue::from_json(&property["number"]),
        Some("select") => match property["select"]["name"].as_str() {
            Some(name) => FieldValue::Str(name.to_string()),
            None => FieldValue::Null,
        },
        Some("checkbox") => FieldValue::from_json(&property["checkbox"]),
        other => {
            warn!(property_type = ?other, "unsupported destination property type, skipping value");
            FieldValue::Null
        }
    }
}
