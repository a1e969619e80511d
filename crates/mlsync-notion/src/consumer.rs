use crate::api::{is_client_error, NotionApi};
use crate::formatter::{format_in, format_out, NotionTable};
use crate::state::{ExperimentState, NotionState};
use anyhow::Result;
use mlsync_core::{Consumer, Delta, PushCommand, Report, RunDelta, SyncError};
use serde_json::Map;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub struct NotionConsumer {
    api: NotionApi,
    root_page_id: String,
    state: NotionState,
}

impl NotionConsumer {
    pub fn new(api: NotionApi, root_page_id: impl Into<String>) -> Result<NotionConsumer> {
        let root_page_id = root_page_id.into();
        if !api.page_accessible(&root_page_id) {
            return Err(SyncError::Config(format!(
                "could not access Notion page {root_page_id}; share the page with the integration"
            ))
            .into());
        }
        Ok(NotionConsumer {
            api,
            root_page_id,
            state: NotionState::default(),
        })
    }

    pub fn state(&self) -> &NotionState {
        &self.state
    }

    fn create_experiment(&mut self, name: &str, table: &NotionTable) -> Result<()> {
        if table.properties.is_empty() {
            return Ok(());
        }
        let database_id =
            match self
                .api
                .create_database(name, &table.properties, &self.root_page_id)
            {
                Ok(id) => id,
                Err(err) if is_client_error(&err) => {
                    warn!(experiment = name, error = %err, "database creation rejected, skipping experiment");
                    return Ok(());
                }
                Err(err) => return Err(err),
            };
        info!(experiment = name, database_id = %database_id, "created database");
        self.state.experiments.insert(
            name.to_string(),
            ExperimentState {
                database_id: database_id.clone(),
                pages: BTreeMap::new(),
            },
        );
        for (run_uid, row) in &table.rows {
            self.add_row(name, &database_id, run_uid, row)?;
        }
        Ok(())
    }

    fn add_row(
        &mut self,
        name: &str,
        database_id: &str,
        run_uid: &str,
        row: &Map<String, serde_json::Value>,
    ) -> Result<()> {
        match self.api.create_page(database_id, row) {
            Ok(page_id) => {
                if let Some(experiment) = self.state.experiments.get_mut(name) {
                    experiment.pages.insert(run_uid.to_string(), page_id);
                }
                Ok(())
            }
            Err(err) if is_client_error(&err) => {
                warn!(experiment = name, run = run_uid, error = %err, "row creation rejected, skipping");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn update_experiment(
        &mut self,
        name: &str,
        run_delta: &RunDelta,
        tables: &BTreeMap<String, NotionTable>,
    ) -> Result<()> {
        let Some(table) = tables.get(name) else {
            warn!(experiment = name, "updated experiment is absent from the report, skipping");
            return Ok(());
        };
        let Some(database_id) = self
            .state
            .experiments
            .get(name)
            .map(|e| e.database_id.clone())
        else {
            warn!(experiment = name, "no destination handle for updated experiment, skipping");
            return Ok(());
        };

        self.migrate_schema(name, &database_id, table)?;

        for run_uid in &run_delta.new {
            if let Some(row) = table.rows.get(run_uid) {
                self.add_row(name, &database_id, run_uid, row)?;
            }
        }
        for run_uid in &run_delta.deleted {
            self.remove_row(name, run_uid)?;
        }
        for run_uid in &run_delta.updated {
            let Some(row) = table.rows.get(run_uid) else {
                continue;
            };
            let Some(page_id) = self
                .state
                .experiments
                .get(name)
                .and_then(|e| e.pages.get(run_uid))
                .cloned()
            else {
                warn!(experiment = name, run = run_uid, "no page handle for updated run, skipping");
                continue;
            };
            match self.api.update_page(&page_id, row) {
                Ok(()) => {}
                Err(err) if is_client_error(&err) => {
                    warn!(experiment = name, run = run_uid, error = %err, "row update rejected, skipping");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    // Add columns for properties the destination schema does not know yet.
    fn migrate_schema(&self, name: &str, database_id: &str, table: &NotionTable) -> Result<()> {
        let current = match self.api.get_database(database_id) {
            Ok(database) => database,
            Err(err) if is_client_error(&err) => {
                warn!(experiment = name, error = %err, "could not read destination schema, skipping migration");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let known = current["properties"].as_object().cloned().unwrap_or_default();
        let added: Map<String, serde_json::Value> = table
            .properties
            .iter()
            .filter(|(alias, _)| !known.contains_key(*alias))
            .map(|(alias, schema)| (alias.clone(), schema.clone()))
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        match self.api.update_database(database_id, &added) {
            Ok(()) => {
                info!(experiment = name, columns = added.len(), "extended destination schema");
                Ok(())
            }
            Err(err) if is_client_error(&err) => {
                warn!(experiment = name, error = %err, "schema extension rejected, continuing");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn remove_row(&mut self, name: &str, run_uid: &str) -> Result<()> {
        let Some(page_id) = self
            .state
            .experiments
            .get(name)
            .and_then(|e| e.pages.get(run_uid))
            .cloned()
        else {
            warn!(experiment = name, run = run_uid, "no page handle for deleted run, skipping");
            return Ok(());
        };
        match self.api.archive_page(&page_id) {
            Ok(()) => {
                if let Some(experiment) = self.state.experiments.get_mut(name) {
                    experiment.pages.remove(run_uid);
                }
                Ok(())
            }
            Err(err) if is_client_error(&err) => {
                warn!(experiment = name, run = run_uid, error = %err, "row deletion rejected, skipping");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

impl Consumer for NotionConsumer {
    fn pull(&mut self) -> Result<Report> {
        let databases = self.api.search_databases()?;
        let (report, state) = format_in(&self.api, &databases, &self.root_page_id)?;
        self.state = state;
        Ok(report)
    }

    fn push(&mut self, report: &Report, command: PushCommand, delta: &Delta) -> Result<()> {
        let tables = format_out(report);
        match command {
            PushCommand::New => {
                for (name, table) in &tables {
                    self.create_experiment(name, table)?;
                }
            }
            PushCommand::Create => {
                for name in &delta.new {
                    match tables.get(name) {
                        Some(table) => self.create_experiment(name, table)?,
                        None => {
                            warn!(experiment = name, "new experiment is absent from the report, skipping")
                        }
                    }
                }
            }
            PushCommand::Update => {
                for (name, run_delta) in &delta.updated {
                    self.update_experiment(name, run_delta, &tables)?;
                }
            }
            PushCommand::Delete => {
                // Database deletion is unsupported; only rows are removed.
                for (name, deleted) in &delta.deleted {
                    for run_uid in &deleted.deleted {
                        self.remove_row(name, run_uid)?;
                    }
                }
            }
        }
        Ok(())
    }
}
