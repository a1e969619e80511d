use crate::report::Report;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunDelta {
    pub new: Vec<String>,
    pub deleted: Vec<String>,
    pub updated: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeletedRuns {
    pub deleted: Vec<String>,
}

/// Structured difference between two Reports. Carries identifiers only; field
/// values are looked up from the new Report at push time. An experiment
/// appears in at most one of the three buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Delta {
    pub new: BTreeSet<String>,
    pub deleted: BTreeMap<String, DeletedRuns>,
    pub updated: BTreeMap<String, RunDelta>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }
}

pub fn diff(old: &Report, new: &Report) -> Delta {
    let mut delta = Delta::default();
    if old == new {
        return delta;
    }

    for (name, experiment_old) in &old.experiments {
        match new.experiments.get(name) {
            // Deleted experiment: list every previously known run so the
            // consumer can clean up all owned rows.
            None => {
                delta.deleted.insert(
                    name.clone(),
                    DeletedRuns {
                        deleted: experiment_old.runs.keys().cloned().collect(),
                    },
                );
            }
            Some(experiment_new) if experiment_new != experiment_old => {
                let mut run_delta = RunDelta::default();
                for (run_id, run_old) in &experiment_old.runs {
                    match experiment_new.runs.get(run_id) {
                        None => run_delta.deleted.push(run_id.clone()),
                        Some(run_new) if run_new != run_old => {
                            run_delta.updated.push(run_id.clone())
                        }
                        Some(_) => {}
                    }
                }
                for run_id in experiment_new.runs.keys() {
                    if !experiment_old.runs.contains_key(run_id) {
                        run_delta.new.push(run_id.clone());
                    }
                }
                delta.updated.insert(name.clone(), run_delta);
            }
            Some(_) => {}
        }
    }

    for name in new.experiments.keys() {
        if !old.experiments.contains_key(name) {
            delta.new.insert(name.clone());
        }
    }

    delta
}
