use std::collections::BTreeMap;

/// Mapping from logical entities to destination handles. Mutated only as a
/// side effect of confirmed mutations, so after a partial push it reflects
/// exactly what the destination accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotionState {
    pub experiments: BTreeMap<String, ExperimentState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentState {
    pub database_id: String,
    pub pages: BTreeMap<String, String>,
}
