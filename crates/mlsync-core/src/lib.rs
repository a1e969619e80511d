pub mod diff;
pub mod engine;
pub mod error;
pub mod format;
pub mod report;
pub mod snapshot;
pub mod value;

pub use diff::{diff, DeletedRuns, Delta, RunDelta};
pub use engine::{
    Consumer, Producer, PushCommand, SyncEngine, SyncHandle, DEFAULT_REFRESH_RATE_SECS,
};
pub use error::SyncError;
pub use format::{CompiledFormat, ElementSpec, FieldTag, ReportFormat, UnmatchedPolicy};
pub use report::{
    Experiment, Field, MetricHistory, MetricHistorySource, RawExperiment, RawField,
    RawMetricPoint, RawRun, RawRunData, Report, Run,
};
pub use snapshot::SnapshotFormatter;
pub use value::{coerce, FieldType, FieldValue};
