use crate::diff::{diff, Delta};
use crate::report::Report;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_REFRESH_RATE_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushCommand {
    New,
    Create,
    Update,
    Delete,
}

impl PushCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushCommand::New => "new",
            PushCommand::Create => "create",
            PushCommand::Update => "update",
            PushCommand::Delete => "delete",
        }
    }
}

/// Source of truth snapshots.
pub trait Producer {
    fn pull(&self, detailed_metrics: bool) -> Result<Report>;
}

/// Destination workspace receiving mutations derived from the Delta.
pub trait Consumer {
    fn pull(&mut self) -> Result<Report>;
    fn push(&mut self, report: &Report, command: PushCommand, delta: &Delta) -> Result<()>;
}

pub struct SyncEngine<P, C> {
    producer: P,
    consumer: C,
    refresh_rate: Duration,
    detailed_metrics: bool,
    baseline: Report,
}

impl<P: Producer, C: Consumer> SyncEngine<P, C> {
    pub fn new(producer: P, consumer: C, refresh_rate_secs: u64, detailed_metrics: bool) -> Self {
        SyncEngine {
            producer,
            consumer,
            refresh_rate: Duration::from_secs(refresh_rate_secs.max(1)),
            detailed_metrics,
            baseline: Report::default(),
        }
    }

    /// One-shot initialization: seed the baseline from the destination's
    /// current contents. Assumes the destination is not mutated by a human
    /// between cycles.
    pub fn initialize(&mut self) -> Result<()> {
        self.baseline = self.consumer.pull()?;
        info!(
            experiments = self.baseline.experiments.len(),
            "seeded baseline from destination"
        );
        Ok(())
    }

    /// A single polling cycle: pull, diff, and push in fixed order when the
    /// delta is non-empty. Creations land before updates, deletions last.
    pub fn cycle(&mut self) -> Result<()> {
        let fresh = self.producer.pull(self.detailed_metrics)?;
        let delta = diff(&self.baseline, &fresh);
        if delta.is_empty() {
            debug!("no changes since last cycle");
            return Ok(());
        }
        // Baseline is replaced before the push, so a crash mid-push leaves it
        // ahead of destination reality until the next cycle.
        self.baseline = fresh;
        if !delta.new.is_empty() {
            info!(experiments = delta.new.len(), "pushing new experiments");
            self.consumer
                .push(&self.baseline, PushCommand::Create, &delta)?;
        }
        if !delta.updated.is_empty() {
            info!(experiments = delta.updated.len(), "pushing updated experiments");
            self.consumer
                .push(&self.baseline, PushCommand::Update, &delta)?;
        }
        if !delta.deleted.is_empty() {
            info!(experiments = delta.deleted.len(), "pushing deleted experiments");
            self.consumer
                .push(&self.baseline, PushCommand::Delete, &delta)?;
        }
        Ok(())
    }

    /// Run the loop on the calling thread until the process terminates.
    pub fn run(mut self) -> Result<()> {
        let never = AtomicBool::new(false);
        self.run_until(&never)
    }

    fn run_until(&mut self, stop: &AtomicBool) -> Result<()> {
        self.initialize()?;
        while !stop.load(Ordering::Relaxed) {
            self.cycle()?;
            self.sleep_until_next_cycle(stop);
        }
        Ok(())
    }

    fn sleep_until_next_cycle(&self, stop: &AtomicBool) {
        let deadline = Instant::now() + self.refresh_rate;
        while Instant::now() < deadline && !stop.load(Ordering::Relaxed) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(Duration::from_millis(100)));
        }
    }
}

impl<P, C> SyncEngine<P, C>
where
    P: Producer + Send + 'static,
    C: Consumer + Send + 'static,
{
    /// Run the loop on a background thread. The handle owns a stop flag and a
    /// result channel carrying the loop's terminal outcome.
    pub fn spawn(mut self) -> SyncHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let (sender, receiver) = mpsc::channel();
        let thread = thread::spawn(move || {
            let _ = sender.send(self.run_until(&flag));
        });
        SyncHandle {
            stop,
            result: receiver,
            thread,
        }
    }
}

pub struct SyncHandle {
    stop: Arc<AtomicBool>,
    result: mpsc::Receiver<Result<()>>,
    thread: thread::JoinHandle<()>,
}

impl SyncHandle {
    /// Request a cooperative stop and wait for the loop to finish its cycle.
    pub fn stop(self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        let outcome = self
            .result
            .recv()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("sync loop ended without reporting")));
        let _ = self.thread.join();
        outcome
    }

    /// Non-blocking check for a loop that has already terminated (e.g. on a
    /// pull failure).
    pub fn try_result(&self) -> Option<Result<()>> {
        self.result.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FieldTag;
    use crate::report::{Experiment, Field, Run};
    use crate::value::{FieldType, FieldValue};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn report_with(names: &[(&str, &[&str])]) -> Report {
        let mut report = Report::default();
        for (name, run_ids) in names {
            let runs = run_ids
                .iter()
                .map(|id| {
                    let mut run = Run::default();
                    run.insert(Field {
                        key: "uid".to_string(),
                        alias: "uid".to_string(),
                        field_type: FieldType::Str,
                        tag: FieldTag::Info,
                        description: String::new(),
                        value: FieldValue::Str(id.to_string()),
                        history: None,
                    });
                    (id.to_string(), run)
                })
                .collect();
            report.insert(Experiment {
                name: name.to_string(),
                id: name.to_string(),
                fields: BTreeMap::new(),
                runs,
            });
        }
        report
    }

    struct ScriptedProducer {
        snapshots: Mutex<Vec<Report>>,
    }

    impl Producer for ScriptedProducer {
        fn pull(&self, _detailed_metrics: bool) -> Result<Report> {
            let mut snapshots = self.snapshots.lock().unwrap();
            Ok(if snapshots.len() > 1 {
                snapshots.remove(0)
            } else {
                snapshots[0].clone()
            })
        }
    }

    #[derive(Default)]
    struct RecordingConsumer {
        initial: Report,
        pushes: Vec<(PushCommand, Delta)>,
    }

    impl Consumer for RecordingConsumer {
        fn pull(&mut self) -> Result<Report> {
            Ok(self.initial.clone())
        }

        fn push(&mut self, _report: &Report, command: PushCommand, delta: &Delta) -> Result<()> {
            self.pushes.push((command, delta.clone()));
            Ok(())
        }
    }

    #[test]
    fn quiet_cycle_pushes_nothing() {
        let snapshot = report_with(&[("exp1", &["r1"])]);
        let producer = ScriptedProducer {
            snapshots: Mutex::new(vec![snapshot.clone()]),
        };
        let consumer = RecordingConsumer {
            initial: snapshot,
            pushes: Vec::new(),
        };
        let mut engine = SyncEngine::new(producer, consumer, 1, false);
        engine.initialize().unwrap();
        engine.cycle().unwrap();
        assert!(engine.consumer.pushes.is_empty());
    }

    #[test]
    fn push_order_is_create_update_delete() {
        let old = report_with(&[("changed", &["r1"]), ("gone", &["r1"])]);
        let mut changed = report_with(&[("changed", &["r1", "r2"])]);
        changed.insert(report_with(&[("fresh", &["r1"])]).experiments["fresh"].clone());
        let producer = ScriptedProducer {
            snapshots: Mutex::new(vec![changed]),
        };
        let consumer = RecordingConsumer {
            initial: old,
            pushes: Vec::new(),
        };
        let mut engine = SyncEngine::new(producer, consumer, 1, false);
        engine.initialize().unwrap();
        engine.cycle().unwrap();
        let commands: Vec<PushCommand> =
            engine.consumer.pushes.iter().map(|(c, _)| *c).collect();
        assert_eq!(
            commands,
            vec![PushCommand::Create, PushCommand::Update, PushCommand::Delete]
        );
        let (_, delta) = &engine.consumer.pushes[0];
        assert!(delta.new.contains("fresh"));
        assert_eq!(delta.updated["changed"].new, vec!["r2".to_string()]);
        assert_eq!(delta.deleted["gone"].deleted, vec!["r1".to_string()]);
    }

    #[test]
    fn spawned_loop_stops_cooperatively() {
        let snapshot = report_with(&[("exp1", &["r1"])]);
        let producer = ScriptedProducer {
            snapshots: Mutex::new(vec![snapshot.clone()]),
        };
        let consumer = RecordingConsumer {
            initial: snapshot,
            pushes: Vec::new(),
        };
        let handle = SyncEngine::new(producer, consumer, 1, false).spawn();
        assert!(handle.try_result().is_none());
        handle.stop().unwrap();
    }
}
