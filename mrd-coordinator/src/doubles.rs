//! In-memory collaborator doubles backing the async tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use common::events::EventTag;
use common::{Phase, TaskInput, TaskOutcome};

use crate::clients::{Clients, EventApi, GcApi, OobApi, WorkerApi};
use crate::registry::SharedRegistry;

/// One recorded task submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub job: String,
    pub partition: u32,
    pub phase: Phase,
    pub blacklist: Vec<String>,
    pub inputs: Vec<TaskInput>,
}

enum OutcomeSink {
    /// Post straight into a fixed inbox (phase- and job-level tests).
    Inbox(mpsc::Sender<TaskOutcome>),

    /// Resolve the inbox through the registry at post time, like the real
    /// pool posting TaskDone (service-level tests).
    Router(Mutex<Option<SharedRegistry>>),
}

enum Target {
    Inbox(mpsc::Sender<TaskOutcome>),
    Router(Option<SharedRegistry>, String),
}

/// Worker pool double answering each submission with the next scripted
/// outcome.
pub struct ScriptedPool {
    pub submissions: Mutex<Vec<Submission>>,
    pub kills: Mutex<Vec<String>>,
    outcomes: Mutex<VecDeque<TaskOutcome>>,
    outcome_delay: Duration,
    sink: OutcomeSink,
    /// (outstanding, high-water mark) of submissions without a delivered
    /// outcome.
    gauge: Arc<Mutex<(usize, usize)>>,
}

impl ScriptedPool {
    fn new(outcomes: Vec<TaskOutcome>, outcome_delay: Duration, sink: OutcomeSink) -> Arc<Self> {
        Arc::new(ScriptedPool {
            submissions: Mutex::new(Vec::new()),
            kills: Mutex::new(Vec::new()),
            outcomes: Mutex::new(outcomes.into()),
            outcome_delay,
            sink,
            gauge: Arc::new(Mutex::new((0, 0))),
        })
    }

    /// Point a router-mode pool at the registry it should post through.
    pub fn route_via(&self, registry: SharedRegistry) {
        if let OutcomeSink::Router(slot) = &self.sink {
            *slot.lock().unwrap() = Some(registry);
        }
    }

    /// Most submissions outstanding at once, pool-side.
    pub fn max_outstanding(&self) -> usize {
        self.gauge.lock().unwrap().1
    }
}

#[tonic::async_trait]
impl WorkerApi for ScriptedPool {
    async fn submit(
        &self,
        job: &str,
        partition: u32,
        phase: Phase,
        blacklist: &[String],
        inputs: &[TaskInput],
    ) -> anyhow::Result<()> {
        self.submissions.lock().unwrap().push(Submission {
            job: job.to_string(),
            partition,
            phase,
            blacklist: blacklist.to_vec(),
            inputs: inputs.to_vec(),
        });

        // An exhausted script leaves the task hanging, like a pool that
        // never answers.
        let Some(outcome) = self.outcomes.lock().unwrap().pop_front() else {
            return Ok(());
        };

        {
            let mut gauge = self.gauge.lock().unwrap();
            gauge.0 += 1;
            gauge.1 = gauge.1.max(gauge.0);
        }

        let target = match &self.sink {
            OutcomeSink::Inbox(sender) => Target::Inbox(sender.clone()),
            OutcomeSink::Router(slot) => {
                Target::Router(slot.lock().unwrap().clone(), job.to_string())
            }
        };
        let delay = self.outcome_delay;
        let gauge = Arc::clone(&self.gauge);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            gauge.lock().unwrap().0 -= 1;
            match target {
                Target::Inbox(sender) => {
                    let _ = sender.send(outcome).await;
                }
                Target::Router(Some(registry), job) => {
                    let sender = registry.lock().await.outcome_sender(&job);
                    if let Some(sender) = sender {
                        let _ = sender.send(outcome).await;
                    }
                }
                Target::Router(None, _) => {}
            }
        });
        Ok(())
    }

    async fn kill_job(&self, job: &str) -> anyhow::Result<()> {
        self.kills.lock().unwrap().push(job.to_string());
        Ok(())
    }
}

/// Event log double recording emissions and flushes in order.
#[derive(Default)]
pub struct RecordingEvents {
    pub emitted: Mutex<Vec<(String, String, Option<EventTag>)>>,
    pub flushes: Mutex<Vec<String>>,
}

impl RecordingEvents {
    /// Message lines of one job, in emission order.
    pub fn lines(&self, job: &str) -> Vec<String> {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _, _)| name == job)
            .map(|(_, message, _)| message.clone())
            .collect()
    }

    /// Tags of one job, in emission order.
    pub fn tags(&self, job: &str) -> Vec<EventTag> {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _, _)| name == job)
            .filter_map(|(_, _, tag)| tag.clone())
            .collect()
    }
}

#[tonic::async_trait]
impl EventApi for RecordingEvents {
    fn emit(&self, job: &str, message: String, tag: Option<EventTag>) {
        self.emitted
            .lock()
            .unwrap()
            .push((job.to_string(), message, tag));
    }

    async fn flush(&self, job: &str) {
        self.flushes.lock().unwrap().push(job.to_string());
    }
}

#[derive(Default)]
pub struct RecordingOob {
    pub stored: Mutex<Vec<(String, String, Vec<String>)>>,
}

impl OobApi for RecordingOob {
    fn store(&self, job: &str, node: &str, keys: Vec<String>) {
        self.stored
            .lock()
            .unwrap()
            .push((job.to_string(), node.to_string(), keys));
    }
}

#[derive(Default)]
pub struct RecordingGc {
    pub removed: Mutex<Vec<Vec<String>>>,
}

impl GcApi for RecordingGc {
    fn remove_map_results(&self, uris: Vec<String>) {
        self.removed.lock().unwrap().push(uris);
    }
}

/// The doubles bundle plus the job inbox they are wired to.
pub struct TestBed {
    pub clients: Clients,
    pub pool: Arc<ScriptedPool>,
    pub events: Arc<RecordingEvents>,
    pub oob: Arc<RecordingOob>,
    pub gc: Arc<RecordingGc>,
    pub inbox: mpsc::Receiver<TaskOutcome>,
    pub inbox_tx: mpsc::Sender<TaskOutcome>,
}

fn bed_with(pool: Arc<ScriptedPool>, inbox: mpsc::Receiver<TaskOutcome>, inbox_tx: mpsc::Sender<TaskOutcome>) -> TestBed {
    let events = Arc::new(RecordingEvents::default());
    let oob = Arc::new(RecordingOob::default());
    let gc = Arc::new(RecordingGc::default());
    let clients = Clients {
        worker: pool.clone(),
        events: events.clone(),
        oob: oob.clone(),
        gc: gc.clone(),
    };
    TestBed {
        clients,
        pool,
        events,
        oob,
        gc,
        inbox,
        inbox_tx,
    }
}

/// Doubles around a fresh job inbox the pool posts straight into.
pub fn test_bed(outcomes: Vec<TaskOutcome>, outcome_delay: Duration) -> TestBed {
    let (inbox_tx, inbox) = mpsc::channel(64);
    let pool = ScriptedPool::new(
        outcomes,
        outcome_delay,
        OutcomeSink::Inbox(inbox_tx.clone()),
    );
    bed_with(pool, inbox, inbox_tx)
}

/// Doubles whose pool posts through a registry, once [`ScriptedPool::route_via`]
/// has pointed it at one.
pub fn routed_bed(outcomes: Vec<TaskOutcome>) -> TestBed {
    let (inbox_tx, inbox) = mpsc::channel(64);
    let pool = ScriptedPool::new(
        outcomes,
        Duration::ZERO,
        OutcomeSink::Router(Mutex::new(None)),
    );
    bed_with(pool, inbox, inbox_tx)
}
