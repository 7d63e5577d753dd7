//! Per-job lifecycle: start acknowledgement, map phase, reduce phase,
//! cleanup, READY.

use std::collections::BTreeSet;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use common::events::EventTag;
use common::{Input, JobSpec, Phase, TaskOutcome};

use crate::clients::Clients;
use crate::fault::Fault;
use crate::phase::PhaseRunner;
use crate::registry::{JobState, SharedRegistry};
use crate::tasks;

/// Drives one job from submission to READY or teardown.
///
/// Every job gets its own coordinator task. Within it, outcomes are
/// consumed strictly one at a time off the single inbox; the phase
/// runners borrow that inbox in turn.
pub struct JobCoordinator {
    spec: JobSpec,
    coordinator_id: u64,
    clients: Clients,
    inbox: mpsc::Receiver<TaskOutcome>,
    registry: SharedRegistry,
    max_failure_rate: usize,
}

impl JobCoordinator {
    pub fn new(
        spec: JobSpec,
        coordinator_id: u64,
        clients: Clients,
        inbox: mpsc::Receiver<TaskOutcome>,
        registry: SharedRegistry,
        max_failure_rate: usize,
    ) -> Self {
        JobCoordinator {
            spec,
            coordinator_id,
            clients,
            inbox,
            registry,
            max_failure_rate,
        }
    }

    /// Run the job to completion.
    ///
    /// The `started` signal releases the spawner's submission ack; it is
    /// sent before any phase work begins, and the job then runs
    /// independently of the submitting caller.
    pub async fn run(mut self, started: oneshot::Sender<()>) -> Result<(), Fault> {
        let _ = started.send(());
        let name = self.spec.name.clone();

        self.clients.events.emit(
            &name,
            "Job coordinator starts".to_string(),
            Some(EventTag::Start {
                coordinator: self.coordinator_id,
            }),
        );
        self.clients.events.emit(
            &name,
            "Starting job".to_string(),
            Some(EventTag::JobData {
                n_map: self.spec.n_map,
                n_red: self.spec.n_red,
                do_reduce: self.spec.do_reduce,
                inputs: self.spec.inputs.clone(),
            }),
        );

        match self.work(&name).await {
            Ok(()) => {
                self.registry.lock().await.set_state(&name, JobState::Ready);
                info!(job = %name, "job ready");
                Ok(())
            }
            Err(fault) => {
                self.fail(&name, &fault).await;
                Err(fault)
            }
        }
    }

    /// The happy path: map, reduce, cleanup, READY.
    async fn work(&mut self, name: &str) -> Result<(), Fault> {
        let mut map_ran = false;
        let red_inputs: Vec<Input> = if self.spec.n_map > 0 {
            self.registry.lock().await.set_state(name, JobState::Mapping);
            self.clients.events.emit(name, "Map phase".to_string(), None);

            let partitions = tasks::map_partitions(&self.spec.inputs);
            let runner = PhaseRunner::new(
                name,
                Phase::Map,
                &self.clients,
                &mut self.inbox,
                partitions,
                self.max_failure_rate,
            );
            let outputs = runner.run(self.spec.n_map as usize).await?;

            self.clients.events.emit(name, "Map phase done".to_string(), None);
            map_ran = true;
            outputs.into_iter().map(Input::Single).collect()
        } else {
            // No map phase: the raw inputs flow straight into reduce.
            self.spec.inputs.clone()
        };

        let mut reduce_results: Option<BTreeSet<String>> = None;
        if self.spec.do_reduce {
            self.registry.lock().await.set_state(name, JobState::Reducing);
            self.clients
                .events
                .emit(name, "Starting reduce phase".to_string(), None);

            let partitions = match tasks::reduce_partitions(&red_inputs) {
                Ok(partitions) => partitions,
                Err(err) => {
                    self.clients.events.emit(
                        name,
                        "ERROR: Reduce doesn't support redundant inputs".to_string(),
                        None,
                    );
                    return Err(Fault::Unexpected(err));
                }
            };
            let runner = PhaseRunner::new(
                name,
                Phase::Reduce,
                &self.clients,
                &mut self.inbox,
                partitions,
                self.max_failure_rate,
            );
            let outputs = runner.run(self.spec.n_red as usize).await?;

            self.clients
                .events
                .emit(name, "Reduce phase done".to_string(), None);
            reduce_results = Some(outputs);
        }

        // The reduce has consumed the intermediate map outputs; reclaiming
        // them is best effort.
        if map_ran && reduce_results.is_some() {
            let uris: Vec<String> = red_inputs.iter().flat_map(Input::uris).cloned().collect();
            self.clients.gc.remove_map_results(uris);
        }

        let results: Vec<String> = match &reduce_results {
            Some(outputs) => outputs.iter().cloned().collect(),
            None => red_inputs.iter().flat_map(Input::uris).cloned().collect(),
        };
        self.clients.events.emit(
            name,
            "READY".to_string(),
            Some(EventTag::Ready { results }),
        );
        self.clients.events.flush(name).await;
        Ok(())
    }

    /// Terminal teardown: descriptive event, kill outstanding tasks,
    /// flush the event log.
    async fn fail(&self, name: &str, fault: &Fault) {
        match fault {
            Fault::Logged(description) => {
                warn!(job = %name, %description, "job terminated");
                self.clients.events.emit(
                    name,
                    "Job terminated due to the previous errors".to_string(),
                    None,
                );
            }
            Fault::Unexpected(err) => {
                warn!(job = %name, error = %err, "job failed unexpectedly");
                self.clients.events.emit(
                    name,
                    format!("Job coordinator failed unexpectedly: {err:#}"),
                    None,
                );
            }
        }

        if let Err(err) = self.clients.worker.kill_job(name).await {
            warn!(job = %name, error = %err, "kill job failed");
        }
        self.clients.events.flush(name).await;
        self.registry.lock().await.set_state(name, JobState::Failed);
    }
}
