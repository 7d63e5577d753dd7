//! The coordinator's own gRPC surface and the wire <-> domain glue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tonic::{Request, Response, Status};
use tracing::{debug, info};

pub use coordinator::coordinator_server::{Coordinator, CoordinatorServer};

use common::{Input, JobSpec, TaskOutcome};

use crate::clients::Clients;
use crate::job::JobCoordinator;
use crate::registry::{JobRegistry, JobState, SharedRegistry};

pub mod coordinator {
    tonic::include_proto!("coordinator");
}

pub mod worker {
    tonic::include_proto!("worker");
}

pub mod services {
    tonic::include_proto!("services");
}

/// How long StartJob waits for the per-job coordinator to come up.
const START_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of each job's outcome inbox.
const INBOX_CAPACITY: usize = 64;

pub struct MrdCoordinator {
    registry: SharedRegistry,
    clients: Clients,
    max_failure_rate: usize,
}

impl MrdCoordinator {
    pub fn new(clients: Clients, max_failure_rate: usize) -> Self {
        MrdCoordinator {
            registry: Arc::new(Mutex::new(JobRegistry::new())),
            clients,
            max_failure_rate,
        }
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Register an accepted job, spawn its coordinator task, and wait for
    /// the started signal.
    async fn launch(&self, spec: JobSpec) -> anyhow::Result<()> {
        let name = spec.name.clone();
        let (outcome_tx, outcome_rx) = mpsc::channel(INBOX_CAPACITY);
        let coordinator_id = {
            let mut registry = self.registry.lock().await;
            registry.register(&name, outcome_tx)?
        };

        let (started_tx, started_rx) = oneshot::channel();
        let job = JobCoordinator::new(
            spec,
            coordinator_id,
            self.clients.clone(),
            outcome_rx,
            self.registry(),
            self.max_failure_rate,
        );
        tokio::spawn(async move {
            let _ = job.run(started_tx).await;
        });

        match tokio::time::timeout(START_ACK_TIMEOUT, started_rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                self.registry.lock().await.set_state(&name, JobState::Failed);
                anyhow::bail!("job coordinator exited before starting")
            }
            Err(_) => {
                self.registry.lock().await.set_state(&name, JobState::Failed);
                anyhow::bail!("job coordinator did not start in time")
            }
        }
    }
}

#[tonic::async_trait]
impl Coordinator for MrdCoordinator {
    /// The ingress submits a parsed job; the reply is the startup ack.
    async fn start_job(
        &self,
        request: Request<coordinator::StartJobRequest>,
    ) -> Result<Response<coordinator::StartJobResponse>, Status> {
        info!("[REQUEST] START JOB from {:?}", request.remote_addr());

        let spec = match job_spec_from_request(request.into_inner()) {
            Ok(spec) => spec,
            Err(err) => return Ok(Response::new(reject(err))),
        };
        info!(
            job = %spec.name,
            n_map = spec.n_map,
            n_red = spec.n_red,
            do_reduce = spec.do_reduce,
            "starting job"
        );

        let reply = match self.launch(spec).await {
            Ok(()) => coordinator::StartJobResponse {
                accepted: true,
                detail: String::new(),
            },
            Err(err) => reject(err),
        };
        Ok(Response::new(reply))
    }

    /// The worker pool posts one outcome per accepted submission. The
    /// outcome is routed to the named job's inbox; outcomes for unknown
    /// or already-terminated jobs are dropped.
    async fn task_done(
        &self,
        request: Request<coordinator::TaskOutcomeUpdate>,
    ) -> Result<Response<coordinator::TaskOutcomeAck>, Status> {
        let update = request.into_inner();
        let job = update.job.clone();
        let outcome = outcome_from_update(update);

        let sender = self.registry.lock().await.outcome_sender(&job);
        match sender {
            Some(sender) => {
                if sender.send(outcome).await.is_err() {
                    debug!(job = %job, "dropping outcome for terminated job");
                }
            }
            None => debug!(job = %job, "dropping outcome for unknown job"),
        }
        Ok(Response::new(coordinator::TaskOutcomeAck {}))
    }

    async fn jobs(
        &self,
        request: Request<coordinator::JobsRequest>,
    ) -> Result<Response<coordinator::JobsResponse>, Status> {
        info!("[REQUEST] JOBS from {:?}", request.remote_addr());
        let data = self.registry.lock().await.listing();
        Ok(Response::new(coordinator::JobsResponse { data }))
    }
}

fn reject(err: anyhow::Error) -> coordinator::StartJobResponse {
    coordinator::StartJobResponse {
        accepted: false,
        detail: format!("{err:#}"),
    }
}

/// Parse and validate a submission.
fn job_spec_from_request(request: coordinator::StartJobRequest) -> anyhow::Result<JobSpec> {
    let inputs = request
        .inputs
        .into_iter()
        .map(|spec| {
            let mut uris = spec.uris;
            if uris.len() == 1 {
                Input::Single(uris.remove(0))
            } else {
                Input::Replicated(uris)
            }
        })
        .collect();

    let spec = JobSpec {
        name: request.name,
        inputs,
        n_map: request.n_map,
        n_red: request.n_red,
        do_reduce: request.do_reduce,
    };
    spec.validate()?;
    Ok(spec)
}

/// Decode a wire update into the outcome sum. Updates that populate no
/// known arm land in `Unknown`.
fn outcome_from_update(mut update: coordinator::TaskOutcomeUpdate) -> TaskOutcome {
    use coordinator::task_outcome_update::Outcome;

    match update.outcome.take() {
        Some(Outcome::Ok(ok)) => TaskOutcome::Ok {
            partition: ok.partition,
            node: ok.node,
            output_uri: ok.output_uri,
            oob_keys: ok.oob_keys,
        },
        Some(Outcome::DataError(error)) => TaskOutcome::DataError {
            partition: error.partition,
            node: error.node,
            failed_uri: error.failed_uri,
        },
        Some(Outcome::JobError(error)) => TaskOutcome::JobError {
            partition: error.partition,
            node: error.node,
        },
        Some(Outcome::WorkerCrash(crash)) => TaskOutcome::WorkerCrashed {
            partition: crash.partition,
            node: crash.node,
            reason: crash.reason,
        },
        Some(Outcome::MasterError(error)) => TaskOutcome::MasterError {
            reason: error.reason,
        },
        None => TaskOutcome::Unknown {
            payload: format!("{update:?}"),
        },
    }
}
