//! The seam between the coordinator core and its external collaborators.
//!
//! The core talks to four independent services: the worker pool that runs
//! tasks, the event log that records per-job history, the out-of-band key
//! store, and the garbage collector for intermediate map outputs. Each is
//! expressed as a small trait here, with the gRPC-backed implementation
//! next to it. Event, OOB and GC traffic is best effort and never blocks
//! the coordinator; worker pool calls are synchronous acks.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{mpsc, oneshot};
use tonic::transport::Channel;
use tonic::Request;
use tracing::warn;

use common::events::EventTag;
use common::{Phase, TaskInput};

use crate::core::services;
use crate::core::services::event_log_client::EventLogClient;
use crate::core::services::map_results_gc_client::MapResultsGcClient;
use crate::core::services::oob_store_client::OobStoreClient;
use crate::core::worker;
use crate::core::worker::worker_pool_client::WorkerPoolClient;

/// Task dispatch against the worker pool.
#[tonic::async_trait]
pub trait WorkerApi: Send + Sync {
    /// Hand one task to the pool. The ack only says the pool accepted the
    /// submission; the outcome arrives later through the job inbox.
    async fn submit(
        &self,
        job: &str,
        partition: u32,
        phase: Phase,
        blacklist: &[String],
        inputs: &[TaskInput],
    ) -> Result<()>;

    /// Stop every outstanding task of the job.
    async fn kill_job(&self, job: &str) -> Result<()>;
}

/// Per-job named events.
#[tonic::async_trait]
pub trait EventApi: Send + Sync {
    /// Append an event line. Non-blocking; per-job ordering is preserved.
    fn emit(&self, job: &str, message: String, tag: Option<EventTag>);

    /// Finalize the log of a terminated job. Awaited so the log is
    /// complete before the job's coordinator goes away.
    async fn flush(&self, job: &str);
}

/// Side-channel key storage, fire and forget.
pub trait OobApi: Send + Sync {
    fn store(&self, job: &str, node: &str, keys: Vec<String>);
}

/// Intermediate map output reclamation, fire and forget.
pub trait GcApi: Send + Sync {
    fn remove_map_results(&self, uris: Vec<String>);
}

/// The collaborator handles a job coordinator works with.
#[derive(Clone)]
pub struct Clients {
    pub worker: Arc<dyn WorkerApi>,
    pub events: Arc<dyn EventApi>,
    pub oob: Arc<dyn OobApi>,
    pub gc: Arc<dyn GcApi>,
}

/////////////////////////////////////////////////////////////////////////////
// gRPC implementations
/////////////////////////////////////////////////////////////////////////////

pub struct GrpcWorkerPool {
    client: WorkerPoolClient<Channel>,
}

impl GrpcWorkerPool {
    pub async fn connect(url: String) -> Result<Self> {
        Ok(GrpcWorkerPool {
            client: WorkerPoolClient::connect(url).await?,
        })
    }
}

#[tonic::async_trait]
impl WorkerApi for GrpcWorkerPool {
    async fn submit(
        &self,
        job: &str,
        partition: u32,
        phase: Phase,
        blacklist: &[String],
        inputs: &[TaskInput],
    ) -> Result<()> {
        let request = worker::SubmitTaskRequest {
            job: job.to_string(),
            partition,
            phase: phase.to_string(),
            blacklist: blacklist.to_vec(),
            inputs: inputs
                .iter()
                .map(|input| worker::TaskInput {
                    uri: input.uri.clone(),
                    pref_host: input.pref_host.clone(),
                })
                .collect(),
        };

        let response = self.client.clone().submit_task(Request::new(request)).await?;
        if !response.into_inner().accepted {
            bail!("worker pool rejected {phase}:{partition} of job {job}");
        }
        Ok(())
    }

    async fn kill_job(&self, job: &str) -> Result<()> {
        let request = worker::KillJobRequest {
            job: job.to_string(),
        };
        self.client.clone().kill_job(Request::new(request)).await?;
        Ok(())
    }
}

enum LogCommand {
    Emit(services::EmitRequest),
    Flush(String, oneshot::Sender<()>),
}

/// Event log client that queues emits through a background forwarder, so
/// the coordinator never waits on the event server while per-job ordering
/// is preserved. A flush rides the same queue and acks only once
/// everything queued before it has been forwarded.
pub struct GrpcEventLog {
    queue: mpsc::UnboundedSender<LogCommand>,
}

impl GrpcEventLog {
    pub async fn connect(url: String) -> Result<Self> {
        let client = EventLogClient::connect(url).await?;
        let (queue, commands) = mpsc::unbounded_channel();
        tokio::spawn(forward_events(client, commands));
        Ok(GrpcEventLog { queue })
    }
}

async fn forward_events(
    mut client: EventLogClient<Channel>,
    mut commands: mpsc::UnboundedReceiver<LogCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            LogCommand::Emit(request) => {
                if let Err(status) = client.emit(Request::new(request)).await {
                    warn!("event emit failed: {status}");
                }
            }
            LogCommand::Flush(job, done) => {
                let request = services::FlushRequest { job };
                if let Err(status) = client.flush(Request::new(request)).await {
                    warn!("event flush failed: {status}");
                }
                let _ = done.send(());
            }
        }
    }
}

#[tonic::async_trait]
impl EventApi for GrpcEventLog {
    fn emit(&self, job: &str, message: String, tag: Option<EventTag>) {
        let request = services::EmitRequest {
            job: job.to_string(),
            message,
            tag: tag.map(|tag| tag.to_json()).unwrap_or_default(),
        };
        if self.queue.send(LogCommand::Emit(request)).is_err() {
            warn!("event forwarder is gone, dropping event");
        }
    }

    async fn flush(&self, job: &str) {
        let (done, acked) = oneshot::channel();
        if self
            .queue
            .send(LogCommand::Flush(job.to_string(), done))
            .is_ok()
        {
            let _ = acked.await;
        }
    }
}

pub struct GrpcOobStore {
    client: OobStoreClient<Channel>,
}

impl GrpcOobStore {
    pub async fn connect(url: String) -> Result<Self> {
        Ok(GrpcOobStore {
            client: OobStoreClient::connect(url).await?,
        })
    }
}

impl OobApi for GrpcOobStore {
    fn store(&self, job: &str, node: &str, keys: Vec<String>) {
        let mut client = self.client.clone();
        let request = services::StoreRequest {
            job: job.to_string(),
            node: node.to_string(),
            keys,
        };
        tokio::spawn(async move {
            if let Err(status) = client.store(Request::new(request)).await {
                warn!("oob store failed: {status}");
            }
        });
    }
}

pub struct GrpcMapResultsGc {
    client: MapResultsGcClient<Channel>,
}

impl GrpcMapResultsGc {
    pub async fn connect(url: String) -> Result<Self> {
        Ok(GrpcMapResultsGc {
            client: MapResultsGcClient::connect(url).await?,
        })
    }
}

impl GcApi for GrpcMapResultsGc {
    fn remove_map_results(&self, uris: Vec<String>) {
        let mut client = self.client.clone();
        let request = services::RemoveMapResultsRequest { uris };
        tokio::spawn(async move {
            if let Err(status) = client.remove_map_results(Request::new(request)).await {
                warn!("map result gc failed: {status}");
            }
        });
    }
}
