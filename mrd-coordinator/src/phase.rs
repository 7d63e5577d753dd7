//! Bounded-fan-out dispatch loop for one phase of a job.

use std::collections::{BTreeSet, VecDeque};

use anyhow::anyhow;
use tokio::sync::mpsc;
use tracing::debug;

use common::events::EventTag;
use common::{Partition, Phase, TaskOutcome};

use crate::clients::Clients;
use crate::failures::FailureTable;
use crate::fault::Fault;

/// Runs one phase of a job to completion.
///
/// Owns the pending queue, the failure table and the result set for the
/// duration of the run; the job's outcome inbox is borrowed from the job
/// coordinator. All mutation happens on the single task driving
/// [`PhaseRunner::run`], one outcome at a time.
pub struct PhaseRunner<'a> {
    job: &'a str,
    phase: Phase,
    clients: &'a Clients,
    inbox: &'a mut mpsc::Receiver<TaskOutcome>,
    max_failure_rate: usize,
    pending: VecDeque<u32>,
    failures: FailureTable,
    results: BTreeSet<String>,
    in_flight: usize,
}

impl<'a> PhaseRunner<'a> {
    pub fn new(
        job: &'a str,
        phase: Phase,
        clients: &'a Clients,
        inbox: &'a mut mpsc::Receiver<TaskOutcome>,
        partitions: Vec<Partition>,
        max_failure_rate: usize,
    ) -> Self {
        let failures = FailureTable::new(&partitions);
        let pending = partitions.iter().map(|partition| partition.id).collect();
        PhaseRunner {
            job,
            phase,
            clients,
            inbox,
            max_failure_rate,
            pending,
            failures,
            results: BTreeSet::new(),
            in_flight: 0,
        }
    }

    /// Drive every partition to a terminal state.
    ///
    /// Dispatches pending partitions in order while fewer than `max` tasks
    /// are in flight, then blocks on the next outcome. Returns the output
    /// set once every partition has delivered one.
    pub async fn run(mut self, max: usize) -> Result<BTreeSet<String>, Fault> {
        loop {
            while self.in_flight < max {
                let Some(partition) = self.pending.pop_front() else {
                    break;
                };
                self.submit(partition).await?;
                self.in_flight += 1;
            }

            if self.in_flight == 0 && self.pending.is_empty() {
                return Ok(self.results);
            }

            self.consume_one().await?;
        }
    }

    /// Submit a partition with its current blacklist and variants.
    async fn submit(&mut self, partition: u32) -> Result<(), Fault> {
        let record = self.failures.record(partition).ok_or_else(|| {
            Fault::Unexpected(anyhow!("no failure record for {}:{partition}", self.phase))
        })?;
        self.clients
            .worker
            .submit(
                self.job,
                partition,
                self.phase,
                &record.blacklist,
                &record.remaining,
            )
            .await
            .map_err(Fault::Unexpected)
    }

    /// Block on the next outcome and apply it.
    async fn consume_one(&mut self) -> Result<(), Fault> {
        if self.in_flight == 0 {
            return Err(Fault::logged("Nothing to wait"));
        }

        let Some(outcome) = self.inbox.recv().await else {
            return Err(Fault::Unexpected(anyhow!("outcome inbox closed mid-phase")));
        };

        match outcome {
            TaskOutcome::Ok {
                partition,
                node,
                output_uri,
                oob_keys,
            } => {
                self.clients.events.emit(
                    self.job,
                    format!(
                        "Received results from {}:{partition} @ {node}.",
                        self.phase
                    ),
                    Some(EventTag::TaskReady { phase: self.phase }),
                );
                if !oob_keys.is_empty() {
                    self.clients.oob.store(self.job, &node, oob_keys);
                }
                self.results.insert(output_uri);
                self.in_flight -= 1;
                Ok(())
            }

            TaskOutcome::DataError {
                partition,
                node,
                failed_uri,
            } => {
                // One task ended and its retry starts right away, so the
                // in-flight count is untouched. The retry bypasses the
                // pending queue.
                self.check_failure_rate(partition)?;
                self.failures.on_data_error(partition, &failed_uri, &node);
                debug!(
                    job = self.job,
                    partition, %node, %failed_uri, "retrying after data error"
                );
                self.submit(partition).await
            }

            // Worker-side fatal; the worker already described it to the
            // event log.
            TaskOutcome::JobError { partition, node } => {
                debug!(job = self.job, partition, %node, "worker reported job error");
                Err(Fault::logged("job error reported by worker"))
            }

            TaskOutcome::WorkerCrashed {
                partition,
                node,
                reason,
            } => {
                self.clients.events.emit(
                    self.job,
                    format!(
                        "ERROR: Worker crashed in {}:{partition} @ {node}: {reason}",
                        self.phase
                    ),
                    None,
                );
                Err(Fault::logged("worker crashed"))
            }

            TaskOutcome::MasterError { reason } => {
                self.clients.events.emit(
                    self.job,
                    format!("ERROR: Master terminated the job: {reason}"),
                    None,
                );
                Err(Fault::logged("master terminated the job"))
            }

            TaskOutcome::Unknown { payload } => {
                self.clients.events.emit(
                    self.job,
                    format!("ERROR: Received an unknown error: {payload}"),
                    None,
                );
                Err(Fault::logged("unknown worker message"))
            }
        }
    }

    /// Abort once a partition's blacklist has outgrown the configured
    /// rate. The size is read before the new failure is recorded, and the
    /// comparison is strict.
    fn check_failure_rate(&self, partition: u32) -> Result<(), Fault> {
        let size = self.failures.blacklist_size(partition);
        if size > self.max_failure_rate {
            self.clients.events.emit(
                self.job,
                format!(
                    "ERROR: {}:{partition} failed {size} times. Aborting job.",
                    self.phase
                ),
                None,
            );
            return Err(Fault::logged("failure rate exceeded"));
        }
        Ok(())
    }
}
