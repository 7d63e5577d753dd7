//! Bookkeeping for every job this coordinator has seen.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use tokio::sync::{mpsc, Mutex};

use common::TaskOutcome;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Accepted, coordinator not yet past its start events.
    Starting,

    /// Map phase.
    Mapping,

    /// Reduce phase.
    Reducing,

    /// Terminal success.
    Ready,

    /// Terminal failure.
    Failed,
}

/// Registry entry for one job.
#[derive(Debug)]
struct JobEntry {
    state: JobState,
    coordinator_id: u64,

    /// Inbox of the job's coordinator task. Once the coordinator returns
    /// the receiver is gone, delivery fails, and late outcomes get
    /// discarded by the caller.
    outcomes: mpsc::Sender<TaskOutcome>,
}

/// All jobs, live and finished. Entries are kept after termination so the
/// listing doubles as history.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, JobEntry>,
    next_coordinator_id: u64,
}

pub type SharedRegistry = Arc<Mutex<JobRegistry>>;

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry::default()
    }

    /// Register an accepted job and vend its coordinator id.
    pub fn register(
        &mut self,
        name: &str,
        outcomes: mpsc::Sender<TaskOutcome>,
    ) -> anyhow::Result<u64> {
        if self.jobs.contains_key(name) {
            bail!("job {name:?} already exists");
        }
        let coordinator_id = self.next_coordinator_id;
        self.next_coordinator_id += 1;
        self.jobs.insert(
            name.to_string(),
            JobEntry {
                state: JobState::Starting,
                coordinator_id,
                outcomes,
            },
        );
        Ok(coordinator_id)
    }

    pub fn set_state(&mut self, name: &str, state: JobState) {
        if let Some(entry) = self.jobs.get_mut(name) {
            entry.state = state;
        }
    }

    pub fn state(&self, name: &str) -> Option<JobState> {
        self.jobs.get(name).map(|entry| entry.state)
    }

    /// Sender for routing an outcome to the named job, if the job is
    /// known.
    pub fn outcome_sender(&self, name: &str) -> Option<mpsc::Sender<TaskOutcome>> {
        self.jobs.get(name).map(|entry| entry.outcomes.clone())
    }

    /// Listing for the Jobs query: counts first, then one line per job in
    /// acceptance order.
    pub fn listing(&self) -> Vec<String> {
        let live = self
            .jobs
            .values()
            .filter(|entry| !matches!(entry.state, JobState::Ready | JobState::Failed))
            .count();
        let finished = self.jobs.len() - live;

        let mut data = vec![format!("Running   {live}"), format!("Finished  {finished}")];

        let mut entries: Vec<_> = self.jobs.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.coordinator_id);
        for (name, entry) in entries {
            data.push(format!(
                "Job (ID={:0>3}) {:?} {}",
                entry.coordinator_id, entry.state, name
            ));
        }
        data
    }
}
