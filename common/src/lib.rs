//! Shared vocabulary of the mrd job coordinator.
//!
//! A job arrives as a parsed [`JobSpec`] and is executed as a map phase
//! followed by an optional reduce phase. Each phase is an enumeration of
//! [`Partition`]s dispatched to the worker pool, which answers with one
//! [`TaskOutcome`] per accepted submission. The wire contracts in `protos/`
//! round-trip through the types in this crate.

use std::fmt;
use std::fmt::Formatter;

use anyhow::{bail, Result};
use serde::Serialize;

pub mod events;
pub mod locality;

/////////////////////////////////////////////////////////////////////////////
// Job descriptors
/////////////////////////////////////////////////////////////////////////////

/// One job input.
///
/// Map inputs may carry redundant replicas of the same data; any single
/// replica suffices to run the task. Reduce accepts single uris only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Input {
    /// A single uri.
    Single(String),

    /// Interchangeable replicas, in preference order. Never empty.
    Replicated(Vec<String>),
}

impl Input {
    /// All uris carried by this input.
    pub fn uris(&self) -> &[String] {
        match self {
            Input::Single(uri) => std::slice::from_ref(uri),
            Input::Replicated(uris) => uris,
        }
    }
}

/// A parsed job submission. Immutable for the lifetime of the job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Unique job name. Uniqueness is the submitting side's problem; the
    /// name doubles as a path component downstream, hence the character
    /// restrictions in [`JobSpec::validate`].
    pub name: String,

    /// Ordered job inputs.
    pub inputs: Vec<Input>,

    /// Maximum concurrent map tasks. Zero disables the map phase and
    /// feeds `inputs` straight into reduce.
    pub n_map: u32,

    /// Maximum concurrent reduce tasks.
    pub n_red: u32,

    /// Whether to run the reduce phase at all.
    pub do_reduce: bool,
}

impl JobSpec {
    /// Check the boundary constraints on a submitted job.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("job name is empty");
        }
        if self.name.contains('/') || self.name.contains('.') {
            bail!("job name {:?} may not contain '/' or '.'", self.name);
        }
        if self.n_red == 0 {
            bail!("n_red must be positive");
        }
        if self.inputs.iter().any(|input| input.uris().is_empty()) {
            bail!("replicated input with no replicas");
        }
        Ok(())
    }
}

/////////////////////////////////////////////////////////////////////////////
// Phases and partitions
/////////////////////////////////////////////////////////////////////////////

/// The two dispatch phases of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Map,
    Reduce,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Map => write!(f, "map"),
            Phase::Reduce => write!(f, "reduce"),
        }
    }
}

/// One input variant handed to the worker pool: a uri plus the host the
/// scheduler should prefer for data locality, when one can be derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub uri: String,
    pub pref_host: Option<String>,
}

impl TaskInput {
    /// Wrap a uri, deriving its locality hint.
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let pref_host = locality::pref_host(&uri);
        TaskInput { uri, pref_host }
    }
}

/// A unit of work within one phase: a dense id plus one or more
/// interchangeable input variants. Ids are assigned by input position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: u32,
    pub inputs: Vec<TaskInput>,
}

/////////////////////////////////////////////////////////////////////////////
// Task outcomes
/////////////////////////////////////////////////////////////////////////////

/// Everything the worker pool can report back for one submitted task.
///
/// Wire updates that fit none of the known arms decode to
/// [`TaskOutcome::Unknown`] carrying a rendering of the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task ran to completion.
    Ok {
        partition: u32,
        node: String,
        output_uri: String,
        oob_keys: Vec<String>,
    },

    /// An input could not be read on the node the task ran on. Retriable
    /// on another node or another variant.
    DataError {
        partition: u32,
        node: String,
        failed_uri: String,
    },

    /// Worker-side fatal, already described to the event log.
    JobError { partition: u32, node: String },

    /// The worker process died.
    WorkerCrashed {
        partition: u32,
        node: String,
        reason: String,
    },

    /// The master tore the job down.
    MasterError { reason: String },

    /// Anything else.
    Unknown { payload: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> JobSpec {
        JobSpec {
            name: name.to_string(),
            inputs: vec![Input::Single("http://h1/a".to_string())],
            n_map: 1,
            n_red: 1,
            do_reduce: true,
        }
    }

    #[test]
    fn validate_accepts_plain_names() {
        assert!(spec("wordcount_1").validate().is_ok());
    }

    #[test]
    fn validate_rejects_path_like_names() {
        assert!(spec("a/b").validate().is_err());
        assert!(spec("a.b").validate().is_err());
        assert!(spec("").validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_reducers() {
        let mut s = spec("j");
        s.n_red = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_replica_lists() {
        let mut s = spec("j");
        s.inputs.push(Input::Replicated(vec![]));
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_allows_empty_input_list() {
        let mut s = spec("j");
        s.inputs.clear();
        assert!(s.validate().is_ok());
    }

    #[test]
    fn input_uris_flattens_both_shapes() {
        let single = Input::Single("u".to_string());
        let replicated = Input::Replicated(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(single.uris(), ["u"]);
        assert_eq!(replicated.uris(), ["a", "b"]);
    }

    #[test]
    fn task_input_derives_locality_hint() {
        let input = TaskInput::new("disco://node7/data/part-0");
        assert_eq!(input.pref_host.as_deref(), Some("node7"));
        let opaque = TaskInput::new("raw://elsewhere");
        assert_eq!(opaque.pref_host, None);
    }
}
