//! Structured annotations attached to job events.
//!
//! The event log stores free-form message lines per job; tags carry the
//! machine-readable payloads pollers rely on. A tag travels on the wire as
//! its JSON rendering.

use serde::Serialize;

use crate::{Input, Phase};

/// Machine-readable annotation attached to an event line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    /// The per-job coordinator came up.
    Start { coordinator: u64 },

    /// Echo of the submitted job parameters.
    JobData {
        n_map: u32,
        n_red: u32,
        do_reduce: bool,
        inputs: Vec<Input>,
    },

    /// One task of the named phase delivered its results.
    TaskReady { phase: Phase },

    /// Terminal success, carrying the final output set.
    Ready { results: Vec<String> },
}

impl EventTag {
    /// The wire rendering of the tag.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
