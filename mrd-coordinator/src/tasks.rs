//! Partition construction for the two phases of a job.

use anyhow::{bail, Result};

use common::locality::pref_host;
use common::{Input, Partition, TaskInput};

/// Build the map-phase partitions: one per input, in input order, with
/// every replica wrapped as an interchangeable variant.
pub fn map_partitions(inputs: &[Input]) -> Vec<Partition> {
    inputs
        .iter()
        .enumerate()
        .map(|(id, input)| Partition {
            id: id as u32,
            inputs: input.uris().iter().map(TaskInput::new).collect(),
        })
        .collect()
}

/// Build the reduce-phase partitions.
///
/// Every reduce task fetches all inputs, so each partition carries the
/// same quoted, space-joined rendering of the full input list. Partitions
/// differ only in id and in the locality hint, which is taken from the
/// input at the same position. Replicated inputs cannot be expressed here.
pub fn reduce_partitions(inputs: &[Input]) -> Result<Vec<Partition>> {
    if inputs.iter().any(|input| matches!(input, Input::Replicated(_))) {
        bail!("redundant inputs in reduce");
    }

    let joined: String = inputs
        .iter()
        .flat_map(|input| input.uris())
        .map(|uri| format!("'{uri}' "))
        .collect();

    Ok(inputs
        .iter()
        .enumerate()
        .map(|(id, input)| Partition {
            id: id as u32,
            inputs: vec![TaskInput {
                uri: joined.clone(),
                pref_host: input.uris().first().and_then(|uri| pref_host(uri)),
            }],
        })
        .collect())
}
