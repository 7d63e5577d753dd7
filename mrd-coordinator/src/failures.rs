//! Per-partition failure records for one phase run.

use std::collections::HashMap;

use common::{Partition, TaskInput};

/// Mutable failure record of one partition.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Nodes this partition has failed on with a data error. Grows
    /// monotonically; a node is recorded once.
    pub blacklist: Vec<String>,

    /// Input variants still considered valid. Never empty.
    pub remaining: Vec<TaskInput>,
}

/// One record per partition, owned by a single phase run and dropped with
/// it.
#[derive(Debug, Default)]
pub struct FailureTable {
    records: HashMap<u32, FailureRecord>,
}

impl FailureTable {
    /// One fresh record per partition: empty blacklist, full variants.
    pub fn new(partitions: &[Partition]) -> Self {
        let records = partitions
            .iter()
            .map(|partition| {
                let record = FailureRecord {
                    blacklist: Vec::new(),
                    remaining: partition.inputs.clone(),
                };
                (partition.id, record)
            })
            .collect();
        FailureTable { records }
    }

    pub fn record(&self, partition: u32) -> Option<&FailureRecord> {
        self.records.get(&partition)
    }

    /// How many nodes the partition has been blacklisted on so far.
    pub fn blacklist_size(&self, partition: u32) -> usize {
        self.records
            .get(&partition)
            .map_or(0, |record| record.blacklist.len())
    }

    /// Record a data error: blacklist the node and, while more than one
    /// variant remains, drop every variant carrying the failed uri. A sole
    /// surviving variant is kept even when it is the one that failed, so
    /// the last resort is retrying the same uri on a different node.
    pub fn on_data_error(
        &mut self,
        partition: u32,
        failed_uri: &str,
        node: &str,
    ) -> Option<&FailureRecord> {
        let record = self.records.get_mut(&partition)?;

        if !record.blacklist.iter().any(|known| known == node) {
            record.blacklist.push(node.to_string());
        }

        if record.remaining.len() > 1 {
            let kept: Vec<TaskInput> = record
                .remaining
                .iter()
                .filter(|input| input.uri != failed_uri)
                .cloned()
                .collect();
            if !kept.is_empty() {
                record.remaining = kept;
            }
        }

        Some(&*record)
    }
}
