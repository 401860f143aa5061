//! Size-balanced assignment of non-transactional tables to the pre-pass workers.

use std::sync::Arc;

use crate::types::TableDescriptor;

/// Splits `tables` into `workers` batches of similar total estimated size.
///
/// Tables are taken in the given order and each one goes to the batch with the smallest running
/// total, the lowest batch index winning ties. Every batch keeps the input order, and the largest
/// batch total never exceeds the optimal one by more than the largest single table. Empty batches
/// are dropped, so fewer than `workers` batches may be returned.
pub fn balance_tables(
    tables: Vec<Arc<TableDescriptor>>,
    workers: usize,
) -> Vec<Vec<Arc<TableDescriptor>>> {
    let sizes: Vec<u64> = tables.iter().map(|table| table.estimated_size()).collect();
    let assignment = assign_greedy(&sizes, workers);

    let mut batches: Vec<Vec<Arc<TableDescriptor>>> = vec![Vec::new(); workers.max(1)];
    for (table, worker) in tables.into_iter().zip(assignment) {
        batches[worker].push(table);
    }

    batches.retain(|batch| !batch.is_empty());

    batches
}

/// Returns, for each size, the index of the worker it is assigned to.
fn assign_greedy(sizes: &[u64], workers: usize) -> Vec<usize> {
    let mut loads = vec![0u64; workers.max(1)];

    sizes
        .iter()
        .map(|size| {
            // `min_by_key` keeps the first minimum, which is the lowest worker id.
            let (worker, _) = loads
                .iter()
                .enumerate()
                .min_by_key(|(_, load)| **load)
                .unwrap_or((0, &0));

            loads[worker] = loads[worker].saturating_add(*size);

            worker
        })
        .collect()
}
