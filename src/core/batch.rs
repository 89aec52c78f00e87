/*!
 * Work batching for the copy pool
 *
 * Large files (at or above the small-file threshold) become singleton
 * batches and are dispatched first, sorted by size descending, so the
 * longest transfers never become tail stragglers. Small files are
 * grouped into batches of up to `batch_size`, preserving plan order.
 */

use super::planner::Operation;

/// One copy operation queued for a worker, with its attempt counter
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub op: Operation,
    /// 1-based attempt number; bumped by the controller on retry
    pub attempt: u32,
}

/// A group of operations assigned to one worker in one dispatch
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn single(op: Operation, attempt: u32) -> Self {
        Self {
            items: vec![BatchItem { op, attempt }],
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|i| i.op.transfer_size()).sum()
    }
}

/// Split the plan's copy operations into dispatch-ready batches
pub fn build_batches(
    copy_a_to_b: &[Operation],
    copy_b_to_a: &[Operation],
    batch_size: usize,
    small_file_threshold: u64,
) -> Vec<Batch> {
    let batch_size = batch_size.max(1);
    let mut large: Vec<Operation> = Vec::new();
    let mut small: Vec<Operation> = Vec::new();

    for op in copy_a_to_b.iter().chain(copy_b_to_a.iter()) {
        if op.transfer_size() >= small_file_threshold {
            large.push(op.clone());
        } else {
            small.push(op.clone());
        }
    }

    large.sort_by(|x, y| y.transfer_size().cmp(&x.transfer_size()));

    let mut batches: Vec<Batch> = large.into_iter().map(|op| Batch::single(op, 1)).collect();

    let mut current = Batch::default();
    for op in small {
        current.items.push(BatchItem { op, attempt: 1 });
        if current.len() >= batch_size {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }

    batches
}
