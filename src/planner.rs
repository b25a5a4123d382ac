use tracing::{debug, warn};

use crate::block::{self, Block, Splitter};

/// Work left for a resource after accounting for earlier progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Prior progress that was kept, sorted by offset.
    pub completed: Vec<Block>,
    /// Blocks still to fetch, sorted by offset.
    pub pending: Vec<Block>,
    /// Set when the prior progress was unusable and thrown away.
    pub discarded_prior: bool,
}

/// Partitions `[0, total_size - 1]` into pending blocks of at most `block_size`
/// bytes, skipping ranges already covered by `prior`.
///
/// Prior blocks that overlap each other or reach outside the resource mark the
/// record as corrupt; in that case all prior progress is discarded.
pub fn plan(total_size: u64, block_size: u64, mut prior: Vec<Block>) -> Plan {
    prior.sort();

    let mut discarded_prior = false;
    if let Some(bad) = prior.iter().find(|b| b.start > b.end || b.end >= total_size) {
        warn!(block = %bad, total_size, "prior block outside resource, discarding progress");
        prior.clear();
        discarded_prior = true;
    } else if let Some((a, b)) = block::find_overlap(&prior) {
        warn!(first = %a, second = %b, "prior blocks overlap, discarding progress");
        prior.clear();
        discarded_prior = true;
    }

    let pending: Vec<Block> = block::gaps(&prior, total_size)
        .into_iter()
        .flat_map(|gap| Splitter::new(gap, block_size))
        .collect();

    debug!(
        total_size,
        block_size,
        completed = prior.len(),
        pending = pending.len(),
        "planned blocks"
    );

    Plan {
        completed: prior,
        pending,
        discarded_prior,
    }
}
