use serde::{Deserialize, Serialize};
use std::fmt;

/// An inclusive byte range `[start, end]` of the remote resource.
///
/// Ordering is by `start`, then `end`, which is the order blocks are merged in.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

impl Block {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "block start {start} past end {end}");
        Self { start, end }
    }

    /// Number of bytes covered by the block.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn overlaps(&self, other: &Block) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Name of the temporary payload file holding this block.
    pub fn file_name(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.start, self.end)
    }
}

/// Returns the first pair of overlapping neighbours in an already sorted slice.
pub fn find_overlap(sorted: &[Block]) -> Option<(Block, Block)> {
    sorted
        .windows(2)
        .find(|pair| pair[0].overlaps(&pair[1]))
        .map(|pair| (pair[0], pair[1]))
}

/// Ranges of `[0, total_size - 1]` not covered by `sorted`.
///
/// `sorted` must be ordered and free of overlaps; blocks reaching past the end
/// of the resource are clipped.
pub fn gaps(sorted: &[Block], total_size: u64) -> Vec<Block> {
    let mut remaining = Vec::new();
    let mut cursor = 0u64;

    for block in sorted {
        if block.start >= total_size {
            break;
        }
        if block.start > cursor {
            remaining.push(Block::new(cursor, block.start - 1));
        }
        cursor = cursor.max(block.end.saturating_add(1));
    }

    if cursor < total_size {
        remaining.push(Block::new(cursor, total_size - 1));
    }
    remaining
}

/// Splits an inclusive range into contiguous pieces of at most `block_size` bytes.
pub struct Splitter {
    next: u64,
    end: u64,
    block_size: u64,
    done: bool,
}

impl Splitter {
    pub fn new(range: Block, block_size: u64) -> Self {
        Self {
            next: range.start,
            end: range.end,
            block_size: block_size.max(1),
            done: false,
        }
    }
}

impl Iterator for Splitter {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.done {
            return None;
        }
        let end = self
            .next
            .saturating_add(self.block_size - 1)
            .min(self.end);
        let block = Block::new(self.next, end);
        if end == self.end {
            self.done = true;
        } else {
            self.next = end + 1;
        }
        Some(block)
    }
}
