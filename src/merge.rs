//! Collapsing of duplicate coverage blocks.
//!
//! Instrumentation can record the same block more than once (one entry per
//! test binary that compiled the package). Duplicates share all four range
//! coordinates and are folded into a single block whose count combines the
//! duplicates according to the profile mode.

use crate::error::{CoverageError, Result};
use crate::model::{Block, Mode};

/// Merge blocks with identical ranges. The result is sorted by start then
/// end position and holds one block per distinct range.
pub fn merge_blocks(mut blocks: Vec<Block>, mode: Mode) -> Result<Vec<Block>> {
    blocks.sort_by_key(|b| (b.start_line, b.start_col, b.end_line, b.end_col));

    let mut merged: Vec<Block> = Vec::with_capacity(blocks.len());
    for block in blocks {
        let block = normalize(block, mode);
        match merged.last_mut() {
            Some(last) if last.same_range(&block) => {
                if last.num_stmt != block.num_stmt {
                    return Err(CoverageError::Consistency {
                        start_line: block.start_line,
                        start_col: block.start_col,
                        end_line: block.end_line,
                        end_col: block.end_col,
                        previous: last.num_stmt,
                        current: block.num_stmt,
                    });
                }
                last.count = combine_counts(last.count, block.count, mode);
            }
            _ => merged.push(block),
        }
    }

    Ok(merged)
}

/// Set-mode counts are booleans; anything above zero is a hit.
fn normalize(mut block: Block, mode: Mode) -> Block {
    if mode == Mode::Set {
        block.count = block.count.min(1);
    }
    block
}

fn combine_counts(a: u64, b: u64, mode: Mode) -> u64 {
    match mode {
        Mode::Set => a | b,
        Mode::Count | Mode::Atomic => a.saturating_add(b),
    }
}
