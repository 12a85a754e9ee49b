//! Optional IR rewrites that run before lowering.

mod mem_order;
mod merge_blocks;

pub use mem_order::{LOAD_PREFIX, STORE_PREFIX, enforce_memory_order};
pub use merge_blocks::merge_blocks;

use super::Function;

/// Which IR passes to run ahead of lowering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOptions {
    pub merge_blocks: bool,
    pub enforce_memory_order: bool,
}

/// Runs the selected passes in a fixed order: block merging first, so that
/// token phis are only placed at real join points. Returns whether `func`
/// changed.
pub fn run(func: &mut Function, options: PassOptions) -> bool {
    let mut changed = false;
    if options.merge_blocks {
        changed |= merge_blocks(func);
    }
    if options.enforce_memory_order {
        changed |= enforce_memory_order(func);
    }
    changed
}
