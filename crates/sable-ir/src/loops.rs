//! Natural loop descriptions and queries used by the loop analyses.

use crate::cfg::{cfg_predecessors, cfg_successors};
use crate::func::{BlockId, Function};

/// A natural loop: a header plus the set of member blocks.
///
/// Loop discovery happens in the front end; analyses receive loops fully
/// formed. The header identifies the loop within its function.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    /// All member blocks, including the header.
    pub blocks: Vec<BlockId>,
    /// Frontend promise that iterations carry no cross-iteration memory
    /// dependences.
    pub annotated_parallel: bool,
}

impl Loop {
    pub fn new(header: BlockId, blocks: Vec<BlockId>) -> Self {
        Self {
            header,
            blocks,
            annotated_parallel: false,
        }
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// Blocks inside the loop that branch back to the header.
    pub fn backedge_sources(&self, func: &Function) -> Vec<BlockId> {
        let preds = cfg_predecessors(func);
        preds
            .get(&self.header)
            .map(|ps| ps.iter().copied().filter(|p| self.contains(*p)).collect())
            .unwrap_or_default()
    }

    /// The latch, when the loop has exactly one backedge.
    pub fn latch(&self, func: &Function) -> Option<BlockId> {
        let sources = self.backedge_sources(func);
        match sources.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Member blocks with at least one successor outside the loop.
    pub fn exiting_blocks(&self, func: &Function) -> Vec<BlockId> {
        let succs = cfg_successors(func);
        self.blocks
            .iter()
            .copied()
            .filter(|b| {
                succs
                    .get(b)
                    .map(|ss| ss.iter().any(|s| !self.contains(*s)))
                    .unwrap_or(false)
            })
            .collect()
    }
}

/// All loops of one function.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub loops: Vec<Loop>,
}

impl LoopInfo {
    pub fn new(loops: Vec<Loop>) -> Self {
        Self { loops }
    }

    /// A loop is innermost when no other loop's header lies inside it.
    pub fn is_innermost(&self, l: &Loop) -> bool {
        self.loops
            .iter()
            .filter(|other| other.header != l.header)
            .all(|other| !l.contains(other.header))
    }

    /// Look up a loop by its header block.
    pub fn loop_with_header(&self, header: BlockId) -> Option<&Loop> {
        self.loops.iter().find(|l| l.header == header)
    }
}
