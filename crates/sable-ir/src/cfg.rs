//! CFG utilities: predecessor/successor maps, dominators, post-dominators.

use crate::func::{BlockId, Function, Terminator};
use std::collections::{HashMap, HashSet};

/// Compute the predecessor blocks for each block in the CFG.
pub fn cfg_predecessors(func: &Function) -> HashMap<BlockId, Vec<BlockId>> {
    let mut predecessors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

    for (block_idx, block) in func.blocks.iter().enumerate() {
        let block_id = BlockId(block_idx as u32);
        if let Some(ref terminator) = block.terminator {
            for successor in terminator.successors() {
                predecessors.entry(successor).or_default().push(block_id);
            }
        }
    }

    predecessors
}

/// Compute the successor blocks for each block in the CFG.
pub fn cfg_successors(func: &Function) -> HashMap<BlockId, Vec<BlockId>> {
    let mut successors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

    for (block_idx, block) in func.blocks.iter().enumerate() {
        let block_id = BlockId(block_idx as u32);
        let succ = match block.terminator {
            Some(ref terminator) => terminator.successors(),
            None => vec![],
        };
        successors.insert(block_id, succ);
    }

    successors
}

/// A dominance relation over the blocks of one function.
///
/// Produced either forward (dominators, rooted at the entry block) or
/// backward (post-dominators, rooted at the exit blocks).
#[derive(Debug, Clone)]
pub struct DomTree {
    /// For each block index, the set of block indices dominating it.
    doms: Vec<HashSet<usize>>,
}

impl DomTree {
    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.doms[b.0 as usize].contains(&(a.0 as usize))
    }
}

/// Compute the dominator relation, rooted at `bb0`.
pub fn dominators(func: &Function) -> DomTree {
    let preds = cfg_predecessors(func);
    let roots: Vec<usize> = vec![0];
    DomTree {
        doms: solve(func.blocks.len(), &roots, |b| {
            preds
                .get(&BlockId(b as u32))
                .map(|ps| ps.iter().map(|p| p.0 as usize).collect())
                .unwrap_or_default()
        }),
    }
}

/// Compute the post-dominator relation, rooted at the exit blocks
/// (blocks whose terminator is a return, or that have no terminator).
pub fn post_dominators(func: &Function) -> DomTree {
    let succs = cfg_successors(func);
    let roots: Vec<usize> = func
        .blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| matches!(b.terminator, Some(Terminator::Ret(_)) | None))
        .map(|(i, _)| i)
        .collect();
    DomTree {
        doms: solve(func.blocks.len(), &roots, |b| {
            succs
                .get(&BlockId(b as u32))
                .map(|ss| ss.iter().map(|s| s.0 as usize).collect())
                .unwrap_or_default()
        }),
    }
}

/// Iterative dataflow solution: `dom(b) = {b} ∪ ⋂ dom(edges(b))`,
/// with roots fixed to `{root}`.
fn solve(
    num_blocks: usize,
    roots: &[usize],
    edges: impl Fn(usize) -> Vec<usize>,
) -> Vec<HashSet<usize>> {
    if num_blocks == 0 {
        return vec![];
    }
    let all: HashSet<usize> = (0..num_blocks).collect();
    let mut doms: Vec<HashSet<usize>> = vec![all; num_blocks];
    for &root in roots {
        doms[root] = HashSet::from([root]);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for b in 0..num_blocks {
            if roots.contains(&b) {
                continue;
            }
            let mut new: Option<HashSet<usize>> = None;
            for e in edges(b) {
                new = Some(match new {
                    None => doms[e].clone(),
                    Some(acc) => acc.intersection(&doms[e]).copied().collect(),
                });
            }
            let mut new = new.unwrap_or_default();
            new.insert(b);
            if new != doms[b] {
                doms[b] = new;
                changed = true;
            }
        }
    }

    doms
}
