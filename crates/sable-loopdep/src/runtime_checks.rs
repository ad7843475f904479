//! Runtime pointer-range checks.
//!
//! When the dependence of two pointers cannot be decided at compile time
//! the loop can still be vectorized behind a runtime predicate asserting
//! their ranges do not overlap. This module collects per-pointer symbolic
//! bounds, decides which pairs must be compared, and materializes the
//! overlap predicate on request.

use crate::classify::{AccessPartition, AccessTag};
use crate::config::LoopDepConfig;
use crate::stride::{self, SymbolicStrides};
use sable_ir::loops::Loop;
use sable_ir::{BinOp, BlockId, DataLayout, Function, IcmpPred, ValueId};
use sable_scev::expand::{ExpandError, ScevExpander};
use sable_scev::{ScalarEvolution, Scev};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Symbolic bounds of one pointer over the loop.
#[derive(Debug, Clone)]
pub struct PointerBounds {
    pub ptr: ValueId,
    /// Address of the first access: the recurrence's base.
    pub start: Scev,
    /// The recurrence evaluated at the backedge-taken count.
    pub end: Scev,
    pub is_write: bool,
    /// Dependence-set id, consecutive from 1 within each alias set.
    pub dep_set_id: u32,
    pub alias_set_id: u32,
}

/// The runtime-check descriptor: one entry per pointer with computable
/// bounds, plus the number of pair comparisons the check will perform.
#[derive(Debug, Clone, Default)]
pub struct RuntimePointerChecks {
    pub entries: Vec<PointerBounds>,
    pub num_comparisons: u32,
    /// Every pointer in the partition got an entry. When false and a
    /// check is needed, the loop cannot be guarded.
    pub can_check_all: bool,
}

impl RuntimePointerChecks {
    /// Does the pair `(i, j)` need a runtime comparison? Only pairs with
    /// at least one write, in different dependence sets but the same
    /// alias set.
    pub fn needs_checking(&self, i: usize, j: usize) -> bool {
        let (a, b) = (&self.entries[i], &self.entries[j]);
        (a.is_write || b.is_write)
            && a.dep_set_id != b.dep_set_id
            && a.alias_set_id == b.alias_set_id
    }

    /// All index pairs requiring a comparison, `i < j`.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        let mut out = vec![];
        for i in 0..self.entries.len() {
            for j in (i + 1)..self.entries.len() {
                if self.needs_checking(i, j) {
                    out.push((i, j));
                }
            }
        }
        out
    }
}

/// Why the descriptor could not be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtBuildError {
    #[error("too many memory runtime checks needed")]
    TooManyComparisons,
    #[error("runtime check would compare pointers in different address spaces")]
    CrossAddressSpace,
}

/// Builds the runtime-check descriptor for one loop.
pub struct RuntimeCheckBuilder<'a, 'f> {
    func: &'f Function,
    se: &'a ScalarEvolution<'f>,
    layout: &'a DataLayout,
    l: &'a Loop,
    strides: &'a SymbolicStrides,
    backedge_count: &'a Scev,
    config: &'a LoopDepConfig,
}

impl<'a, 'f> RuntimeCheckBuilder<'a, 'f> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        func: &'f Function,
        se: &'a ScalarEvolution<'f>,
        layout: &'a DataLayout,
        l: &'a Loop,
        strides: &'a SymbolicStrides,
        backedge_count: &'a Scev,
        config: &'a LoopDepConfig,
    ) -> Self {
        Self {
            func,
            se,
            layout,
            l,
            strides,
            backedge_count,
            config,
        }
    }

    /// Walk the alias sets and collect bounds for every pointer that has
    /// them. `should_check_stride` is the strict retry mode requiring
    /// stride exactly +1; with `use_dependence_sets` off, every pointer
    /// gets a fresh dependence-set id so every pair is compared.
    pub fn build(
        &self,
        partition: &mut AccessPartition,
        should_check_stride: bool,
        use_dependence_sets: bool,
    ) -> Result<RuntimePointerChecks, RtBuildError> {
        let mut checks = RuntimePointerChecks {
            can_check_all: true,
            ..Default::default()
        };

        let check_deps = &partition.check_deps;
        let dep_cands = &mut partition.dep_cands;

        for (set_idx, set) in partition.alias_sets.iter().enumerate() {
            let alias_set_id = set_idx as u32 + 1;
            let set_needs_dep_check = use_dependence_sets
                && check_deps
                    .iter()
                    .any(|t| set.pointers.iter().any(|(p, _)| *p == t.ptr));

            let mut running_dep_id: u32 = 1;
            let mut leader_ids: HashMap<AccessTag, u32> = HashMap::new();

            // Count dependence sets over every pointer in the set,
            // computable or not, so a pointer without bounds still
            // forces its comparisons (and thus the bounds failure).
            let mut distinct: Vec<AccessTag> = vec![];
            for &(ptr, is_write) in &set.pointers {
                let key = if set_needs_dep_check {
                    dep_cands.leader(AccessTag { ptr, is_write })
                } else {
                    AccessTag { ptr, is_write }
                };
                if !distinct.contains(&key) {
                    distinct.push(key);
                }
            }
            let dep_sets_in_set = distinct.len();

            let mut writes = 0u32;
            let mut reads = 0u32;

            for &(ptr, is_write) in &set.pointers {
                if is_write {
                    writes += 1;
                } else {
                    reads += 1;
                }

                let computable =
                    stride::has_computable_bounds(self.func, self.se, ptr, self.l, self.strides)
                        && (!should_check_stride
                            || stride::element_stride(
                                self.func,
                                self.se,
                                self.layout,
                                ptr,
                                self.l,
                                self.strides,
                            ) == Ok(1));
                if !computable {
                    checks.can_check_all = false;
                    continue;
                }

                let dep_set_id = if set_needs_dep_check {
                    let leader = dep_cands.leader(AccessTag { ptr, is_write });
                    if let Some(&id) = leader_ids.get(&leader) {
                        id
                    } else {
                        let id = running_dep_id;
                        running_dep_id += 1;
                        leader_ids.insert(leader, id);
                        id
                    }
                } else {
                    let id = running_dep_id;
                    running_dep_id += 1;
                    id
                };

                let scev = stride::rewritten_pointer_scev(self.se, self.strides, ptr);
                let (base, _, _, _) = match scev.as_addrec() {
                    Some(parts) => parts,
                    None => {
                        checks.can_check_all = false;
                        continue;
                    }
                };
                debug!(ptr = %ptr, dep_set_id, alias_set_id, "found a runtime check pointer");
                checks.entries.push(PointerBounds {
                    ptr,
                    start: base.clone(),
                    end: scev.evaluate_at(self.backedge_count),
                    is_write,
                    dep_set_id,
                    alias_set_id,
                });
            }

            // One write against every other pointer of the set; nothing
            // to compare when a single dependence set covers them all.
            if dep_sets_in_set > 1 && writes >= 1 {
                checks.num_comparisons += writes * (reads + writes - 1);
            }
        }

        if checks.num_comparisons > self.config.runtime_check_threshold {
            debug!(
                num_comparisons = checks.num_comparisons,
                threshold = self.config.runtime_check_threshold,
                "runtime check threshold exceeded"
            );
            return Err(RtBuildError::TooManyComparisons);
        }

        // Bound comparisons only make sense within one address space.
        for (i, j) in checks.pairs() {
            let as_i = self.func.ty(checks.entries[i].ptr).addr_space();
            let as_j = self.func.ty(checks.entries[j].ptr).addr_space();
            if as_i != as_j {
                return Err(RtBuildError::CrossAddressSpace);
            }
        }

        Ok(checks)
    }
}

/// Materialize the overlap predicate for every pair requiring a check:
/// `(start_i <= end_j) && (start_j <= end_i)`, OR-reduced across pairs
/// and AND-combined with a true constant so the caller always receives
/// an instruction anchor. Returns the first emitted instruction and the
/// final boolean, or `None` when no pair needs checking.
pub fn emit_runtime_check(
    func: &mut Function,
    block: BlockId,
    checks: &RuntimePointerChecks,
) -> Result<Option<(ValueId, ValueId)>, ExpandError> {
    let pairs = checks.pairs();
    if pairs.is_empty() {
        return Ok(None);
    }

    let mut expander = ScevExpander::new(func, block);

    // Expand each entry's bounds once.
    let mut bounds: Vec<(ValueId, ValueId)> = vec![];
    for entry in &checks.entries {
        let start = expander.expand(&entry.start)?;
        let end = expander.expand(&entry.end)?;
        bounds.push((start, end));
    }

    let mut result: Option<ValueId> = None;
    for (i, j) in pairs {
        let (start_i, end_i) = bounds[i];
        let (start_j, end_j) = bounds[j];
        let cmp0 = expander.icmp(IcmpPred::Ule, start_i, end_j);
        let cmp1 = expander.icmp(IcmpPred::Ule, start_j, end_i);
        let overlap = expander.binary(BinOp::And, cmp0, cmp1);
        result = Some(match result {
            None => overlap,
            Some(acc) => expander.binary(BinOp::Or, acc, overlap),
        });
    }

    let any_overlap = result.expect("at least one pair");
    let anchor_true = expander.const_bool(true);
    let final_check = expander.binary(BinOp::And, any_overlap, anchor_true);
    let first = expander
        .first_inst()
        .expect("emitted at least one instruction");
    Ok(Some((first, final_check)))
}
