//! The per-loop analysis driver and its public result.

use crate::classify::AccessClassifier;
use crate::config::LoopDepConfig;
use crate::depcheck::{DepChecker, DepVerdict};
use crate::diag::Rejection;
use crate::runtime_checks::{
    emit_runtime_check, RtBuildError, RuntimeCheckBuilder, RuntimePointerChecks,
};
use crate::stride::SymbolicStrides;
use sable_ir::loops::{Loop, LoopInfo};
use sable_ir::{BlockId, CallEffect, DataLayout, Function, MemOrdering, ValueId, ValueKind};
use sable_scev::expand::ExpandError;
use sable_scev::ScalarEvolution;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// The analysis result for one loop.
#[derive(Debug, Clone)]
pub struct LoopAccessInfo {
    pub can_vectorize: bool,
    pub need_runtime_check: bool,
    pub runtime_checks: RuntimePointerChecks,
    /// Largest safe dependence distance observed, in bytes.
    pub max_safe_dep_dist_bytes: u32,
    pub num_loads: usize,
    pub num_stores: usize,
    /// The earliest failing reason, when the loop was rejected.
    pub diagnostic: Option<Rejection>,
}

impl Default for LoopAccessInfo {
    fn default() -> Self {
        Self {
            can_vectorize: false,
            need_runtime_check: false,
            runtime_checks: RuntimePointerChecks::default(),
            max_safe_dep_dist_bytes: u32::MAX,
            num_loads: 0,
            num_stores: 0,
            diagnostic: None,
        }
    }
}

impl LoopAccessInfo {
    /// Record the earliest failing reason and answer conservatively.
    /// Only one diagnostic may be attached per analysis.
    fn report(&mut self, rejection: Rejection) {
        debug_assert!(
            self.diagnostic.is_none(),
            "diagnostic already attached: {:?}",
            self.diagnostic
        );
        debug!(%rejection, "loop rejected");
        if self.diagnostic.is_none() {
            self.diagnostic = Some(rejection);
        }
        self.can_vectorize = false;
        self.need_runtime_check = false;
    }

    /// Materialize the runtime overlap predicate at the given insertion
    /// block. Returns the first new instruction and the final boolean,
    /// or `None` when the loop needs no check.
    pub fn emit_runtime_check(
        &self,
        func: &mut Function,
        block: BlockId,
    ) -> Result<Option<(ValueId, ValueId)>, ExpandError> {
        if !self.need_runtime_check {
            return Ok(None);
        }
        emit_runtime_check(func, block, &self.runtime_checks)
    }
}

/// Analyzes the memory-dependence structure of innermost loops, caching
/// results per loop until invalidated by the pass manager.
pub struct LoopDepAnalysis<'a, 'f> {
    func: &'f Function,
    loops: &'f LoopInfo,
    se: &'a ScalarEvolution<'f>,
    layout: DataLayout,
    config: LoopDepConfig,
    cache: HashMap<BlockId, LoopAccessInfo>,
}

impl<'a, 'f> LoopDepAnalysis<'a, 'f> {
    pub fn new(
        func: &'f Function,
        loops: &'f LoopInfo,
        se: &'a ScalarEvolution<'f>,
        config: LoopDepConfig,
    ) -> Self {
        Self {
            func,
            loops,
            se,
            layout: DataLayout::new(),
            config,
            cache: HashMap::new(),
        }
    }

    /// The analysis result for a loop, computed on first request and
    /// cached by loop header.
    pub fn info(&mut self, l: &Loop, strides: &SymbolicStrides) -> &LoopAccessInfo {
        if !self.cache.contains_key(&l.header) {
            let info = self.analyze(l, strides);
            self.cache.insert(l.header, info);
        }
        &self.cache[&l.header]
    }

    /// Drop all cached results; the pass manager calls this when the IR
    /// changes under the analysis.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    fn analyze(&self, l: &Loop, strides: &SymbolicStrides) -> LoopAccessInfo {
        let mut info = LoopAccessInfo::default();
        debug!(header = %l.header, "analyzing loop");

        // Shape pre-conditions: innermost, one backedge, bottom-tested
        // with a single exiting block, and a computable trip count.
        if !self.loops.is_innermost(l) {
            info.report(Rejection::NotInnermost);
            return info;
        }
        if l.backedge_sources(self.func).len() != 1 {
            info.report(Rejection::ControlFlow);
            return info;
        }
        let latch = match l.latch(self.func) {
            Some(latch) => latch,
            None => {
                info.report(Rejection::ControlFlow);
                return info;
            }
        };
        let exiting = l.exiting_blocks(self.func);
        if exiting.len() != 1 || exiting[0] != latch {
            info.report(Rejection::ControlFlow);
            return info;
        }
        let backedge_count = match self.se.backedge_taken_count(l) {
            Some(count) => count,
            None => {
                info.report(Rejection::NoTripCount);
                return info;
            }
        };

        let parallel = l.annotated_parallel;

        // Gather the loads and stores in program order, rejecting
        // anything else that touches memory.
        let mut mem_insts: Vec<ValueId> = vec![];
        for block in &l.blocks {
            for inst in &self.func.block(*block).insts {
                match &self.func.value(*inst).kind {
                    ValueKind::Load { ordering, .. } => {
                        if *ordering != MemOrdering::Simple && !parallel {
                            info.report(Rejection::NonSimpleLoad);
                            return info;
                        }
                        info.num_loads += 1;
                        mem_insts.push(*inst);
                    }
                    ValueKind::Store { ptr, ordering, .. } => {
                        if *ordering != MemOrdering::Simple && !parallel {
                            info.report(Rejection::NonSimpleStore);
                            return info;
                        }
                        // A store to a uniform address writes the same
                        // location every iteration.
                        if self.se.is_value_loop_invariant(*ptr, l) {
                            info.report(Rejection::UniformStore);
                            return info;
                        }
                        info.num_stores += 1;
                        mem_insts.push(*inst);
                    }
                    ValueKind::Call { effect, .. } => match effect {
                        CallEffect::ReadNone | CallEffect::ReadOnlyIntrinsic => {}
                        CallEffect::Unknown => {
                            info.report(Rejection::UnvectorizableInstruction);
                            return info;
                        }
                    },
                    _ => {}
                }
            }
        }

        // A loop without stores cannot carry a memory dependence.
        if info.num_stores == 0 {
            debug!("read-only loop");
            info.can_vectorize = true;
            return info;
        }

        // The frontend promised independent iterations.
        if parallel {
            debug!("annotated-parallel loop, skipping dependence checks");
            info.can_vectorize = true;
            return info;
        }

        // A single written pointer with no other reads is trivially
        // safe: every access lands on the same dependence chain.
        let written: HashSet<ValueId> = mem_insts
            .iter()
            .filter_map(|i| match self.func.value(*i).kind {
                ValueKind::Store { ptr, .. } => Some(ptr),
                _ => None,
            })
            .collect();
        let plain_reads: HashSet<ValueId> = mem_insts
            .iter()
            .filter_map(|i| match self.func.value(*i).kind {
                ValueKind::Load { ptr, .. } if !written.contains(&ptr) => Some(ptr),
                _ => None,
            })
            .collect();
        if written.len() == 1 && plain_reads.is_empty() {
            debug!("write-only loop");
            info.can_vectorize = true;
            return info;
        }

        // Build the alias / dependence partition.
        let classifier = AccessClassifier::new(self.func, self.se, &self.layout, l, strides);
        let mut partition = classifier.classify(&mem_insts);

        let builder = RuntimeCheckBuilder::new(
            self.func,
            self.se,
            &self.layout,
            l,
            strides,
            &backedge_count,
            &self.config,
        );
        let checks = match builder.build(&mut partition, false, true) {
            Ok(checks) => checks,
            Err(e) => {
                info.report(rt_error(e));
                return info;
            }
        };
        let need_runtime_check = checks.num_comparisons > 0;
        if need_runtime_check && !checks.can_check_all {
            info.report(Rejection::CannotIdentifyBounds);
            return info;
        }
        info.runtime_checks = checks;
        info.need_runtime_check = need_runtime_check;

        // Pair-check the dependence candidates.
        if !partition.check_deps.is_empty() {
            debug!("checking memory dependences");
            let mut dep_checker =
                DepChecker::new(self.func, self.se, &self.layout, l, strides, &self.config);
            for inst in &mem_insts {
                dep_checker.add_access(*inst);
            }
            let verdict = dep_checker.are_deps_safe(&mut partition);
            info.max_safe_dep_dist_bytes = dep_checker.max_safe_dep_dist_bytes();

            match verdict {
                DepVerdict::Safe => {}
                DepVerdict::UnsafeFatal => {
                    info.report(Rejection::UnsafeDependence);
                    return info;
                }
                DepVerdict::UnsafeRetryWithRuntime => {
                    // The exact check failed only on a symbolic distance;
                    // guard the loop instead, requiring unit strides so
                    // the guarded ranges are exact.
                    debug!("retrying with runtime memory checks");
                    let checks = match builder.build(&mut partition, true, false) {
                        Ok(checks) => checks,
                        Err(e) => {
                            info.report(rt_error(e));
                            return info;
                        }
                    };
                    if checks.num_comparisons > 0 && !checks.can_check_all {
                        info.report(Rejection::CannotCheckAtRuntime);
                        return info;
                    }
                    info.runtime_checks = checks;
                    info.need_runtime_check = true;
                }
            }
        }

        info.can_vectorize = true;
        debug!(
            need_runtime_check = info.need_runtime_check,
            max_safe = info.max_safe_dep_dist_bytes,
            "no unsafe dependent memory operations in loop"
        );
        info
    }
}

fn rt_error(e: RtBuildError) -> Rejection {
    match e {
        RtBuildError::TooManyComparisons => Rejection::TooManyRuntimeChecks,
        RtBuildError::CrossAddressSpace => Rejection::CrossAddressSpace,
    }
}
