//! Pair-wise memory dependence checking.
//!
//! Walks the equivalence classes of dependence candidates and decides,
//! for each ordered pair of accesses, whether executing the loop in a
//! vectorized or interleaved form preserves the dependence. Tracks the
//! largest dependence distance that is still safe.

use crate::classify::{AccessPartition, AccessTag};
use crate::config::{LoopDepConfig, MAX_VECTOR_WIDTH};
use crate::stride::{self, SymbolicStrides};
use sable_ir::loops::Loop;
use sable_ir::{DataLayout, Function, Type, ValueId, ValueKind};
use sable_scev::{ScalarEvolution, Scev};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Outcome of a pair check (or of a whole class traversal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepVerdict {
    Safe,
    /// Unsafe, and no runtime check can help.
    UnsafeFatal,
    /// Unsafe because a dependence distance was not a compile-time
    /// constant; the loop may still be guarded by runtime checks.
    UnsafeRetryWithRuntime,
}

/// Checks dependences between the loop's memory accesses.
pub struct DepChecker<'a, 'f> {
    func: &'f Function,
    se: &'a ScalarEvolution<'f>,
    layout: &'a DataLayout,
    l: &'a Loop,
    strides: &'a SymbolicStrides,
    config: &'a LoopDepConfig,
    /// Program-order indices of the instructions carrying each tag.
    access_indices: HashMap<AccessTag, Vec<usize>>,
    next_index: usize,
    max_safe_dep_dist_bytes: u32,
}

impl<'a, 'f> DepChecker<'a, 'f> {
    pub fn new(
        func: &'f Function,
        se: &'a ScalarEvolution<'f>,
        layout: &'a DataLayout,
        l: &'a Loop,
        strides: &'a SymbolicStrides,
        config: &'a LoopDepConfig,
    ) -> Self {
        Self {
            func,
            se,
            layout,
            l,
            strides,
            config,
            access_indices: HashMap::new(),
            next_index: 0,
            max_safe_dep_dist_bytes: u32::MAX,
        }
    }

    /// Record one load or store, in program order.
    pub fn add_access(&mut self, inst: ValueId) {
        let tag = match self.func.value(inst).kind {
            ValueKind::Load { ptr, .. } => AccessTag::read(ptr),
            ValueKind::Store { ptr, .. } => AccessTag::write(ptr),
            _ => return,
        };
        self.access_indices.entry(tag).or_default().push(self.next_index);
        self.next_index += 1;
    }

    /// Largest dependence distance, in bytes, at which vectorization is
    /// still safe. Monotonically non-increasing over the pairs checked.
    pub fn max_safe_dep_dist_bytes(&self) -> u32 {
        self.max_safe_dep_dist_bytes
    }

    /// Walk every equivalence class reachable from `check_deps` and
    /// check every ordered access pair, consuming the worklist. Stops at
    /// the first unsafe verdict.
    pub fn are_deps_safe(&mut self, partition: &mut AccessPartition) -> DepVerdict {
        let mut worklist = std::mem::take(&mut partition.check_deps);

        while let Some(current) = worklist.first().copied() {
            let members = partition.dep_cands.members(current);

            for (ai, a) in members.iter().enumerate() {
                worklist.retain(|t| t != a);

                for b in members.iter().skip(ai + 1) {
                    let empty = vec![];
                    let a_indices =
                        self.access_indices.get(a).unwrap_or(&empty).clone();
                    let b_indices =
                        self.access_indices.get(b).unwrap_or(&empty).clone();
                    for &i1 in &a_indices {
                        for &i2 in &b_indices {
                            let verdict = if i1 < i2 {
                                self.is_dependent(*a, i1, *b, i2)
                            } else {
                                self.is_dependent(*b, i2, *a, i1)
                            };
                            if verdict != DepVerdict::Safe {
                                return verdict;
                            }
                        }
                    }
                }
            }
        }

        DepVerdict::Safe
    }

    fn accessed_pointee(&self, ptr: ValueId) -> &Type {
        self.func.ty(ptr).pointee().unwrap_or(&Type::I8)
    }

    /// Decide one ordered pair; `a` occurs strictly earlier in program
    /// order than `b`.
    fn is_dependent(
        &mut self,
        a: AccessTag,
        a_idx: usize,
        b: AccessTag,
        b_idx: usize,
    ) -> DepVerdict {
        debug_assert!(a_idx < b_idx, "pairs must arrive in program order");

        let mut a_ptr = a.ptr;
        let mut b_ptr = b.ptr;
        let mut a_is_write = a.is_write;
        let mut b_is_write = b.is_write;

        // Two reads are independent.
        if !a_is_write && !b_is_write {
            return DepVerdict::Safe;
        }

        // We cannot reason about pointers in different address spaces.
        if self.func.ty(a_ptr).addr_space() != self.func.ty(b_ptr).addr_space() {
            return DepVerdict::UnsafeFatal;
        }

        let mut src = stride::rewritten_pointer_scev(self.se, self.strides, a_ptr);
        let mut sink = stride::rewritten_pointer_scev(self.se, self.strides, b_ptr);
        let mut stride_a =
            stride::stride_or_zero(self.func, self.se, self.layout, a_ptr, self.l, self.strides);
        let mut stride_b =
            stride::stride_or_zero(self.func, self.se, self.layout, b_ptr, self.l, self.strides);

        // A negative induction step inverts the direction of the
        // dependence; swap source and sink.
        if stride_a < 0 {
            std::mem::swap(&mut a_ptr, &mut b_ptr);
            std::mem::swap(&mut src, &mut sink);
            std::mem::swap(&mut a_is_write, &mut b_is_write);
            std::mem::swap(&mut stride_a, &mut stride_b);
        }

        // Only equal, non-zero strides are analyzable; anything else
        // (gathers, unknown steps) overlaps unpredictably.
        if stride_a == 0 || stride_b == 0 || stride_a != stride_b {
            trace!("non-consecutive or mismatched strides");
            return DepVerdict::UnsafeFatal;
        }

        let dist = Scev::minus(&sink, &src);
        trace!(distance = %dist, "dependence distance");
        let d = match dist.as_constant() {
            Some(d) => d,
            None => {
                debug!(distance = %dist, "non-constant dependence distance");
                return DepVerdict::UnsafeRetryWithRuntime;
            }
        };

        let a_ty = self.accessed_pointee(a_ptr).clone();
        let b_ty = self.accessed_pointee(b_ptr).clone();
        let type_size = self.layout.alloc_size(&a_ty);
        let sink_size = self.layout.alloc_size(&b_ty);

        // Negative distances are not plausible dependences unless the
        // earlier access is the write feeding a later load.
        if d < 0 {
            let is_flow_dep = a_is_write && !b_is_write;
            if is_flow_dep
                && (self.could_prevent_store_load_forward(d.unsigned_abs(), type_size)
                    || type_size != sink_size)
            {
                return DepVerdict::UnsafeFatal;
            }
            return DepVerdict::Safe;
        }

        // Same location: safe exactly when both sides access it at the
        // same type.
        if d == 0 {
            return if a_ty == b_ty {
                DepVerdict::Safe
            } else {
                DepVerdict::UnsafeFatal
            };
        }

        // Positive distance with access types of different sizes: the
        // size divergence already guarantees distinct lanes. Equal-size
        // type puns get no such exemption.
        if type_size != sink_size {
            return DepVerdict::Safe;
        }

        let distance = d as u64;
        let forced_factor = self.config.force_vector_width.max(1) as u64;
        let forced_unroll = self.config.force_vector_interleave.max(1) as u64;

        // The distance must cover a two-element vector of the access
        // type, fit under the current maximum, and cover any forced
        // vectorization shape.
        if distance < 2 * type_size
            || 2 * type_size > u64::from(self.max_safe_dep_dist_bytes)
            || distance < type_size * forced_unroll * forced_factor
        {
            debug!(distance, "positive dependence distance too small");
            return DepVerdict::UnsafeFatal;
        }

        self.max_safe_dep_dist_bytes = self
            .max_safe_dep_dist_bytes
            .min(distance.min(u64::from(u32::MAX)) as u32);

        let is_flow_dep = !a_is_write && b_is_write;
        if is_flow_dep && self.could_prevent_store_load_forward(distance, type_size) {
            return DepVerdict::UnsafeFatal;
        }

        trace!(
            distance,
            max_safe = self.max_safe_dep_dist_bytes,
            "safe positive dependence distance"
        );
        DepVerdict::Safe
    }

    /// Store-to-load forwarding only works when the store's outputs line
    /// up with the load's inputs. Scan candidate vector widths; a width
    /// at which the accesses are misaligned while the store is still in
    /// flight caps the usable width at the previous one.
    fn could_prevent_store_load_forward(&mut self, distance: u64, type_size: u64) -> bool {
        let forwarding_window = 8 * type_size;

        // The scan never looks past the vector register width; the
        // constant is already a byte quantity.
        let mut max_vf = MAX_VECTOR_WIDTH.min(u64::from(self.max_safe_dep_dist_bytes));

        let mut vf = 2 * type_size;
        while vf <= max_vf {
            if distance % vf != 0 && distance / vf < forwarding_window {
                max_vf = vf / 2;
                break;
            }
            vf *= 2;
        }

        if max_vf < 2 * type_size {
            debug!(
                distance,
                "distance could prevent store-to-load forwarding"
            );
            return true;
        }

        if max_vf < u64::from(self.max_safe_dep_dist_bytes) && max_vf != MAX_VECTOR_WIDTH {
            self.max_safe_dep_dist_bytes = max_vf as u32;
        }
        false
    }
}
