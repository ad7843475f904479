//! Access classification: alias sets and dependence-candidate classes.
//!
//! Partitions the loop's memory accesses twice over. The alias oracle
//! yields coarse alias sets, checked independently of one another. Within
//! them, a union-find over access tags groups the accesses that share an
//! underlying object; those equivalence classes are what the dependence
//! checker later walks pair by pair.

use crate::stride::{stride_or_zero, SymbolicStrides};
use sable_ir::alias::{AliasSetTracker, MemAccess};
use sable_ir::cfg::post_dominators;
use sable_ir::loops::Loop;
use sable_ir::{alias, BlockId, DataLayout, Function, ValueId, ValueKind};
use sable_scev::ScalarEvolution;
use std::collections::{HashMap, HashSet};

/// An access tag: a pointer value plus the read/write flag. The same
/// pointer read and written yields two distinct tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessTag {
    pub ptr: ValueId,
    pub is_write: bool,
}

impl AccessTag {
    pub fn read(ptr: ValueId) -> Self {
        Self {
            ptr,
            is_write: false,
        }
    }

    pub fn write(ptr: ValueId) -> Self {
        Self {
            ptr,
            is_write: true,
        }
    }
}

/// Union-find over arena-allocated access-tag indices, with path
/// compression. The class leader is the earliest-inserted member, which
/// keeps leaders deterministic.
#[derive(Debug, Clone, Default)]
pub struct DepCandidates {
    tags: Vec<AccessTag>,
    index_of: HashMap<AccessTag, usize>,
    parent: Vec<usize>,
}

impl DepCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag as a singleton class; idempotent.
    pub fn insert(&mut self, tag: AccessTag) -> usize {
        if let Some(&i) = self.index_of.get(&tag) {
            return i;
        }
        let i = self.tags.len();
        self.tags.push(tag);
        self.parent.push(i);
        self.index_of.insert(tag, i);
        i
    }

    pub fn contains(&self, tag: AccessTag) -> bool {
        self.index_of.contains_key(&tag)
    }

    fn find(&mut self, mut i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        while self.parent[i] != root {
            let next = self.parent[i];
            self.parent[i] = root;
            i = next;
        }
        root
    }

    /// Merge the classes of `a` and `b`, inserting either if missing.
    pub fn union(&mut self, a: AccessTag, b: AccessTag) {
        let ia = self.insert(a);
        let ib = self.insert(b);
        let ra = self.find(ia);
        let rb = self.find(ib);
        if ra == rb {
            return;
        }
        // The smaller root index wins, so the leader stays the
        // earliest-inserted tag.
        let (keep, absorb) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[absorb] = keep;
    }

    /// The deterministic leader of the tag's class.
    pub fn leader(&mut self, tag: AccessTag) -> AccessTag {
        let i = self.insert(tag);
        let root = self.find(i);
        self.tags[root]
    }

    /// All members of the tag's class, in insertion order.
    pub fn members(&mut self, tag: AccessTag) -> Vec<AccessTag> {
        let i = self.insert(tag);
        let root = self.find(i);
        let roots: Vec<usize> = (0..self.tags.len()).map(|j| self.find(j)).collect();
        roots
            .into_iter()
            .enumerate()
            .filter(|&(_, r)| r == root)
            .map(|(j, _)| self.tags[j])
            .collect()
    }
}

/// One alias set as the runtime-check builder consumes it: the distinct
/// pointers it contains, each with its pointer-level write flag.
#[derive(Debug, Clone)]
pub struct AliasSetSummary {
    pub pointers: Vec<(ValueId, bool)>,
    pub has_write: bool,
}

/// Output of classification.
#[derive(Debug, Clone, Default)]
pub struct AccessPartition {
    /// Tags whose equivalence class must be pair-checked, in discovery
    /// order. Consumed by the dependence checker.
    pub check_deps: Vec<AccessTag>,
    pub dep_cands: DepCandidates,
    pub alias_sets: Vec<AliasSetSummary>,
}

/// Classifies the loop's memory accesses.
pub struct AccessClassifier<'a, 'f> {
    func: &'f Function,
    se: &'a ScalarEvolution<'f>,
    layout: &'a DataLayout,
    l: &'a Loop,
    strides: &'a SymbolicStrides,
}

impl<'a, 'f> AccessClassifier<'a, 'f> {
    pub fn new(
        func: &'f Function,
        se: &'a ScalarEvolution<'f>,
        layout: &'a DataLayout,
        l: &'a Loop,
        strides: &'a SymbolicStrides,
    ) -> Self {
        Self {
            func,
            se,
            layout,
            l,
            strides,
        }
    }

    /// Consume the loop's loads and stores in program order and build
    /// the partition.
    pub fn classify(&self, ordered_accesses: &[ValueId]) -> AccessPartition {
        let mut def_block: HashMap<ValueId, BlockId> = HashMap::new();
        for (idx, block) in self.func.blocks.iter().enumerate() {
            for inst in &block.insts {
                def_block.insert(*inst, BlockId(idx as u32));
            }
        }
        let pdom = post_dominators(self.func);
        let latch = self.l.latch(self.func);

        // Pointers stored through anywhere in the loop.
        let stored_to: HashSet<ValueId> = ordered_accesses
            .iter()
            .filter_map(|inst| match self.func.value(*inst).kind {
                ValueKind::Store { ptr, .. } => Some(ptr),
                _ => None,
            })
            .collect();

        let mut tracker = AliasSetTracker::new(self.func);
        for inst in ordered_accesses {
            let (ptr, is_write, tbaa) = match self.func.value(*inst).kind {
                ValueKind::Load { ptr, tbaa, .. } => (ptr, false, tbaa),
                ValueKind::Store { ptr, tbaa, .. } => (ptr, true, tbaa),
                _ => continue,
            };
            // Type-based tags can sit under a predicate; only blocks
            // that post-dominate the latch may keep them.
            let tbaa = match (tbaa, latch, def_block.get(inst)) {
                (Some(tag), Some(latch), Some(block)) if pdom.dominates(*block, latch) => {
                    Some(tag)
                }
                _ => None,
            };
            tracker.add(MemAccess {
                inst: *inst,
                ptr,
                is_write,
                tbaa,
            });
        }

        // A pointer is read-only when no store touches it and its access
        // is consecutive. Non-consecutive reads overlap unpredictably
        // and stay read-write.
        let is_read_only = |ptr: ValueId| -> bool {
            if stored_to.contains(&ptr) {
                return false;
            }
            let stride =
                stride_or_zero(self.func, self.se, self.layout, ptr, self.l, self.strides);
            stride == 1 || stride == -1
        };

        let mut partition = AccessPartition::default();

        for set in tracker.sets() {
            // Last tag seen per underlying object, scoped to this set:
            // accesses in other sets provably do not overlap.
            let mut obj_to_last: HashMap<ValueId, AccessTag> = HashMap::new();

            // Distinct tags in first-occurrence order.
            let mut set_tags: Vec<AccessTag> = vec![];
            for access in &set.accesses {
                let tag = AccessTag {
                    ptr: access.ptr,
                    is_write: access.is_write,
                };
                if !set_tags.contains(&tag) {
                    set_tags.push(tag);
                }
            }

            let mut set_has_write = false;
            let mut deferred: Vec<AccessTag> = vec![];

            let process = |tag: AccessTag,
                               read_only: bool,
                               set_has_write: &mut bool,
                               partition: &mut AccessPartition,
                               obj_to_last: &mut HashMap<ValueId, AccessTag>| {
                if (tag.is_write || read_only) && *set_has_write {
                    partition.check_deps.push(tag);
                }
                if tag.is_write {
                    *set_has_write = true;
                }
                partition.dep_cands.insert(tag);
                let obj = alias::underlying_object(self.func, tag.ptr);
                if let Some(prev) = obj_to_last.get(&obj) {
                    partition.dep_cands.union(*prev, tag);
                }
                obj_to_last.insert(obj, tag);
            };

            // First pass: writes and reads that are not read-only.
            for tag in &set_tags {
                let read_only = !tag.is_write && is_read_only(tag.ptr);
                if read_only {
                    deferred.push(*tag);
                    continue;
                }
                process(
                    *tag,
                    false,
                    &mut set_has_write,
                    &mut partition,
                    &mut obj_to_last,
                );
            }

            // Second pass: read-only pointers; they need a dependence
            // check only against the writes already seen in the set.
            for tag in deferred {
                process(
                    tag,
                    true,
                    &mut set_has_write,
                    &mut partition,
                    &mut obj_to_last,
                );
            }

            // Summary for the runtime-check builder: distinct pointers
            // with pointer-level write flags.
            let mut pointers: Vec<(ValueId, bool)> = vec![];
            for access in &set.accesses {
                if !pointers.iter().any(|(p, _)| *p == access.ptr) {
                    pointers.push((access.ptr, stored_to.contains(&access.ptr)));
                }
            }
            partition.alias_sets.push(AliasSetSummary {
                pointers,
                has_write: set.has_write,
            });
        }

        partition
    }
}
