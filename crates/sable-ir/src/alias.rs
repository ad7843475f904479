//! Alias oracle: underlying-object reasoning, type-based alias tags, and
//! an alias-set tracker that partitions memory accesses into coarse
//! may-alias classes.

use crate::func::{Function, ValueId, ValueKind};

/// Strip address computations and casts down to the object a pointer is
/// based on.
pub fn underlying_object(func: &Function, mut ptr: ValueId) -> ValueId {
    loop {
        match &func.value(ptr).kind {
            ValueKind::Gep { base, .. } => ptr = *base,
            ValueKind::PtrCast { value } => ptr = *value,
            _ => return ptr,
        }
    }
}

/// An identified object has a known, private allocation: a stack slot or
/// a `noalias` parameter. Two distinct identified objects never overlap,
/// and nothing else is based on them.
pub fn is_identified_object(func: &Function, v: ValueId) -> bool {
    match &func.value(v).kind {
        ValueKind::Alloca => true,
        ValueKind::Param { noalias, .. } => *noalias,
        _ => false,
    }
}

/// Result of an alias query. The tracker only distinguishes "provably
/// disjoint" from "anything else".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasResult {
    NoAlias,
    MayAlias,
}

/// A memory access as seen by the alias layer: the instruction, its
/// pointer, whether it writes, and an optional type-based alias tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    pub inst: ValueId,
    pub ptr: ValueId,
    pub is_write: bool,
    pub tbaa: Option<u32>,
}

/// The alias oracle for one function.
pub struct AliasAnalysis<'f> {
    func: &'f Function,
}

impl<'f> AliasAnalysis<'f> {
    pub fn new(func: &'f Function) -> Self {
        Self { func }
    }

    /// May the two accesses touch overlapping memory?
    pub fn alias(&self, a: &MemAccess, b: &MemAccess) -> AliasResult {
        if a.ptr == b.ptr {
            return AliasResult::MayAlias;
        }

        let ua = underlying_object(self.func, a.ptr);
        let ub = underlying_object(self.func, b.ptr);
        if ua != ub
            && (is_identified_object(self.func, ua) || is_identified_object(self.func, ub))
        {
            return AliasResult::NoAlias;
        }

        // Distinct type-based tags refine a may-alias answer.
        if let (Some(ta), Some(tb)) = (a.tbaa, b.tbaa) {
            if ta != tb {
                return AliasResult::NoAlias;
            }
        }

        AliasResult::MayAlias
    }
}

/// One coarse may-alias class. Accesses in different sets provably do
/// not overlap.
#[derive(Debug, Clone, Default)]
pub struct AliasSet {
    pub accesses: Vec<MemAccess>,
    pub has_write: bool,
}

/// Unions may-aliasing memory accesses into [`AliasSet`]s, preserving
/// insertion order within each set.
pub struct AliasSetTracker<'f> {
    aa: AliasAnalysis<'f>,
    sets: Vec<AliasSet>,
}

impl<'f> AliasSetTracker<'f> {
    pub fn new(func: &'f Function) -> Self {
        Self {
            aa: AliasAnalysis::new(func),
            sets: vec![],
        }
    }

    /// Record an access, merging every set it may alias with.
    pub fn add(&mut self, access: MemAccess) {
        let matching: Vec<usize> = self
            .sets
            .iter()
            .enumerate()
            .filter(|(_, set)| {
                set.accesses
                    .iter()
                    .any(|m| self.aa.alias(m, &access) == AliasResult::MayAlias)
            })
            .map(|(i, _)| i)
            .collect();

        match matching.split_first() {
            None => {
                self.sets.push(AliasSet {
                    has_write: access.is_write,
                    accesses: vec![access],
                });
            }
            Some((&first, rest)) => {
                // Merge all matching sets into the first, back to front so
                // removal indices stay valid.
                for &i in rest.iter().rev() {
                    let merged = self.sets.remove(i);
                    self.sets[first].accesses.extend(merged.accesses);
                    self.sets[first].has_write |= merged.has_write;
                }
                self.sets[first].has_write |= access.is_write;
                self.sets[first].accesses.push(access);
            }
        }
    }

    pub fn sets(&self) -> &[AliasSet] {
        &self.sets
    }
}
