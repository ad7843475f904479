//! Expression expander: materializes symbolic expressions as IR.
//!
//! Used by the runtime-check emission helper, which needs the symbolic
//! pointer bounds as real instructions. Pointer arithmetic is emitted on
//! 8-bit-element pointer casts in the operand's own address space.

use crate::Scev;
use sable_ir::{BinOp, BlockId, Function, Type, Value, ValueId, ValueKind};
use thiserror::Error;

/// Why an expression could not be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    #[error("expression still contains a recurrence")]
    NonAffine,
    #[error("expression mixes more than one pointer base")]
    MultiplePointerBases,
}

/// Appends instructions computing a [`Scev`] to one insertion block.
pub struct ScevExpander<'f> {
    func: &'f mut Function,
    block: BlockId,
    first_inst: Option<ValueId>,
}

impl<'f> ScevExpander<'f> {
    pub fn new(func: &'f mut Function, block: BlockId) -> Self {
        Self {
            func,
            block,
            first_inst: None,
        }
    }

    /// The first instruction this expander emitted, if any.
    pub fn first_inst(&self) -> Option<ValueId> {
        self.first_inst
    }

    fn push(&mut self, kind: ValueKind, ty: Type) -> ValueId {
        let id = self.func.add_value(Value { kind, ty });
        self.func.push_inst(self.block, id);
        if self.first_inst.is_none() {
            self.first_inst = Some(id);
        }
        id
    }

    /// An integer constant; constants live in the arena, not the block.
    pub fn const_i64(&mut self, c: i64) -> ValueId {
        self.func.add_value(Value {
            kind: ValueKind::ConstInt(c),
            ty: Type::I64,
        })
    }

    /// Emit a boolean constant.
    pub fn const_bool(&mut self, b: bool) -> ValueId {
        self.func.add_value(Value {
            kind: ValueKind::ConstInt(b as i64),
            ty: Type::Bool,
        })
    }

    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.ty(lhs).clone();
        self.push(
            ValueKind::Binary {
                op,
                lhs,
                rhs,
                no_wrap: false,
            },
            ty,
        )
    }

    pub fn icmp(&mut self, pred: sable_ir::IcmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(ValueKind::Icmp { pred, lhs, rhs }, Type::Bool)
    }

    /// Materialize the expression, returning the value holding its
    /// result. A sum with a pointer base becomes a byte-element address
    /// computation in that pointer's address space.
    pub fn expand(&mut self, s: &Scev) -> Result<ValueId, ExpandError> {
        match s {
            Scev::Constant(c) => Ok(self.const_i64(*c)),
            Scev::Unknown(v) => Ok(*v),
            Scev::AddRec { .. } => Err(ExpandError::NonAffine),
            Scev::Mul(a, b) => {
                let lhs = self.expand(a)?;
                let rhs = self.expand(b)?;
                Ok(self.binary(BinOp::Mul, lhs, rhs))
            }
            Scev::Add(terms) => self.expand_sum(terms),
        }
    }

    fn expand_sum(&mut self, terms: &[Scev]) -> Result<ValueId, ExpandError> {
        let mut pointer: Option<ValueId> = None;
        let mut offset: Option<ValueId> = None;

        for term in terms {
            let v = self.expand(term)?;
            if self.func.ty(v).is_pointer() {
                if pointer.is_some() {
                    return Err(ExpandError::MultiplePointerBases);
                }
                pointer = Some(v);
            } else {
                offset = Some(match offset {
                    None => v,
                    Some(acc) => self.binary(BinOp::Add, acc, v),
                });
            }
        }

        match (pointer, offset) {
            (Some(ptr), Some(off)) => {
                let addr_space = self.func.ty(ptr).addr_space().unwrap_or_default();
                let byte_ptr_ty = Type::ptr_in(Type::I8, addr_space);
                let cast = if self.func.ty(ptr) == &byte_ptr_ty {
                    ptr
                } else {
                    self.push(ValueKind::PtrCast { value: ptr }, byte_ptr_ty)
                };
                Ok(self.push(
                    ValueKind::Gep {
                        base: cast,
                        index: off,
                        in_bounds: false,
                    },
                    self.func.ty(cast).clone(),
                ))
            }
            (Some(ptr), None) => Ok(ptr),
            (None, Some(off)) => Ok(off),
            (None, None) => Ok(self.const_i64(0)),
        }
    }
}
