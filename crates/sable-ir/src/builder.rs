//! Function builder: constructs IR functions incrementally.

use crate::func::*;
use crate::types::Type;

/// Builder for constructing IR functions block by block.
pub struct FunctionBuilder {
    func: Function,
    current_block: usize,
}

impl FunctionBuilder {
    /// Create a builder for a function with the given parameter types.
    /// The entry block (`bb0`) is created and selected.
    pub fn new(name: impl Into<String>, params: Vec<Type>) -> Self {
        let mut func = Function::new(name);
        for (index, ty) in params.into_iter().enumerate() {
            let id = func.add_value(Value {
                kind: ValueKind::Param {
                    index,
                    noalias: false,
                },
                ty,
            });
            func.params.push(id);
        }

        let mut builder = Self {
            func,
            current_block: 0,
        };
        builder.new_block();
        builder
    }

    /// Get a parameter value by index.
    pub fn param(&self, index: usize) -> ValueId {
        self.func.params[index]
    }

    /// Mark a parameter as `noalias`.
    pub fn set_param_noalias(&mut self, index: usize) {
        let id = self.func.params[index];
        if let ValueKind::Param { noalias, .. } = &mut self.func.values[id.0 as usize].kind {
            *noalias = true;
        }
    }

    /// Create a new basic block and return its ID.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(BasicBlock::default());
        id
    }

    /// Switch to building a different basic block.
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block.0 as usize;
    }

    /// The block currently being built.
    pub fn current_block(&self) -> BlockId {
        BlockId(self.current_block as u32)
    }

    fn push(&mut self, kind: ValueKind, ty: Type) -> ValueId {
        let id = self.func.add_value(Value { kind, ty });
        self.func.blocks[self.current_block].insts.push(id);
        id
    }

    /// An integer constant. Constants live in the arena but not in any
    /// block.
    pub fn const_int(&mut self, ty: Type, v: i64) -> ValueId {
        self.func.add_value(Value {
            kind: ValueKind::ConstInt(v),
            ty,
        })
    }

    /// A phi node in the current block. Incoming edges are added later
    /// with [`FunctionBuilder::add_incoming`].
    pub fn phi(&mut self, ty: Type) -> ValueId {
        self.push(ValueKind::Phi { incoming: vec![] }, ty)
    }

    /// Add an incoming `(predecessor, value)` edge to a phi.
    pub fn add_incoming(&mut self, phi: ValueId, block: BlockId, value: ValueId) {
        if let ValueKind::Phi { incoming } = &mut self.func.values[phi.0 as usize].kind {
            incoming.push((block, value));
        }
    }

    /// A binary operation. The result type is the left operand's type.
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

    /// A binary operation carrying the no-wrap promise.
    pub fn binary_nw(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.ty(lhs).clone();
        self.push(
            ValueKind::Binary {
                op,
                lhs,
                rhs,
                no_wrap: true,
            },
            ty,
        )
    }

    pub fn icmp(&mut self, pred: IcmpPred, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(ValueKind::Icmp { pred, lhs, rhs }, Type::Bool)
    }

    /// An element address computation. The result has the base pointer's
    /// type.
    pub fn gep(&mut self, base: ValueId, index: ValueId, in_bounds: bool) -> ValueId {
        let ty = self.func.ty(base).clone();
        self.push(
            ValueKind::Gep {
                base,
                index,
                in_bounds,
            },
            ty,
        )
    }

    /// Reinterpret a pointer at a different type.
    pub fn ptr_cast(&mut self, value: ValueId, ty: Type) -> ValueId {
        self.push(ValueKind::PtrCast { value }, ty)
    }

    /// A simple (non-volatile, non-atomic) load.
    pub fn load(&mut self, ptr: ValueId) -> ValueId {
        self.load_with(ptr, MemOrdering::Simple, None)
    }

    pub fn load_with(
        &mut self,
        ptr: ValueId,
        ordering: MemOrdering,
        tbaa: Option<u32>,
    ) -> ValueId {
        let ty = self
            .func
            .ty(ptr)
            .pointee()
            .cloned()
            .expect("load from non-pointer");
        self.push(ValueKind::Load { ptr, ordering, tbaa }, ty)
    }

    /// A simple (non-volatile, non-atomic) store.
    pub fn store(&mut self, ptr: ValueId, value: ValueId) -> ValueId {
        self.store_with(ptr, value, MemOrdering::Simple, None)
    }

    pub fn store_with(
        &mut self,
        ptr: ValueId,
        value: ValueId,
        ordering: MemOrdering,
        tbaa: Option<u32>,
    ) -> ValueId {
        self.push(
            ValueKind::Store {
                ptr,
                value,
                ordering,
                tbaa,
            },
            Type::Unit,
        )
    }

    pub fn call(
        &mut self,
        callee: impl Into<String>,
        args: Vec<ValueId>,
        effect: CallEffect,
        ret_ty: Type,
    ) -> ValueId {
        self.push(
            ValueKind::Call {
                callee: callee.into(),
                args,
                effect,
            },
            ret_ty,
        )
    }

    /// A stack allocation; the result is a pointer to `elem` in the
    /// default address space.
    pub fn alloca(&mut self, elem: Type) -> ValueId {
        self.push(ValueKind::Alloca, Type::ptr(elem))
    }

    /// Set the terminator of the current block.
    pub fn terminate(&mut self, terminator: Terminator) {
        self.func.blocks[self.current_block].terminator = Some(terminator);
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: ValueId, then_bb: BlockId, else_bb: BlockId) {
        self.terminate(Terminator::CondBr {
            cond,
            then_bb,
            else_bb,
        });
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Ret(value));
    }

    /// Build the final function.
    pub fn build(self) -> Function {
        self.func
    }
}
