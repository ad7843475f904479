//! Per-pointer stride analysis.
//!
//! Determines the constant element stride of a pointer over the analyzed
//! loop, with wrap-safety checks. A stride of ±1 is "consecutive"; any
//! other non-zero value is strided but non-consecutive.

use sable_ir::loops::Loop;
use sable_ir::{DataLayout, Function, Type, ValueId, ValueKind, DEFAULT_ADDR_SPACE};
use sable_scev::{ScalarEvolution, Scev};
use std::collections::HashMap;

/// Frontend-declared symbolic strides: pointer → the stride variable
/// whose runtime value is promised to equal 1.
pub type SymbolicStrides = HashMap<ValueId, ValueId>;

/// Why a pointer has no usable stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrideFailure {
    /// Not an affine add-recurrence over the analyzed loop.
    NotAffine,
    /// The access may wrap the address space.
    MayWrap,
    /// The recurrence step is not a compile-time constant.
    NonConstantStep,
    /// The step is not a multiple of the element allocation size.
    NonDivisibleStep,
    /// The pointee is an aggregate type.
    AggregateElement,
}

/// The pointer's symbolic form after substituting its declared symbolic
/// stride (if any) by 1. Pointers not listed in the map keep their
/// original form.
pub fn rewritten_pointer_scev(
    se: &ScalarEvolution<'_>,
    strides: &SymbolicStrides,
    ptr: ValueId,
) -> Scev {
    let s = se.scev_of(ptr);
    match strides.get(&ptr) {
        Some(sym) => s.substitute(*sym, &Scev::Constant(1)),
        None => s,
    }
}

/// The constant element stride of `ptr` over `l`.
pub fn element_stride(
    func: &Function,
    se: &ScalarEvolution<'_>,
    layout: &DataLayout,
    ptr: ValueId,
    l: &Loop,
    strides: &SymbolicStrides,
) -> Result<i64, StrideFailure> {
    let elem = match func.ty(ptr).pointee() {
        Some(t) => t,
        None => return Err(StrideFailure::NotAffine),
    };
    if elem.is_aggregate() {
        return Err(StrideFailure::AggregateElement);
    }

    let scev = rewritten_pointer_scev(se, strides, ptr);
    let (_, step, header, no_wrap) = match scev.as_addrec() {
        Some(parts) => parts,
        None => return Err(StrideFailure::NotAffine),
    };
    if header != l.header {
        return Err(StrideFailure::NotAffine);
    }

    // The access may not wrap around the address space. Failing the
    // no-wrap attribute we fall back on an in-bounds element address
    // computation, or on the default address space, where wraparound is
    // undefined behavior.
    let in_bounds_gep = matches!(
        func.value(ptr).kind,
        ValueKind::Gep { in_bounds: true, .. }
    );
    let addr_space = func.ty(ptr).addr_space().unwrap_or(DEFAULT_ADDR_SPACE);
    let fallback = in_bounds_gep || addr_space == DEFAULT_ADDR_SPACE;
    if !no_wrap && !fallback {
        return Err(StrideFailure::MayWrap);
    }

    let step_bytes = match step.as_constant() {
        Some(c) => c,
        None => return Err(StrideFailure::NonConstantStep),
    };
    let size = layout.alloc_size(elem) as i64;
    if size == 0 || step_bytes % size != 0 {
        return Err(StrideFailure::NonDivisibleStep);
    }
    let stride = step_bytes / size;

    // The fallback arguments only cover unit strides: a larger stride
    // could still step past the end of the object or the address space.
    if !no_wrap && stride != 1 && stride != -1 {
        return Err(StrideFailure::MayWrap);
    }

    Ok(stride)
}

/// Convenience form: the stride, or 0 when the pointer is not usable.
pub fn stride_or_zero(
    func: &Function,
    se: &ScalarEvolution<'_>,
    layout: &DataLayout,
    ptr: ValueId,
    l: &Loop,
    strides: &SymbolicStrides,
) -> i64 {
    element_stride(func, se, layout, ptr, l, strides).unwrap_or(0)
}

/// Has the pointer a computable affine bound over the loop: an affine
/// add-recurrence with a loop-invariant step and a non-aggregate element
/// type?
pub fn has_computable_bounds(
    func: &Function,
    se: &ScalarEvolution<'_>,
    ptr: ValueId,
    l: &Loop,
    strides: &SymbolicStrides,
) -> bool {
    let elem_ok = func
        .ty(ptr)
        .pointee()
        .map(|t: &Type| !t.is_aggregate())
        .unwrap_or(false);
    if !elem_ok {
        return false;
    }
    let scev = rewritten_pointer_scev(se, strides, ptr);
    match scev.as_addrec() {
        Some((_, step, header, _)) => header == l.header && se.is_invariant(step, l),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ir::loops::LoopInfo;
    use sable_ir::{BinOp, BlockId, FunctionBuilder, IcmpPred};

    /// `for i in 0..n` accessing `base[f(i)]`, where the index chain is
    /// customized by the caller before the loop is sealed.
    struct LoopRig {
        func: Function,
        l: Loop,
        ptr: ValueId,
    }

    fn strided_rig(
        stride_elems: i64,
        elem: Type,
        in_bounds: bool,
        nw_increment: bool,
        addr_space: u32,
    ) -> LoopRig {
        let mut b = FunctionBuilder::new(
            "f",
            vec![Type::ptr_in(elem.clone(), addr_space), Type::I64],
        );
        let a = b.param(0);
        let n = b.param(1);

        let body = b.new_block();
        let exit = b.new_block();
        let zero = b.const_int(Type::I64, 0);
        let scale = b.const_int(Type::I64, stride_elems);
        b.br(body);

        // The induction variable itself steps by the element stride, as
        // strength reduction would leave it.
        b.switch_to_block(body);
        let i = b.phi(Type::I64);
        let ptr = b.gep(a, i, in_bounds);
        let v = b.load(ptr);
        b.store(ptr, v);
        let i_next = if nw_increment {
            b.binary_nw(BinOp::Add, i, scale)
        } else {
            b.binary(BinOp::Add, i, scale)
        };
        let cmp = b.icmp(IcmpPred::Slt, i_next, n);
        b.cond_br(cmp, body, exit);
        b.add_incoming(i, BlockId(0), zero);
        b.add_incoming(i, body, i_next);
        b.switch_to_block(exit);
        b.ret(None);

        LoopRig {
            func: b.build(),
            l: Loop::new(body, vec![body]),
            ptr,
        }
    }

    fn stride_of(rig: &LoopRig) -> Result<i64, StrideFailure> {
        let li = LoopInfo::new(vec![rig.l.clone()]);
        let se = ScalarEvolution::new(&rig.func, &li);
        let layout = DataLayout::new();
        element_stride(
            &rig.func,
            &se,
            &layout,
            rig.ptr,
            &rig.l,
            &SymbolicStrides::new(),
        )
    }

    #[test]
    fn test_unit_stride_byte_elements() {
        let rig = strided_rig(1, Type::I8, true, false, DEFAULT_ADDR_SPACE);
        assert_eq!(stride_of(&rig), Ok(1));
    }

    #[test]
    fn test_unit_stride_word_elements() {
        let rig = strided_rig(1, Type::I32, true, false, DEFAULT_ADDR_SPACE);
        assert_eq!(stride_of(&rig), Ok(1));
    }

    #[test]
    fn test_wide_stride_needs_no_wrap_attribute() {
        // Stride 2 with only the in-bounds fallback: rejected.
        let rig = strided_rig(2, Type::I32, true, false, DEFAULT_ADDR_SPACE);
        assert_eq!(stride_of(&rig), Err(StrideFailure::MayWrap));

        // The no-wrap attribute on the recurrence allows it.
        let rig = strided_rig(2, Type::I32, true, true, DEFAULT_ADDR_SPACE);
        assert_eq!(stride_of(&rig), Ok(2));
    }

    #[test]
    fn test_default_addr_space_is_wrap_fallback() {
        // No in-bounds, no no-wrap, but address space 0: unit stride ok.
        let rig = strided_rig(1, Type::I32, false, false, DEFAULT_ADDR_SPACE);
        assert_eq!(stride_of(&rig), Ok(1));

        // Same but stride 2: the fallback does not cover it.
        let rig = strided_rig(2, Type::I32, false, false, DEFAULT_ADDR_SPACE);
        assert_eq!(stride_of(&rig), Err(StrideFailure::MayWrap));
    }

    #[test]
    fn test_non_default_addr_space_needs_in_bounds() {
        let rig = strided_rig(1, Type::I32, false, false, 3);
        assert_eq!(stride_of(&rig), Err(StrideFailure::MayWrap));

        let rig = strided_rig(1, Type::I32, true, false, 3);
        assert_eq!(stride_of(&rig), Ok(1));
    }

    #[test]
    fn test_non_divisible_step() {
        // A 2-byte step under 4-byte elements leaves a remainder.
        let mut b = FunctionBuilder::new("f", vec![Type::ptr(Type::I32), Type::I64]);
        let a = b.param(0);
        let n = b.param(1);

        let body = b.new_block();
        let exit = b.new_block();
        let zero = b.const_int(Type::I64, 0);
        let one = b.const_int(Type::I64, 1);
        let two = b.const_int(Type::I64, 2);
        b.br(body);

        b.switch_to_block(body);
        let i = b.phi(Type::I64);
        let byte_idx = b.binary(BinOp::Mul, i, two);
        let a8 = b.ptr_cast(a, Type::ptr(Type::I8));
        let g8 = b.gep(a8, byte_idx, false);
        let ptr = b.ptr_cast(g8, Type::ptr(Type::I32));
        let v = b.load(ptr);
        b.store(ptr, v);
        let i_next = b.binary(BinOp::Add, i, one);
        let cmp = b.icmp(IcmpPred::Slt, i_next, n);
        b.cond_br(cmp, body, exit);
        b.add_incoming(i, BlockId(0), zero);
        b.add_incoming(i, body, i_next);
        b.switch_to_block(exit);
        b.ret(None);

        let func = b.build();
        let l = Loop::new(body, vec![body]);
        let li = LoopInfo::new(vec![l.clone()]);
        let se = ScalarEvolution::new(&func, &li);
        let layout = DataLayout::new();
        assert_eq!(
            element_stride(&func, &se, &layout, ptr, &l, &SymbolicStrides::new()),
            Err(StrideFailure::NonDivisibleStep)
        );
    }

    #[test]
    fn test_aggregate_element_rejected() {
        let rig = strided_rig(
            1,
            Type::Array(Box::new(Type::I32), 4),
            true,
            false,
            DEFAULT_ADDR_SPACE,
        );
        assert_eq!(stride_of(&rig), Err(StrideFailure::AggregateElement));
    }

    #[test]
    fn test_invariant_pointer_not_affine() {
        let rig = strided_rig(1, Type::I32, true, false, DEFAULT_ADDR_SPACE);
        let li = LoopInfo::new(vec![rig.l.clone()]);
        let se = ScalarEvolution::new(&rig.func, &li);
        let layout = DataLayout::new();
        let a = rig.func.params[0];
        assert_eq!(
            element_stride(&rig.func, &se, &layout, a, &rig.l, &SymbolicStrides::new()),
            Err(StrideFailure::NotAffine)
        );
    }

    #[test]
    fn test_symbolic_stride_rewrite_enables_analysis() {
        // a[i * s]: without the promise the step is symbolic; with the
        // map entry the pointer analyzes as consecutive.
        let mut b = FunctionBuilder::new(
            "f",
            vec![Type::ptr(Type::I32), Type::I64, Type::I64],
        );
        let a = b.param(0);
        let s = b.param(1);
        let n = b.param(2);

        let body = b.new_block();
        let exit = b.new_block();
        let zero = b.const_int(Type::I64, 0);
        let one = b.const_int(Type::I64, 1);
        b.br(body);

        b.switch_to_block(body);
        let i = b.phi(Type::I64);
        let idx = b.binary(BinOp::Mul, i, s);
        let ptr = b.gep(a, idx, true);
        let v = b.load(ptr);
        b.store(ptr, v);
        let i_next = b.binary(BinOp::Add, i, one);
        let cmp = b.icmp(IcmpPred::Slt, i_next, n);
        b.cond_br(cmp, body, exit);
        b.add_incoming(i, BlockId(0), zero);
        b.add_incoming(i, body, i_next);
        b.switch_to_block(exit);
        b.ret(None);

        let func = b.build();
        let l = Loop::new(body, vec![body]);
        let li = LoopInfo::new(vec![l.clone()]);
        let se = ScalarEvolution::new(&func, &li);
        let layout = DataLayout::new();

        let empty = SymbolicStrides::new();
        assert_eq!(
            element_stride(&func, &se, &layout, ptr, &l, &empty),
            Err(StrideFailure::NonConstantStep)
        );

        let mut strides = SymbolicStrides::new();
        strides.insert(ptr, s);
        assert_eq!(element_stride(&func, &se, &layout, ptr, &l, &strides), Ok(1));
    }
}
