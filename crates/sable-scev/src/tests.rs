//! Tests for symbolic expressions, the evolution engine, and expansion.

use super::*;
use crate::expand::{ExpandError, ScevExpander};
use pretty_assertions::assert_eq;
use sable_ir::loops::Loop;
use sable_ir::{FunctionBuilder, Type};

fn c(v: i64) -> Scev {
    Scev::Constant(v)
}

fn unk(v: u32) -> Scev {
    Scev::Unknown(ValueId(v))
}

#[test]
fn test_sum_folds_constants() {
    assert_eq!(Scev::sum(vec![c(2), c(3)]), c(5));
    assert_eq!(Scev::sum(vec![]), c(0));
    assert_eq!(Scev::sum(vec![c(0), unk(1)]), unk(1));
}

#[test]
fn test_minus_cancels_equal_terms() {
    let a = Scev::sum(vec![unk(1), c(12)]);
    let b = Scev::sum(vec![unk(1), c(4)]);
    assert_eq!(Scev::minus(&a, &b), c(8));
    assert_eq!(Scev::minus(&unk(1), &unk(1)), c(0));
}

#[test]
fn test_product_distributes() {
    let s = Scev::product(c(4), Scev::sum(vec![unk(1), c(2)]));
    assert_eq!(
        s,
        Scev::Add(vec![c(8), Scev::Mul(Box::new(c(4)), Box::new(unk(1)))])
    );
    assert_eq!(Scev::product(c(0), unk(1)), c(0));
    assert_eq!(Scev::product(c(1), unk(1)), unk(1));
}

#[test]
fn test_addrec_sum_combines_same_loop() {
    let r1 = Scev::AddRec {
        base: Box::new(c(0)),
        step: Box::new(c(1)),
        loop_header: BlockId(1),
        no_wrap: false,
    };
    let r2 = Scev::AddRec {
        base: Box::new(c(8)),
        step: Box::new(c(3)),
        loop_header: BlockId(1),
        no_wrap: false,
    };
    let sum = Scev::sum(vec![r1, r2]);
    let (base, step, header, _) = sum.as_addrec().expect("recurrence");
    assert_eq!(base, &c(8));
    assert_eq!(step, &c(4));
    assert_eq!(header, BlockId(1));
}

#[test]
fn test_addrec_minus_same_step_is_constant() {
    let r1 = Scev::AddRec {
        base: Box::new(Scev::sum(vec![unk(9), c(32)])),
        step: Box::new(c(4)),
        loop_header: BlockId(1),
        no_wrap: false,
    };
    let r2 = Scev::AddRec {
        base: Box::new(unk(9)),
        step: Box::new(c(4)),
        loop_header: BlockId(1),
        no_wrap: false,
    };
    assert_eq!(Scev::minus(&r1, &r2), c(32));
}

#[test]
fn test_display() {
    let rec = Scev::AddRec {
        base: Box::new(unk(3)),
        step: Box::new(c(4)),
        loop_header: BlockId(1),
        no_wrap: true,
    };
    assert_eq!(format!("{}", rec), "{%3,+,4}<bb1>!");
    assert_eq!(format!("{}", Scev::sum(vec![unk(2), c(1)])), "(1 + %2)");
}

/// `for i in 0..n { b[i] = a[i + offset] }` over 32-bit elements.
/// Returns `(func, loop, load_ptr, store_ptr)`.
fn offset_loop(offset: i64, nw_increment: bool) -> (Function, Loop, ValueId, ValueId) {
    let mut b = FunctionBuilder::new(
        "f",
        vec![Type::ptr(Type::I32), Type::ptr(Type::I32), Type::I64],
    );
    let a = b.param(0);
    let dst = b.param(1);
    let n = b.param(2);

    let body = b.new_block();
    let exit = b.new_block();

    let zero = b.const_int(Type::I64, 0);
    let one = b.const_int(Type::I64, 1);
    b.br(body);

    b.switch_to_block(body);
    let i = b.phi(Type::I64);
    let idx = if offset == 0 {
        i
    } else {
        let off = b.const_int(Type::I64, offset);
        b.binary(BinOp::Add, i, off)
    };
    let gep_a = b.gep(a, idx, true);
    let v = b.load(gep_a);
    let gep_b = b.gep(dst, i, true);
    b.store(gep_b, v);
    let i_next = if nw_increment {
        b.binary_nw(BinOp::Add, i, one)
    } else {
        b.binary(BinOp::Add, i, one)
    };
    let cmp = b.icmp(IcmpPred::Slt, i_next, n);
    b.cond_br(cmp, body, exit);
    b.add_incoming(i, BlockId(0), zero);
    b.add_incoming(i, body, i_next);

    b.switch_to_block(exit);
    b.ret(None);

    (b.build(), Loop::new(body, vec![body]), gep_a, gep_b)
}

#[test]
fn test_engine_recognizes_induction_phi() {
    let (func, l, _, store_ptr) = offset_loop(0, false);
    let li = LoopInfo::new(vec![l.clone()]);
    let se = ScalarEvolution::new(&func, &li);

    // The store pointer recurs over the loop with a 4-byte step.
    let s = se.scev_of(store_ptr);
    let (base, step, header, _) = s.as_addrec().expect("pointer recurrence");
    assert_eq!(step.as_constant(), Some(4));
    assert_eq!(header, l.header);
    assert!(matches!(base, Scev::Unknown(_)));
}

#[test]
fn test_engine_pointer_distance() {
    let (func, l, load_ptr, store_ptr) = offset_loop(-8, false);
    let li = LoopInfo::new(vec![l]);
    let se = ScalarEvolution::new(&func, &li);

    // b[i] is at a distance of +32 bytes from a[i - 8] when a == b; the
    // subtraction sees distinct bases here, so only the same-base pair
    // folds to a constant.
    let load_s = se.scev_of(load_ptr);
    let store_s = se.scev_of(store_ptr);
    assert!(Scev::minus(&store_s, &load_s).as_constant().is_none());

    let (lb, _, _, _) = load_s.as_addrec().expect("load recurrence");
    // The load base is a - 32 bytes.
    assert_eq!(Scev::minus(&se.scev_of(func.params[0]), lb), c(32));
}

#[test]
fn test_backedge_taken_count() {
    let (func, l, _, _) = offset_loop(0, false);
    let li = LoopInfo::new(vec![l.clone()]);
    let se = ScalarEvolution::new(&func, &li);

    // Continue while i+1 < n from i = 0: the backedge runs n-1 times.
    let btc = se.backedge_taken_count(&l).expect("computable count");
    let n = func.params[2];
    assert_eq!(btc, Scev::sum(vec![Scev::Unknown(n), c(-1)]));
}

#[test]
fn test_no_wrap_requires_flagged_increment_and_in_bounds() {
    let (func, l, _, store_ptr) = offset_loop(0, true);
    let li = LoopInfo::new(vec![l]);
    let se = ScalarEvolution::new(&func, &li);
    let (_, _, _, no_wrap) = se.scev_of(store_ptr).as_addrec().expect("recurrence");
    assert!(no_wrap);

    let (func, l, _, store_ptr) = offset_loop(0, false);
    let li = LoopInfo::new(vec![l]);
    let se = ScalarEvolution::new(&func, &li);
    let (_, _, _, no_wrap) = se.scev_of(store_ptr).as_addrec().expect("recurrence");
    assert!(!no_wrap);
}

#[test]
fn test_symbolic_stride_substitution() {
    // a[i * s] with a symbolic stride parameter s.
    let mut b = FunctionBuilder::new(
        "f",
        vec![Type::ptr(Type::I32), Type::I64, Type::I64],
    );
    let a = b.param(0);
    let stride = b.param(1);
    let n = b.param(2);

    let body = b.new_block();
    let exit = b.new_block();
    let zero = b.const_int(Type::I64, 0);
    let one = b.const_int(Type::I64, 1);
    b.br(body);

    b.switch_to_block(body);
    let i = b.phi(Type::I64);
    let idx = b.binary(BinOp::Mul, i, stride);
    let gep = b.gep(a, idx, true);
    let v = b.load(gep);
    b.store(gep, v);
    let i_next = b.binary(BinOp::Add, i, one);
    let cmp = b.icmp(IcmpPred::Slt, i_next, n);
    b.cond_br(cmp, body, exit);
    b.add_incoming(i, BlockId(0), zero);
    b.add_incoming(i, body, i_next);
    b.switch_to_block(exit);
    b.ret(None);

    let func = b.build();
    let l = Loop::new(body, vec![body]);
    let li = LoopInfo::new(vec![l]);
    let se = ScalarEvolution::new(&func, &li);

    // Before substitution the step is 4·s; after promising s == 1 it is
    // the constant 4.
    let s = se.scev_of(gep);
    let (_, step, _, _) = s.as_addrec().expect("recurrence");
    assert_eq!(step.as_constant(), None);

    let rewritten = s.substitute(stride, &c(1));
    let (_, step, _, _) = rewritten.as_addrec().expect("recurrence");
    assert_eq!(step.as_constant(), Some(4));
}

#[test]
fn test_evaluate_at_count() {
    let rec = Scev::AddRec {
        base: Box::new(unk(3)),
        step: Box::new(c(4)),
        loop_header: BlockId(1),
        no_wrap: false,
    };
    assert_eq!(rec.evaluate_at(&c(7)), Scev::sum(vec![unk(3), c(28)]));
    assert_eq!(c(5).evaluate_at(&c(7)), c(5));
}

#[test]
fn test_invariance() {
    let (func, l, load_ptr, _) = offset_loop(0, false);
    let li = LoopInfo::new(vec![l.clone()]);
    let se = ScalarEvolution::new(&func, &li);

    assert!(se.is_value_loop_invariant(func.params[0], &l));
    assert!(!se.is_value_loop_invariant(load_ptr, &l));
    assert!(se.is_invariant(&se.scev_of(func.params[2]), &l));
    assert!(!se.is_invariant(&se.scev_of(load_ptr), &l));
}

#[test]
fn test_expander_materializes_pointer_bounds() {
    let (mut func, l, _, store_ptr) = offset_loop(0, false);
    let li = LoopInfo::new(vec![l]);
    let (start, end) = {
        let se = ScalarEvolution::new(&func, &li);
        let s = se.scev_of(store_ptr);
        let (base, _, _, _) = s.as_addrec().expect("recurrence");
        (base.clone(), s.evaluate_at(&c(7)))
    };

    let insert = BlockId(2);
    let before = func.block(insert).insts.len();
    let mut expander = ScevExpander::new(&mut func, insert);

    // The start bound is the raw pointer; no instructions needed.
    let start_v = expander.expand(&start).expect("expandable");
    assert_eq!(func.block(insert).insts.len(), before);

    let mut expander = ScevExpander::new(&mut func, insert);
    let end_v = expander.expand(&end).expect("expandable");
    assert_ne!(start_v, end_v);
    // A byte-pointer cast plus an address computation were emitted.
    assert!(func.block(insert).insts.len() > before);
    assert!(func.ty(end_v).is_pointer());
}

#[test]
fn test_expander_rejects_recurrences() {
    let (mut func, _, _, _) = offset_loop(0, false);
    let rec = Scev::AddRec {
        base: Box::new(c(0)),
        step: Box::new(c(1)),
        loop_header: BlockId(1),
        no_wrap: false,
    };
    let mut expander = ScevExpander::new(&mut func, BlockId(2));
    assert_eq!(expander.expand(&rec), Err(ExpandError::NonAffine));
}
