//! Shared loop-building rig for the integration tests.

#![allow(dead_code)]

use sable_ir::loops::{Loop, LoopInfo};
use sable_ir::{BinOp, BlockId, FunctionBuilder, Function, IcmpPred, Type, ValueId};
use sable_loopdep::{LoopAccessInfo, LoopDepAnalysis, LoopDepConfig, SymbolicStrides};
use sable_scev::ScalarEvolution;

/// Build `for i in 0..n { <body> }` as a bottom-tested single-block
/// loop. `n` is appended as the last parameter; the closure emits the
/// body given the builder and the induction value.
pub fn counted_loop<F>(mut param_tys: Vec<Type>, body: F) -> (Function, Loop, LoopInfo)
where
    F: FnOnce(&mut FunctionBuilder, ValueId),
{
    param_tys.push(Type::I64);
    let n_index = param_tys.len() - 1;
    let mut b = FunctionBuilder::new("test_loop", param_tys);
    let n = b.param(n_index);

    let body_bb = b.new_block();
    let exit = b.new_block();
    let zero = b.const_int(Type::I64, 0);
    let one = b.const_int(Type::I64, 1);
    b.br(body_bb);

    b.switch_to_block(body_bb);
    let i = b.phi(Type::I64);
    body(&mut b, i);
    let i_next = b.binary(BinOp::Add, i, one);
    let cmp = b.icmp(IcmpPred::Slt, i_next, n);
    b.cond_br(cmp, body_bb, exit);
    b.add_incoming(i, BlockId(0), zero);
    b.add_incoming(i, body_bb, i_next);

    b.switch_to_block(exit);
    b.ret(None);

    let func = b.build();
    let l = Loop::new(body_bb, vec![body_bb]);
    let li = LoopInfo::new(vec![l.clone()]);
    (func, l, li)
}

/// The element address `base[i + offset]`, with an in-bounds address
/// computation.
pub fn elem_addr(b: &mut FunctionBuilder, base: ValueId, i: ValueId, offset: i64) -> ValueId {
    let idx = if offset == 0 {
        i
    } else {
        let off = b.const_int(Type::I64, offset);
        b.binary(BinOp::Add, i, off)
    };
    b.gep(base, idx, true)
}

/// Run the analysis over one loop with the given configuration.
pub fn analyze_with(
    func: &Function,
    l: &Loop,
    li: &LoopInfo,
    config: LoopDepConfig,
) -> LoopAccessInfo {
    let se = ScalarEvolution::new(func, li);
    let mut analysis = LoopDepAnalysis::new(func, li, &se, config);
    analysis.info(l, &SymbolicStrides::new()).clone()
}

/// Run the analysis with the default configuration.
pub fn analyze(func: &Function, l: &Loop, li: &LoopInfo) -> LoopAccessInfo {
    analyze_with(func, l, li, LoopDepConfig::default())
}
