//! Scalar-evolution oracle: symbolic closed forms for SSA values.
//!
//! The oracle assigns each SSA value a symbolic expression ([`Scev`]) and
//! answers the narrow set of questions loop analyses ask about them:
//! loop invariance, backedge-taken counts, subtraction, evaluation of a
//! recurrence at an iteration count, and parameter substitution. Clients
//! observe only the shapes they need — constants, loop-invariant
//! unknowns, and affine add-recurrences `{base,+,step}` with an optional
//! no-wrap attribute — and otherwise treat expressions as opaque.

pub mod expand;

use sable_ir::loops::{Loop, LoopInfo};
use sable_ir::{
    BinOp, BlockId, DataLayout, Function, IcmpPred, Terminator, ValueId, ValueKind,
};
use std::collections::HashMap;
use std::fmt;

/// A symbolic expression over the values of one function.
///
/// Kept lightly canonical by the [`Scev::sum`] and [`Scev::product`]
/// constructors: constants fold, nested sums flatten, recurrences over
/// the same loop combine, and equal terms cancel through coefficients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scev {
    Constant(i64),
    /// An SSA value the oracle cannot see through.
    Unknown(ValueId),
    Add(Vec<Scev>),
    Mul(Box<Scev>, Box<Scev>),
    /// Affine add-recurrence `{base,+,step}` over the loop with the
    /// given header. `no_wrap` promises the recurrence never wraps the
    /// address space.
    AddRec {
        base: Box<Scev>,
        step: Box<Scev>,
        loop_header: BlockId,
        no_wrap: bool,
    },
}

impl Scev {
    /// The constant value, when the expression is a compile-time
    /// constant.
    pub fn as_constant(&self) -> Option<i64> {
        match self {
            Scev::Constant(c) => Some(*c),
            _ => None,
        }
    }

    /// The `(base, step, loop_header, no_wrap)` parts, when the
    /// expression is an add-recurrence.
    pub fn as_addrec(&self) -> Option<(&Scev, &Scev, BlockId, bool)> {
        match self {
            Scev::AddRec {
                base,
                step,
                loop_header,
                no_wrap,
            } => Some((base, step, *loop_header, *no_wrap)),
            _ => None,
        }
    }

    /// Normalizing n-ary sum.
    pub fn sum(terms: Vec<Scev>) -> Scev {
        fn flatten(t: Scev, out: &mut Vec<Scev>) {
            match t {
                Scev::Add(ts) => ts.into_iter().for_each(|t| flatten(t, out)),
                other => out.push(other),
            }
        }
        let mut flat = vec![];
        for t in terms {
            flatten(t, &mut flat);
        }

        let mut const_sum: i64 = 0;
        let mut recs: Vec<(BlockId, Scev, Scev)> = vec![];
        let mut others: Vec<(Scev, i64)> = vec![];

        fn add_coeff(terms: &mut Vec<(Scev, i64)>, term: Scev, coeff: i64) {
            if let Some(entry) = terms.iter_mut().find(|(t, _)| *t == term) {
                entry.1 = entry.1.wrapping_add(coeff);
            } else {
                terms.push((term, coeff));
            }
        }

        for t in flat {
            match t {
                Scev::Constant(c) => const_sum = const_sum.wrapping_add(c),
                Scev::AddRec {
                    base,
                    step,
                    loop_header,
                    no_wrap,
                } => {
                    // Recurrences combine over the first loop seen; one
                    // over a second loop stays an opaque term.
                    let same_loop = recs
                        .first()
                        .map(|(h, _, _)| *h == loop_header)
                        .unwrap_or(true);
                    if same_loop {
                        recs.push((loop_header, *base, *step));
                    } else {
                        add_coeff(
                            &mut others,
                            Scev::AddRec {
                                base,
                                step,
                                loop_header,
                                no_wrap,
                            },
                            1,
                        );
                    }
                }
                Scev::Mul(a, b) => {
                    if let Scev::Constant(c) = *a {
                        add_coeff(&mut others, *b, c);
                    } else {
                        add_coeff(&mut others, Scev::Mul(a, b), 1);
                    }
                }
                other => add_coeff(&mut others, other, 1),
            }
        }

        let mut parts: Vec<Scev> = vec![];
        if const_sum != 0 {
            parts.push(Scev::Constant(const_sum));
        }
        for (term, coeff) in others {
            match coeff {
                0 => {}
                1 => parts.push(term),
                c => parts.push(Scev::Mul(Box::new(Scev::Constant(c)), Box::new(term))),
            }
        }

        if !recs.is_empty() {
            let loop_header = recs[0].0;
            let mut bases = vec![];
            let mut steps = vec![];
            for (_, base, step) in recs {
                bases.push(base);
                steps.push(step);
            }
            bases.extend(parts);
            let base = Scev::sum(bases);
            let step = Scev::sum(steps);
            if step == Scev::Constant(0) {
                return base;
            }
            return Scev::AddRec {
                base: Box::new(base),
                step: Box::new(step),
                loop_header,
                no_wrap: false,
            };
        }

        match parts.len() {
            0 => Scev::Constant(0),
            1 => parts.pop().expect("one part"),
            _ => Scev::Add(parts),
        }
    }

    /// Normalizing product.
    pub fn product(a: Scev, b: Scev) -> Scev {
        // Constants to the left.
        let (a, b) = if matches!(b, Scev::Constant(_)) && !matches!(a, Scev::Constant(_)) {
            (b, a)
        } else {
            (a, b)
        };
        match (a, b) {
            (Scev::Constant(x), Scev::Constant(y)) => Scev::Constant(x.wrapping_mul(y)),
            (Scev::Constant(0), _) => Scev::Constant(0),
            (Scev::Constant(1), x) => x,
            (Scev::Constant(c), Scev::Add(ts)) => Scev::sum(
                ts.into_iter()
                    .map(|t| Scev::product(Scev::Constant(c), t))
                    .collect(),
            ),
            (
                Scev::Constant(c),
                Scev::AddRec {
                    base,
                    step,
                    loop_header,
                    ..
                },
            ) => Scev::AddRec {
                base: Box::new(Scev::product(Scev::Constant(c), *base)),
                step: Box::new(Scev::product(Scev::Constant(c), *step)),
                loop_header,
                no_wrap: false,
            },
            (Scev::Constant(c), Scev::Mul(x, y)) => {
                if let Scev::Constant(d) = *x {
                    Scev::product(Scev::Constant(c.wrapping_mul(d)), *y)
                } else {
                    Scev::Mul(Box::new(Scev::Constant(c)), Box::new(Scev::Mul(x, y)))
                }
            }
            // A loop-invariant factor distributes over a recurrence.
            (
                Scev::AddRec {
                    base,
                    step,
                    loop_header,
                    ..
                },
                x,
            )
            | (
                x,
                Scev::AddRec {
                    base,
                    step,
                    loop_header,
                    ..
                },
            ) if !x.references_loop(loop_header) => Scev::AddRec {
                base: Box::new(Scev::product(x.clone(), *base)),
                step: Box::new(Scev::product(x, *step)),
                loop_header,
                no_wrap: false,
            },
            (a, b) => Scev::Mul(Box::new(a), Box::new(b)),
        }
    }

    /// `a − b`, with term cancellation.
    pub fn minus(a: &Scev, b: &Scev) -> Scev {
        Scev::sum(vec![
            a.clone(),
            Scev::product(Scev::Constant(-1), b.clone()),
        ])
    }

    /// Evaluate a recurrence at an iteration count: `base + step·count`.
    /// Loop-invariant expressions evaluate to themselves.
    pub fn evaluate_at(&self, count: &Scev) -> Scev {
        match self {
            Scev::AddRec { base, step, .. } => Scev::sum(vec![
                (**base).clone(),
                Scev::product((**step).clone(), count.clone()),
            ]),
            other => other.clone(),
        }
    }

    /// Does any sub-expression recur over the loop with this header?
    pub fn references_loop(&self, header: BlockId) -> bool {
        match self {
            Scev::Constant(_) | Scev::Unknown(_) => false,
            Scev::Add(ts) => ts.iter().any(|t| t.references_loop(header)),
            Scev::Mul(a, b) => a.references_loop(header) || b.references_loop(header),
            Scev::AddRec {
                base,
                step,
                loop_header,
                ..
            } => {
                *loop_header == header
                    || base.references_loop(header)
                    || step.references_loop(header)
            }
        }
    }

    /// Replace every occurrence of the unknown `target` with `with`,
    /// renormalizing the result. The substitution is purely semantic.
    pub fn substitute(&self, target: ValueId, with: &Scev) -> Scev {
        match self {
            Scev::Constant(_) => self.clone(),
            Scev::Unknown(v) => {
                if *v == target {
                    with.clone()
                } else {
                    self.clone()
                }
            }
            Scev::Add(ts) => Scev::sum(ts.iter().map(|t| t.substitute(target, with)).collect()),
            Scev::Mul(a, b) => {
                Scev::product(a.substitute(target, with), b.substitute(target, with))
            }
            Scev::AddRec {
                base,
                step,
                loop_header,
                no_wrap,
            } => {
                let base = base.substitute(target, with);
                let step = step.substitute(target, with);
                if step == Scev::Constant(0) {
                    base
                } else {
                    Scev::AddRec {
                        base: Box::new(base),
                        step: Box::new(step),
                        loop_header: *loop_header,
                        no_wrap: *no_wrap,
                    }
                }
            }
        }
    }
}

impl fmt::Display for Scev {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scev::Constant(c) => write!(f, "{}", c),
            Scev::Unknown(v) => write!(f, "{}", v),
            Scev::Add(ts) => {
                write!(f, "(")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " + ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, ")")
            }
            Scev::Mul(a, b) => write!(f, "({} * {})", a, b),
            Scev::AddRec {
                base,
                step,
                loop_header,
                no_wrap,
            } => {
                write!(f, "{{{},+,{}}}<{}>", base, step, loop_header)?;
                if *no_wrap {
                    write!(f, "!")?;
                }
                Ok(())
            }
        }
    }
}

/// The scalar-evolution engine for one function.
///
/// Expressions are derived once, eagerly, for every value: constants and
/// parameters directly, induction phis as add-recurrences, element
/// address computations by scaling the index recurrence with the element
/// allocation size. Values the engine cannot see through become opaque
/// unknowns.
pub struct ScalarEvolution<'f> {
    func: &'f Function,
    loops: &'f LoopInfo,
    layout: DataLayout,
    def_block: HashMap<ValueId, BlockId>,
    exprs: HashMap<ValueId, Scev>,
}

impl<'f> ScalarEvolution<'f> {
    pub fn new(func: &'f Function, loops: &'f LoopInfo) -> Self {
        let mut def_block = HashMap::new();
        for (block_idx, block) in func.blocks.iter().enumerate() {
            for inst in &block.insts {
                def_block.insert(*inst, BlockId(block_idx as u32));
            }
        }

        let mut se = Self {
            func,
            loops,
            layout: DataLayout::new(),
            def_block,
            exprs: HashMap::new(),
        };
        for idx in 0..func.values.len() {
            se.compute(ValueId(idx as u32));
        }
        se
    }

    /// The symbolic expression for an SSA value.
    pub fn scev_of(&self, v: ValueId) -> Scev {
        self.exprs.get(&v).cloned().unwrap_or(Scev::Unknown(v))
    }

    /// Is the value defined outside the loop (or not defined by an
    /// instruction at all)?
    pub fn is_value_loop_invariant(&self, v: ValueId, l: &Loop) -> bool {
        match self.def_block.get(&v) {
            None => true,
            Some(b) => !l.contains(*b),
        }
    }

    /// Is the expression invariant in the loop?
    pub fn is_invariant(&self, s: &Scev, l: &Loop) -> bool {
        match s {
            Scev::Constant(_) => true,
            Scev::Unknown(v) => self.is_value_loop_invariant(*v, l),
            Scev::Add(ts) => ts.iter().all(|t| self.is_invariant(t, l)),
            Scev::Mul(a, b) => self.is_invariant(a, l) && self.is_invariant(b, l),
            Scev::AddRec { .. } => false,
        }
    }

    /// The number of times the loop's backedge executes, when the latch
    /// is a recognized bottom-tested compare of a unit-step recurrence
    /// against a loop-invariant bound.
    pub fn backedge_taken_count(&self, l: &Loop) -> Option<Scev> {
        let latch = l.latch(self.func)?;
        let (cond, then_bb, else_bb) = match self.func.block(latch).terminator {
            Some(Terminator::CondBr {
                cond,
                then_bb,
                else_bb,
            }) => (cond, then_bb, else_bb),
            _ => return None,
        };
        let (pred, lhs, rhs) = match self.func.value(cond).kind {
            ValueKind::Icmp { pred, lhs, rhs } => (pred, lhs, rhs),
            _ => return None,
        };
        let continue_on_true = if then_bb == l.header {
            true
        } else if else_bb == l.header {
            false
        } else {
            return None;
        };

        // Recognized forms continue while `rec < bound` or `rec != bound`.
        match (pred, continue_on_true) {
            (IcmpPred::Slt, true) | (IcmpPred::Ult, true) | (IcmpPred::Ne, true) => {}
            (IcmpPred::Eq, false) => {}
            _ => return None,
        }

        let lhs_s = self.scev_of(lhs);
        let bound = self.scev_of(rhs);
        let (base, step, loop_header, _) = lhs_s.as_addrec()?;
        if loop_header != l.header || step.as_constant() != Some(1) {
            return None;
        }
        if !self.is_invariant(&bound, l) {
            return None;
        }
        Some(Scev::minus(&bound, base))
    }

    fn compute(&mut self, v: ValueId) -> Scev {
        if let Some(s) = self.exprs.get(&v) {
            return s.clone();
        }
        // Cycle guard: anything that reaches itself stays opaque.
        self.exprs.insert(v, Scev::Unknown(v));

        let kind = self.func.value(v).kind.clone();
        let result = match kind {
            ValueKind::ConstInt(c) => Scev::Constant(c),
            ValueKind::PtrCast { value } => self.compute(value),
            ValueKind::Binary {
                op,
                lhs,
                rhs,
                no_wrap: _,
            } => {
                let l = self.compute(lhs);
                let r = self.compute(rhs);
                match op {
                    BinOp::Add => Scev::sum(vec![l, r]),
                    BinOp::Sub => Scev::minus(&l, &r),
                    BinOp::Mul => Scev::product(l, r),
                    BinOp::Shl => match r.as_constant() {
                        Some(c) if (0..63).contains(&c) => {
                            Scev::product(l, Scev::Constant(1 << c))
                        }
                        _ => Scev::Unknown(v),
                    },
                    _ => Scev::Unknown(v),
                }
            }
            ValueKind::Gep {
                base,
                index,
                in_bounds,
            } => {
                let elem_size = self
                    .func
                    .ty(v)
                    .pointee()
                    .map(|t| self.layout.alloc_size(t) as i64)
                    .unwrap_or(1);
                let base_s = self.compute(base);
                let idx_s = self.compute(index);
                let idx_no_wrap = matches!(idx_s, Scev::AddRec { no_wrap: true, .. });
                let sum = Scev::sum(vec![
                    base_s,
                    Scev::product(Scev::Constant(elem_size), idx_s),
                ]);
                match sum {
                    Scev::AddRec {
                        base,
                        step,
                        loop_header,
                        ..
                    } if in_bounds && idx_no_wrap => Scev::AddRec {
                        base,
                        step,
                        loop_header,
                        no_wrap: true,
                    },
                    other => other,
                }
            }
            ValueKind::Phi { incoming } => self.compute_phi(v, &incoming),
            ValueKind::Param { .. }
            | ValueKind::Alloca
            | ValueKind::Load { .. }
            | ValueKind::Store { .. }
            | ValueKind::Call { .. }
            | ValueKind::Icmp { .. } => Scev::Unknown(v),
        };

        self.exprs.insert(v, result.clone());
        result
    }

    /// Recognize the canonical induction pattern: a header phi with one
    /// entry edge and one latch edge whose value adds a loop-invariant
    /// step back onto the phi.
    fn compute_phi(&mut self, v: ValueId, incoming: &[(BlockId, ValueId)]) -> Scev {
        let header = match self.def_block.get(&v) {
            Some(b) => *b,
            None => return Scev::Unknown(v),
        };
        let l = match self.loops.loop_with_header(header) {
            Some(l) => l.clone(),
            None => return Scev::Unknown(v),
        };
        let [(a_bb, a_v), (b_bb, b_v)] = incoming else {
            return Scev::Unknown(v);
        };
        let (start, next) = if l.contains(*a_bb) && !l.contains(*b_bb) {
            (*b_v, *a_v)
        } else if l.contains(*b_bb) && !l.contains(*a_bb) {
            (*a_v, *b_v)
        } else {
            return Scev::Unknown(v);
        };

        if let ValueKind::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
            no_wrap,
        } = self.func.value(next).kind
        {
            let step_val = if lhs == v {
                rhs
            } else if rhs == v {
                lhs
            } else {
                return Scev::Unknown(v);
            };
            if !self.is_value_loop_invariant(step_val, &l) {
                return Scev::Unknown(v);
            }
            let base = self.compute(start);
            let step = self.compute(step_val);
            if step == Scev::Constant(0) {
                return base;
            }
            return Scev::AddRec {
                base: Box::new(base),
                step: Box::new(step),
                loop_header: header,
                no_wrap,
            };
        }
        Scev::Unknown(v)
    }
}

#[cfg(test)]
mod tests;
