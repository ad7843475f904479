//! Loop memory-dependence analysis.
//!
//! Decides, for one innermost loop, whether its loads and stores can be
//! executed safely in a vectorized or interleaved form — unconditionally,
//! or guarded by runtime pointer-range checks emitted into the function:
//!
//! ```text
//! driver (analysis) → classifier (alias / dependence sets)
//!                   → stride analysis (symbolic, per pointer)
//!                   → runtime-check builder (pointer bounds + pair list)
//!                   → dependence checker (pair-wise safety, max distance)
//! ```
//!
//! The IR, loop discovery, dominators, the symbolic-evolution oracle, and
//! the alias oracle are collaborators from `sable-ir` / `sable-scev`; this
//! crate holds the safety decisions.

pub mod analysis;
pub mod classify;
mod config;
pub mod depcheck;
mod diag;
pub mod runtime_checks;
pub mod stride;

pub use analysis::{LoopAccessInfo, LoopDepAnalysis};
pub use classify::{AccessPartition, AccessTag, DepCandidates};
pub use config::{LoopDepConfig, MAX_VECTOR_WIDTH};
pub use diag::Rejection;
pub use runtime_checks::{PointerBounds, RuntimePointerChecks};
pub use stride::SymbolicStrides;
