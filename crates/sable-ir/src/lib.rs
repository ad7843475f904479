//! Typed SSA intermediate representation for the Sable compiler.
//!
//! The IR is a control-flow graph of basic blocks over an arena of typed
//! SSA values. It is deliberately small: just enough surface for the
//! middle-end analyses that run on innermost loops:
//!
//! ```text
//! front end → sable-ir → sable-scev (symbolic evolution) → sable-loopdep
//! ```
//!
//! Alongside the IR itself this crate provides the collaborator services
//! those analyses consume:
//! - CFG predecessor/successor maps and dominator / post-dominator trees
//! - Loop descriptions (header, member blocks, latch, exiting blocks)
//! - A data layout answering allocation sizes and address-space queries
//! - An alias oracle and alias-set tracker over memory accesses

pub mod alias;
mod builder;
pub mod cfg;
mod func;
pub mod loops;
mod types;

pub use builder::FunctionBuilder;
pub use func::*;
pub use types::*;
