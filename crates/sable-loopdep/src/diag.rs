//! Rejection diagnostics.
//!
//! Failures are reported, not thrown: an analysis records the earliest
//! failing reason on its result and answers conservatively. At most one
//! diagnostic is attached per analysis.

use thiserror::Error;

/// Why a loop was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("loop is not the innermost loop")]
    NotInnermost,
    #[error("loop control flow is not understood by analyzer")]
    ControlFlow,
    #[error("could not determine number of loop iterations")]
    NoTripCount,
    #[error("read with atomic ordering or volatile read")]
    NonSimpleLoad,
    #[error("write with atomic ordering or volatile write")]
    NonSimpleStore,
    #[error("instruction cannot be vectorized")]
    UnvectorizableInstruction,
    #[error("uniform store to a loop-invariant address")]
    UniformStore,
    #[error("cannot identify array bounds")]
    CannotIdentifyBounds,
    #[error("too many memory runtime checks needed")]
    TooManyRuntimeChecks,
    #[error("runtime check would compare pointers in different address spaces")]
    CrossAddressSpace,
    #[error("unsafe dependent memory operations in loop")]
    UnsafeDependence,
    #[error("cannot check memory dependencies at runtime")]
    CannotCheckAtRuntime,
}
