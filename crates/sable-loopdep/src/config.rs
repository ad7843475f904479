//! Analysis tunables.

/// Maximum vector register width the dependence distance reasoning
/// assumes, in bytes.
pub const MAX_VECTOR_WIDTH: u64 = 64;

/// Process-wide analysis configuration, populated once by the option
/// parser and passed immutably to the analysis constructor.
#[derive(Debug, Clone)]
pub struct LoopDepConfig {
    /// Forced vectorization factor; 0 lets the vectorizer choose.
    pub force_vector_width: u32,
    /// Forced interleave count; 0 lets the vectorizer choose.
    pub force_vector_interleave: u32,
    /// Upper bound on the number of runtime pointer comparisons.
    pub runtime_check_threshold: u32,
}

impl Default for LoopDepConfig {
    fn default() -> Self {
        Self {
            force_vector_width: 0,
            force_vector_interleave: 0,
            runtime_check_threshold: 8,
        }
    }
}
