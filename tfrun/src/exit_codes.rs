//! Stable exit codes for tfrun commands.
//!
//! Remote command failures that report their own non-zero code propagate it instead.

/// The flow reached its success state (`planned_and_finished` or `applied`).
pub const OK: i32 = 0;
/// Invalid input, a failed or blocked run, a discard, a timeout, or any other error.
pub const FAILED: i32 = 1;
