//! Crate root: public surface, shared error type, and crate-wide invariants
//!
//! This module is the **single canonical entry-point** for downstream users of
//! the library. It centralizes the shared error categories and re-exports the
//! main submodules that implement the Cox partial-likelihood evaluator for
//! right-censored, optionally left-truncated time-to-event data.
//!
//! ## Invariants (crate-wide)
//!
//! - **Canonical ordering.** All risk-set arithmetic runs over one joint sort
//!   of the 2n start/stop records, keyed by
//!   `(time ascending, failures before censorings, stops before starts)`.
//!   A subject entering at time `t` is therefore never at risk for a failure
//!   at time `t`. The sort is performed once per `(start, event, status)`
//!   triple; the derived index tables are immutable afterwards.
//!
//! - **Padding discipline.** Reverse cumulative sums carry a trailing zero and
//!   forward cumulants carry a leading zero, both of length `n + 1`, so that
//!   lookups at `first`, `last + 1`, `start_map` and `event_map` never branch
//!   at the boundaries.
//!
//! - **Streaming evaluation.** Given the tables, one evaluation is a fixed
//!   number of O(n) forward/reverse passes. Every per-call buffer is sized up
//!   front by the evaluation workspace; no inner loop allocates.
//!
//! - **Deviance scale.** Returned gradients and curvatures are derivatives of
//!   the deviance `D = 2(ℓ_sat − ℓ)`, i.e. `−2∇ℓ` and `−2·diag ∇²ℓ`, and the
//!   product computed by [`InformationOperator::apply`] is on the same scale.
//!
//! - **Synchronous core.** Nothing here suspends, blocks or spawns. A
//!   [`CoxDeviance`] context is freely shareable across threads; the only
//!   mutable state is its single-slot memo cache, which is lock-serialised
//!   and never changes observable outputs.
//!
//! If any invariant is violated at runtime, the failure mode is a **precise
//! error** (never a panic in library paths).

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Ergonomic context type: construction, validation, evaluation, memoisation.
pub mod api;
/// Content fingerprinting of evaluation inputs (BLAKE3 over raw bit patterns).
pub mod digest;
/// Hessian operator `v ↦ Hv` built from the per-call kernel state.
pub mod information;
/// Cumulative-sum kernels: saturated likelihood, deviance, gradient, curvature.
pub(crate) mod kernel;
/// Joint lexicographic ordering of start and stop records.
pub(crate) mod order;
/// Tie-group and left-truncation index tables derived from the joint sort.
pub(crate) mod tables;

pub use crate::api::{CoxDeviance, CoxDevianceResult, TieBreaking};
pub use crate::digest::Fingerprint;
pub use crate::information::InformationOperator;

// ============================================================================
// Shared error categories
// ============================================================================

/// Errors surfaced by context construction and evaluation.
///
/// Four stable kinds cover the whole crate. Construction errors abort with no
/// partial context; evaluation errors abort the call without touching the
/// memo slot. Nothing is retried internally and no error is fatal to the
/// process.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoxError {
    /// Parallel input vectors disagree in length, are empty, or contain
    /// non-finite values.
    #[error("input shape: `{field}` {reason}")]
    InputShape {
        /// Name of the offending input vector.
        field: &'static str,
        /// What was wrong with its shape or contents.
        reason: String,
    },

    /// A value lies outside its admissible domain (status not in {0, 1},
    /// a start time at or after its stop time, a negative weight, or an
    /// unrecognised tie-breaking name).
    #[error("input domain: `{field}` {reason}")]
    InputDomain {
        /// Name of the offending input.
        field: &'static str,
        /// Which value was inadmissible, and where.
        reason: String,
    },

    /// The derived index tables failed their self-check: the tie-group anchor
    /// at a subject's entry position disagrees with the entry position itself.
    /// Indicates adversarial ties between start and stop times that the
    /// builder cannot reconcile.
    #[error(
        "preprocess invariant: first_start[{subject}] = {first_start} \
         but start_map[{subject}] = {start_map}"
    )]
    PreprocessInvariant {
        /// Event-order position at which the check failed.
        subject: usize,
        /// Tie-group anchor found at the entry position.
        first_start: usize,
        /// The entry position itself.
        start_map: usize,
    },

    /// A failure with positive averaged weight saw a non-positive risk-set
    /// sum: the supplied weights and linear predictors annihilate a risk set.
    #[error(
        "numerical degeneracy: risk sum {risk_sum:e} at subject {subject} \
         with an observed failure of positive weight"
    )]
    NumericalDegeneracy {
        /// Native-order index of the failing subject.
        subject: usize,
        /// The offending risk-set sum.
        risk_sum: f64,
    },
}
