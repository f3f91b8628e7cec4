// src/api.rs
//! Cox deviance context: the "happy-path" crate surface
//!
//! This module wraps the preprocessing and kernel machinery with a small,
//! ergonomic API:
//!
//! - [`CoxDeviance::new`] validates one `(event, status, start?)` triple,
//!   runs the joint sort once, and freezes the derived index tables;
//! - [`CoxDeviance::evaluate`] turns an `(η, w?)` pair into saturated
//!   log-likelihood, deviance, gradient and diagonal Hessian, all in native
//!   subject order and on the deviance scale;
//! - [`CoxDeviance::information`] hands out a Hessian-product operator for
//!   the same pair.
//!
//! A context is immutable once built and shareable across threads. Its only
//! mutable state is a single-slot memo cache keyed on a content fingerprint
//! of `(η, w)`: an identical repeat returns the stored result bit for bit,
//! a different input overwrites the slot, and a failed call leaves it
//! untouched. The cache changes cost, never observable values.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::digest::Fingerprint;
use crate::information::InformationOperator;
use crate::kernel::{deviance_kernel, EvalWorkspace};
use crate::tables::RiskSetTables;
use crate::CoxError;

// ============================================================================
// Tie-breaking convention
// ============================================================================

/// How simultaneous failures share their risk set.
///
/// Breslow charges every tied failure the full risk-set sum; Efron averages
/// the tied mass over within-tie positions, which reduces bias when tie
/// groups are large. On data with no tied failure times the two coincide,
/// and a context built with `Efron` silently degrades to the Breslow path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreaking {
    /// Full risk-set sum for every member of a tie group.
    Breslow,
    /// Position-averaged risk-set sums within tie groups.
    #[default]
    Efron,
}

impl FromStr for TieBreaking {
    type Err = CoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "breslow" => Ok(Self::Breslow),
            "efron" => Ok(Self::Efron),
            other => Err(CoxError::InputDomain {
                field: "tie_breaking",
                reason: format!("unrecognised convention `{other}`"),
            }),
        }
    }
}

impl fmt::Display for TieBreaking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Breslow => "breslow",
            Self::Efron => "efron",
        })
    }
}

// ============================================================================
// Evaluation result
// ============================================================================

/// Output of one deviance evaluation, in native subject order.
///
/// `gradient` and `diag_hessian` are derivatives of the deviance
/// `D = 2(ℓ_sat − ℓ)` with respect to the linear predictor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoxDevianceResult {
    /// Log-likelihood of the saturated model for the supplied weights.
    pub loglik_sat: f64,
    /// `2 · (loglik_sat − loglik(η))`.
    pub deviance: f64,
    /// `∂D/∂η`, length n.
    pub gradient: Vec<f64>,
    /// `diag ∂²D/∂η²`, length n.
    pub diag_hessian: Vec<f64>,
}

// ============================================================================
// Context
// ============================================================================

/// Preprocessed evaluation context for one `(event, status, start?)` triple.
#[derive(Debug)]
pub struct CoxDeviance {
    tables: RiskSetTables,
    have_start_times: bool,
    tie_breaking: TieBreaking,
    /// True only when Efron was requested **and** some tie group is
    /// non-trivial; degenerate Efron inputs collapse to Breslow.
    efron: bool,
    memo: Mutex<Option<(Fingerprint, CoxDevianceResult)>>,
}

impl CoxDeviance {
    /// Validate the inputs, run the one-shot preprocessing, and freeze the
    /// index tables.
    ///
    /// `status` entries must be 0 (right-censored) or 1 (observed failure).
    /// When `start` is given, each entry must lie strictly before the
    /// subject's stop time; when absent, subjects are at risk from the
    /// beginning of time.
    pub fn new(
        event: &[f64],
        status: &[u8],
        start: Option<&[f64]>,
        tie_breaking: TieBreaking,
    ) -> Result<Self, CoxError> {
        let n = event.len();
        if n == 0 {
            return Err(CoxError::InputShape {
                field: "event",
                reason: "is empty".to_string(),
            });
        }
        if status.len() != n {
            return Err(CoxError::InputShape {
                field: "status",
                reason: format!("has {} entries, expected {n}", status.len()),
            });
        }
        if let Some(i) = event.iter().position(|t| !t.is_finite()) {
            return Err(CoxError::InputShape {
                field: "event",
                reason: format!("non-finite value at subject {i}"),
            });
        }
        if let Some(i) = status.iter().position(|&s| s > 1) {
            return Err(CoxError::InputDomain {
                field: "status",
                reason: format!("must be 0 or 1, got {} at subject {i}", status[i]),
            });
        }
        if let Some(start) = start {
            if start.len() != n {
                return Err(CoxError::InputShape {
                    field: "start",
                    reason: format!("has {} entries, expected {n}", start.len()),
                });
            }
            if let Some(i) = start.iter().position(|t| !t.is_finite()) {
                return Err(CoxError::InputShape {
                    field: "start",
                    reason: format!("non-finite value at subject {i}"),
                });
            }
            for i in 0..n {
                if start[i] >= event[i] {
                    return Err(CoxError::InputDomain {
                        field: "start",
                        reason: format!(
                            "start {} is not before stop {} at subject {i}",
                            start[i], event[i]
                        ),
                    });
                }
            }
        }

        let tables = RiskSetTables::build(event, status, start)?;
        let has_ties = tables.scaling.iter().any(|&s| s != 0.0);
        let efron = tie_breaking == TieBreaking::Efron && has_ties;
        if tie_breaking == TieBreaking::Efron && !has_ties {
            debug!("no tied failure times; efron correction collapses to breslow");
        }
        debug!(
            n,
            failures = status.iter().filter(|&&s| s == 1).count(),
            have_start_times = start.is_some(),
            tie_breaking = %tie_breaking,
            efron,
            "cox deviance context ready"
        );

        Ok(Self {
            tables,
            have_start_times: start.is_some(),
            tie_breaking,
            efron,
            memo: Mutex::new(None),
        })
    }

    /// Number of subjects.
    pub fn len(&self) -> usize {
        self.tables.n
    }

    /// Always false: empty inputs are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.tables.n == 0
    }

    /// The convention this context was built with.
    pub fn tie_breaking(&self) -> TieBreaking {
        self.tie_breaking
    }

    /// Whether the Efron correction is actually in effect (requested and
    /// not collapsed by the absence of ties).
    pub fn uses_efron(&self) -> bool {
        self.efron
    }

    /// Evaluate saturated log-likelihood, deviance, gradient and diagonal
    /// Hessian at `(η, w)`. A missing `weight` means all ones.
    ///
    /// An identical repeat of the previous call is served from the memo slot
    /// bit for bit.
    pub fn evaluate(
        &self,
        eta: &[f64],
        weight: Option<&[f64]>,
    ) -> Result<CoxDevianceResult, CoxError> {
        self.check_eval_inputs(eta, weight)?;
        let n = self.tables.n;
        let ones;
        let weight = match weight {
            Some(w) => w,
            None => {
                ones = vec![1.0; n];
                ones.as_slice()
            }
        };

        let fingerprint = Fingerprint::of_eval_inputs(eta, weight);
        {
            let slot = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((cached, result)) = slot.as_ref() {
                if *cached == fingerprint {
                    debug!(fingerprint = %fingerprint, "memoised evaluation reused");
                    return Ok(result.clone());
                }
            }
        }

        let mut ws = EvalWorkspace::new(n);
        let out = deviance_kernel(
            &self.tables,
            eta,
            weight,
            self.efron,
            self.have_start_times,
            &mut ws,
        )?;
        let result = CoxDevianceResult {
            loglik_sat: out.loglik_sat,
            deviance: out.deviance,
            gradient: std::mem::take(&mut ws.grad),
            diag_hessian: std::mem::take(&mut ws.hdiag),
        };

        let mut slot = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some((fingerprint, result.clone()));
        Ok(result)
    }

    /// Build the Hessian-product operator for `(η, w)`.
    ///
    /// The handle borrows this context and owns the per-call intermediates;
    /// products are on the deviance scale, consistent with
    /// [`CoxDevianceResult::gradient`].
    pub fn information(
        &self,
        eta: &[f64],
        weight: Option<&[f64]>,
    ) -> Result<InformationOperator<'_>, CoxError> {
        self.check_eval_inputs(eta, weight)?;
        let n = self.tables.n;
        let ones;
        let weight = match weight {
            Some(w) => w,
            None => {
                ones = vec![1.0; n];
                ones.as_slice()
            }
        };
        let mut ws = EvalWorkspace::new(n);
        deviance_kernel(
            &self.tables,
            eta,
            weight,
            self.efron,
            self.have_start_times,
            &mut ws,
        )?;
        Ok(InformationOperator::from_kernel_state(
            &self.tables,
            self.efron,
            self.have_start_times,
            ws,
        ))
    }

    fn check_eval_inputs(&self, eta: &[f64], weight: Option<&[f64]>) -> Result<(), CoxError> {
        let n = self.tables.n;
        if eta.len() != n {
            return Err(CoxError::InputShape {
                field: "eta",
                reason: format!("has {} entries, expected {n}", eta.len()),
            });
        }
        if let Some(i) = eta.iter().position(|x| !x.is_finite()) {
            return Err(CoxError::InputShape {
                field: "eta",
                reason: format!("non-finite value at subject {i}"),
            });
        }
        if let Some(w) = weight {
            if w.len() != n {
                return Err(CoxError::InputShape {
                    field: "weight",
                    reason: format!("has {} entries, expected {n}", w.len()),
                });
            }
            if let Some(i) = w.iter().position(|x| !x.is_finite()) {
                return Err(CoxError::InputShape {
                    field: "weight",
                    reason: format!("non-finite value at subject {i}"),
                });
            }
            if let Some(i) = w.iter().position(|&x| x < 0.0) {
                return Err(CoxError::InputDomain {
                    field: "weight",
                    reason: format!("negative weight {} at subject {i}", w[i]),
                });
            }
        }
        Ok(())
    }
}
