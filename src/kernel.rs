//! Cumulative-sum kernels for the deviance, gradient and curvature
//!
//! Everything here is a fixed sequence of O(n) passes over the event-ordered
//! subject stream:
//!
//! 1. centre η and form the weighted exponentials `e = exp(η − η̄)·w`;
//! 2. reverse-cumsum `e` through the stop order (and, with start times, the
//!    start order), each with a trailing zero;
//! 3. read risk sums off the cumsums at `first` / `event_map`, reduce them
//!    within tie groups when the Efron correction is active;
//! 4. accumulate the log-likelihood and the forward cumulants `C_10, C_20`
//!    (plus the Efron family `C_11, C_21, C_22`), each with a leading zero;
//! 5. assemble the per-subject sums `T₁, T₂` by indexed differences of the
//!    cumulants and scatter gradient and diagonal curvature back to native
//!    order on the deviance scale.
//!
//! ## Guarantees & bounds
//!
//! - **No allocation in the passes.** [`EvalWorkspace::new`] sizes every
//!   buffer (lengths n and n + 1) once; the kernel only writes into them.
//! - **Degeneracy surfaces early.** A non-positive risk sum under an observed
//!   failure of positive averaged weight aborts before any `ln` is taken.
//! - **Censored subjects never divide.** Cumulant terms carry the factor
//!   `status·w_avg` and are forced to zero without touching `1/risk_sums`,
//!   so a harmless zero risk sum past the last failure cannot poison the
//!   stream with NaNs.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::tables::RiskSetTables;
use crate::CoxError;

/// Per-call scratch, sized once per evaluation.
///
/// Buffers of length n + 1 are the zero-padded cumulative sums; the rest are
/// length n. `grad` and `hdiag` end the kernel in native order.
pub(crate) struct EvalWorkspace {
    pub exp_w: Vec<f64>,
    pub eta_event: Vec<f64>,
    pub w_event: Vec<f64>,
    pub e_event: Vec<f64>,
    pub event_cumsum: Vec<f64>,
    pub start_cumsum: Vec<f64>,
    pub risk_sums: Vec<f64>,
    pub w_cumsum: Vec<f64>,
    pub w_avg: Vec<f64>,
    pub c10: Vec<f64>,
    pub c20: Vec<f64>,
    pub c11: Vec<f64>,
    pub c21: Vec<f64>,
    pub c22: Vec<f64>,
    pub t1: Vec<f64>,
    pub t2: Vec<f64>,
    pub grad: Vec<f64>,
    pub hdiag: Vec<f64>,
}

impl EvalWorkspace {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            exp_w: vec![0.0; n],
            eta_event: vec![0.0; n],
            w_event: vec![0.0; n],
            e_event: vec![0.0; n],
            event_cumsum: vec![0.0; n + 1],
            start_cumsum: vec![0.0; n + 1],
            risk_sums: vec![0.0; n],
            w_cumsum: vec![0.0; n + 1],
            w_avg: vec![0.0; n],
            c10: vec![0.0; n + 1],
            c20: vec![0.0; n + 1],
            c11: vec![0.0; n + 1],
            c21: vec![0.0; n + 1],
            c22: vec![0.0; n + 1],
            t1: vec![0.0; n],
            t2: vec![0.0; n],
            grad: vec![0.0; n],
            hdiag: vec![0.0; n],
        }
    }
}

/// Scalar outputs of one kernel run; vectors stay in the workspace.
#[derive(Debug)]
pub(crate) struct KernelOutput {
    pub loglik_sat: f64,
    pub deviance: f64,
}

/// Reverse cumulative sum of `seq` gathered through `order`, with a trailing
/// zero so that `out[k] = Σ_{j ≥ k} seq[order[j]]` and `out[n] = 0`.
#[inline]
pub(crate) fn reversed_cumsum_into(seq: &[f64], order: &[usize], out: &mut [f64]) {
    let n = order.len();
    debug_assert_eq!(out.len(), n + 1);
    out[n] = 0.0;
    for k in (0..n).rev() {
        out[k] = out[k + 1] + seq[order[k]];
    }
}

/// Saturated log-likelihood for one weight vector: each tie group with
/// weighted failure mass `s > 0` contributes `−s·ln s` once (so `0·ln 0 = 0`
/// by construction).
pub(crate) fn saturated_loglik(
    tables: &RiskSetTables,
    w_event: &[f64],
    w_cumsum: &mut [f64],
) -> f64 {
    let n = tables.n;
    w_cumsum[0] = 0.0;
    for k in 0..n {
        w_cumsum[k + 1] = w_cumsum[k] + w_event[k] * tables.status_event[k];
    }
    let mut loglik_sat = 0.0;
    let mut prev_first = None;
    for k in 0..n {
        let f = tables.first[k];
        let s = w_cumsum[tables.last[k] + 1] - w_cumsum[f];
        if s > 0.0 && prev_first != Some(f) {
            loglik_sat -= s * s.ln();
        }
        prev_first = Some(f);
    }
    loglik_sat
}

/// One full evaluation: saturated log-likelihood, deviance, and (left in the
/// workspace, native order) the deviance gradient and diagonal curvature.
pub(crate) fn deviance_kernel(
    tables: &RiskSetTables,
    eta: &[f64],
    weight: &[f64],
    efron: bool,
    have_start_times: bool,
    ws: &mut EvalWorkspace,
) -> Result<KernelOutput, CoxError> {
    let n = tables.n;
    debug_assert_eq!(eta.len(), n);
    debug_assert_eq!(weight.len(), n);

    // Centring improves conditioning and leaves the deviance unchanged.
    let eta_mean = eta.iter().sum::<f64>() / n as f64;
    for i in 0..n {
        ws.exp_w[i] = (eta[i] - eta_mean).exp() * weight[i];
    }
    for k in 0..n {
        let s = tables.event_order[k];
        ws.eta_event[k] = eta[s] - eta_mean;
        ws.w_event[k] = weight[s];
        ws.e_event[k] = ws.exp_w[s];
    }

    let loglik_sat = saturated_loglik(tables, &ws.w_event, &mut ws.w_cumsum);

    reversed_cumsum_into(&ws.exp_w, &tables.event_order, &mut ws.event_cumsum);
    if have_start_times {
        reversed_cumsum_into(&ws.exp_w, &tables.start_order, &mut ws.start_cumsum);
    }

    for k in 0..n {
        let head = ws.event_cumsum[tables.first[k]];
        let mut r = head;
        if have_start_times {
            r -= ws.start_cumsum[tables.event_map[k]];
        }
        if efron {
            // Within a tie group, later positions see a scaled-down tail.
            r -= tables.scaling[k] * (head - ws.event_cumsum[tables.last[k] + 1]);
        }
        ws.risk_sums[k] = r;
    }

    // Tie-averaged weights.
    ws.w_cumsum[0] = 0.0;
    for k in 0..n {
        ws.w_cumsum[k + 1] = ws.w_cumsum[k] + ws.w_event[k];
    }
    for k in 0..n {
        let (f, l) = (tables.first[k], tables.last[k]);
        ws.w_avg[k] = (ws.w_cumsum[l + 1] - ws.w_cumsum[f]) / (l + 1 - f) as f64;
    }

    let mut loglik = 0.0;
    for k in 0..n {
        let d = tables.status_event[k] * ws.w_avg[k];
        if d == 0.0 {
            continue;
        }
        let r = ws.risk_sums[k];
        if r <= 0.0 {
            return Err(CoxError::NumericalDegeneracy {
                subject: tables.event_order[k],
                risk_sum: r,
            });
        }
        loglik += d * (ws.eta_event[k] - r.ln());
    }

    // Forward cumulants, length n + 1 with a leading zero.
    ws.c10[0] = 0.0;
    ws.c20[0] = 0.0;
    for k in 0..n {
        let d = tables.status_event[k] * ws.w_avg[k];
        let (a10, a20) = if d != 0.0 {
            let r = ws.risk_sums[k];
            (d / r, d / (r * r))
        } else {
            (0.0, 0.0)
        };
        ws.c10[k + 1] = ws.c10[k] + a10;
        ws.c20[k + 1] = ws.c20[k] + a20;
    }
    if efron {
        // A_11, A_21 and A_22 share one definition; only indexed differences
        // of their cumulants are consumed below, under the same names.
        ws.c11[0] = 0.0;
        ws.c21[0] = 0.0;
        ws.c22[0] = 0.0;
        for k in 0..n {
            let d = tables.status_event[k] * ws.w_avg[k];
            let a = if d != 0.0 {
                d * tables.scaling[k] / ws.risk_sums[k]
            } else {
                0.0
            };
            ws.c11[k + 1] = ws.c11[k] + a;
            ws.c21[k + 1] = ws.c21[k] + a;
            ws.c22[k + 1] = ws.c22[k] + a;
        }
    }

    for k in 0..n {
        let l1 = tables.last[k] + 1;
        if efron {
            let f = tables.first[k];
            let mut t1 = ws.c10[l1] - (ws.c11[l1] - ws.c11[f]);
            let mut t2 =
                (ws.c22[l1] - ws.c22[f]) - 2.0 * (ws.c21[l1] - ws.c21[f]) + ws.c20[l1];
            if have_start_times {
                t1 -= ws.c10[tables.first_start[k]];
                t2 -= ws.c20[f];
            }
            ws.t1[k] = t1;
            ws.t2[k] = t2;
        } else {
            let mut t1 = ws.c10[l1];
            let mut t2 = ws.c20[l1];
            if have_start_times {
                let fs = tables.first_start[k];
                t1 -= ws.c10[fs];
                t2 -= ws.c20[fs];
            }
            ws.t1[k] = t1;
            ws.t2[k] = t2;
        }
    }

    // Assemble in event order, scatter to native order, flip to the
    // deviance scale.
    for k in 0..n {
        let d = tables.status_event[k] * ws.w_avg[k];
        let e = ws.e_event[k];
        let g = d - e * ws.t1[k];
        let h = e * e * ws.t2[k] - e * ws.t1[k];
        let s = tables.event_order[k];
        ws.grad[s] = -2.0 * g;
        ws.hdiag[s] = -2.0 * h;
    }

    Ok(KernelOutput {
        loglik_sat,
        deviance: 2.0 * (loglik_sat - loglik),
    })
}
