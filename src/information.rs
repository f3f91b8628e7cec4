//! Hessian operator `v ↦ Hv` without materialising H
//!
//! The deviance Hessian factors as
//!
//! ```text
//! H = 2·( diag(e ∘ T₁) − E · M̃ᵀ · diag(status·w_avg / risk_sums²) · M̃ · E )
//! ```
//!
//! where `E = diag(e)` and `M̃` is the (tie-convention adjusted) risk-set
//! membership operator. Applying `M̃` to a vector is the same reverse-cumsum
//! read that produces risk sums, and applying `M̃ᵀ` is the same indexed
//! difference of forward cumulants that produces `T₁`; the product therefore
//! costs O(n) per apply and is **exactly symmetric** for both tie
//! conventions. Left- and right-multiplying by a design matrix X yields
//! `Xᵀ H X` one column at a time, with H never formed.
//!
//! The operator holds the per-call state of one `(η, w)` pair (weighted
//! exponentials, tie-averaged weights, risk sums, `T₁`) plus its own scratch,
//! so repeated `apply` calls allocate nothing but the output vector.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::kernel::{reversed_cumsum_into, EvalWorkspace};
use crate::tables::RiskSetTables;
use crate::CoxError;

/// Hessian-product handle for one `(η, w)` pair.
///
/// Created by [`crate::CoxDeviance::information`]; borrows the context's
/// index tables for its lifetime. Products are on the deviance scale, so
/// `vᵀ(Hv)` matches second differences of the deviance.
pub struct InformationOperator<'c> {
    tables: &'c RiskSetTables,
    efron: bool,
    have_start_times: bool,
    e_native: Vec<f64>,
    e_event: Vec<f64>,
    w_avg: Vec<f64>,
    risk_sums: Vec<f64>,
    t1: Vec<f64>,
    // Scratch reused across applies.
    u: Vec<f64>,
    u_event_cumsum: Vec<f64>,
    u_start_cumsum: Vec<f64>,
    cq10: Vec<f64>,
    cq11: Vec<f64>,
}

impl<'c> InformationOperator<'c> {
    /// Wrap the state a finished kernel run left in `ws`.
    pub(crate) fn from_kernel_state(
        tables: &'c RiskSetTables,
        efron: bool,
        have_start_times: bool,
        ws: EvalWorkspace,
    ) -> Self {
        let n = tables.n;
        Self {
            tables,
            efron,
            have_start_times,
            e_native: ws.exp_w,
            e_event: ws.e_event,
            w_avg: ws.w_avg,
            risk_sums: ws.risk_sums,
            t1: ws.t1,
            u: vec![0.0; n],
            u_event_cumsum: vec![0.0; n + 1],
            u_start_cumsum: vec![0.0; n + 1],
            cq10: vec![0.0; n + 1],
            cq11: vec![0.0; n + 1],
        }
    }

    /// Number of subjects the operator acts on.
    pub fn len(&self) -> usize {
        self.tables.n
    }

    /// Always false: contexts reject empty inputs.
    pub fn is_empty(&self) -> bool {
        self.tables.n == 0
    }

    /// Compute `Hv` in native order.
    pub fn apply(&mut self, v: &[f64]) -> Result<Vec<f64>, CoxError> {
        let t = self.tables;
        let n = t.n;
        if v.len() != n {
            return Err(CoxError::InputShape {
                field: "v",
                reason: format!("has {} entries, expected {n}", v.len()),
            });
        }
        if let Some(i) = v.iter().position(|x| !x.is_finite()) {
            return Err(CoxError::InputShape {
                field: "v",
                reason: format!("non-finite value at subject {i}"),
            });
        }

        for i in 0..n {
            self.u[i] = self.e_native[i] * v[i];
        }
        reversed_cumsum_into(&self.u, &t.event_order, &mut self.u_event_cumsum);
        if self.have_start_times {
            reversed_cumsum_into(&self.u, &t.start_order, &mut self.u_start_cumsum);
        }

        // Column weights d·S_v/R² of the quadratic part, cumulated forward.
        // S_v is the risk-sum analogue of u, including the within-tie
        // reduction, so rows and columns see the same membership operator.
        self.cq10[0] = 0.0;
        self.cq11[0] = 0.0;
        for k in 0..n {
            let d = t.status_event[k] * self.w_avg[k];
            let (mut a10, mut a11) = (0.0, 0.0);
            if d != 0.0 {
                let head = self.u_event_cumsum[t.first[k]];
                let mut sv = head;
                if self.have_start_times {
                    sv -= self.u_start_cumsum[t.event_map[k]];
                }
                if self.efron {
                    sv -= t.scaling[k] * (head - self.u_event_cumsum[t.last[k] + 1]);
                }
                let r = self.risk_sums[k];
                a10 = d * sv / (r * r);
                if self.efron {
                    a11 = a10 * t.scaling[k];
                }
            }
            self.cq10[k + 1] = self.cq10[k] + a10;
            self.cq11[k + 1] = self.cq11[k] + a11;
        }

        let mut out = vec![0.0; n];
        for k in 0..n {
            let l1 = t.last[k] + 1;
            let mut q = self.cq10[l1];
            if self.efron {
                q -= self.cq11[l1] - self.cq11[t.first[k]];
            }
            if self.have_start_times {
                q -= self.cq10[t.first_start[k]];
            }
            let s = t.event_order[k];
            let e = self.e_event[k];
            out[s] = 2.0 * (e * self.t1[k] * v[s] - e * q);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoxDeviance, TieBreaking};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!(
            (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0),
            "{a} vs {b}"
        );
    }

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    /// Tied stop times on a coarse grid, with left truncation.
    fn tied_start_stop_data(
        n: usize,
        rng: &mut StdRng,
    ) -> (Vec<f64>, Vec<u8>, Vec<f64>, Vec<f64>, Vec<f64>) {
        let event: Vec<f64> = (0..n).map(|_| f64::from(rng.gen_range(2..7u32))).collect();
        let status: Vec<u8> = (0..n).map(|_| u8::from(rng.gen_bool(0.75))).collect();
        let start: Vec<f64> = event
            .iter()
            .map(|&e| e - f64::from(rng.gen_range(1..3u32)))
            .collect();
        let eta: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let weight: Vec<f64> = (0..n).map(|_| rng.gen_range(0.2..2.0)).collect();
        (event, status, start, eta, weight)
    }

    #[test]
    fn operator_is_symmetric_with_ties_and_efron() {
        let mut rng = StdRng::seed_from_u64(11);
        for tie in [TieBreaking::Breslow, TieBreaking::Efron] {
            let (event, status, start, eta, weight) = tied_start_stop_data(30, &mut rng);
            let ctx = CoxDeviance::new(&event, &status, Some(&start), tie).unwrap();
            let mut op = ctx.information(&eta, Some(&weight)).unwrap();
            for _ in 0..5 {
                let v: Vec<f64> = (0..30).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let w: Vec<f64> = (0..30).map(|_| rng.gen_range(-1.0..1.0)).collect();
                let hv = op.apply(&v).unwrap();
                let hw = op.apply(&w).unwrap();
                assert_close(dot(&w, &hv), dot(&v, &hw), 1e-10);
            }
        }
    }

    #[test]
    fn operator_diagonal_matches_diag_hessian_under_breslow() {
        // With the Breslow convention both paths compute the exact second
        // derivative, so the operator diagonal and the evaluated diagonal
        // agree even on tied data.
        let mut rng = StdRng::seed_from_u64(3);
        let (event, status, start, eta, weight) = tied_start_stop_data(12, &mut rng);
        let ctx = CoxDeviance::new(&event, &status, Some(&start), TieBreaking::Breslow).unwrap();
        let result = ctx.evaluate(&eta, Some(&weight)).unwrap();
        let mut op = ctx.information(&eta, Some(&weight)).unwrap();
        for i in 0..12 {
            let mut unit = vec![0.0; 12];
            unit[i] = 1.0;
            let col = op.apply(&unit).unwrap();
            assert_close(col[i], result.diag_hessian[i], 1e-10);
        }
    }

    #[test]
    fn product_matches_directional_gradient_differences() {
        let mut rng = StdRng::seed_from_u64(29);
        let (event, status, start, eta, weight) = tied_start_stop_data(15, &mut rng);
        let ctx = CoxDeviance::new(&event, &status, Some(&start), TieBreaking::Breslow).unwrap();
        let mut op = ctx.information(&eta, Some(&weight)).unwrap();
        let v: Vec<f64> = (0..15).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let hv = op.apply(&v).unwrap();

        let eps = 1e-5;
        let plus: Vec<f64> = eta.iter().zip(&v).map(|(e, x)| e + eps * x).collect();
        let minus: Vec<f64> = eta.iter().zip(&v).map(|(e, x)| e - eps * x).collect();
        let g_plus = ctx.evaluate(&plus, Some(&weight)).unwrap().gradient;
        let g_minus = ctx.evaluate(&minus, Some(&weight)).unwrap().gradient;
        for i in 0..15 {
            let fd = (g_plus[i] - g_minus[i]) / (2.0 * eps);
            assert_close(hv[i], fd, 1e-5);
        }
    }

    #[test]
    fn quadratic_form_matches_second_differences() {
        // Continuous times, so no ties and both conventions coincide.
        let n = 20;
        let mut rng = StdRng::seed_from_u64(17);
        let event: Vec<f64> = (0..n).map(|_| rng.gen_range(1.0..50.0)).collect();
        let status: Vec<u8> = (0..n).map(|_| u8::from(rng.gen_bool(0.8))).collect();
        let eta: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let weight: Vec<f64> = (0..n).map(|_| rng.gen_range(0.2..2.0)).collect();
        let v: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let ctx = CoxDeviance::new(&event, &status, None, TieBreaking::Efron).unwrap();
        let mut op = ctx.information(&eta, Some(&weight)).unwrap();
        let vhv = dot(&v, &op.apply(&v).unwrap());

        let eps = 1e-4;
        let at = |shift: f64| -> f64 {
            let shifted: Vec<f64> = eta.iter().zip(&v).map(|(e, x)| e + shift * x).collect();
            ctx.evaluate(&shifted, Some(&weight)).unwrap().deviance
        };
        let fd = (at(eps) - 2.0 * at(0.0) + at(-eps)) / (eps * eps);
        assert_close(vhv, fd, 1e-5);
    }

    #[test]
    fn apply_rejects_mismatched_or_non_finite_vectors() {
        let ctx = CoxDeviance::new(&[1.0, 2.0], &[1, 1], None, TieBreaking::Breslow).unwrap();
        let mut op = ctx.information(&[0.0, 0.0], None).unwrap();
        assert!(matches!(
            op.apply(&[1.0]).unwrap_err(),
            CoxError::InputShape { field: "v", .. }
        ));
        assert!(matches!(
            op.apply(&[1.0, f64::NAN]).unwrap_err(),
            CoxError::InputShape { field: "v", .. }
        ));
    }
}
