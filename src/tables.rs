//! Tie-group and left-truncation index tables
//!
//! One walk over the 2n sorted records produces, in **event order** (the
//! order in which stop records appear), every index table the cumulative-sum
//! kernels need:
//!
//! - `first[k]` / `last[k]`: the tie-group window of subject `k`. Failures
//!   sharing a stop time share a `first`; a censored stop always commits the
//!   open group and anchors only itself.
//! - `scaling[k] = (k − first[k]) / (last[k] + 1 − first[k])`: within-tie
//!   position in `[0, 1)`, identically 0 when no stop times tie.
//! - `event_map[k]`: how many start records precede stop record `k`.
//! - `start_map[k]`: the event-order position at which subject `k`'s start
//!   time enters the risk set.
//! - `first_start[k] = first[start_map[k]]`, checked against `start_map[k]`
//!   after the build; a mismatch aborts construction.
//!
//! ## Guarantees
//!
//! - `0 ≤ first[k] ≤ k ≤ last[k] < n` for every `k`.
//! - `first` is non-decreasing; subjects sharing a `first` share a stop time
//!   and have status 1.
//! - The tables are immutable after construction and carry no per-call state.
//!
//! When start times are absent the builder substitutes `-inf`, which sorts
//! every entry ahead of every stop record and reduces `start_map` and
//! `first_start` to all zeros. One code path serves both data modes.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use crate::order;
use crate::CoxError;

/// Immutable preprocessing output, everything in event order.
#[derive(Clone, Debug)]
pub(crate) struct RiskSetTables {
    pub n: usize,
    /// Native subject index of the k-th stop record.
    pub event_order: Vec<usize>,
    /// Native subject index of the k-th start record.
    pub start_order: Vec<usize>,
    /// Status gathered into event order, as 0.0 / 1.0 multipliers.
    pub status_event: Vec<f64>,
    pub first: Vec<usize>,
    pub last: Vec<usize>,
    pub scaling: Vec<f64>,
    pub event_map: Vec<usize>,
    pub start_map: Vec<usize>,
    pub first_start: Vec<usize>,
}

impl RiskSetTables {
    /// Walk the joint sort once and derive every table.
    ///
    /// Inputs must already be validated (`n > 0`, status in {0, 1}, finite
    /// times, start strictly before stop). The only failure left is the
    /// `first_start == start_map` self-check.
    pub(crate) fn build(
        event: &[f64],
        status: &[u8],
        start: Option<&[f64]>,
    ) -> Result<Self, CoxError> {
        let n = event.len();
        let fallback;
        let start_times = match start {
            Some(s) => s,
            None => {
                fallback = vec![f64::NEG_INFINITY; n];
                &fallback[..]
            }
        };
        let records = order::joint_sort(start_times, event, status);

        let mut event_order = Vec::with_capacity(n);
        let mut start_order = Vec::with_capacity(n);
        let mut first = Vec::with_capacity(n);
        let mut event_map = Vec::with_capacity(n);
        // Indexed by start-record position until reordered below.
        let mut start_map_by_entry = Vec::with_capacity(n);

        let mut event_count = 0usize;
        let mut start_count = 0usize;
        // Anchor of the currently open tie group, and how many successive
        // failures it has absorbed. A group commits when the stop time moves,
        // and unconditionally on a censored stop.
        let mut first_event: isize = -1;
        let mut open_run: isize = 1;
        let mut prev_time: Option<f64> = None;

        for rec in &records {
            if rec.is_start() {
                start_order.push(rec.subject);
                start_map_by_entry.push(event_count);
                start_count += 1;
            } else {
                if rec.is_failure() {
                    match prev_time {
                        Some(t) if t != rec.time => {
                            first_event += open_run;
                            open_run = 1;
                        }
                        _ => open_run += 1,
                    }
                } else {
                    first_event += open_run;
                    open_run = 1;
                }
                debug_assert!(first_event >= 0);
                first.push(first_event as usize);
                event_map.push(start_count);
                event_order.push(rec.subject);
                event_count += 1;
            }
            prev_time = Some(rec.time);
        }
        debug_assert_eq!(event_count, n);
        debug_assert_eq!(start_count, n);

        // start_map: entry order -> native order -> event order.
        let mut start_map_native = vec![0usize; n];
        for (pos, &subject) in start_order.iter().enumerate() {
            start_map_native[subject] = start_map_by_entry[pos];
        }
        let start_map: Vec<usize> = event_order.iter().map(|&s| start_map_native[s]).collect();

        let status_event: Vec<f64> = event_order.iter().map(|&s| f64::from(status[s])).collect();

        // last: right-to-left scan. A position whose `first` equals its own
        // index opens a block, so everything below it stops there.
        let mut last = vec![0usize; n];
        let mut last_event = n - 1;
        for k in (0..n).rev() {
            last[k] = last_event;
            if first[k] == k && k > 0 {
                last_event = k - 1;
            }
        }

        let scaling: Vec<f64> = (0..n)
            .map(|k| (k - first[k]) as f64 / (last[k] + 1 - first[k]) as f64)
            .collect();

        let first_start: Vec<usize> = start_map.iter().map(|&m| first[m]).collect();
        for k in 0..n {
            if first_start[k] != start_map[k] {
                return Err(CoxError::PreprocessInvariant {
                    subject: k,
                    first_start: first_start[k],
                    start_map: start_map[k],
                });
            }
        }

        Ok(Self {
            n,
            event_order,
            start_order,
            status_event,
            first,
            last,
            scaling,
            event_map,
            start_map,
            first_start,
        })
    }
}
