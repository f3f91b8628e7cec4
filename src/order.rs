//! Joint ordering of start and stop records
//!
//! Risk-set traversal needs one canonical order over **2n records**: every
//! subject contributes a start record (entry into the risk set) and a stop
//! record (failure or censoring). Records sort by the key
//!
//! ```text
//! (time ascending, failures before censorings, stops before starts)
//! ```
//!
//! so that, at equal times, an observed failure is processed before any
//! censoring, and every stop record is processed before any start record.
//! The second rule is load-bearing: a subject entering at time `t` must not
//! appear in the risk set of a failure at time `t`.
//!
//! The sort is **stable**, and records are laid out as the block of stop
//! records followed by the block of start records, so ties on the full key
//! preserve subject order within each kind. Start and stop records can never
//! tie on the full key because the start/stop rank always differs.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::cmp::Ordering;

/// One of the 2n records of the joint traversal.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TimeRecord {
    /// Start time for start records, stop time for stop records.
    pub time: f64,
    /// 0 for an observed failure, 1 for everything else; failures sort first
    /// at equal times.
    pub censor_rank: u8,
    /// 0 for stop records, 1 for start records; stops sort first at equal
    /// times.
    pub start_rank: u8,
    /// Native-order subject index.
    pub subject: usize,
}

impl TimeRecord {
    #[inline]
    pub fn is_start(&self) -> bool {
        self.start_rank == 1
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        self.start_rank == 0 && self.censor_rank == 0
    }

    /// Canonical lexicographic key. `total_cmp` keeps `-inf` start times
    /// (the "no start times" substitute) ahead of every finite time.
    #[inline]
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.censor_rank.cmp(&other.censor_rank))
            .then(self.start_rank.cmp(&other.start_rank))
    }
}

/// Form the 2n records and sort them into canonical order.
///
/// `status` must already be validated to {0, 1}.
pub(crate) fn joint_sort(start: &[f64], event: &[f64], status: &[u8]) -> Vec<TimeRecord> {
    let n = event.len();
    debug_assert_eq!(start.len(), n);
    debug_assert_eq!(status.len(), n);
    debug_assert!(status.iter().all(|&s| s <= 1));

    let mut records = Vec::with_capacity(2 * n);
    for (i, (&stop, &st)) in event.iter().zip(status).enumerate() {
        records.push(TimeRecord {
            time: stop,
            censor_rank: 1 - st,
            start_rank: 0,
            subject: i,
        });
    }
    for (i, &entry) in start.iter().enumerate() {
        records.push(TimeRecord {
            time: entry,
            censor_rank: 1,
            start_rank: 1,
            subject: i,
        });
    }
    records.sort_by(|a, b| a.key_cmp(b));
    records
}
