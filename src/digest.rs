//! Content fingerprinting of evaluation inputs
//!
//! The memo slot must decide "same `(η, w)` as last time?" without retaining
//! the vectors themselves. We hash the **raw bit patterns** (so `-0.0` and
//! `0.0`, or two NaN payloads, are distinct, matching the bit-for-bit repeat
//! guarantee of the cache) with BLAKE3 under a fixed domain-separation
//! preamble, and absorb each vector as a labelled, length-delimited item so
//! no concatenation of differently-split inputs can collide.
//!
//! The full 256-bit digest is kept; at that width a collision fallback path
//! is not worth its code.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use blake3::Hasher;

/// 256-bit content fingerprint of one `(η, w)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest a linear predictor and weight vector, bitwise.
    pub fn of_eval_inputs(eta: &[f64], weight: &[f64]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(b"coxdev.eval.v1");
        absorb_f64_slice(&mut hasher, "eta", eta);
        absorb_f64_slice(&mut hasher, "weight", weight);
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Item preamble: stable tag + label + length + little-endian bit patterns.
fn absorb_f64_slice(hasher: &mut Hasher, label: &'static str, values: &[f64]) {
    hasher.update(b"item:");
    hasher.update(label.as_bytes());
    hasher.update(b":len:");
    hasher.update(&(values.len() as u64).to_be_bytes());
    hasher.update(b":data:");
    for v in values {
        hasher.update(&v.to_bits().to_le_bytes());
    }
}
