//! Compensated summation: an incremental multi-partial accumulator that keeps
//! a running total exact up to the final rounding, no matter how many terms are
//! added or how far apart their magnitudes are.
//!
//! Partials are kept in increasing order of magnitude and never overlap, so the
//! full sum is represented losslessly until [`CompensatedSum::value`] collapses
//! it into one `f64`.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompensatedSum {
    partials: Vec<f64>,
}

impl CompensatedSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `x` into the partials, keeping every non-zero low-order residue.
    pub fn add(&mut self, x: f64) {
        debug_assert!(x.is_finite(), "compensated sum only accepts finite terms");

        let mut x = x;
        let mut i = 0;
        for j in 0..self.partials.len() {
            let mut y = self.partials[j];
            if x.abs() < y.abs() {
                std::mem::swap(&mut x, &mut y);
            }
            let hi = x + y;
            let lo = y - (hi - x);
            if lo != 0.0 {
                self.partials[i] = lo;
                i += 1;
            }
            x = hi;
        }
        self.partials.truncate(i);
        self.partials.push(x);
    }

    /// Correctly rounded value of the accumulated sum.
    pub fn value(&self) -> f64 {
        let p = &self.partials;
        let mut n = p.len();
        if n == 0 {
            return 0.0;
        }

        n -= 1;
        let mut hi = p[n];
        let mut lo = 0.0;
        while n > 0 {
            let x = hi;
            n -= 1;
            let y = p[n];
            hi = x + y;
            let yr = hi - x;
            lo = y - yr;
            if lo != 0.0 {
                break;
            }
        }

        // Round-half-even fix-up when the residue sits exactly between two floats.
        if n > 0 && ((lo < 0.0 && p[n - 1] < 0.0) || (lo > 0.0 && p[n - 1] > 0.0)) {
            let y = lo * 2.0;
            let x = hi + y;
            let yr = x - hi;
            if y == yr {
                hi = x;
            }
        }
        hi
    }

    /// Fold every partial of `other` into `self`.
    pub fn merge_from(&mut self, other: &CompensatedSum) {
        for &p in &other.partials {
            self.add(p);
        }
    }

    /// Combine two accumulators into one holding the sum of both input streams.
    pub fn merge(&self, other: &CompensatedSum) -> CompensatedSum {
        let mut result = self.clone();
        result.merge_from(other);
        result
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }
}

impl AddAssign<f64> for CompensatedSum {
    fn add_assign(&mut self, x: f64) {
        self.add(x);
    }
}

impl From<f64> for CompensatedSum {
    fn from(x: f64) -> Self {
        let mut sum = Self::new();
        sum.add(x);
        sum
    }
}

impl FromIterator<f64> for CompensatedSum {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut sum = Self::new();
        for x in iter {
            sum.add(x);
        }
        sum
    }
}
