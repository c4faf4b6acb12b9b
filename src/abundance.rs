//! The structured-abundance container shared by all population processes.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Abundance structured by subdivision and length/age bin.
///
/// `counts[subdivision][bin]` holds non-negative real counts; bins are ordered
/// from smallest/youngest to largest/oldest. Views derived from sampled
/// catches may hold NaN where weight-at-bin is undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAbundance {
    counts: Vec<Vec<f64>>,
}

impl StructuredAbundance {
    pub fn zeros(n_subdivisions: usize, n_bins: usize) -> Self {
        Self {
            counts: vec![vec![0.0; n_bins]; n_subdivisions],
        }
    }

    /// Wrap an existing counts matrix; rows must be rectangular and non-empty.
    pub fn from_counts(counts: Vec<Vec<f64>>) -> Result<Self> {
        let Some(first) = counts.first() else {
            bail!("abundance must have at least one subdivision");
        };
        let n_bins = first.len();
        if n_bins == 0 {
            bail!("abundance must have at least one bin");
        }
        if counts.iter().any(|row| row.len() != n_bins) {
            bail!("all subdivisions must have {n_bins} bins");
        }
        if counts.iter().flatten().any(|&count| count < 0.0) {
            bail!("abundance counts must be non-negative");
        }
        Ok(Self { counts })
    }

    pub fn n_subdivisions(&self) -> usize {
        self.counts.len()
    }

    pub fn n_bins(&self) -> usize {
        self.counts[0].len()
    }

    pub fn get(&self, subdivision: usize, bin: usize) -> f64 {
        self.counts[subdivision][bin]
    }

    pub fn set(&mut self, subdivision: usize, bin: usize, count: f64) {
        self.counts[subdivision][bin] = count;
    }

    pub fn add(&mut self, subdivision: usize, bin: usize, count: f64) {
        self.counts[subdivision][bin] += count;
    }

    pub fn subdivision(&self, subdivision: usize) -> &[f64] {
        &self.counts[subdivision]
    }

    pub fn subdivision_mut(&mut self, subdivision: usize) -> &mut [f64] {
        &mut self.counts[subdivision]
    }

    /// Total count summed over every subdivision and bin.
    pub fn total(&self) -> f64 {
        self.counts.iter().flatten().sum()
    }

    /// Total count in one bin, summed over subdivisions.
    pub fn bin_total(&self, bin: usize) -> f64 {
        self.counts.iter().map(|row| row[bin]).sum()
    }

    /// Fail when the layout does not match the expected one.
    ///
    /// A dimension mismatch is a defect in the caller, never a steady-state
    /// condition, so it raises instead of yielding NaN.
    pub fn ensure_shape(&self, n_subdivisions: usize, n_bins: usize) -> Result<()> {
        if self.n_subdivisions() != n_subdivisions || self.n_bins() != n_bins {
            bail!(
                "abundance shape must be {n_subdivisions}x{n_bins}, but is {}x{}",
                self.n_subdivisions(),
                self.n_bins()
            );
        }
        Ok(())
    }
}
