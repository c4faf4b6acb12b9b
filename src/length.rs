//! Re-binning a structured abundance into fixed-width length classes.

use crate::abundance::StructuredAbundance;
use anyhow::{Result, bail};

/// Catch counts accumulated into fixed-width length classes.
#[derive(Debug, Clone)]
pub struct CatchAtLength {
    counts: Vec<f64>,
    bin_width_cm: f64,
    total: f64,
}

impl CatchAtLength {
    /// Bin every finite, positive cell of the abundance by its length.
    ///
    /// Fish longer than the last class accumulate in the terminal class
    /// instead of being dropped.
    pub fn build<F>(
        abundance: &StructuredAbundance,
        length_at_bin: F,
        bin_width_cm: f64,
        n_classes: usize,
    ) -> Result<Self>
    where
        F: Fn(usize, usize) -> f64,
    {
        if bin_width_cm <= 0.0 {
            bail!("length class width must be positive, but is {bin_width_cm}");
        }
        if n_classes == 0 {
            bail!("number of length classes must be positive");
        }

        let mut counts = vec![0.0; n_classes];
        let mut total = 0.0;
        for subdivision in 0..abundance.n_subdivisions() {
            for bin in 0..abundance.n_bins() {
                let count = abundance.get(subdivision, bin);
                if !count.is_finite() || count <= 0.0 {
                    continue;
                }
                let length = length_at_bin(subdivision, bin);
                let class = ((length / bin_width_cm).floor() as usize).min(n_classes - 1);
                counts[class] += count;
                total += count;
            }
        }

        Ok(Self {
            counts,
            bin_width_cm,
            total,
        })
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn n_classes(&self) -> usize {
        self.counts.len()
    }

    /// Midpoint length of a class.
    pub fn class_mid(&self, class: usize) -> f64 {
        class as f64 * self.bin_width_cm + self.bin_width_cm / 2.0
    }

    pub fn class_mids(&self) -> Vec<f64> {
        (0..self.counts.len()).map(|class| self.class_mid(class)).collect()
    }

    /// Total number of observations accumulated.
    pub fn total(&self) -> f64 {
        self.total
    }
}
