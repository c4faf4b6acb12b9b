//! Boxcar aging: moving abundance from bin to bin as fish grow.

use crate::abundance::StructuredAbundance;
use crate::growth::GrowthCurve;
use crate::transition::TransitionMatrix;
use anyhow::{Result, bail};

/// Fixed-proportion boxcar graduation.
///
/// Each step, a fixed proportion of every bin graduates to the next one;
/// the proportion comes from the deterministic von Bertalanffy increment
/// divided by the width of the gap to the next bin. The last bin is
/// terminal: it receives inflow and has no outflow.
#[derive(Debug, Clone)]
pub struct FixedProportionAging {
    proportion_graduating: Vec<f64>,
}

impl FixedProportionAging {
    pub fn new(curve: &GrowthCurve, days_per_step: f64) -> Result<Self> {
        if days_per_step <= 0.0 {
            bail!("days per step must be positive, but is {days_per_step}");
        }

        let lengths = curve.lengths();
        let mut proportion_graduating = Vec::with_capacity(lengths.len() - 1);
        for bin in 0..lengths.len() - 1 {
            let growth_per_step =
                curve.k() * (curve.l_inf() - lengths[bin]) * (days_per_step / 365.0);
            let gap = lengths[bin + 1] - lengths[bin];
            if gap <= 0.0 {
                bail!("bin lengths must be strictly increasing at bin {bin}");
            }
            // Floored at zero only on the lower side; a proportion above 1
            // is a known approximation of this scheme and stays untouched.
            proportion_graduating.push((growth_per_step / gap).max(0.0));
        }

        Ok(Self {
            proportion_graduating,
        })
    }

    pub fn proportion_graduating(&self, bin: usize) -> f64 {
        self.proportion_graduating[bin]
    }

    /// Advance the abundance by one step, in place.
    ///
    /// Bins are processed from the last downward so that a step's outflow is
    /// never re-moved as that same step's inflow.
    pub fn age_locally(&self, abundance: &mut StructuredAbundance) -> Result<()> {
        abundance.ensure_shape(abundance.n_subdivisions(), self.proportion_graduating.len() + 1)?;

        for subdivision in 0..abundance.n_subdivisions() {
            let counts = abundance.subdivision_mut(subdivision);
            for bin in (0..counts.len() - 1).rev() {
                let graduating = self.proportion_graduating[bin] * counts[bin];
                counts[bin] -= graduating;
                counts[bin + 1] += graduating;
            }
        }
        Ok(())
    }
}

/// Aging through a full bin-to-bin transition matrix (gamma variant).
#[derive(Debug, Clone)]
pub struct TransitionAging {
    matrix: TransitionMatrix,
}

impl TransitionAging {
    pub fn new(matrix: TransitionMatrix) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &TransitionMatrix {
        &self.matrix
    }

    /// Redistribute every subdivision through the transition matrix.
    pub fn age_locally(&self, abundance: &mut StructuredAbundance) -> Result<()> {
        let n_bins = self.matrix.n_bins();
        abundance.ensure_shape(abundance.n_subdivisions(), n_bins)?;

        for subdivision in 0..abundance.n_subdivisions() {
            let counts = abundance.subdivision_mut(subdivision);
            let mut arrived = vec![0.0; n_bins];
            for depart in 0..n_bins {
                for arrive in depart..n_bins {
                    arrived[arrive] += counts[depart] * self.matrix.probability(depart, arrive);
                }
            }
            counts.copy_from_slice(&arrived);
        }
        Ok(())
    }
}
