//! Gamma-distributed von Bertalanffy growth transition matrix (Sullivan).

use anyhow::{Context, Result, bail};
use statrs::distribution::{ContinuousCDF, Gamma};

/// Fish cannot grow past this multiple of the asymptotic length.
const L_MAX_TO_L_INF: f64 = 1.2;

/// Square bin-to-bin transition matrix: `probability[depart][arrive]` is the
/// probability mass moving between the two bins in a single step.
///
/// Each row sums to 1; entries below the diagonal are 0 (fish cannot shrink).
#[derive(Debug, Clone)]
pub struct TransitionMatrix {
    probabilities: Vec<Vec<f64>>,
}

impl TransitionMatrix {
    pub fn n_bins(&self) -> usize {
        self.probabilities.len()
    }

    pub fn probability(&self, depart: usize, arrive: usize) -> f64 {
        self.probabilities[depart][arrive]
    }

    pub fn row(&self, depart: usize) -> &[f64] {
        &self.probabilities[depart]
    }
}

/// Builds the Sullivan transition matrix: the growth increment from each bin
/// is gamma-distributed around the deterministic von Bertalanffy increment.
#[derive(Debug, Clone)]
pub struct SullivanTransitionProbability {
    gamma_scale: f64,
    l_inf: f64,
    k: f64,
    scaling: f64,
}

impl SullivanTransitionProbability {
    /// `scaling` rescales the increment; a daily transition uses `1/365`.
    pub fn new(gamma_scale: f64, l_inf: f64, k: f64, scaling: f64) -> Result<Self> {
        if gamma_scale <= 0.0 {
            bail!("gamma scale parameter must be positive, but is {gamma_scale}");
        }
        if l_inf <= 0.0 || k <= 0.0 {
            bail!("growth parameters must be positive, but are {l_inf} and {k}");
        }
        if scaling <= 0.0 {
            bail!("scaling must be positive, but is {scaling}");
        }
        Ok(Self {
            gamma_scale,
            l_inf,
            k,
            scaling,
        })
    }

    /// Matrix over `n_bins` fixed-width bins.
    pub fn matrix(&self, n_bins: usize, bin_width_cm: f64) -> Result<TransitionMatrix> {
        if n_bins == 0 {
            bail!("number of bins must be positive");
        }
        if bin_width_cm <= 0.0 {
            bail!("bin width must be positive, but is {bin_width_cm}");
        }
        let mid_lengths: Vec<f64> = (0..n_bins)
            .map(|bin| bin as f64 * bin_width_cm + bin_width_cm / 2.0)
            .collect();
        self.matrix_from_mid_lengths(&mid_lengths)
    }

    /// Matrix over arbitrary bin midpoints; bin boundaries are taken halfway
    /// between neighboring midpoints.
    pub fn matrix_from_mid_lengths(&self, mid_lengths: &[f64]) -> Result<TransitionMatrix> {
        let n_bins = mid_lengths.len();
        let mut lower_lengths = vec![0.0; n_bins];
        let mut upper_lengths = vec![0.0; n_bins];
        let mut gamma_shapes = vec![0.0; n_bins];

        for bin in 0..n_bins {
            lower_lengths[bin] = if bin == 0 {
                0.0
            } else {
                (mid_lengths[bin - 1] + mid_lengths[bin]) / 2.0
            };
            upper_lengths[bin] = if bin == n_bins - 1 {
                mid_lengths[bin]
            } else {
                (mid_lengths[bin + 1] + mid_lengths[bin]) / 2.0
            };

            let delta = (self.l_inf - mid_lengths[bin]) * (1.0 - (-self.k).exp()) * self.scaling;
            gamma_shapes[bin] = (mid_lengths[bin] + delta) / self.gamma_scale;
        }

        let mut probabilities = vec![vec![0.0; n_bins]; n_bins];
        for depart in 0..n_bins {
            // statrs parameterizes the gamma by rate, the inverse of the scale.
            let from_bin = Gamma::new(gamma_shapes[depart], 1.0 / self.gamma_scale)
                .with_context(|| format!("invalid gamma shape for departure bin {depart}"))?;

            for arrive in 0..n_bins {
                let probability = if depart > arrive {
                    // can't grow down
                    0.0
                } else if depart == arrive {
                    if arrive == n_bins - 1 {
                        1.0
                    } else {
                        from_bin.cdf(upper_lengths[arrive])
                    }
                } else if upper_lengths[arrive] >= L_MAX_TO_L_INF * self.l_inf {
                    0.0
                } else if arrive == n_bins - 1 {
                    1.0 - from_bin.cdf(lower_lengths[arrive])
                } else {
                    from_bin.cdf(upper_lengths[arrive]) - from_bin.cdf(lower_lengths[arrive])
                };

                // probabilities below 0.00001 are not worth carrying
                let probability = round5(probability);
                if probability < 0.0 {
                    bail!(
                        "negative transition probability {probability} from bin {depart} to bin {arrive}"
                    );
                }
                probabilities[depart][arrive] = probability;
            }

            // small discrepancies still account for a lot so normalize forcefully
            normalize_to_one(&mut probabilities[depart]);
        }

        Ok(TransitionMatrix { probabilities })
    }
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

fn normalize_to_one(row: &mut [f64]) {
    let sum: f64 = row.iter().sum();
    for probability in row.iter_mut() {
        *probability /= sum;
    }
}
