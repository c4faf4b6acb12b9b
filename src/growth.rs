//! Growth model: von Bertalanffy length-at-age and allometric length-to-weight.

use anyhow::{Context, Result, bail};
use std::{fmt::Debug, ops::RangeBounds};

/// von Bertalanffy length at a given age.
///
/// `l_zero + (l_inf - l_zero) * (1 - e^(-k * age))`; tends to `l_inf` for large ages.
pub fn length_at_age(age: f64, l_inf: f64, l_zero: f64, k: f64) -> f64 {
    l_zero + (l_inf - l_zero) * (1.0 - (-k * age).exp())
}

/// Allometric length-to-weight conversion, in kilograms.
///
/// The alpha parameter follows the grams convention of the assessment
/// literature, hence the division by 1000.
pub fn length_to_weight(length: f64, alpha: f64, beta: f64) -> f64 {
    alpha / 1000.0 * length.powf(beta)
}

/// Immutable per-bin growth curve of a species.
///
/// Holds the length and weight of each bin, ordered from smallest to largest,
/// plus the growth parameters needed to place an age on the curve.
#[derive(Debug, Clone)]
pub struct GrowthCurve {
    l_inf: f64,
    l_zero: f64,
    k: f64,
    alpha: f64,
    beta: f64,
    lengths: Vec<f64>,
    weights: Vec<f64>,
}

impl GrowthCurve {
    /// Curve with bins equally spaced in length between `l_zero` and `l_inf`.
    pub fn equally_spaced(
        l_inf: f64,
        l_zero: f64,
        k: f64,
        alpha: f64,
        beta: f64,
        n_bins: usize,
    ) -> Result<Self> {
        check_growth_params(l_inf, l_zero, k, alpha, beta)?;
        check_num(n_bins, 2..100_000).context("invalid number of bins")?;

        let spacing = (l_inf - l_zero) / (n_bins - 1) as f64;
        let lengths: Vec<f64> = (0..n_bins).map(|bin| l_zero + bin as f64 * spacing).collect();
        Ok(Self::from_lengths(l_inf, l_zero, k, alpha, beta, lengths))
    }

    /// Curve with fixed-width bins; each bin length is the midpoint of its interval.
    pub fn fixed_width(
        l_inf: f64,
        l_zero: f64,
        k: f64,
        alpha: f64,
        beta: f64,
        n_bins: usize,
        bin_width_cm: f64,
    ) -> Result<Self> {
        check_growth_params(l_inf, l_zero, k, alpha, beta)?;
        check_num(n_bins, 1..100_000).context("invalid number of bins")?;
        check_num(bin_width_cm, 0.0..).context("invalid bin width")?;
        if bin_width_cm == 0.0 {
            bail!("bin width must be positive");
        }

        let lengths: Vec<f64> = (0..n_bins)
            .map(|bin| bin as f64 * bin_width_cm + bin_width_cm / 2.0)
            .collect();
        Ok(Self::from_lengths(l_inf, l_zero, k, alpha, beta, lengths))
    }

    fn from_lengths(
        l_inf: f64,
        l_zero: f64,
        k: f64,
        alpha: f64,
        beta: f64,
        lengths: Vec<f64>,
    ) -> Self {
        let weights = lengths
            .iter()
            .map(|&length| length_to_weight(length, alpha, beta))
            .collect();
        Self {
            l_inf,
            l_zero,
            k,
            alpha,
            beta,
            lengths,
            weights,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.lengths.len()
    }

    pub fn length(&self, bin: usize) -> f64 {
        self.lengths[bin]
    }

    pub fn weight(&self, bin: usize) -> f64 {
        self.weights[bin]
    }

    pub fn lengths(&self) -> &[f64] {
        &self.lengths
    }

    /// Length at (real-valued) age on this curve.
    pub fn length_at_age(&self, age: f64) -> f64 {
        length_at_age(age, self.l_inf, self.l_zero, self.k)
    }

    pub fn l_inf(&self) -> f64 {
        self.l_inf
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }
}

/// A species: a named growth curve replicated over one or more subdivisions
/// (typically sexes or stock components).
#[derive(Debug, Clone)]
pub struct Species {
    name: String,
    curve: GrowthCurve,
    n_subdivisions: usize,
}

impl Species {
    pub fn new(name: &str, curve: GrowthCurve, n_subdivisions: usize) -> Result<Self> {
        if name.is_empty() {
            bail!("species name must not be empty");
        }
        check_num(n_subdivisions, 1..100).context("invalid number of subdivisions")?;
        Ok(Self {
            name: name.to_string(),
            curve,
            n_subdivisions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn curve(&self) -> &GrowthCurve {
        &self.curve
    }

    pub fn n_subdivisions(&self) -> usize {
        self.n_subdivisions
    }

    pub fn n_bins(&self) -> usize {
        self.curve.n_bins()
    }

    /// Length of a bin; all subdivisions share the same curve.
    pub fn length(&self, _subdivision: usize, bin: usize) -> f64 {
        self.curve.length(bin)
    }

    pub fn weight(&self, _subdivision: usize, bin: usize) -> f64 {
        self.curve.weight(bin)
    }
}

fn check_growth_params(l_inf: f64, l_zero: f64, k: f64, alpha: f64, beta: f64) -> Result<()> {
    if !(l_inf > l_zero) {
        bail!("asymptotic length {l_inf} must exceed recruit length {l_zero}");
    }
    if l_zero < 0.0 {
        bail!("recruit length must be non-negative, but is {l_zero}");
    }
    check_num(k, 0.0..).context("invalid growth coefficient")?;
    if k == 0.0 {
        bail!("growth coefficient must be positive");
    }
    if alpha <= 0.0 || beta <= 0.0 {
        bail!("allometric parameters must be positive, but are {alpha} and {beta}");
    }
    Ok(())
}

pub(crate) fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
