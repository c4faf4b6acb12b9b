//! Length-Based Spawning-Potential-Ratio estimation.
//!
//! Fits selectivity and fishing-mortality parameters to an observed
//! catch-at-length distribution by maximizing a log-likelihood built from an
//! age-to-length probability key, then derives SPR from the fitted curve
//! (the Hordyk LBSPR method).

use anyhow::{Context, Result, bail};
use argmin::core::{CostFunction, Error, Executor, State};
use argmin::solver::neldermead::NelderMead;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Beta, Continuous, Normal};

/// Ages simulated when building the key and the survivorship curves.
pub const MAX_SIMULATED_AGE: usize = 100;

/// Plateau of the survivorship curve: relative length asymptotes at
/// `1 - 0.01^(x/mk)`.
const SURVIVAL_FLOOR: f64 = 0.01;

/// Objective evaluations allowed before the fit stops.
const EVALUATION_BUDGET: u64 = 500;

/// Simplex spread below which the fit is considered converged.
const CONVERGENCE_TOLERANCE: f64 = 1e-8;

/// Probability that an individual of a given age falls into a given length
/// bin, together with the relative (0-1) length-at-age curve.
#[derive(Debug, Clone)]
pub struct AgeToLengthKey {
    key: Vec<Vec<f64>>,
    relative_length_at_age: Vec<f64>,
}

impl AgeToLengthKey {
    pub fn probability(&self, age: usize, length_bin: usize) -> f64 {
        self.key[age][length_bin]
    }

    pub fn row(&self, age: usize) -> &[f64] {
        &self.key[age]
    }

    pub fn relative_length_at_age(&self) -> &[f64] {
        &self.relative_length_at_age
    }
}

/// Build the age-to-length key from a normal distribution around the mean
/// length-at-age with constant coefficient of variation.
///
/// Each row is normalized to sum to 1; densities below the density at
/// mean + 2.5 standard deviations are truncated to zero first. Rows with a
/// non-positive standard deviation are all zero.
pub fn build_age_to_length_key(
    bin_mids: &[f64],
    mk_ratio: f64,
    l_inf: f64,
    cv_l_inf: f64,
    max_age: usize,
) -> Result<AgeToLengthKey> {
    if bin_mids.is_empty() {
        bail!("bin midpoints must not be empty");
    }
    if mk_ratio <= 0.0 || l_inf <= 0.0 || cv_l_inf <= 0.0 {
        bail!("mk ratio, asymptotic length and its cv must all be positive");
    }

    let mut key = vec![vec![0.0; bin_mids.len()]; max_age + 1];
    let mut relative_length_at_age = vec![0.0; max_age + 1];

    for age in 0..=max_age {
        let xs = age as f64 / max_age as f64;
        relative_length_at_age[age] = 1.0 - SURVIVAL_FLOOR.powf(xs / mk_ratio);
        let mean = relative_length_at_age[age] * l_inf;
        let sd = mean * cv_l_inf;

        if sd > 0.0 {
            let density = Normal::new(mean, sd).context("failed to build length density")?;
            let limit = density.pdf(mean + sd * 2.5);
            let mut sum = 0.0;
            for (length_bin, &mid) in bin_mids.iter().enumerate() {
                let density_here = density.pdf(mid);
                key[age][length_bin] = if density_here < limit { 0.0 } else { density_here };
                sum += key[age][length_bin];
            }
            if sum > 0.0 {
                for probability in &mut key[age] {
                    *probability /= sum;
                }
            }
        }
    }

    Ok(AgeToLengthKey {
        key,
        relative_length_at_age,
    })
}

/// SPR and the theoretical catch-at-length distribution implied by one
/// candidate parameter set.
#[derive(Debug, Clone)]
pub struct TheoreticalSpr {
    pub spr: f64,
    pub catch_at_length: Vec<f64>,
}

/// The LBSPR population model: survivorship under fishing and unfished,
/// aggregated through the key into a normalized catch-at-length curve and
/// the fished-to-unfished egg-production ratio.
pub fn spr_formula(
    selectivity_cm_at_50_percent: f64,
    selectivity_cm_at_95_percent: f64,
    fishing_to_natural_mortality: f64,
    bin_mids: &[f64],
    mk_ratio: f64,
    maturity_per_bin: &[f64],
    weight_exponent: f64,
    age_to_length: &AgeToLengthKey,
) -> TheoreticalSpr {
    let n_ages = age_to_length.relative_length_at_age.len();
    let n_bins = bin_mids.len();

    // logistic selectivity at length
    let ln19 = 19.0_f64.ln();
    let selectivity_at_length: Vec<f64> = bin_mids
        .iter()
        .map(|&mid| {
            1.0 / (1.0
                + (-ln19 * (mid - selectivity_cm_at_50_percent)
                    / (selectivity_cm_at_95_percent - selectivity_cm_at_50_percent))
                    .exp())
        })
        .collect();

    let mut catches_matrix = vec![vec![0.0; n_bins]; n_ages];
    let mut survivors_at_age = vec![0.0; n_ages]; // Ns
    let mut unfished_at_age = vec![0.0; n_ages]; // N0
    let mut maturity_at_age = vec![0.0; n_ages]; // Ma

    let mut cumulative_selectivity = 0.0;
    for age in 0..n_ages {
        for length_bin in 0..n_bins {
            let probability = age_to_length.key[age][length_bin];
            cumulative_selectivity += selectivity_at_length[length_bin] * probability;
            catches_matrix[age][length_bin] = probability * selectivity_at_length[length_bin];
            maturity_at_age[age] += probability * maturity_per_bin[length_bin];
        }

        // mean selectivity experienced up to this age
        let mean_selectivity = cumulative_selectivity / (age + 1) as f64;
        let relative_length = age_to_length.relative_length_at_age[age];
        survivors_at_age[age] = (1.0 - relative_length)
            .powf(mk_ratio + mk_ratio * fishing_to_natural_mortality * mean_selectivity);
        unfished_at_age[age] = (1.0 - relative_length).powf(mk_ratio);
        debug_assert!(unfished_at_age[age] >= survivors_at_age[age]);
    }

    // aggregate survivors through the key and normalize
    let mut catch_at_length = vec![0.0; n_bins];
    let mut sum = 0.0;
    for length_bin in 0..n_bins {
        for age in 0..n_ages {
            catch_at_length[length_bin] += survivors_at_age[age] * catches_matrix[age][length_bin];
        }
        sum += catch_at_length[length_bin];
    }
    for catches in &mut catch_at_length {
        *catches /= sum;
    }

    let mut fished_eggs = 0.0;
    let mut unfished_eggs = 0.0;
    for age in 0..n_ages {
        let fecundity = age_to_length.relative_length_at_age[age].powf(weight_exponent);
        fished_eggs += maturity_at_age[age] * survivors_at_age[age] * fecundity;
        unfished_eggs += maturity_at_age[age] * unfished_at_age[age] * fecundity;
    }
    debug_assert!(fished_eggs <= unfished_eggs);

    TheoreticalSpr {
        spr: fished_eggs / unfished_eggs,
        catch_at_length,
    }
}

/// Negative log-likelihood of the observed catch-at-length under one
/// candidate parameter vector, in log-space.
///
/// Bins where either the observed or the theoretical proportion is zero are
/// excluded from the sum instead of producing NaN. A penalty term strongly
/// discourages a selectivity onset at or beyond the asymptotic length.
pub fn negative_log_likelihood(
    catch_at_length_observed: &[f64],
    log_selectivity_fraction_of_l_inf: f64,
    log_selectivity_slope: f64,
    log_fishing_to_natural_mortality: f64,
    l_inf: f64,
    cv_l_inf: f64,
    bin_mids: &[f64],
    mk_ratio: f64,
    maturity_per_bin: &[f64],
    weight_exponent: f64,
) -> Result<f64> {
    let age_to_length =
        build_age_to_length_key(bin_mids, mk_ratio, l_inf, cv_l_inf, MAX_SIMULATED_AGE)?;
    negative_log_likelihood_with_key(
        catch_at_length_observed,
        log_selectivity_fraction_of_l_inf,
        log_selectivity_slope,
        log_fishing_to_natural_mortality,
        l_inf,
        bin_mids,
        mk_ratio,
        maturity_per_bin,
        weight_exponent,
        &age_to_length,
    )
}

fn negative_log_likelihood_with_key(
    catch_at_length_observed: &[f64],
    log_selectivity_fraction_of_l_inf: f64,
    log_selectivity_slope: f64,
    log_fishing_to_natural_mortality: f64,
    l_inf: f64,
    bin_mids: &[f64],
    mk_ratio: f64,
    maturity_per_bin: &[f64],
    weight_exponent: f64,
    age_to_length: &AgeToLengthKey,
) -> Result<f64> {
    // rescale the log-parameters to lengths and rates
    let selectivity_cm_at_50_percent = log_selectivity_fraction_of_l_inf.exp() * l_inf;
    let selectivity_cm_at_95_percent = selectivity_cm_at_50_percent
        + log_selectivity_slope.exp() * selectivity_cm_at_50_percent;
    let fishing_to_natural_mortality = log_fishing_to_natural_mortality.exp();

    let total_catches: f64 = catch_at_length_observed.iter().sum();
    let observed_normalized: Vec<f64> = catch_at_length_observed
        .iter()
        .map(|&caught| caught / total_catches)
        .collect();

    let theoretical = spr_formula(
        selectivity_cm_at_50_percent,
        selectivity_cm_at_95_percent,
        fishing_to_natural_mortality,
        bin_mids,
        mk_ratio,
        maturity_per_bin,
        weight_exponent,
        age_to_length,
    );

    let mut error = 0.0;
    for bin in 0..observed_normalized.len() {
        if observed_normalized[bin] > 0.0 && theoretical.catch_at_length[bin] > 0.0 {
            error += catch_at_length_observed[bin]
                * (theoretical.catch_at_length[bin] / observed_normalized[bin]).ln();
        }
    }

    // penalize a selectivity onset drifting past the asymptotic length
    let penalization_value = error;
    let exp_par0 = log_selectivity_fraction_of_l_inf.exp();
    let penalization = if exp_par0 >= 1.0 {
        penalization_value * exp_par0
    } else {
        let distribution = Beta::new(5.0, 0.1).context("failed to build penalty distribution")?;
        distribution.pdf(exp_par0) * penalization_value
    };

    Ok(-(error + penalization))
}

/// Result of an LBSPR fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbsprEstimate {
    /// Ratio of fished to unfished egg production, 0-1.
    pub spr: f64,
    pub fishing_to_natural_mortality: f64,
    pub length_at_50_percent_selectivity: f64,
    pub length_at_95_percent_selectivity: f64,
    /// Achieved negative log-likelihood; exposed so a consumer can judge fit
    /// quality even when the evaluation budget ran out.
    pub likelihood: f64,
}

struct LbsprProblem {
    catch_at_length_observed: Vec<f64>,
    l_inf: f64,
    bin_mids: Vec<f64>,
    mk_ratio: f64,
    maturity_per_bin: Vec<f64>,
    weight_exponent: f64,
    age_to_length: AgeToLengthKey,
}

impl CostFunction for LbsprProblem {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, parameters: &Self::Param) -> Result<Self::Output, Error> {
        negative_log_likelihood_with_key(
            &self.catch_at_length_observed,
            parameters[0],
            parameters[1],
            parameters[2],
            self.l_inf,
            &self.bin_mids,
            self.mk_ratio,
            &self.maturity_per_bin,
            self.weight_exponent,
            &self.age_to_length,
        )
    }
}

/// Maximum-likelihood LBSPR fit of an observed catch-at-length vector.
///
/// Minimizes the penalized negative log-likelihood over the three latent
/// parameters with a Nelder-Mead simplex, bounded by an evaluation budget
/// and a convergence tolerance, whichever triggers first. Non-convergence
/// is not an error: the best parameter vector found is the answer, and the
/// achieved likelihood is part of the estimate.
pub fn estimate(
    catch_at_length_observed: &[f64],
    l_inf: f64,
    cv_l_inf: f64,
    bin_mids: &[f64],
    mk_ratio: f64,
    maturity_per_bin: &[f64],
    weight_exponent: f64,
) -> Result<LbsprEstimate> {
    if catch_at_length_observed.len() != bin_mids.len()
        || maturity_per_bin.len() != bin_mids.len()
    {
        bail!(
            "observed catches, bin midpoints and maturity must have the same length, but are {}, {} and {}",
            catch_at_length_observed.len(),
            bin_mids.len(),
            maturity_per_bin.len()
        );
    }

    let age_to_length =
        build_age_to_length_key(bin_mids, mk_ratio, l_inf, cv_l_inf, MAX_SIMULATED_AGE)?;

    let problem = LbsprProblem {
        catch_at_length_observed: catch_at_length_observed.to_vec(),
        l_inf,
        bin_mids: bin_mids.to_vec(),
        mk_ratio,
        maturity_per_bin: maturity_per_bin.to_vec(),
        weight_exponent,
        age_to_length: age_to_length.clone(),
    };

    // log(SL50/Linf), log(slope), log(F/M); the simplex starts around a
    // selectivity onset at half the asymptotic length and F = M
    let start = vec![(0.5_f64).ln(), (0.6_f64).ln(), 0.0];
    let mut simplex = vec![start.clone()];
    for dimension in 0..start.len() {
        let mut vertex = start.clone();
        vertex[dimension] += 0.5;
        simplex.push(vertex);
    }

    let solver = NelderMead::new(simplex).with_sd_tolerance(CONVERGENCE_TOLERANCE)?;
    let result = Executor::new(problem, solver)
        .configure(|state| state.max_iters(EVALUATION_BUDGET))
        .run()
        .context("failed to run the likelihood optimization")?;

    let best = result
        .state()
        .get_best_param()
        .context("optimizer yielded no parameter vector")?
        .clone();
    let likelihood = result.state().get_best_cost();

    let length_at_50_percent_selectivity = best[0].exp() * l_inf;
    let selectivity_slope = best[1].exp();
    let length_at_95_percent_selectivity = length_at_50_percent_selectivity
        + length_at_50_percent_selectivity * selectivity_slope;
    let fishing_to_natural_mortality = best[2].exp();

    let best_spr = spr_formula(
        length_at_50_percent_selectivity,
        length_at_95_percent_selectivity,
        fishing_to_natural_mortality,
        bin_mids,
        mk_ratio,
        maturity_per_bin,
        weight_exponent,
        &age_to_length,
    );

    Ok(LbsprEstimate {
        spr: best_spr.spr,
        fishing_to_natural_mortality,
        length_at_50_percent_selectivity,
        length_at_95_percent_selectivity,
        likelihood,
    })
}

/// Maturity fraction per bin from a length-at-maturity threshold: 0 below,
/// 1 above, and 0.5 for the bin straddling the threshold.
pub fn maturity_per_bin(
    bin_mids: &[f64],
    bin_width_cm: f64,
    length_at_maturity: f64,
) -> Vec<f64> {
    bin_mids
        .iter()
        .map(|&mid| {
            let lower = mid - bin_width_cm / 2.0;
            let upper = mid + bin_width_cm / 2.0;
            if upper <= length_at_maturity {
                0.0
            } else if lower >= length_at_maturity {
                1.0
            } else {
                0.5
            }
        })
        .collect()
}
