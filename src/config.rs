use crate::assessment::{AssumedBiology, LbsprFormula, SprFormula, TncFormula};
use crate::growth::{GrowthCurve, Species, check_num};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub species: SpeciesConfig,
    pub population: PopulationConfig,
    pub fleet: FleetConfig,
    pub assessment: AssessmentConfig,
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    /// Asymptotic length in centimeters.
    pub l_inf: f64,
    /// Yearly von Bertalanffy growth coefficient.
    pub k: f64,
    /// Length at recruitment.
    pub l_zero: f64,
    pub allometric_alpha: f64,
    pub allometric_beta: f64,
    pub n_bins: usize,
    /// Width of each length bin; omit for bins equally spaced between
    /// `l_zero` and `l_inf`.
    pub bin_width_cm: Option<f64>,
    pub subdivisions: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    pub virgin_recruits: f64,
    /// Instantaneous yearly natural mortality.
    pub natural_mortality: f64,
    pub steepness: f64,
    /// Standard deviation of the lognormal recruitment noise (0 disables it).
    pub recruitment_noise: f64,
    pub length_at_maturity: f64,
    /// Years of unfished dynamics used to bootstrap the virgin population.
    pub spinup_years: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub n_vessels: usize,
    /// Instantaneous yearly fishing mortality at full selectivity.
    pub fishing_mortality: f64,
    pub selectivity_l50: f64,
    pub selectivity_l95: f64,
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaKind {
    Lbspr,
    Tnc,
}

impl FormulaKind {
    pub fn build(self) -> Box<dyn SprFormula> {
        match self {
            Self::Lbspr => Box::new(LbsprFormula),
            Self::Tnc => Box::new(TncFormula::new(false)),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    Stochastic,
    FixedQuota,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AssessmentConfig {
    pub survey_tag: String,
    pub formula: FormulaKind,
    pub sampling: SamplingPolicy,
    /// Inclusion probability per vessel (stochastic policy).
    pub sampling_probability: f64,
    /// Target number of tracked vessels (fixed-quota policy).
    pub quota: usize,
    /// Coefficient of variation assumed for the asymptotic length.
    pub cv_l_inf: f64,
    /// Width of the length classes the catch is binned into.
    pub length_bin_cm: f64,
    /// Maximum age simulated by the assessment formulas.
    pub max_age: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub years: usize,
    pub seed: u64,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let species = &self.species;
        if species.name.is_empty() {
            bail!("species name must not be empty");
        }
        if species.l_inf <= species.l_zero {
            bail!(
                "asymptotic length {} must exceed recruit length {}",
                species.l_inf,
                species.l_zero
            );
        }
        check_num(species.l_zero, 0.0..).context("invalid recruit length")?;
        check_positive(species.k).context("invalid growth coefficient")?;
        check_positive(species.allometric_alpha).context("invalid allometric alpha")?;
        check_positive(species.allometric_beta).context("invalid allometric beta")?;
        check_num(species.n_bins, 2..100_000).context("invalid number of bins")?;
        if let Some(bin_width_cm) = species.bin_width_cm {
            check_positive(bin_width_cm).context("invalid bin width")?;
        }
        check_num(species.subdivisions, 1..100).context("invalid number of subdivisions")?;

        let population = &self.population;
        check_positive(population.virgin_recruits).context("invalid virgin recruits")?;
        check_positive(population.natural_mortality).context("invalid natural mortality")?;
        check_num(population.natural_mortality, 0.0..100.0).context("invalid natural mortality")?;
        check_num(population.steepness, 0.2..=1.0).context("invalid steepness")?;
        check_num(population.recruitment_noise, 0.0..10.0).context("invalid recruitment noise")?;
        check_num(population.length_at_maturity, 0.0..10_000.0)
            .context("invalid length at maturity")?;
        check_num(population.spinup_years, 1..100_000).context("invalid spinup years")?;

        let fleet = &self.fleet;
        check_num(fleet.n_vessels, 1..100_000).context("invalid number of vessels")?;
        check_num(fleet.fishing_mortality, 0.0..100.0).context("invalid fishing mortality")?;
        check_positive(fleet.selectivity_l50).context("invalid selectivity l50")?;
        if fleet.selectivity_l95 <= fleet.selectivity_l50 {
            bail!(
                "selectivity l95 {} must exceed l50 {}",
                fleet.selectivity_l95,
                fleet.selectivity_l50
            );
        }

        let assessment = &self.assessment;
        if assessment.survey_tag.is_empty() {
            bail!("survey tag must not be empty");
        }
        check_num(assessment.sampling_probability, 0.0..=1.0)
            .context("invalid sampling probability")?;
        check_num(assessment.quota, 0..100_000).context("invalid quota")?;
        check_positive(assessment.cv_l_inf).context("invalid cv of asymptotic length")?;
        check_positive(assessment.length_bin_cm).context("invalid assessment bin width")?;
        check_num(assessment.max_age, 1..10_000).context("invalid maximum age")?;

        check_num(self.output.years, 1..10_000).context("invalid number of years")?;

        Ok(())
    }

    /// Build the species this configuration describes.
    pub fn build_species(&self) -> Result<Species> {
        let species = &self.species;
        let curve = match species.bin_width_cm {
            Some(bin_width_cm) => GrowthCurve::fixed_width(
                species.l_inf,
                species.l_zero,
                species.k,
                species.allometric_alpha,
                species.allometric_beta,
                species.n_bins,
                bin_width_cm,
            )?,
            None => GrowthCurve::equally_spaced(
                species.l_inf,
                species.l_zero,
                species.k,
                species.allometric_alpha,
                species.allometric_beta,
                species.n_bins,
            )?,
        };
        Species::new(&species.name, curve, species.subdivisions)
    }

    /// The biology the surveys assume; the demonstration driver surveys
    /// with the true growth parameters.
    pub fn assumed_biology(&self) -> AssumedBiology {
        AssumedBiology {
            l_inf: self.species.l_inf,
            k: self.species.k,
            natural_mortality: self.population.natural_mortality,
            max_age: self.assessment.max_age,
            virgin_recruits: self.population.virgin_recruits,
            length_bin_cm: self.assessment.length_bin_cm,
            allometric_alpha: self.species.allometric_alpha,
            allometric_beta: self.species.allometric_beta,
            length_at_maturity: self.population.length_at_maturity,
            cv_l_inf: self.assessment.cv_l_inf,
        }
    }
}

fn check_positive(num: f64) -> Result<()> {
    if !(num > 0.0) {
        bail!("number must be positive, but is {num}");
    }
    Ok(())
}
