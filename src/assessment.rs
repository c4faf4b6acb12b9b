//! Survey agents wiring a catch sampler to an SPR formula and exposing the
//! yearly management indicators by name.

use crate::abundance::StructuredAbundance;
use crate::growth::{Species, check_num, length_at_age, length_to_weight};
use crate::lbspr;
use crate::length::CatchAtLength;
use crate::mortality::fishing_mortality_rate;
use crate::sampler::{CatchAtLengthSampler, CatchSample, CatchSource};
use anyhow::{Context, Result, bail};

/// Biology assumed by a survey: what the assessors believe about the stock,
/// not necessarily what the simulation uses.
#[derive(Debug, Clone)]
pub struct AssumedBiology {
    pub l_inf: f64,
    pub k: f64,
    pub natural_mortality: f64,
    pub max_age: usize,
    pub virgin_recruits: f64,
    pub length_bin_cm: f64,
    pub allometric_alpha: f64,
    pub allometric_beta: f64,
    pub length_at_maturity: f64,
    pub cv_l_inf: f64,
}

impl AssumedBiology {
    pub fn validate(&self) -> Result<()> {
        check_num(self.l_inf, 0.0..10_000.0).context("invalid assumed asymptotic length")?;
        check_num(self.k, 0.0..100.0).context("invalid assumed growth coefficient")?;
        check_num(self.natural_mortality, 0.0..100.0)
            .context("invalid assumed natural mortality")?;
        check_num(self.max_age, 1..10_000).context("invalid assumed maximum age")?;
        check_num(self.virgin_recruits, 0.0..).context("invalid simulated virgin recruits")?;
        check_num(self.length_bin_cm, 0.0..).context("invalid assumed length bin width")?;
        check_num(self.allometric_alpha, 0.0..).context("invalid assumed allometric alpha")?;
        check_num(self.allometric_beta, 0.0..).context("invalid assumed allometric beta")?;
        check_num(self.length_at_maturity, 0.0..10_000.0)
            .context("invalid assumed length at maturity")?;
        check_num(self.cv_l_inf, 0.0..10.0).context("invalid assumed cv of asymptotic length")?;
        if self.l_inf <= 0.0
            || self.k <= 0.0
            || self.length_bin_cm <= 0.0
            || self.allometric_alpha <= 0.0
            || self.allometric_beta <= 0.0
            || self.cv_l_inf <= 0.0
        {
            bail!("assumed biology parameters must be positive");
        }
        Ok(())
    }
}

/// How SPR is derived from a sampled catch; selected at configuration time.
pub trait SprFormula {
    fn compute_spr(&self, agent: &SprAgent, catch_numbers: &StructuredAbundance) -> Result<f64>;
}

/// The Hordyk length-based estimator: fit selectivity and F/M to the
/// observed catch-at-length, read SPR off the fitted curve.
pub struct LbsprFormula;

impl SprFormula for LbsprFormula {
    fn compute_spr(&self, agent: &SprAgent, catch_numbers: &StructuredAbundance) -> Result<f64> {
        let assumed = agent.assumed();
        let n_classes = (1.2 * assumed.l_inf / assumed.length_bin_cm).ceil() as usize + 1;
        let catch_at_length = CatchAtLength::build(
            catch_numbers,
            |subdivision, bin| agent.species().length(subdivision, bin),
            assumed.length_bin_cm,
            n_classes,
        )?;
        if catch_at_length.total() <= 0.0 {
            return Ok(f64::NAN);
        }

        let bin_mids = catch_at_length.class_mids();
        let maturity =
            lbspr::maturity_per_bin(&bin_mids, assumed.length_bin_cm, assumed.length_at_maturity);
        let estimate = lbspr::estimate(
            catch_at_length.counts(),
            assumed.l_inf,
            assumed.cv_l_inf,
            &bin_mids,
            assumed.natural_mortality / assumed.k,
            &maturity,
            assumed.allometric_beta,
        )?;
        Ok(estimate.spr)
    }
}

/// TNC-style SPR: estimate total mortality from the mean length of the catch
/// (Beverton-Holt), then compare a simulated fished cohort against a virgin
/// one.
pub struct TncFormula {
    remove_smallest_percentile: bool,
}

impl TncFormula {
    /// Fraction of the smallest catches optionally trimmed before the mean
    /// length is taken; improves numerical stability of the Z estimate.
    const TRIMMED_FRACTION: f64 = 0.05;

    pub fn new(remove_smallest_percentile: bool) -> Self {
        Self {
            remove_smallest_percentile,
        }
    }
}

impl SprFormula for TncFormula {
    fn compute_spr(&self, agent: &SprAgent, catch_numbers: &StructuredAbundance) -> Result<f64> {
        let assumed = agent.assumed();
        let n_classes = (1.2 * assumed.l_inf / assumed.length_bin_cm).ceil() as usize + 1;
        let catch_at_length = CatchAtLength::build(
            catch_numbers,
            |subdivision, bin| agent.species().length(subdivision, bin),
            assumed.length_bin_cm,
            n_classes,
        )?;
        if catch_at_length.total() <= 0.0 {
            return Ok(f64::NAN);
        }

        let mut counts = catch_at_length.counts().to_vec();
        if self.remove_smallest_percentile {
            let mut budget = Self::TRIMMED_FRACTION * catch_at_length.total();
            for count in counts.iter_mut() {
                if *count > budget {
                    break;
                }
                budget -= *count;
                *count = 0.0;
            }
        }

        // knife-edge selection at the modal length class
        let modal_class = counts
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(class, _)| class)
            .unwrap_or(0);
        let length_at_selection = catch_at_length.class_mid(modal_class);

        let mut selected_count = 0.0;
        let mut selected_length_sum = 0.0;
        for class in modal_class..counts.len() {
            selected_count += counts[class];
            selected_length_sum += counts[class] * catch_at_length.class_mid(class);
        }
        if selected_count <= 0.0 {
            return Ok(f64::NAN);
        }
        let mean_length = selected_length_sum / selected_count;
        if mean_length <= length_at_selection || mean_length >= assumed.l_inf {
            return Ok(f64::NAN);
        }

        // Beverton-Holt total mortality from mean length above selection
        let total_mortality =
            assumed.k * (assumed.l_inf - mean_length) / (mean_length - length_at_selection);
        let fishing_mortality = (total_mortality - assumed.natural_mortality).max(0.0);

        // virgin vs fished simulated cohort
        let mut virgin = assumed.virgin_recruits;
        let mut fished = assumed.virgin_recruits;
        let mut virgin_ssb = 0.0;
        let mut fished_ssb = 0.0;
        for age in 0..=assumed.max_age {
            let length = length_at_age(age as f64, assumed.l_inf, 0.0, assumed.k);
            let weight = length_to_weight(length, assumed.allometric_alpha, assumed.allometric_beta);
            let mature = if length >= assumed.length_at_maturity { 1.0 } else { 0.0 };
            virgin_ssb += mature * weight * virgin;
            fished_ssb += mature * weight * fished;

            let selected = if length >= length_at_selection { 1.0 } else { 0.0 };
            virgin *= (-assumed.natural_mortality).exp();
            fished *= (-(assumed.natural_mortality + fishing_mortality * selected)).exp();
        }

        if virgin_ssb <= 0.0 {
            return Ok(f64::NAN);
        }
        Ok(fished_ssb / virgin_ssb)
    }
}

/// A yearly reporting row: a named scalar pulled once per reporting period.
pub type ReportRow = (String, f64);

/// Survey agent: samples catches daily, derives SPR and the companion
/// indicators yearly.
pub struct SprAgent {
    survey_tag: String,
    species: Species,
    assumed: AssumedBiology,
    sampler: Box<dyn CatchAtLengthSampler>,
    formula: Box<dyn SprFormula>,
    initialized: bool,
}

impl SprAgent {
    pub fn new(
        survey_tag: &str,
        species: Species,
        assumed: AssumedBiology,
        sampler: Box<dyn CatchAtLengthSampler>,
        formula: Box<dyn SprFormula>,
    ) -> Result<Self> {
        if survey_tag.is_empty() {
            bail!("survey tag must not be empty");
        }
        assumed.validate().context("invalid assumed biology")?;
        Ok(Self {
            survey_tag: survey_tag.to_string(),
            species,
            assumed,
            sampler,
            formula,
            initialized: false,
        })
    }

    /// Mark the agent as wired into a run; guards double registration.
    pub fn start(&mut self) -> Result<()> {
        if self.initialized {
            bail!("SPR agent {} already started", self.survey_tag);
        }
        self.initialized = true;
        Ok(())
    }

    pub fn survey_tag(&self) -> &str {
        &self.survey_tag
    }

    pub fn species(&self) -> &Species {
        &self.species
    }

    pub fn assumed(&self) -> &AssumedBiology {
        &self.assumed
    }

    pub fn sampler(&self) -> &dyn CatchAtLengthSampler {
        self.sampler.as_ref()
    }

    pub fn sampler_mut(&mut self) -> &mut dyn CatchAtLengthSampler {
        self.sampler.as_mut()
    }

    /// Weight-at-bin under the assumed allometry, applied to the species'
    /// true lengths.
    pub fn assumed_weight_at_bin(&self, subdivision: usize, bin: usize) -> f64 {
        length_to_weight(
            self.species.length(subdivision, bin),
            self.assumed.allometric_alpha,
            self.assumed.allometric_beta,
        )
    }

    fn sampled_abundance(&self) -> Result<StructuredAbundance> {
        self.sampler
            .abundance(&|subdivision, bin| self.assumed_weight_at_bin(subdivision, bin))
    }

    /// Daily step: delegate the observation to the catch sampler.
    pub fn step_daily(&mut self, sources: &[&dyn CatchSource]) {
        self.sampler.observe(sources);
    }

    /// Yearly membership recheck, delegated to the sampler's policy.
    pub fn recheck_membership(
        &mut self,
        sources: &[&dyn CatchSource],
        year: usize,
        rng: &mut rand_chacha::ChaCha12Rng,
    ) {
        self.sampler.recheck(sources, year, rng);
    }

    /// Yearly reset, to be called only after the yearly values were read.
    pub fn reset_yearly(&mut self) {
        self.sampler.reset();
    }

    pub fn compute_spr(&self) -> Result<f64> {
        let abundance = self.sampled_abundance()?;
        self.formula.compute_spr(self, &abundance)
    }

    /// Share of the catch (in numbers) at or above the assumed length at
    /// maturity.
    pub fn compute_maturity_ratio(&self) -> Result<f64> {
        self.ratio_above_length(self.assumed.length_at_maturity)
    }

    /// Share of the catch (in numbers) at or above the optimal-yield length
    /// `L∞ · 3 / (3 + M/K)`, rounded to the nearest centimeter.
    pub fn compute_lopt_ratio(&self) -> Result<f64> {
        let m_over_k = self.assumed.natural_mortality / self.assumed.k;
        let lopt = (self.assumed.l_inf * (3.0 / (3.0 + m_over_k))).round();
        self.ratio_above_length(lopt)
    }

    fn ratio_above_length(&self, threshold: f64) -> Result<f64> {
        let abundance = self.sampled_abundance()?;
        let mut above = 0.0;
        let mut all_catches = 0.0;
        for subdivision in 0..abundance.n_subdivisions() {
            for bin in 0..abundance.n_bins() {
                let count = abundance.get(subdivision, bin);
                if !count.is_finite() {
                    continue;
                }
                all_catches += count;
                if self.species.length(subdivision, bin) >= threshold {
                    above += count;
                }
            }
        }
        Ok(above / all_catches)
    }

    pub fn compute_mean_length(&self) -> Result<f64> {
        let abundance = self.sampled_abundance()?;
        let mut observations = 0.0;
        let mut length_sum = 0.0;
        for subdivision in 0..abundance.n_subdivisions() {
            for bin in 0..abundance.n_bins() {
                let count = abundance.get(subdivision, bin);
                if !count.is_finite() {
                    continue;
                }
                observations += count;
                length_sum += count * self.species.length(subdivision, bin);
            }
        }
        Ok(length_sum / observations)
    }

    /// Total sampled landings in weight over the reporting period.
    pub fn total_landings(&self) -> f64 {
        self.sampler.landings().total()
    }

    /// Landings per unit of effort of the tracked sources.
    pub fn compute_cpue(&self, sources: &[&dyn CatchSource]) -> f64 {
        let effort: f64 = sources
            .iter()
            .filter(|source| self.sampler.is_tracked(source.id()))
            .map(|source| source.yearly_effort())
            .sum();
        if effort <= 0.0 {
            return f64::NAN;
        }
        self.total_landings() / effort
    }

    /// The yearly indicator rows, named the way the reporting layer keys
    /// its columns.
    pub fn yearly_report(&self, sources: &[&dyn CatchSource]) -> Result<Vec<ReportRow>> {
        let species = self.species.name();
        let tag = &self.survey_tag;
        let mut rows = vec![
            (format!("SPR {species} {tag}"), self.compute_spr()?),
            (format!("CPUE {species} {tag}"), self.compute_cpue(sources)),
            (format!("Landings {species} {tag}"), self.total_landings()),
            (
                format!("Percentage Mature Catches {species} {tag}"),
                self.compute_maturity_ratio()?,
            ),
            (
                format!("Percentage Lopt Catches {species} {tag}"),
                self.compute_lopt_ratio()?,
            ),
            (
                format!("Mean Length Caught {species} {tag}"),
                self.compute_mean_length()?,
            ),
        ];

        let abundance = self.sampled_abundance()?;
        for subdivision in 0..abundance.n_subdivisions() {
            for bin in 0..abundance.n_bins() {
                rows.push((
                    format!("{species} Catches(#) {subdivision}.{bin} {tag}"),
                    abundance.get(subdivision, bin),
                ));
            }
        }
        Ok(rows)
    }
}

/// Census agent deriving the yearly fishing mortality rate from total
/// catches and the selectivity-filtered population abundance.
pub struct FishingMortalityAgent {
    species: Species,
    selectivity: Box<dyn Fn(usize, usize) -> f64>,
    sample: CatchSample,
    initialized: bool,
}

impl FishingMortalityAgent {
    pub fn new(species: Species, selectivity: Box<dyn Fn(usize, usize) -> f64>) -> Self {
        let sample = CatchSample::new(species.n_subdivisions(), species.n_bins());
        Self {
            species,
            selectivity,
            sample,
            initialized: false,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.initialized {
            bail!(
                "fishing mortality agent for {} already started",
                self.species.name()
            );
        }
        self.initialized = true;
        Ok(())
    }

    /// Daily census: every source is observed.
    pub fn step_daily(&mut self, sources: &[&dyn CatchSource]) {
        for source in sources {
            self.sample.observe_source(*source);
        }
    }

    pub fn reset_yearly(&mut self) {
        self.sample.reset();
    }

    pub fn column_name(&self) -> String {
        format!("Yearly Fishing Mortality {}", self.species.name())
    }

    /// `-ln(1 - catches / vulnerable)` against the current population.
    pub fn yearly_fishing_mortality(&self, population: &StructuredAbundance) -> Result<f64> {
        population.ensure_shape(self.species.n_subdivisions(), self.species.n_bins())?;

        let numbers = self
            .sample
            .abundance(|subdivision, bin| self.species.weight(subdivision, bin))?;
        let mut catches = 0.0;
        let mut vulnerable = 0.0;
        for subdivision in 0..population.n_subdivisions() {
            for bin in 0..population.n_bins() {
                let caught = numbers.get(subdivision, bin);
                if caught.is_finite() {
                    catches += caught;
                }
                vulnerable +=
                    (self.selectivity)(subdivision, bin) * population.get(subdivision, bin);
            }
        }
        Ok(fishing_mortality_rate(catches, vulnerable))
    }
}
