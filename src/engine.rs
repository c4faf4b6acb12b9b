//! Simulation driver: advances the structured population day by day and
//! feeds the survey agents in a fixed, deterministic order.

use crate::abundance::StructuredAbundance;
use crate::aging::FixedProportionAging;
use crate::assessment::{FishingMortalityAgent, SprAgent};
use crate::config::{Config, SamplingPolicy};
use crate::growth::Species;
use crate::length::CatchAtLength;
use crate::mortality::MortalitySchedule;
use crate::recruitment::BevertonHoltRecruitment;
use crate::sampler::{
    CatchAtLengthSampler, CatchSource, FixedQuotaCatchSampler, StochasticCatchSampler,
};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::encode;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

const DAYS_PER_YEAR: usize = 365;

/// One reporting year: every named indicator pulled at the yearly boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct YearlyRecord {
    pub year: usize,
    pub rows: Vec<(String, f64)>,
}

/// A simulated vessel: the minimal stand-in for the harvesting agents the
/// real harness would supply.
pub struct Vessel {
    id: usize,
    tags: Vec<String>,
    pending_landings: StructuredAbundance,
    yearly_effort: f64,
    active: bool,
}

impl Vessel {
    fn new(id: usize, tags: Vec<String>, n_subdivisions: usize, n_bins: usize) -> Self {
        Self {
            id,
            tags,
            pending_landings: StructuredAbundance::zeros(n_subdivisions, n_bins),
            yearly_effort: 0.0,
            active: true,
        }
    }

    fn clear_pending(&mut self) {
        let n_subdivisions = self.pending_landings.n_subdivisions();
        let n_bins = self.pending_landings.n_bins();
        self.pending_landings = StructuredAbundance::zeros(n_subdivisions, n_bins);
    }
}

impl CatchSource for Vessel {
    fn id(&self) -> usize {
        self.id
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn landed_weight(&self, subdivision: usize, bin: usize) -> f64 {
        self.pending_landings.get(subdivision, bin)
    }

    fn active_this_year(&self) -> bool {
        self.active
    }

    fn yearly_effort(&self) -> f64 {
        self.yearly_effort
    }
}

/// Unfished equilibrium: iterate yearly mortality, daily graduation and a
/// constant stream of virgin recruits with no fishing.
pub fn virgin_population(
    species: &Species,
    aging: &FixedProportionAging,
    mortality: &MortalitySchedule,
    virgin_recruits: f64,
    years: usize,
) -> Result<StructuredAbundance> {
    let mut abundance = StructuredAbundance::zeros(species.n_subdivisions(), species.n_bins());
    let share = virgin_recruits / species.n_subdivisions() as f64;
    for _ in 0..years {
        mortality.apply(&mut abundance);
        for _ in 0..DAYS_PER_YEAR {
            aging.age_locally(&mut abundance)?;
        }
        for subdivision in 0..abundance.n_subdivisions() {
            abundance.add(subdivision, 0, share);
        }
    }
    Ok(abundance)
}

/// Simulation engine.
///
/// Holds the configuration, the population state, the fleet, the survey
/// agents, and the run's single seeded random number generator.
pub struct Engine {
    cfg: Config,
    species: Species,
    population: StructuredAbundance,
    aging: FixedProportionAging,
    natural_mortality: MortalitySchedule,
    recruitment: BevertonHoltRecruitment,
    selectivity_per_bin: Vec<f64>,
    vessels: Vec<Vessel>,
    spr_agent: SprAgent,
    fishing_mortality_agent: FishingMortalityAgent,
    rng: ChaCha12Rng,
    day: usize,
    last_catch_at_length: Vec<f64>,
}

impl Engine {
    /// Build an engine from a validated configuration: bootstrap the virgin
    /// population, parameterize recruitment from it, and wire the agents.
    pub fn new(cfg: Config) -> Result<Self> {
        let species = cfg.build_species().context("failed to build species")?;
        // graduation runs on a daily step; a yearly one would overshoot the
        // bin widths for realistic growth coefficients
        let aging = FixedProportionAging::new(species.curve(), 1.0)
            .context("failed to build aging process")?;
        let natural_mortality = MortalitySchedule::Instantaneous(cfg.population.natural_mortality);

        let population = virgin_population(
            &species,
            &aging,
            &natural_mortality,
            cfg.population.virgin_recruits,
            cfg.population.spinup_years,
        )
        .context("failed to bootstrap the virgin population")?;

        let maturity: Vec<f64> = (0..species.n_bins())
            .map(|bin| {
                if species.length(0, bin) >= cfg.population.length_at_maturity {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();
        // the bootstrap abundance defines the virgin spawning biomass
        let recruitment = BevertonHoltRecruitment::new(
            cfg.population.steepness,
            cfg.population.virgin_recruits,
            spawning_biomass(&species, &maturity, &population),
            maturity,
        )?
        .with_noise(cfg.population.recruitment_noise)?;

        let ln19 = 19.0_f64.ln();
        let l50 = cfg.fleet.selectivity_l50;
        let l95 = cfg.fleet.selectivity_l95;
        let selectivity_per_bin: Vec<f64> = (0..species.n_bins())
            .map(|bin| {
                let length = species.length(0, bin);
                1.0 / (1.0 + (-ln19 * (length - l50) / (l95 - l50)).exp())
            })
            .collect();

        let vessels: Vec<Vessel> = (0..cfg.fleet.n_vessels)
            .map(|id| {
                Vessel::new(
                    id,
                    vec!["fleet".to_string()],
                    species.n_subdivisions(),
                    species.n_bins(),
                )
            })
            .collect();

        let mut rng = ChaCha12Rng::seed_from_u64(cfg.output.seed);

        let sampler: Box<dyn CatchAtLengthSampler> = match cfg.assessment.sampling {
            SamplingPolicy::Stochastic => {
                let mut sampler = StochasticCatchSampler::with_tag_probabilities(
                    species.n_subdivisions(),
                    species.n_bins(),
                    [("fleet".to_string(), cfg.assessment.sampling_probability)]
                        .into_iter()
                        .collect(),
                );
                let sources: Vec<&dyn CatchSource> = vessels
                    .iter()
                    .map(|vessel| vessel as &dyn CatchSource)
                    .collect();
                sampler.start(&sources, &mut rng);
                Box::new(sampler)
            }
            SamplingPolicy::FixedQuota => Box::new(FixedQuotaCatchSampler::new(
                species.n_subdivisions(),
                species.n_bins(),
                [("fleet".to_string(), cfg.assessment.quota)]
                    .into_iter()
                    .collect(),
            )),
        };

        let mut spr_agent = SprAgent::new(
            &cfg.assessment.survey_tag,
            species.clone(),
            cfg.assumed_biology(),
            sampler,
            cfg.assessment.formula.build(),
        )?;
        spr_agent.start()?;

        let selectivity_for_agent = selectivity_per_bin.clone();
        let mut fishing_mortality_agent = FishingMortalityAgent::new(
            species.clone(),
            Box::new(move |_, bin| selectivity_for_agent[bin]),
        );
        fishing_mortality_agent.start()?;

        Ok(Self {
            cfg,
            species,
            population,
            aging,
            natural_mortality,
            recruitment,
            selectivity_per_bin,
            vessels,
            spr_agent,
            fishing_mortality_agent,
            rng,
            day: 0,
            last_catch_at_length: Vec::new(),
        })
    }

    pub fn population(&self) -> &StructuredAbundance {
        &self.population
    }

    pub fn species(&self) -> &Species {
        &self.species
    }

    /// Run the simulation and append one record per year to a binary file.
    pub fn run_simulation<P: AsRef<Path>>(&mut self, records_file: P) -> Result<()> {
        let records_file = records_file.as_ref();
        let file = File::create(records_file)
            .with_context(|| format!("failed to create {records_file:?}"))?;
        let mut writer = BufWriter::new(file);

        for year in 0..self.cfg.output.years {
            let record = self.perform_year(year).context("failed to perform year")?;
            encode::write(&mut writer, &record).context("failed to serialize record")?;

            let progress = 100.0 * (year + 1) as f64 / self.cfg.output.years as f64;
            log::info!("completed {progress:06.2}%");
        }

        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// The last reporting period's sampled catch, binned into the
    /// assessment's length classes; what the `assess` command re-fits.
    /// Snapshotted each year before the accumulators are reset.
    pub fn final_catch_at_length(&self) -> &[f64] {
        &self.last_catch_at_length
    }

    fn bin_sampled_catch(&self) -> Result<Vec<f64>> {
        let assumed = self.spr_agent.assumed();
        let n_classes = (1.2 * assumed.l_inf / assumed.length_bin_cm).ceil() as usize + 1;
        let abundance = self
            .spr_agent
            .sampler()
            .abundance(&|subdivision, bin| self.spr_agent.assumed_weight_at_bin(subdivision, bin))?;
        let catch_at_length = CatchAtLength::build(
            &abundance,
            |subdivision, bin| self.species.length(subdivision, bin),
            assumed.length_bin_cm,
            n_classes,
        )?;
        Ok(catch_at_length.counts().to_vec())
    }

    fn perform_year(&mut self, year: usize) -> Result<YearlyRecord> {
        // membership recheck opens the reporting year
        {
            let sources: Vec<&dyn CatchSource> = self
                .vessels
                .iter()
                .map(|vessel| vessel as &dyn CatchSource)
                .collect();
            self.spr_agent
                .recheck_membership(&sources, year, &mut self.rng);
        }

        for vessel in &mut self.vessels {
            vessel.yearly_effort = 0.0;
        }

        for _ in 0..DAYS_PER_YEAR {
            self.perform_day()?;
        }

        // aggregate the yearly values before any reset
        let sources: Vec<&dyn CatchSource> = self
            .vessels
            .iter()
            .map(|vessel| vessel as &dyn CatchSource)
            .collect();
        let mut rows = self.spr_agent.yearly_report(&sources)?;
        rows.push((
            self.fishing_mortality_agent.column_name(),
            self.fishing_mortality_agent
                .yearly_fishing_mortality(&self.population)?,
        ));
        for subdivision in 0..self.population.n_subdivisions() {
            for bin in 0..self.population.n_bins() {
                rows.push((
                    format!(
                        "{} Abundance {subdivision}.{bin} at day {}",
                        self.species.name(),
                        self.day
                    ),
                    self.population.get(subdivision, bin),
                ));
            }
        }
        drop(sources);

        self.last_catch_at_length = self.bin_sampled_catch()?;

        // reset only after the yearly values were read
        self.spr_agent.reset_yearly();
        self.fishing_mortality_agent.reset_yearly();

        // biology phase: recruitment is computed on the pre-mortality stock,
        // then mortality and the allocation of the new recruits (graduation
        // already ran day by day)
        let recruits = self
            .recruitment
            .recruit(&self.species, &self.population, &mut self.rng)?;
        self.natural_mortality.apply(&mut self.population);
        self.recruitment.allocate(recruits, &mut self.population);

        Ok(YearlyRecord { year, rows })
    }

    fn perform_day(&mut self) -> Result<()> {
        self.harvest_and_allocate();

        let sources: Vec<&dyn CatchSource> = self
            .vessels
            .iter()
            .map(|vessel| vessel as &dyn CatchSource)
            .collect();
        self.spr_agent.step_daily(&sources);
        self.fishing_mortality_agent.step_daily(&sources);
        drop(sources);

        for vessel in &mut self.vessels {
            vessel.clear_pending();
        }

        self.aging.age_locally(&mut self.population)?;
        self.day += 1;
        Ok(())
    }

    /// Remove today's catch from the population and split the landed weight
    /// across the active vessels with random shares.
    fn harvest_and_allocate(&mut self) {
        let daily_f = self.cfg.fleet.fishing_mortality / DAYS_PER_YEAR as f64;

        let active: Vec<usize> = self
            .vessels
            .iter()
            .enumerate()
            .filter(|(_, vessel)| vessel.active)
            .map(|(index, _)| index)
            .collect();
        if active.is_empty() {
            return;
        }

        let mut shares: Vec<f64> = active
            .iter()
            .map(|_| self.rng.random::<f64>() + 0.1)
            .collect();
        let share_sum: f64 = shares.iter().sum();
        for share in &mut shares {
            *share /= share_sum;
        }

        let mut landed_any = vec![false; active.len()];
        for subdivision in 0..self.population.n_subdivisions() {
            for bin in 0..self.population.n_bins() {
                let exploitation = 1.0 - (-daily_f * self.selectivity_per_bin[bin]).exp();
                let caught_numbers = self.population.get(subdivision, bin) * exploitation;
                if caught_numbers <= 0.0 {
                    continue;
                }
                self.population.add(subdivision, bin, -caught_numbers);
                let caught_weight = caught_numbers * self.species.weight(subdivision, bin);

                for (slot, &vessel_index) in active.iter().enumerate() {
                    let allocated = caught_weight * shares[slot];
                    if allocated > 0.0 {
                        self.vessels[vessel_index]
                            .pending_landings
                            .add(subdivision, bin, allocated);
                        landed_any[slot] = true;
                    }
                }
            }
        }

        for (slot, &vessel_index) in active.iter().enumerate() {
            if landed_any[slot] {
                self.vessels[vessel_index].yearly_effort += 1.0;
            }
        }
    }
}

fn spawning_biomass(
    species: &Species,
    maturity_per_bin: &[f64],
    abundance: &StructuredAbundance,
) -> f64 {
    let mut biomass = 0.0;
    for subdivision in 0..abundance.n_subdivisions() {
        for bin in 0..abundance.n_bins() {
            biomass += maturity_per_bin[bin]
                * species.weight(subdivision, bin)
                * abundance.get(subdivision, bin);
        }
    }
    biomass
}
