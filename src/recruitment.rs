//! Stock-recruit relationship: new fish entering the first bin.

use crate::abundance::StructuredAbundance;
use crate::growth::{Species, check_num};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::LogNormal;

/// Beverton-Holt recruitment driven by spawning biomass and steepness.
#[derive(Debug, Clone)]
pub struct BevertonHoltRecruitment {
    steepness: f64,
    virgin_recruits: f64,
    virgin_spawning_biomass: f64,
    maturity_per_bin: Vec<f64>,
    noise_std_dev: f64,
}

impl BevertonHoltRecruitment {
    pub fn new(
        steepness: f64,
        virgin_recruits: f64,
        virgin_spawning_biomass: f64,
        maturity_per_bin: Vec<f64>,
    ) -> Result<Self> {
        check_num(steepness, 0.2..=1.0).context("invalid steepness")?;
        check_num(virgin_recruits, 0.0..).context("invalid virgin recruits")?;
        check_num(virgin_spawning_biomass, 0.0..).context("invalid virgin spawning biomass")?;
        Ok(Self {
            steepness,
            virgin_recruits,
            virgin_spawning_biomass,
            maturity_per_bin,
            noise_std_dev: 0.0,
        })
    }

    /// Multiply each year's recruits by a lognormal deviate with this
    /// standard deviation (zero keeps recruitment deterministic).
    pub fn with_noise(mut self, noise_std_dev: f64) -> Result<Self> {
        check_num(noise_std_dev, 0.0..10.0).context("invalid recruitment noise")?;
        self.noise_std_dev = noise_std_dev;
        Ok(self)
    }

    /// Spawning biomass of an abundance: mature counts weighted by weight-at-bin.
    pub fn spawning_biomass(&self, species: &Species, abundance: &StructuredAbundance) -> f64 {
        let mut biomass = 0.0;
        for subdivision in 0..abundance.n_subdivisions() {
            for bin in 0..abundance.n_bins() {
                biomass += self.maturity_per_bin[bin]
                    * species.weight(subdivision, bin)
                    * abundance.get(subdivision, bin);
            }
        }
        biomass
    }

    /// Number of recruits produced this year by the given spawning stock.
    pub fn recruit<R: Rng>(
        &self,
        species: &Species,
        abundance: &StructuredAbundance,
        rng: &mut R,
    ) -> Result<f64> {
        let ssb = self.spawning_biomass(species, abundance);
        let h = self.steepness;
        let denominator =
            self.virgin_spawning_biomass * (1.0 - h) + ssb * (5.0 * h - 1.0);
        let mut recruits = if denominator <= 0.0 {
            0.0
        } else {
            4.0 * h * self.virgin_recruits * ssb / denominator
        };

        if self.noise_std_dev > 0.0 {
            let noise = LogNormal::new(0.0, self.noise_std_dev)
                .context("failed to build recruitment noise distribution")?;
            recruits *= noise.sample(rng);
        }

        Ok(recruits.max(0.0))
    }

    /// Add recruits to bin 0, split evenly across subdivisions.
    pub fn allocate(&self, recruits: f64, abundance: &mut StructuredAbundance) {
        let share = recruits / abundance.n_subdivisions() as f64;
        for subdivision in 0..abundance.n_subdivisions() {
            abundance.add(subdivision, 0, share);
        }
    }

    pub fn virgin_recruits(&self) -> f64 {
        self.virgin_recruits
    }
}
