use crate::config::Config;
use crate::engine::{Engine, virgin_population};
use crate::lbspr;
use crate::mortality::MortalitySchedule;
use anyhow::{Context, Result};
use glob::glob;
use serde::Serialize;
use std::{
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Start a fresh run: simulate, record the yearly indicators, and keep
    /// the final sampled catch for offline assessment.
    pub fn create_run(&self) -> Result<()> {
        let run_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let run_dir = self.run_dir(run_idx);
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let mut engine = Engine::new(self.cfg.clone()).context("failed to construct engine")?;
        engine
            .run_simulation(self.records_file(run_idx))
            .context("failed to run simulation")?;

        write_msgpack(self.catch_file(run_idx), &engine.final_catch_at_length().to_vec())
            .context("failed to save the final catch")?;

        Ok(())
    }

    /// Re-fit the LBSPR estimator to the recorded catch of an existing run.
    pub fn assess_run(&self, run_idx: usize) -> Result<()> {
        let catch_file = self.catch_file(run_idx);
        let contents = fs::read(&catch_file)
            .with_context(|| format!("failed to read {catch_file:?}"))?;
        let catch_at_length: Vec<f64> =
            rmp_serde::from_slice(&contents).context("failed to deserialize the catch")?;

        let assumed = self.cfg.assumed_biology();
        let bin_mids: Vec<f64> = (0..catch_at_length.len())
            .map(|class| class as f64 * assumed.length_bin_cm + assumed.length_bin_cm / 2.0)
            .collect();
        let maturity =
            lbspr::maturity_per_bin(&bin_mids, assumed.length_bin_cm, assumed.length_at_maturity);

        let estimate = lbspr::estimate(
            &catch_at_length,
            assumed.l_inf,
            assumed.cv_l_inf,
            &bin_mids,
            assumed.natural_mortality / assumed.k,
            &maturity,
            assumed.allometric_beta,
        )
        .context("failed to fit the estimator")?;
        log::info!("{estimate:#?}");

        write_msgpack(self.estimate_file(run_idx), &estimate)
            .context("failed to save the estimate")?;

        Ok(())
    }

    /// Compute the unfished equilibrium population and save it.
    pub fn virgin_sim(&self) -> Result<()> {
        let species = self.cfg.build_species().context("failed to build species")?;
        let aging = crate::aging::FixedProportionAging::new(species.curve(), 1.0)
            .context("failed to build aging process")?;
        let mortality = MortalitySchedule::Instantaneous(self.cfg.population.natural_mortality);

        let abundance = virgin_population(
            &species,
            &aging,
            &mortality,
            self.cfg.population.virgin_recruits,
            self.cfg.population.spinup_years,
        )
        .context("failed to bootstrap the virgin population")?;
        log::info!(
            "virgin population of {} totals {:.1} fish",
            species.name(),
            abundance.total()
        );

        write_msgpack(self.sim_dir.join("virgin.msgpack"), &abundance)
            .context("failed to save the virgin population")?;

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let run_dir = self.run_dir(run_idx);
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
        }
        fs::remove_file(self.sim_dir.join("virgin.msgpack")).ok();
        Ok(())
    }

    fn count_run_dirs(&self) -> Result<usize> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .count();
        Ok(count)
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn records_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("records.msgpack")
    }

    fn catch_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("catch.msgpack")
    }

    fn estimate_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("estimate.msgpack")
    }
}

fn write_msgpack<T: Serialize, P: AsRef<Path>>(file: P, value: &T) -> Result<()> {
    let file = file.as_ref();
    let file = fs::File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    rmp_serde::encode::write(&mut writer, value).context("failed to serialize value")?;
    Ok(())
}
