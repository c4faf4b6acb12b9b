//! Catch sampling: accumulating observed landings from a tracked subset of
//! harvesting agents and converting weight back to numbers of fish.

use crate::abundance::StructuredAbundance;
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Upstream view of one harvesting agent (vessel), owned by the simulation
/// harness. Landings are incremental since the last observation.
pub trait CatchSource {
    fn id(&self) -> usize;

    fn tags(&self) -> &[String];

    /// Weight landed in this (subdivision, bin) since the last observation.
    fn landed_weight(&self, subdivision: usize, bin: usize) -> f64;

    fn active_this_year(&self) -> bool;

    /// Effort spent this year, for CPUE.
    fn yearly_effort(&self) -> f64;
}

/// Landings-in-weight accumulator with an on-demand numbers-of-fish view.
#[derive(Debug, Clone)]
pub struct CatchSample {
    landings: StructuredAbundance,
}

impl CatchSample {
    pub fn new(n_subdivisions: usize, n_bins: usize) -> Self {
        Self {
            landings: StructuredAbundance::zeros(n_subdivisions, n_bins),
        }
    }

    pub fn observe_source(&mut self, source: &dyn CatchSource) {
        for subdivision in 0..self.landings.n_subdivisions() {
            for bin in 0..self.landings.n_bins() {
                let landed = source.landed_weight(subdivision, bin);
                if landed > 0.0 {
                    self.landings.add(subdivision, bin, landed);
                }
            }
        }
    }

    pub fn reset(&mut self) {
        let n_subdivisions = self.landings.n_subdivisions();
        let n_bins = self.landings.n_bins();
        self.landings = StructuredAbundance::zeros(n_subdivisions, n_bins);
    }

    pub fn landings(&self) -> &StructuredAbundance {
        &self.landings
    }

    pub fn total_landings(&self) -> f64 {
        self.landings.total()
    }

    /// Convert the accumulated weights to numbers of fish via a
    /// weight-at-bin function.
    ///
    /// Where both the weight and the landings are zero the count is
    /// undefined and reported as NaN (e.g. bin 0 at zero length). Positive
    /// landings against a zero weight cannot be a finite count and signal
    /// inconsistent data.
    pub fn abundance<F>(&self, weight_at_bin: F) -> Result<StructuredAbundance>
    where
        F: Fn(usize, usize) -> f64,
    {
        let n_subdivisions = self.landings.n_subdivisions();
        let n_bins = self.landings.n_bins();
        let mut numbers = StructuredAbundance::zeros(n_subdivisions, n_bins);
        for subdivision in 0..n_subdivisions {
            for bin in 0..n_bins {
                let landed = self.landings.get(subdivision, bin);
                let weight = weight_at_bin(subdivision, bin);
                if !weight.is_finite() || weight < 0.0 {
                    bail!("weight at bin {subdivision}.{bin} must be finite and non-negative");
                }
                let count = if weight > 0.0 {
                    landed / weight
                } else if landed == 0.0 {
                    f64::NAN
                } else {
                    bail!(
                        "bin {subdivision}.{bin} has landings {landed} but zero weight per fish"
                    );
                };
                numbers.set(subdivision, bin, count);
            }
        }
        Ok(numbers)
    }
}

/// The contract shared by both sampling policies.
pub trait CatchAtLengthSampler {
    /// Add each tracked source's incremental landings to the accumulator.
    /// Call once per observation period (daily).
    fn observe(&mut self, sources: &[&dyn CatchSource]);

    /// Zero the accumulator on a reporting-period boundary.
    fn reset(&mut self);

    /// Revisit membership; called at least once per reporting year. A no-op
    /// for policies whose membership is fixed at start.
    fn recheck(&mut self, _sources: &[&dyn CatchSource], _year: usize, _rng: &mut ChaCha12Rng) {}

    fn landings(&self) -> &StructuredAbundance;

    fn abundance(&self, weight_at_bin: &dyn Fn(usize, usize) -> f64)
    -> Result<StructuredAbundance>;

    /// Read-only snapshot of the tracked source ids.
    fn tracked_ids(&self) -> Vec<usize>;

    fn is_tracked(&self, id: usize) -> bool;
}

/// Membership by per-source predicate, evaluated once when the sampler
/// starts and again for every source that appears later.
pub struct StochasticCatchSampler {
    selector: Box<dyn Fn(&dyn CatchSource, &mut ChaCha12Rng) -> bool>,
    tracked: BTreeSet<usize>,
    evaluated: BTreeSet<usize>,
    sample: CatchSample,
}

impl StochasticCatchSampler {
    pub fn new(
        n_subdivisions: usize,
        n_bins: usize,
        selector: Box<dyn Fn(&dyn CatchSource, &mut ChaCha12Rng) -> bool>,
    ) -> Self {
        Self {
            selector,
            tracked: BTreeSet::new(),
            evaluated: BTreeSet::new(),
            sample: CatchSample::new(n_subdivisions, n_bins),
        }
    }

    /// Selector that includes a source with a fixed probability for each
    /// matching tag.
    pub fn with_tag_probabilities(
        n_subdivisions: usize,
        n_bins: usize,
        probability_per_tag: BTreeMap<String, f64>,
    ) -> Self {
        Self::new(
            n_subdivisions,
            n_bins,
            Box::new(move |source, rng| {
                for (tag, probability) in &probability_per_tag {
                    if source.tags().iter().any(|candidate| candidate == tag)
                        && rng.random::<f64>() < *probability
                    {
                        return true;
                    }
                }
                false
            }),
        )
    }

    /// Evaluate the membership predicate for every source present at start.
    pub fn start(&mut self, sources: &[&dyn CatchSource], rng: &mut ChaCha12Rng) {
        for source in sources {
            self.on_source_added(*source, rng);
        }
    }

    /// Subscription callback for sources appearing after start. A source is
    /// evaluated exactly once; exclusion is never revisited outside this
    /// callback.
    pub fn on_source_added(&mut self, source: &dyn CatchSource, rng: &mut ChaCha12Rng) {
        if !self.evaluated.insert(source.id()) {
            return;
        }
        if (self.selector)(source, rng) {
            self.tracked.insert(source.id());
        }
    }
}

impl CatchAtLengthSampler for StochasticCatchSampler {
    fn observe(&mut self, sources: &[&dyn CatchSource]) {
        for source in sources {
            if self.tracked.contains(&source.id()) {
                self.sample.observe_source(*source);
            }
        }
    }

    fn reset(&mut self) {
        self.sample.reset();
    }

    fn landings(&self) -> &StructuredAbundance {
        self.sample.landings()
    }

    fn abundance(
        &self,
        weight_at_bin: &dyn Fn(usize, usize) -> f64,
    ) -> Result<StructuredAbundance> {
        self.sample.abundance(weight_at_bin)
    }

    fn tracked_ids(&self) -> Vec<usize> {
        self.tracked.iter().copied().collect()
    }

    fn is_tracked(&self, id: usize) -> bool {
        self.tracked.contains(&id)
    }
}

/// Membership by fixed quota: keep a target number of tracked sources per
/// tag, refilled from the active fleet on a yearly recheck.
pub struct FixedQuotaCatchSampler {
    quota_per_tag: BTreeMap<String, usize>,
    tracked_per_tag: BTreeMap<String, BTreeSet<usize>>,
    sample: CatchSample,
}

impl FixedQuotaCatchSampler {
    pub fn new(
        n_subdivisions: usize,
        n_bins: usize,
        quota_per_tag: BTreeMap<String, usize>,
    ) -> Self {
        let tracked_per_tag = quota_per_tag
            .keys()
            .map(|tag| (tag.clone(), BTreeSet::new()))
            .collect();
        Self {
            quota_per_tag,
            tracked_per_tag,
            sample: CatchSample::new(n_subdivisions, n_bins),
        }
    }

    /// Drop sources that went inactive and refill each tag up to its quota
    /// with a random draw from the active candidates. Call at least once per
    /// reporting year.
    pub fn recheck(&mut self, sources: &[&dyn CatchSource], year: usize, rng: &mut ChaCha12Rng) {
        let by_id: BTreeMap<usize, &dyn CatchSource> =
            sources.iter().map(|source| (source.id(), *source)).collect();

        // Sources inactive for the whole year are dropped, except in year 0
        // when no full year of history exists yet.
        if year > 0 {
            for tracked in self.tracked_per_tag.values_mut() {
                tracked.retain(|id| {
                    by_id
                        .get(id)
                        .is_some_and(|source| source.active_this_year())
                });
            }
        }

        let already_tracked: BTreeSet<usize> = self
            .tracked_per_tag
            .values()
            .flat_map(|tracked| tracked.iter().copied())
            .collect();
        let mut newly_tracked = already_tracked;

        for (tag, tracked) in self.tracked_per_tag.iter_mut() {
            let quota = self.quota_per_tag.get(tag).copied().unwrap_or(0);
            let shortfall = quota.saturating_sub(tracked.len());
            if shortfall == 0 {
                continue;
            }

            // Uniform random tie-break keys decide which candidates fill the
            // shortfall; a source tracked under a shared tag is not eligible
            // again.
            let mut candidates: Vec<(f64, usize)> = sources
                .iter()
                .filter(|source| {
                    source.active_this_year()
                        && source.tags().iter().any(|candidate| candidate == tag)
                        && !newly_tracked.contains(&source.id())
                })
                .map(|source| (rng.random::<f64>(), source.id()))
                .collect();
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            for (_, id) in candidates.into_iter().take(shortfall) {
                tracked.insert(id);
                newly_tracked.insert(id);
            }
        }
    }

    fn all_tracked(&self) -> BTreeSet<usize> {
        self.tracked_per_tag
            .values()
            .flat_map(|tracked| tracked.iter().copied())
            .collect()
    }
}

impl CatchAtLengthSampler for FixedQuotaCatchSampler {
    fn recheck(&mut self, sources: &[&dyn CatchSource], year: usize, rng: &mut ChaCha12Rng) {
        FixedQuotaCatchSampler::recheck(self, sources, year, rng);
    }

    fn observe(&mut self, sources: &[&dyn CatchSource]) {
        let tracked = self.all_tracked();
        for source in sources {
            if tracked.contains(&source.id()) {
                self.sample.observe_source(*source);
            }
        }
    }

    fn reset(&mut self) {
        self.sample.reset();
    }

    fn landings(&self) -> &StructuredAbundance {
        self.sample.landings()
    }

    fn abundance(
        &self,
        weight_at_bin: &dyn Fn(usize, usize) -> f64,
    ) -> Result<StructuredAbundance> {
        self.sample.abundance(weight_at_bin)
    }

    fn tracked_ids(&self) -> Vec<usize> {
        self.all_tracked().into_iter().collect()
    }

    fn is_tracked(&self, id: usize) -> bool {
        self.tracked_per_tag
            .values()
            .any(|tracked| tracked.contains(&id))
    }
}
