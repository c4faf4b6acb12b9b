use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use sprat::abundance::StructuredAbundance;
use sprat::aging::{FixedProportionAging, TransitionAging};
use sprat::assessment::{AssumedBiology, LbsprFormula, SprAgent, TncFormula};
use sprat::engine::virgin_population;
use sprat::growth::{GrowthCurve, Species};
use sprat::length::CatchAtLength;
use sprat::mortality::{MortalitySchedule, fishing_mortality_rate};
use sprat::recruitment::BevertonHoltRecruitment;
use sprat::sampler::{
    CatchAtLengthSampler, CatchSample, CatchSource, FixedQuotaCatchSampler,
    StochasticCatchSampler,
};
use sprat::transition::SullivanTransitionProbability;
use std::collections::BTreeMap;

fn test_species() -> Species {
    let curve = GrowthCurve::equally_spaced(100.0, 0.0, 1.0, 1.0, 3.0, 101).unwrap();
    Species::new("test", curve, 1).unwrap()
}

struct TestSource {
    id: usize,
    tags: Vec<String>,
    landings: Vec<Vec<f64>>,
    active: bool,
    effort: f64,
}

impl TestSource {
    fn new(id: usize, tag: &str, n_subdivisions: usize, n_bins: usize) -> Self {
        Self {
            id,
            tags: vec![tag.to_string()],
            landings: vec![vec![0.0; n_bins]; n_subdivisions],
            active: true,
            effort: 1.0,
        }
    }
}

impl CatchSource for TestSource {
    fn id(&self) -> usize {
        self.id
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn landed_weight(&self, subdivision: usize, bin: usize) -> f64 {
        self.landings[subdivision][bin]
    }

    fn active_this_year(&self) -> bool {
        self.active
    }

    fn yearly_effort(&self) -> f64 {
        self.effort
    }
}

#[test]
fn transition_rows_sum_to_one() {
    let builder = SullivanTransitionProbability::new(5.0, 100.0, 0.5, 1.0).unwrap();
    let matrix = builder.matrix(25, 5.0).unwrap();

    for depart in 0..matrix.n_bins() {
        let sum: f64 = matrix.row(depart).iter().sum();
        assert!(
            (sum - 1.0).abs() < 1e-6,
            "row {depart} sums to {sum}"
        );
        // fish cannot shrink
        for arrive in 0..depart {
            assert_eq!(matrix.probability(depart, arrive), 0.0);
        }
    }
}

#[test]
fn transition_rejects_an_inconsistent_domain() {
    // a scaling this large pushes the gamma shape negative for the top bins
    let builder = SullivanTransitionProbability::new(1.0, 10.0, 1.0, 10.0).unwrap();
    assert!(builder.matrix(10, 5.0).is_err());
}

#[test]
fn fixed_proportion_aging_conserves_total() {
    let curve = GrowthCurve::equally_spaced(100.0, 0.0, 0.5, 1.0, 3.0, 25).unwrap();
    let aging = FixedProportionAging::new(&curve, 1.0).unwrap();

    let counts: Vec<f64> = (0..25).map(|bin| 100.0 + bin as f64 * 3.0).collect();
    let mut abundance = StructuredAbundance::from_counts(vec![counts]).unwrap();
    let total_before = abundance.total();

    for _ in 0..100 {
        aging.age_locally(&mut abundance).unwrap();
    }

    assert!((abundance.total() - total_before).abs() < 1e-9 * total_before);
    // mass only moves toward the terminal bin
    assert!(abundance.get(0, 0) < 100.0);
    assert!(abundance.get(0, 24) > 172.0);
}

#[test]
fn transition_aging_conserves_total() {
    let builder = SullivanTransitionProbability::new(5.0, 100.0, 0.5, 1.0).unwrap();
    let matrix = builder.matrix(25, 5.0).unwrap();
    let aging = TransitionAging::new(matrix);

    let mut abundance =
        StructuredAbundance::from_counts(vec![vec![40.0; 25], vec![10.0; 25]]).unwrap();
    let total_before = abundance.total();

    aging.age_locally(&mut abundance).unwrap();

    assert!((abundance.total() - total_before).abs() < 1e-8 * total_before);
}

#[test]
fn catch_sample_round_trips_landings() {
    let species = test_species();
    let mut sample = CatchSample::new(1, species.n_bins());
    let mut source = TestSource::new(0, "fleet", 1, species.n_bins());
    for bin in 40..60 {
        source.landings[0][bin] = 2.0 * species.weight(0, bin);
    }
    sample.observe_source(&source);

    let numbers = sample
        .abundance(|subdivision, bin| species.weight(subdivision, bin))
        .unwrap();
    for bin in 0..species.n_bins() {
        let weight = species.weight(0, bin);
        if weight > 0.0 {
            let reproduced = numbers.get(0, bin) * weight;
            assert!((reproduced - sample.landings().get(0, bin)).abs() < 1e-9);
        } else {
            // weight-at-bin undefined at zero length
            assert!(numbers.get(0, bin).is_nan());
        }
    }
}

#[test]
fn catch_at_length_clamps_overlong_fish() {
    let abundance = StructuredAbundance::from_counts(vec![vec![3.0, 4.0]]).unwrap();
    let catch_at_length = CatchAtLength::build(
        &abundance,
        |_, bin| if bin == 0 { 12.0 } else { 500.0 },
        10.0,
        3,
    )
    .unwrap();

    // fish longer than the last class accumulate in the terminal class
    assert_eq!(catch_at_length.counts(), &[0.0, 3.0, 4.0]);
    assert_eq!(catch_at_length.total(), 7.0);
}

#[test]
fn catch_sample_rejects_landings_with_zero_weight() {
    let mut sample = CatchSample::new(1, 3);
    let mut source = TestSource::new(0, "fleet", 1, 3);
    source.landings[0][0] = 5.0;
    sample.observe_source(&source);

    assert!(sample.abundance(|_, _| 0.0).is_err());
}

#[test]
fn fishing_mortality_boundaries() {
    assert_eq!(fishing_mortality_rate(0.0, 100.0), 0.0);
    assert_eq!(fishing_mortality_rate(100.0, 100.0), f64::INFINITY);
    assert!(fishing_mortality_rate(10.0, 0.0).is_nan());

    // approaching full removal from below blows up smoothly
    let almost = fishing_mortality_rate(99.99, 100.0);
    assert!(almost > 9.0 && almost.is_finite());
}

#[test]
fn fixed_quota_sampler_tracks_exactly_the_target() {
    let sources: Vec<TestSource> = (0..5).map(|id| TestSource::new(id, "tagA", 1, 10)).collect();
    let views: Vec<&dyn CatchSource> = sources
        .iter()
        .map(|source| source as &dyn CatchSource)
        .collect();

    let quota: BTreeMap<String, usize> = [("tagA".to_string(), 3)].into_iter().collect();
    let mut sampler = FixedQuotaCatchSampler::new(1, 10, quota.clone());
    let mut rng = ChaCha12Rng::seed_from_u64(7);
    sampler.recheck(&views, 0, &mut rng);

    let tracked = sampler.tracked_ids();
    assert_eq!(tracked.len(), 3);

    // the same seed reproduces the same draw
    let mut sampler_again = FixedQuotaCatchSampler::new(1, 10, quota);
    let mut rng_again = ChaCha12Rng::seed_from_u64(7);
    sampler_again.recheck(&views, 0, &mut rng_again);
    assert_eq!(sampler_again.tracked_ids(), tracked);
}

#[test]
fn fixed_quota_sampler_replaces_inactive_sources() {
    let mut sources: Vec<TestSource> =
        (0..5).map(|id| TestSource::new(id, "tagA", 1, 10)).collect();
    let quota: BTreeMap<String, usize> = [("tagA".to_string(), 2)].into_iter().collect();
    let mut sampler = FixedQuotaCatchSampler::new(1, 10, quota);
    let mut rng = ChaCha12Rng::seed_from_u64(11);

    {
        let views: Vec<&dyn CatchSource> = sources
            .iter()
            .map(|source| source as &dyn CatchSource)
            .collect();
        sampler.recheck(&views, 0, &mut rng);
    }
    let first_tracked = sampler.tracked_ids();
    assert_eq!(first_tracked.len(), 2);

    for id in &first_tracked {
        sources[*id].active = false;
    }
    let views: Vec<&dyn CatchSource> = sources
        .iter()
        .map(|source| source as &dyn CatchSource)
        .collect();
    sampler.recheck(&views, 1, &mut rng);

    let second_tracked = sampler.tracked_ids();
    assert_eq!(second_tracked.len(), 2);
    for id in &first_tracked {
        assert!(!second_tracked.contains(id));
    }
}

#[test]
fn stochastic_sampler_membership_follows_the_predicate() {
    let sources: Vec<TestSource> = (0..4).map(|id| TestSource::new(id, "fleet", 1, 10)).collect();
    let views: Vec<&dyn CatchSource> = sources
        .iter()
        .map(|source| source as &dyn CatchSource)
        .collect();
    let mut rng = ChaCha12Rng::seed_from_u64(3);

    let mut all_in = StochasticCatchSampler::with_tag_probabilities(
        1,
        10,
        [("fleet".to_string(), 1.0)].into_iter().collect(),
    );
    all_in.start(&views, &mut rng);
    assert_eq!(all_in.tracked_ids().len(), 4);

    let mut none_in = StochasticCatchSampler::with_tag_probabilities(
        1,
        10,
        [("fleet".to_string(), 0.0)].into_iter().collect(),
    );
    none_in.start(&views, &mut rng);
    assert!(none_in.tracked_ids().is_empty());

    // a source is evaluated once; re-announcing it changes nothing
    none_in.on_source_added(&sources[0], &mut rng);
    assert!(none_in.tracked_ids().is_empty());
}

#[test]
fn virgin_population_reaches_the_analytic_total() {
    let species = test_species();
    let aging = FixedProportionAging::new(species.curve(), 1.0).unwrap();
    let mortality = MortalitySchedule::Instantaneous(0.5);

    let years = 50;
    let abundance = virgin_population(&species, &aging, &mortality, 1000.0, years).unwrap();

    // aging conserves counts, so the total is the sum of the surviving
    // yearly cohorts
    let survival = (-0.5_f64).exp();
    let expected = 1000.0 * (1.0 - survival.powi(years as i32)) / (1.0 - survival);
    assert!((abundance.total() - expected).abs() < 1e-6 * expected);
}

#[test]
fn beverton_holt_reproduces_virgin_recruits_at_virgin_biomass() {
    let species = test_species();
    let maturity: Vec<f64> = (0..species.n_bins())
        .map(|bin| if species.length(0, bin) >= 50.0 { 1.0 } else { 0.0 })
        .collect();

    let aging = FixedProportionAging::new(species.curve(), 1.0).unwrap();
    let mortality = MortalitySchedule::Instantaneous(0.4);
    let virgin = virgin_population(&species, &aging, &mortality, 1000.0, 200).unwrap();

    let recruitment = BevertonHoltRecruitment::new(0.8, 1000.0, 0.0, maturity.clone()).unwrap();
    let virgin_ssb = recruitment.spawning_biomass(&species, &virgin);
    let recruitment =
        BevertonHoltRecruitment::new(0.8, 1000.0, virgin_ssb, maturity).unwrap();

    let mut rng = ChaCha12Rng::seed_from_u64(1);
    let recruits = recruitment.recruit(&species, &virgin, &mut rng).unwrap();
    assert!((recruits - 1000.0).abs() < 1e-6 * 1000.0);

    // a halved stock produces fewer recruits, but more than half as many
    let mut halved = virgin.clone();
    for bin in 0..halved.n_bins() {
        let count = halved.get(0, bin);
        halved.set(0, bin, count / 2.0);
    }
    let halved_recruits = recruitment.recruit(&species, &halved, &mut rng).unwrap();
    assert!(halved_recruits < recruits);
    assert!(halved_recruits > recruits / 2.0);
}

fn agent_with_catch(length_at_maturity: f64, lbspr: bool) -> SprAgent {
    let species = test_species();
    let n_bins = species.n_bins();

    let mut source = TestSource::new(0, "fleet", 1, n_bins);
    let lengths_caught = [
        45, 46, 47, 48, 49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64, 65, 66,
        67, 68, 69, 70, 71, 72, 73, 75, 81,
    ];
    for &bin in &lengths_caught {
        source.landings[0][bin] = species.weight(0, bin);
    }

    let mut rng = ChaCha12Rng::seed_from_u64(5);
    let mut sampler = StochasticCatchSampler::with_tag_probabilities(
        1,
        n_bins,
        [("fleet".to_string(), 1.0)].into_iter().collect(),
    );
    let views: Vec<&dyn CatchSource> = vec![&source];
    sampler.start(&views, &mut rng);
    sampler.observe(&views);

    let assumed = AssumedBiology {
        l_inf: 100.0,
        k: 1.0,
        natural_mortality: 1.5,
        max_age: 100,
        virgin_recruits: 1000.0,
        length_bin_cm: 5.0,
        allometric_alpha: 1.0,
        allometric_beta: 3.0,
        length_at_maturity,
        cv_l_inf: 0.1,
    };
    let formula: Box<dyn sprat::assessment::SprFormula> = if lbspr {
        Box::new(LbsprFormula)
    } else {
        Box::new(TncFormula::new(false))
    };
    SprAgent::new("survey", species, assumed, Box::new(sampler), formula).unwrap()
}

#[test]
fn maturity_and_lopt_ratios_are_bounded_and_monotone() {
    let strict = agent_with_catch(52.0, false);
    let lax = agent_with_catch(40.0, false);

    let strict_maturity = strict.compute_maturity_ratio().unwrap();
    let lax_maturity = lax.compute_maturity_ratio().unwrap();
    assert!((0.0..=1.0).contains(&strict_maturity));
    assert!((0.0..=1.0).contains(&lax_maturity));
    // lowering the threshold counts more of the catch as mature
    assert!(lax_maturity >= strict_maturity);

    let lopt = strict.compute_lopt_ratio().unwrap();
    assert!((0.0..=1.0).contains(&lopt));

    let mean_length = strict.compute_mean_length().unwrap();
    assert!(mean_length > 45.0 && mean_length < 81.0);
}

#[test]
fn spr_agent_estimates_spr_from_the_sampled_catch() {
    let agent = agent_with_catch(52.0, true);
    let spr = agent.compute_spr().unwrap();

    // a DLMtool fit of this catch lands at 0.33
    assert!(spr > 0.2 && spr < 0.5, "spr was {spr}");
}

#[test]
fn empty_sample_reports_nan() {
    let species = test_species();
    let n_bins = species.n_bins();
    let sampler = StochasticCatchSampler::with_tag_probabilities(
        1,
        n_bins,
        [("fleet".to_string(), 1.0)].into_iter().collect(),
    );
    let assumed = AssumedBiology {
        l_inf: 100.0,
        k: 1.0,
        natural_mortality: 1.5,
        max_age: 100,
        virgin_recruits: 1000.0,
        length_bin_cm: 5.0,
        allometric_alpha: 1.0,
        allometric_beta: 3.0,
        length_at_maturity: 52.0,
        cv_l_inf: 0.1,
    };
    let agent = SprAgent::new(
        "survey",
        species,
        assumed,
        Box::new(sampler),
        Box::new(LbsprFormula),
    )
    .unwrap();

    assert!(agent.compute_spr().unwrap().is_nan());
    assert!(agent.compute_maturity_ratio().unwrap().is_nan());
    assert!(agent.compute_cpue(&[]).is_nan());
}
