use sprat::lbspr;

fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (index, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a - e).abs() < tol,
            "index {index}: {a} differs from {e} by more than {tol}"
        );
    }
}

// The numbers in these tests were computed in R (DLMtool's LBSPR routines)
// for the same inputs.

#[test]
fn age_to_length_key_matches_reference() {
    let bin_mids: Vec<f64> = (0..21).map(|bin| bin as f64 * 5.0 + 2.5).collect();
    let key = lbspr::build_age_to_length_key(&bin_mids, 1.5, 100.0, 0.1, 100).unwrap();

    let relative = key.relative_length_at_age();
    assert_eq!(relative.len(), 101);
    assert!((relative[0] - 0.0).abs() < 1e-12);
    assert!((relative[1] - 0.0302346408917507).abs() < 1e-9);
    assert!((relative[9] - 0.241422424970816).abs() < 1e-9);
    assert!((relative[49] - 0.777839590804419).abs() < 1e-9);
    assert!((relative[74] - 0.896882272540695).abs() < 1e-9);
    // at age 75 the exponent is exactly 1/2, so the relative length is
    // exactly 1 - sqrt(0.01)
    assert!((relative[75] - 0.9).abs() < 1e-12);
    assert!((relative[100] - 0.953584111663872).abs() < 1e-9);

    // age 0 has zero standard deviation and an all-zero row
    assert!(key.row(0).iter().all(|&p| p == 0.0));

    assert_close(
        key.row(9),
        &[
            0.0,
            0.0,
            0.0,
            0.0,
            0.676083996633745,
            0.323916003366255,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
        ],
        1e-3,
    );
    assert_close(
        key.row(49),
        &[
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0380479211891531,
            0.109432932410976,
            0.208216346994095,
            0.262078437645448,
            0.218221452273814,
            0.120202437543582,
            0.0438004719429317,
            0.0,
            0.0,
        ],
        1e-3,
    );
    assert_close(
        key.row(98),
        &[
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0147408071584518,
            0.0447332732716233,
            0.102943763385379,
            0.179650882000543,
            0.237748954698158,
            0.238598565526688,
            0.181583753959157,
        ],
        1e-3,
    );
}

fn reference_bin_mids() -> Vec<f64> {
    (0..43).map(|bin| (bin + 1) as f64 * 2.5).collect()
}

fn reference_maturity() -> Vec<f64> {
    let mut maturity = vec![0.0; 43];
    maturity[19] = 0.5;
    for bin in 20..43 {
        maturity[bin] = 1.0;
    }
    maturity
}

#[test]
fn spr_formula_matches_reference() {
    let bin_mids = reference_bin_mids();
    let maturity = reference_maturity();
    let key = lbspr::build_age_to_length_key(&bin_mids, 1.5, 100.0, 0.1, 100).unwrap();

    let theoretical = lbspr::spr_formula(30.0, 50.0, 1.2, &bin_mids, 1.5, &maturity, 0.01, &key);

    assert!((theoretical.spr - 0.2692).abs() < 1e-4);
    assert_close(
        &theoretical.catch_at_length,
        &[
            0.002728, 0.003731, 0.002341, 0.006383, 0.009351, 0.012567, 0.016806, 0.02228,
            0.028641, 0.035723, 0.042553, 0.050446, 0.056415, 0.060525, 0.062533, 0.062506,
            0.060939, 0.05794, 0.054172, 0.049845, 0.045279, 0.040631, 0.035691, 0.031429,
            0.027384, 0.023597, 0.019933, 0.016807, 0.013852, 0.011375, 0.009111, 0.007172,
            0.005542, 0.004195, 0.003106, 0.002242, 0.001576, 0.001058, 0.000687, 0.000429,
            0.000258, 0.000145, 7.4e-05,
        ],
        1e-4,
    );
}

fn reference_observed() -> Vec<f64> {
    let mut observed: Vec<f64> = (0..32).map(|bin| (bin + 1) as f64 * 2.5).collect();
    observed.extend(std::iter::repeat_n(0.0, 11));
    observed
}

#[test]
fn negative_log_likelihood_matches_reference() {
    let likelihood = lbspr::negative_log_likelihood(
        &reference_observed(),
        0.3,
        0.1,
        1.5_f64.ln(),
        100.0,
        0.1,
        &reference_bin_mids(),
        1.5,
        &reference_maturity(),
        0.01,
    )
    .unwrap();

    assert!((likelihood - 861.6453).abs() < 1e-4);
}

#[test]
fn estimate_fits_the_reference_catch() {
    let estimate = lbspr::estimate(
        &reference_observed(),
        100.0,
        0.1,
        &reference_bin_mids(),
        1.5,
        &reference_maturity(),
        0.01,
    )
    .unwrap();

    // DLMtool's fit of this catch lands at SL50 = 69.7, F/M = 2.6,
    // SPR = 0.43; a different simplex start justifies a loose tolerance
    assert!(
        (estimate.length_at_50_percent_selectivity - 69.72).abs() < 0.15 * 69.72,
        "sl50 was {}",
        estimate.length_at_50_percent_selectivity
    );
    assert!(
        (estimate.spr - 0.426).abs() < 0.1,
        "spr was {}",
        estimate.spr
    );
    assert!(estimate.fishing_to_natural_mortality > 1.5);
    assert!(estimate.likelihood.is_finite());
}

#[test]
fn estimate_recovers_synthetic_parameters() {
    let bin_mids = reference_bin_mids();
    let maturity = reference_maturity();
    let key = lbspr::build_age_to_length_key(&bin_mids, 1.5, 100.0, 0.1, 100).unwrap();

    // generate a catch from known parameters, then fit it back
    let sl50 = 50.0;
    let sl95 = 60.0;
    let fm_ratio = 1.0;
    let theoretical = lbspr::spr_formula(
        sl50, sl95, fm_ratio, &bin_mids, 1.5, &maturity, 3.0, &key,
    );
    let observed: Vec<f64> = theoretical
        .catch_at_length
        .iter()
        .map(|&proportion| proportion * 1000.0)
        .collect();

    let estimate =
        lbspr::estimate(&observed, 100.0, 0.1, &bin_mids, 1.5, &maturity, 3.0).unwrap();

    assert!(
        (estimate.length_at_50_percent_selectivity - sl50).abs() < 0.15 * sl50,
        "sl50 was {}",
        estimate.length_at_50_percent_selectivity
    );
    assert!(
        (estimate.spr - theoretical.spr).abs() < 0.1,
        "spr was {} instead of {}",
        estimate.spr,
        theoretical.spr
    );
}

#[test]
fn maturity_straddles_the_threshold() {
    let bin_mids = reference_bin_mids();
    let maturity = lbspr::maturity_per_bin(&bin_mids, 2.5, 50.0);
    assert_eq!(maturity, reference_maturity());
}

#[test]
fn estimate_rejects_mismatched_shapes() {
    let result = lbspr::estimate(
        &[1.0, 2.0],
        100.0,
        0.1,
        &reference_bin_mids(),
        1.5,
        &reference_maturity(),
        3.0,
    );
    assert!(result.is_err());
}
