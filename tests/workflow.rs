use std::{fs, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_contents = r#"
[species]
name = "yellowback"
l_inf = 80.0
k = 0.5
l_zero = 0.0
allometric_alpha = 0.01
allometric_beta = 3.0
n_bins = 40
subdivisions = 1

[population]
virgin_recruits = 1000.0
natural_mortality = 0.3
steepness = 0.8
recruitment_noise = 0.0
length_at_maturity = 40.0
spinup_years = 60

[fleet]
n_vessels = 4
fishing_mortality = 0.4
selectivity_l50 = 30.0
selectivity_l95 = 45.0

[assessment]
survey_tag = "spr_agent"
formula = "tnc"
sampling = "stochastic"
sampling_probability = 1.0
quota = 2
cv_l_inf = 0.1
length_bin_cm = 5.0
max_age = 60

[output]
years = 2
seed = 42
"#;

    let config_path = test_dir.join("config.toml");
    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_sprat"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        assert!(
            output.status.success(),
            "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "create"]);
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    assert!(test_dir.join("run-0000/records.msgpack").is_file());
    assert!(test_dir.join("run-0001/catch.msgpack").is_file());

    // the same seed reproduces the run exactly
    let records_a =
        fs::read(test_dir.join("run-0000/records.msgpack")).expect("failed to read records");
    let records_b =
        fs::read(test_dir.join("run-0001/records.msgpack")).expect("failed to read records");
    assert_eq!(records_a, records_b);

    run_bin(&["--sim-dir", test_dir_str, "assess", "--run-idx", "0"]);
    assert!(test_dir.join("run-0000/estimate.msgpack").is_file());

    run_bin(&["--sim-dir", test_dir_str, "virgin"]);
    assert!(test_dir.join("virgin.msgpack").is_file());

    run_bin(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}
