//! Persisted point sets reproduce the flexibility area of the run that wrote them.

use flex_algo::{
    flexibility_area, run_monte_carlo, select_fsps, AcPowerFlowSolver, Distribution,
    FeasibilityEvaluator, FspCategory, FspKind, FspSelection, Limits, MonteCarloConfig,
    Observability, SamplerConfig,
};
use flex_io::{cigre_mv_pv_wind, read_point_set, result_path, write_hull_vertices, write_point_set};
use tempfile::tempdir;

#[test]
fn cigre_base_case_converges() {
    let network = cigre_mv_pv_wind().unwrap();
    let solution = AcPowerFlowSolver::new().solve(&network).unwrap();
    let load: f64 = network.loads().iter().map(|l| l.active_power.value()).sum();
    let generation: f64 = network.sgens().iter().map(|s| s.active_power.value()).sum();
    let losses = solution.ext_grid_p_mw - (load - generation);
    assert!(losses > 0.0 && losses < 2.0, "losses {losses}");
}

#[test]
fn csv_round_trip_reproduces_flexibility_area() {
    let network = cigre_mv_pv_wind().unwrap();
    let selection = FspSelection {
        category: FspCategory::DgOnly,
        ..Default::default()
    };
    let fsps = select_fsps(&network, &selection).unwrap();
    assert_eq!(fsps.len(), 9);
    let evaluator =
        FeasibilityEvaluator::new(&network, &fsps, &Observability::default(), Limits::default())
            .unwrap();
    let config = MonteCarloConfig {
        sampler: SamplerConfig {
            distribution: Distribution::Uniform,
            keep_mp: false,
            no_samples: 40,
            seed: 21,
        },
        workers: 2,
    };
    let run = run_monte_carlo(&evaluator, &config).unwrap();

    let dir = tempdir().unwrap();
    let path = result_path(dir.path().join("results"), "Normal Model");
    write_point_set(&path, &fsps, &run.results).unwrap();

    let loaded = read_point_set(&path).unwrap();
    loaded.check_fsps(&fsps).unwrap();
    assert_eq!(loaded.results, run.results);
    assert_eq!(flexibility_area(&loaded.results), flexibility_area(&run.results));

    let hull_path = dir.path().join("hull.csv");
    write_hull_vertices(&hull_path, &flexibility_area(&loaded.results)).unwrap();
    let rows = std::fs::read_to_string(&hull_path).unwrap().lines().count();
    assert_eq!(rows, flexibility_area(&run.results).vertices().len() + 1);
}

#[test]
fn keep_mp_dg_run_spans_an_area() {
    // CIGRE DG is installed at its rating, so the only freedom left with the
    // active power kept is the power factor.
    let network = cigre_mv_pv_wind().unwrap();
    let selection = FspSelection {
        category: FspCategory::DgOnly,
        ..Default::default()
    };
    let fsps = select_fsps(&network, &selection).unwrap();
    let limits = Limits {
        min_volt_pu: 0.9,
        max_volt_pu: 1.1,
        max_curr_per: 100.0,
    };
    let evaluator =
        FeasibilityEvaluator::new(&network, &fsps, &Observability::default(), limits).unwrap();
    let config = MonteCarloConfig {
        sampler: SamplerConfig {
            distribution: Distribution::Uniform,
            keep_mp: true,
            no_samples: 60,
            seed: 21,
        },
        workers: 2,
    };
    let run = run_monte_carlo(&evaluator, &config).unwrap();

    let wind = fsps.iter().position(|f| f.kind == FspKind::Wind).unwrap();
    let max_wind_q = run
        .results
        .iter()
        .map(|r| r.perturbation.setpoints[wind].q.value().abs())
        .fold(0.0, f64::max);
    assert!(max_wind_q > 0.5, "wind |Q| stays at {max_wind_q}");

    let hull = flexibility_area(&run.results);
    assert!(!hull.is_degenerate(), "{hull}");
    assert!(hull.area() > 0.1, "{hull}");
}

#[test]
fn stored_fsp_columns_must_match_selection() {
    let network = cigre_mv_pv_wind().unwrap();
    let all = select_fsps(&network, &FspSelection::default()).unwrap();
    let dg_only = select_fsps(
        &network,
        &FspSelection {
            category: FspCategory::DgOnly,
            ..Default::default()
        },
    )
    .unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("Flexibility_area_empty.csv");
    write_point_set(&path, &all, &[]).unwrap();
    let loaded = read_point_set(&path).unwrap();
    assert!(loaded.results.is_empty());
    assert_eq!(loaded.fsp_labels.len(), 27);
    assert!(loaded.check_fsps(&all).is_ok());
    assert!(loaded.check_fsps(&dg_only).is_err());
}
