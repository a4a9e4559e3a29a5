//! Scenario files load from JSON and YAML and drive the shifted CIGRE feeder.

use flex_algo::{compare_states, AcPowerFlowSolver, ObservedSet, StateSummary};
use flex_scenarios::{load_config_from_path, prepare_networks, resolve_scenario, ScenarioShift};
use std::fs;
use tempfile::tempdir;

#[test]
fn json_and_yaml_files_resolve_identically() {
    let dir = tempdir().unwrap();
    let json = dir.path().join("uss.json");
    fs::write(
        &json,
        r#"{
            "name": "USS 2",
            "scenario_settings": {
                "no_samples": 250,
                "FSPs": "Load only",
                "FSP_load_indices": [0, 8],
                "scenario_type": {"name": "USS", "no.": 2},
                "comparison": [{"label": "Normal Model", "file": "results/Flexibility_area_Normal_Model.csv"}]
            }
        }"#,
    )
    .unwrap();
    let yaml = dir.path().join("uss.yaml");
    fs::write(
        &yaml,
        "name: USS 2\n\
         scenario_settings:\n\
         \x20 no_samples: 250\n\
         \x20 FSPs: Load only\n\
         \x20 FSP_load_indices: [0, 8]\n\
         \x20 scenario_type:\n\
         \x20   name: USS\n\
         \x20   no.: 2\n\
         \x20 comparison:\n\
         \x20   - label: Normal Model\n\
         \x20     file: results/Flexibility_area_Normal_Model.csv\n",
    )
    .unwrap();

    let from_json = resolve_scenario(&load_config_from_path(&json).unwrap()).unwrap();
    let from_yaml = resolve_scenario(&load_config_from_path(&yaml).unwrap()).unwrap();
    assert_eq!(from_json, from_yaml);
    assert_eq!(from_json.shift, ScenarioShift::Uss(2));
    assert_eq!(from_json.comparison.len(), 1);
}

#[test]
fn malformed_file_is_configuration_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{\"scenario_settings\": ").unwrap();
    assert!(load_config_from_path(&path).unwrap_err().is_configuration());
    let missing = dir.path().join("missing.yaml");
    assert!(load_config_from_path(&missing).unwrap_err().is_configuration());
}

#[test]
fn topology_shift_changes_observed_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tss.json");
    fs::write(
        &path,
        r#"{"name": "TSS 3", "scenario_settings": {"scenario_type": {"name": "TSS", "no.": 3}}}"#,
    )
    .unwrap();
    let scenario = resolve_scenario(&load_config_from_path(&path).unwrap()).unwrap();
    let networks = prepare_networks(&scenario).unwrap();

    let solver = AcPowerFlowSolver::new();
    let observed = ObservedSet::resolve(&networks.unaltered, &scenario.observability).unwrap();
    let before = solver.solve(&networks.unaltered).unwrap();
    let after = solver.solve(&networks.altered).unwrap();
    let table = compare_states(
        &StateSummary::from_solution(&networks.unaltered, &before, &observed),
        &StateSummary::from_solution(&networks.altered, &after, &observed),
    );

    // Net demand is unchanged up to 0.01 MW, so the PCC only moves by losses.
    let pcc_p = table.get("PCC P [MW]").unwrap();
    assert!(pcc_p.delta.abs() < 1.0, "PCC moved by {}", pcc_p.delta);
    let line_row = table.get("Non-Obs. line 9 P [MW]").unwrap();
    assert!(line_row.altered.abs() < 1e-9);
    assert!(line_row.unaltered.abs() > 1e-3);
}
