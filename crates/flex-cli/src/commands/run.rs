use anyhow::{bail, Context, Result};
use flex_algo::{
    feasible_points, flexibility_area, multiplicity_grid, run_monte_carlo, ComparisonTable,
    FeasibilityEvaluator, HullOutcome, PqPoint, RunSummary, TrialResult,
};
use flex_algo::hull::CONTAINMENT_TOLERANCE;
use flex_io::{
    hull_path, multiplicity_path, read_point_set, write_hull_vertices, write_multiplicity,
    write_point_set,
};
use serde::Serialize;
use std::io::{stdout, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::commands::compare::shift_comparison;
use crate::commands::{load_scenario, LoadedScenario};
use flex_cli::common::{write_comparison_table, write_json, write_run_summary, OutputFormat};
use flex_cli::RunOverrides;

#[derive(Debug, Serialize)]
struct RunReport {
    scenario: String,
    shift: String,
    fsps: Vec<String>,
    /// False when the persisted point set was reused.
    sampled: bool,
    point_set: PathBuf,
    summary: RunSummary,
    /// PCC exchange of the sampled network with every FSP at its baseline
    operating_point: Option<PqPoint>,
    operating_point_inside: bool,
    hull: HullOutcome,
    shift_comparison: Option<ComparisonTable>,
}

pub fn handle(path: &Path, overrides: &RunOverrides, format: OutputFormat) -> Result<()> {
    let LoadedScenario {
        mut scenario,
        networks,
        fsps,
    } = load_scenario(path)?;

    if let Some(samples) = overrides.samples {
        if samples == 0 {
            bail!("--samples must be positive");
        }
        scenario.monte_carlo.sampler.no_samples = samples;
    }
    if let Some(workers) = overrides.workers {
        scenario.monte_carlo.workers = workers;
    }
    if let Some(seed) = overrides.seed {
        scenario.monte_carlo.sampler.seed = seed;
    }
    if let Some(dir) = &overrides.results_dir {
        scenario.results_dir = dir.clone();
    }
    info!(
        scenario = %scenario.name,
        shift = %scenario.shift,
        fsps = fsps.len(),
        "scenario loaded"
    );

    let shift_table = if scenario.shift.is_unaltered() {
        None
    } else {
        Some(shift_comparison(&scenario, &networks)?)
    };

    let evaluator = FeasibilityEvaluator::new(
        &networks.altered,
        &fsps,
        &scenario.observability,
        scenario.limits,
    )?
    .with_solver(scenario.solver.clone());
    let baseline = evaluator.evaluate_baseline()?;

    let point_set = scenario.result_path();
    let (results, summary): (Vec<TrialResult>, RunSummary) = if scenario.sample {
        let run = run_monte_carlo(&evaluator, &scenario.monte_carlo)?;
        write_point_set(&point_set, &fsps, &run.results)?;
        (run.results, run.summary)
    } else {
        let stored = read_point_set(&point_set)
            .with_context(|| format!("reusing the point set of '{}'", scenario.name))?;
        stored.check_fsps(&fsps)?;
        let summary = RunSummary::from_results(&stored.results);
        (stored.results, summary)
    };

    let hull = flexibility_area(&results);
    write_hull_vertices(&hull_path(&scenario.results_dir, &scenario.name), &hull)?;
    let grid = multiplicity_grid(&feasible_points(&results), scenario.multiplicity_decimals);
    write_multiplicity(
        &multiplicity_path(&scenario.results_dir, &scenario.name),
        &grid,
    )?;

    let operating_point_inside = match (baseline.pcc, hull.as_area()) {
        (Some(pcc), Some(area)) => area.contains_point(&pcc, CONTAINMENT_TOLERANCE),
        _ => false,
    };
    let report = RunReport {
        scenario: scenario.name.clone(),
        shift: scenario.shift.to_string(),
        fsps: fsps.iter().map(|f| f.label()).collect(),
        sampled: scenario.sample,
        point_set,
        summary,
        operating_point: baseline.pcc,
        operating_point_inside,
        hull,
        shift_comparison: shift_table,
    };

    match format {
        OutputFormat::Json => write_json(&report, &mut stdout()),
        OutputFormat::Table => print_report(&report),
    }
}

fn print_report(report: &RunReport) -> Result<()> {
    let mut out = stdout().lock();
    writeln!(out, "Scenario: {} ({})", report.scenario, report.shift)?;
    writeln!(out, "FSPs ({}): {}", report.fsps.len(), report.fsps.join(", "))?;
    if let Some(table) = &report.shift_comparison {
        writeln!(out)?;
        write_comparison_table(table, &mut out)?;
    }
    writeln!(out)?;
    match report.operating_point {
        Some(pcc) => writeln!(
            out,
            "Operating point: {pcc} ({} the flexibility area)",
            if report.operating_point_inside {
                "inside"
            } else {
                "outside"
            }
        )?,
        None => writeln!(out, "Operating point: power flow did not converge")?,
    }
    write_run_summary(&report.summary, &report.hull, &mut out)?;
    let source = if report.sampled { "written to" } else { "loaded from" };
    writeln!(out, "Point set {source} {}", report.point_set.display())?;
    Ok(())
}
