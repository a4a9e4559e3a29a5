use anyhow::{Context, Result};
use flex_algo::{compare_states, ComparisonTable, ObservedSet, StateSummary};
use flex_scenarios::{PreparedNetworks, ResolvedScenario};
use std::io::stdout;
use std::path::Path;
use tracing::info;

use crate::commands::load_scenario;
use flex_cli::common::{write_comparison_table, write_json, OutputFormat};

/// Solve the feeder before and after the shift and tabulate the differences.
/// Observability is resolved on the unaltered network; shifts keep positional indices.
pub fn shift_comparison(
    scenario: &ResolvedScenario,
    networks: &PreparedNetworks,
) -> Result<ComparisonTable> {
    let solver = &scenario.solver;
    let observed = ObservedSet::resolve(&networks.unaltered, &scenario.observability)?;
    let before = solver
        .solve(&networks.unaltered)
        .context("solving the unaltered network")?;
    let after = solver
        .solve(&networks.altered)
        .with_context(|| format!("solving the network after {}", scenario.shift))?;
    Ok(compare_states(
        &StateSummary::from_solution(&networks.unaltered, &before, &observed),
        &StateSummary::from_solution(&networks.altered, &after, &observed),
    ))
}

pub fn handle(path: &Path, format: OutputFormat) -> Result<()> {
    let loaded = load_scenario(path)?;
    let table = shift_comparison(&loaded.scenario, &loaded.networks)?;
    info!(
        scenario = %loaded.scenario.name,
        shift = %loaded.scenario.shift,
        rows = table.rows.len(),
        "network states compared"
    );
    match format {
        OutputFormat::Table => {
            println!("{}: {}", loaded.scenario.name, loaded.scenario.shift);
            write_comparison_table(&table, stdout())
        }
        OutputFormat::Json => write_json(&table, &mut stdout()),
    }
}
