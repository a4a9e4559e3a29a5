use anyhow::{bail, Context, Result};
use flex_algo::{feasible_points, flexibility_area, multiplicity_grid, summarize_hulls, HullOutcome};
use flex_io::{hull_path, multiplicity_path, read_point_set, write_hull_vertices, write_multiplicity};
use flex_scenarios::{load_config_from_path, resolve_scenario};
use std::fs;
use std::io::stdout;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use flex_cli::common::{write_hull_table, write_json, OutputFormat};

/// Labeled point sets named on the command line plus the scenario's `comparison` entries.
fn collect_sets(
    sets: &[(String, PathBuf)],
    scenario: Option<&Path>,
) -> Result<Vec<(String, PathBuf)>> {
    let mut all = sets.to_vec();
    if let Some(path) = scenario {
        let config = load_config_from_path(path)?;
        let resolved = resolve_scenario(&config)
            .with_context(|| format!("validating scenario '{}'", path.display()))?;
        all.extend(
            resolved
                .comparison
                .iter()
                .map(|entry| (entry.label.clone(), entry.file.clone())),
        );
    }
    if all.is_empty() {
        bail!("no point sets given; use --set LABEL=PATH or a scenario with comparison entries");
    }
    for (i, (label, _)) in all.iter().enumerate() {
        if all[..i].iter().any(|(other, _)| other == label) {
            bail!("point set label '{label}' given twice");
        }
    }
    Ok(all)
}

pub fn handle(
    sets: &[(String, PathBuf)],
    scenario: Option<&Path>,
    export_dir: Option<&Path>,
    decimals: u32,
    format: OutputFormat,
) -> Result<()> {
    let sets = collect_sets(sets, scenario)?;
    if let Some(dir) = export_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating export directory '{}'", dir.display()))?;
    }

    let mut hulls: Vec<(String, HullOutcome)> = Vec::with_capacity(sets.len());
    for (label, path) in &sets {
        let stored = read_point_set(path)
            .with_context(|| format!("loading point set '{label}'"))?;
        let hull = flexibility_area(&stored.results);
        debug!(%label, trials = stored.results.len(), %hull, "point set loaded");
        if let Some(dir) = export_dir {
            write_hull_vertices(&hull_path(dir, label), &hull)?;
            let grid = multiplicity_grid(&feasible_points(&stored.results), decimals);
            write_multiplicity(&multiplicity_path(dir, label), &grid)?;
        }
        hulls.push((label.clone(), hull));
    }

    let table = summarize_hulls(&hulls);
    info!(sets = table.rows.len(), base = ?table.base, "hulls summarized");
    match format {
        OutputFormat::Table => write_hull_table(&table, stdout()),
        OutputFormat::Json => write_json(&table, &mut stdout()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_sets_requires_input() {
        let err = collect_sets(&[], None).unwrap_err();
        assert!(err.to_string().contains("no point sets"));
    }

    #[test]
    fn test_collect_sets_rejects_duplicate_labels() {
        let sets = vec![
            ("A".to_string(), PathBuf::from("a.csv")),
            ("A".to_string(), PathBuf::from("b.csv")),
        ];
        assert!(collect_sets(&sets, None).is_err());
    }
}
