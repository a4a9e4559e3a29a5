//! Output helpers shared by the subcommands.

use anyhow::Result;
use clap::ValueEnum;
use flex_algo::{ComparisonTable, HullOutcome, HullSummaryTable, RunSummary};
use serde::Serialize;
use std::io::Write;
use tabwriter::TabWriter;

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Aligned text tables
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
}

pub fn write_json<T: Serialize>(value: &T, writer: &mut impl Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{v:+.precision$}"))
}

/// Before/after table of a scenario shift.
pub fn write_comparison_table(table: &ComparisonTable, writer: impl Write) -> Result<()> {
    let mut tw = TabWriter::new(writer);
    writeln!(tw, "METRIC\tUNALTERED\tALTERED\tDELTA\tDELTA %")?;
    for row in &table.rows {
        writeln!(
            tw,
            "{}\t{:.4}\t{:.4}\t{:+.4}\t{}",
            row.metric,
            row.unaltered,
            row.altered,
            row.delta,
            fmt_opt(row.pct_delta, 2)
        )?;
    }
    tw.flush()?;
    Ok(())
}

/// Hull summary over named point sets.
pub fn write_hull_table(table: &HullSummaryTable, writer: impl Write) -> Result<()> {
    let mut tw = TabWriter::new(writer);
    let base = table.base.as_deref().unwrap_or("none");
    writeln!(tw, "SCENARIO\tAREA [MW*Mvar]\tVS {base} %\tRANK\tCONTAINS")?;
    for row in &table.rows {
        let area = row
            .area
            .map_or_else(|| "undefined".to_string(), |a| format!("{a:.6}"));
        let rank = row.rank.map_or_else(|| "-".to_string(), |r| r.to_string());
        let contains = if row.contains.is_empty() {
            "-".to_string()
        } else {
            row.contains.join(", ")
        };
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            row.name,
            area,
            fmt_opt(row.pct_vs_base, 2),
            rank,
            contains
        )?;
    }
    tw.flush()?;
    Ok(())
}

pub fn write_run_summary(summary: &RunSummary, hull: &HullOutcome, writer: impl Write) -> Result<()> {
    let mut tw = TabWriter::new(writer);
    writeln!(tw, "Trials\t{}", summary.trials)?;
    writeln!(
        tw,
        "Feasible\t{} ({:.1} %)",
        summary.feasible,
        100.0 * summary.feasible_share()
    )?;
    writeln!(tw, "Infeasible\t{}", summary.infeasible)?;
    writeln!(tw, "Non-converged\t{}", summary.non_converged)?;
    if summary.workers > 0 {
        writeln!(tw, "Workers\t{}", summary.workers)?;
        writeln!(
            tw,
            "Sampling / power flows\t{:.3} s / {:.3} s",
            summary.sampling_time.as_secs_f64(),
            summary.evaluation_time.as_secs_f64()
        )?;
    }
    match hull.as_area() {
        Some(area) => {
            writeln!(tw, "Flexibility area\t{:.6} MW*Mvar", area.area)?;
            writeln!(tw, "Hull vertices\t{}", area.vertices.len())?;
        }
        None => writeln!(tw, "Flexibility area\t{hull}")?,
    }
    tw.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flex_algo::{convex_hull, ComparisonRow, HullSummaryRow, PqPoint};

    #[test]
    fn test_comparison_table_layout() {
        let table = ComparisonTable {
            rows: vec![
                ComparisonRow::new("PCC P [MW]", 20.0, 21.0),
                ComparisonRow::new("Obs. line 0 P [MW]", 0.0, 0.5),
            ],
        };
        let mut out = Vec::new();
        write_comparison_table(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("METRIC"));
        assert!(text.contains("+5.00"));
        assert!(text.contains("n/a"));
    }

    #[test]
    fn test_hull_table_marks_undefined() {
        let table = HullSummaryTable {
            base: None,
            rows: vec![HullSummaryRow {
                name: "TSS 1".into(),
                area: None,
                pct_vs_base: None,
                contains: vec![],
                rank: None,
            }],
        };
        let mut out = Vec::new();
        write_hull_table(&table, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("undefined"));
    }

    #[test]
    fn test_run_summary_reports_area() {
        let hull = convex_hull(&[
            PqPoint::new(0.0, 0.0),
            PqPoint::new(1.0, 0.0),
            PqPoint::new(0.0, 1.0),
        ]);
        let summary = RunSummary {
            trials: 4,
            feasible: 3,
            infeasible: 1,
            ..Default::default()
        };
        let mut out = Vec::new();
        write_run_summary(&summary, &hull, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("0.500000"));
        assert!(text.contains("75.0 %"));
    }
}
