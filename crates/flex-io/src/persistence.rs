//! CSV persistence of labeled point sets and hull exports.
//!
//! A labeled point set is written once, after all trials finished, as
//! `Flexibility_area_<name>.csv` with one row per trial:
//!
//! | column | content |
//! |--------|---------|
//! | `trial` | trial id |
//! | `feasible`, `converged` | `true` / `false` |
//! | `pcc_p_mw`, `pcc_q_mvar` | PCC exchange, empty when not converged |
//! | `violation` | `kind\|element\|value\|limit`, empty when feasible |
//! | `fsp_<kind>_<index>_p_mw`, `..._q_mvar` | the sampled setpoint of each FSP |
//!
//! Reading fails with [`FlexError::Persistence`] when the file is missing, a
//! column is absent or out of order, or a field does not parse.

use flex_algo::{Fsp, HullOutcome, OperatingPoint, PerturbationVector, PqPoint, TrialResult, Violation};
use flex_core::{FlexError, FlexResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const FIXED_COLUMNS: [&str; 6] = [
    "trial",
    "feasible",
    "converged",
    "pcc_p_mw",
    "pcc_q_mvar",
    "violation",
];

/// Location of the persisted point set of scenario `name`. Spaces in the
/// name become underscores.
pub fn result_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref()
        .join(format!("Flexibility_area_{}.csv", name.replace(' ', "_")))
}

/// Hull vertex export next to the point set of scenario `name`.
pub fn hull_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref()
        .join(format!("Flexibility_area_{}_hull.csv", name.replace(' ', "_")))
}

/// Multiplicity grid export next to the point set of scenario `name`.
pub fn multiplicity_path(dir: impl AsRef<Path>, name: &str) -> PathBuf {
    dir.as_ref().join(format!(
        "Flexibility_area_{}_multiplicity.csv",
        name.replace(' ', "_")
    ))
}

/// A point set read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledPointSet {
    /// FSP column prefixes in file order, e.g. `fsp_wt_8`
    pub fsp_labels: Vec<String>,
    pub results: Vec<TrialResult>,
}

impl LabeledPointSet {
    /// Check that the file was produced for the same FSP set, in the same order.
    pub fn check_fsps(&self, fsps: &[Fsp]) -> FlexResult<()> {
        let expected: Vec<String> = fsps.iter().map(Fsp::label).collect();
        if expected != self.fsp_labels {
            return Err(FlexError::persistence(format!(
                "stored FSP columns [{}] do not match the configured FSPs [{}]",
                self.fsp_labels.join(", "),
                expected.join(", ")
            )));
        }
        Ok(())
    }
}

fn csv_error(action: &str, path: &Path, err: impl std::fmt::Display) -> FlexError {
    FlexError::persistence(format!("{action} {}: {err}", path.display()))
}

fn encode_violation(violation: &Option<Violation>) -> String {
    match violation {
        Some(v) => format!("{}|{}|{}|{}", v.kind.as_str(), v.element, v.value, v.limit),
        None => String::new(),
    }
}

fn decode_violation(field: &str) -> Result<Option<Violation>, String> {
    if field.is_empty() {
        return Ok(None);
    }
    let (kind, rest) = field
        .split_once('|')
        .ok_or_else(|| format!("malformed violation '{field}'"))?;
    // The element name may itself contain the separator; the numbers never do.
    let mut tail = rest.rsplitn(3, '|');
    let (limit, value, element) = match (tail.next(), tail.next(), tail.next()) {
        (Some(limit), Some(value), Some(element)) => (limit, value, element),
        _ => return Err(format!("malformed violation '{field}'")),
    };
    Ok(Some(Violation {
        kind: kind.parse().map_err(|e: FlexError| e.to_string())?,
        element: element.to_string(),
        value: parse_f64(value, "violation value")?,
        limit: parse_f64(limit, "violation limit")?,
    }))
}

fn parse_f64(field: &str, column: &str) -> Result<f64, String> {
    field
        .trim()
        .parse()
        .map_err(|_| format!("{column}: '{field}' is not a number"))
}

fn parse_bool(field: &str, column: &str) -> Result<bool, String> {
    match field.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("{column}: '{other}' is not true/false")),
    }
}

/// Write the labeled point set of one run.
///
/// The file is written next to its destination and renamed into place, so a
/// reader never observes a partial file.
pub fn write_point_set(path: &Path, fsps: &[Fsp], results: &[TrialResult]) -> FlexResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| csv_error("creating directory for", path, e))?;
    }
    if let Some(result) = results.iter().find(|r| r.perturbation.len() != fsps.len()) {
        return Err(FlexError::persistence(format!(
            "trial {} has {} setpoints for {} FSPs",
            result.trial,
            result.perturbation.len(),
            fsps.len()
        )));
    }

    let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    for fsp in fsps {
        header.push(format!("{}_p_mw", fsp.label()));
        header.push(format!("{}_q_mvar", fsp.label()));
    }

    let staging = path.with_extension("csv.partial");
    let written = write_records(&staging, &header, results).and_then(|()| {
        fs::rename(&staging, path).map_err(|e| csv_error("moving result into", path, e))
    });
    // The staging file never outlives a failed write.
    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(&staging) {
            warn!(path = %staging.display(), %cleanup, "could not remove staging file");
        }
        return Err(err);
    }
    info!(path = %path.display(), trials = results.len(), "labeled point set written");
    Ok(())
}

fn write_records(staging: &Path, header: &[String], results: &[TrialResult]) -> FlexResult<()> {
    let mut wtr =
        csv::Writer::from_path(staging).map_err(|e| csv_error("creating", staging, e))?;
    wtr.write_record(header)
        .map_err(|e| csv_error("writing header to", staging, e))?;

    for result in results {
        let mut record = Vec::with_capacity(header.len());
        record.push(result.trial.to_string());
        record.push(result.feasible.to_string());
        record.push(result.converged.to_string());
        match result.pcc {
            Some(pcc) => {
                record.push(pcc.p_mw.to_string());
                record.push(pcc.q_mvar.to_string());
            }
            None => {
                record.push(String::new());
                record.push(String::new());
            }
        }
        record.push(encode_violation(&result.violation));
        for point in &result.perturbation.setpoints {
            record.push(point.p.value().to_string());
            record.push(point.q.value().to_string());
        }
        wtr.write_record(&record)
            .map_err(|e| csv_error("writing trial to", staging, e))?;
    }
    wtr.flush().map_err(|e| csv_error("flushing", staging, e))
}

/// Read a labeled point set written by [`write_point_set`].
pub fn read_point_set(path: &Path) -> FlexResult<LabeledPointSet> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| csv_error("opening", path, e))?;
    let header = reader
        .headers()
        .map_err(|e| csv_error("reading header of", path, e))?
        .clone();

    let columns: Vec<&str> = header.iter().collect();
    if columns.len() < FIXED_COLUMNS.len() || columns[..FIXED_COLUMNS.len()] != FIXED_COLUMNS {
        return Err(FlexError::persistence(format!(
            "{}: expected leading columns {}",
            path.display(),
            FIXED_COLUMNS.join(",")
        )));
    }
    let fsp_columns = &columns[FIXED_COLUMNS.len()..];
    if fsp_columns.len() % 2 != 0 {
        return Err(FlexError::persistence(format!(
            "{}: FSP columns must come in p/q pairs",
            path.display()
        )));
    }
    let mut fsp_labels = Vec::with_capacity(fsp_columns.len() / 2);
    for pair in fsp_columns.chunks(2) {
        match (pair[0].strip_suffix("_p_mw"), pair[1].strip_suffix("_q_mvar")) {
            (Some(p), Some(q)) if p == q => fsp_labels.push(p.to_string()),
            _ => {
                return Err(FlexError::persistence(format!(
                    "{}: unexpected FSP columns '{}', '{}'",
                    path.display(),
                    pair[0],
                    pair[1]
                )))
            }
        }
    }

    let mut results = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| csv_error("reading", path, e))?;
        let result = parse_record(&record, fsp_labels.len()).map_err(|msg| {
            FlexError::persistence(format!("{} row {}: {msg}", path.display(), row + 1))
        })?;
        results.push(result);
    }
    info!(path = %path.display(), trials = results.len(), "labeled point set loaded");
    Ok(LabeledPointSet {
        fsp_labels,
        results,
    })
}

fn parse_record(record: &csv::StringRecord, fsp_count: usize) -> Result<TrialResult, String> {
    let field = |i: usize| record.get(i).unwrap_or_default();
    let trial = field(0)
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("trial: '{}' is not an id", field(0)))?;
    let feasible = parse_bool(field(1), "feasible")?;
    let converged = parse_bool(field(2), "converged")?;
    let pcc = match (field(3).is_empty(), field(4).is_empty()) {
        (true, true) => None,
        (false, false) => Some(PqPoint::new(
            parse_f64(field(3), "pcc_p_mw")?,
            parse_f64(field(4), "pcc_q_mvar")?,
        )),
        _ => return Err("pcc_p_mw and pcc_q_mvar must both be set or both be empty".into()),
    };
    if converged != pcc.is_some() {
        return Err("converged trials carry a PCC point, others do not".into());
    }
    if feasible && !converged {
        return Err("a feasible trial must have converged".into());
    }
    let violation = decode_violation(field(5))?;
    if feasible == violation.is_some() {
        return Err("a trial is feasible exactly when it has no violation".into());
    }

    let mut setpoints = Vec::with_capacity(fsp_count);
    for k in 0..fsp_count {
        let p_col = FIXED_COLUMNS.len() + 2 * k;
        setpoints.push(OperatingPoint::new(
            parse_f64(field(p_col), "FSP active power")?,
            parse_f64(field(p_col + 1), "FSP reactive power")?,
        ));
    }

    Ok(TrialResult {
        trial,
        perturbation: PerturbationVector { setpoints },
        pcc,
        feasible,
        converged,
        violation,
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct VertexRecord {
    vertex: usize,
    p_mw: f64,
    q_mvar: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MultiplicityRecord {
    p_mw: f64,
    q_mvar: f64,
    count: usize,
}

/// Write the hull vertices counter-clockwise, first vertex not repeated.
/// A degenerate hull produces a header-only file.
pub fn write_hull_vertices(path: &Path, hull: &HullOutcome) -> FlexResult<()> {
    if hull.is_degenerate() {
        warn!(path = %path.display(), %hull, "hull is degenerate, exporting no vertices");
    }
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| csv_error("creating", path, e))?;
    wtr.write_record(["vertex", "p_mw", "q_mvar"])
        .map_err(|e| csv_error("writing header to", path, e))?;
    for (vertex, point) in hull.vertices().iter().enumerate() {
        wtr.serialize(VertexRecord {
            vertex,
            p_mw: point.p_mw,
            q_mvar: point.q_mvar,
        })
        .map_err(|e| csv_error("writing vertex to", path, e))?;
    }
    wtr.flush().map_err(|e| csv_error("flushing", path, e))?;
    Ok(())
}

/// Write a multiplicity grid as `p_mw,q_mvar,count` rows.
pub fn write_multiplicity(path: &Path, cells: &[(PqPoint, usize)]) -> FlexResult<()> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| csv_error("creating", path, e))?;
    for (point, count) in cells {
        wtr.serialize(MultiplicityRecord {
            p_mw: point.p_mw,
            q_mvar: point.q_mvar,
            count: *count,
        })
        .map_err(|e| csv_error("writing cell to", path, e))?;
    }
    wtr.flush().map_err(|e| csv_error("flushing", path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flex_algo::ViolationKind;
    use tempfile::tempdir;

    fn trial(id: usize, pcc: Option<(f64, f64)>, violation: Option<Violation>) -> TrialResult {
        TrialResult {
            trial: id,
            perturbation: PerturbationVector {
                setpoints: vec![OperatingPoint::new(0.1 * id as f64, -0.02)],
            },
            pcc: pcc.map(|(p, q)| PqPoint::new(p, q)),
            feasible: pcc.is_some() && violation.is_none(),
            converged: pcc.is_some(),
            violation,
        }
    }

    fn header_only(path: &Path, extra: &str) {
        fs::write(
            path,
            format!("trial,feasible,converged,pcc_p_mw,pcc_q_mvar,violation{extra}\n"),
        )
        .unwrap();
    }

    #[test]
    fn test_result_path() {
        let path = result_path("results", "TSS 1");
        assert_eq!(path, Path::new("results/Flexibility_area_TSS_1.csv"));
        assert_eq!(
            hull_path("results", "TSS 1"),
            Path::new("results/Flexibility_area_TSS_1_hull.csv")
        );
        assert!(multiplicity_path("results", "TSS 1").ends_with("Flexibility_area_TSS_1_multiplicity.csv"));
    }

    #[test]
    fn test_violation_with_separator_in_name() {
        let v = Violation {
            kind: ViolationKind::LineOverload,
            element: "Line a|b".into(),
            value: 112.5,
            limit: 100.0,
        };
        let decoded = decode_violation(&encode_violation(&Some(v.clone()))).unwrap();
        assert_eq!(decoded, Some(v));
        assert_eq!(decode_violation("").unwrap(), None);
        assert!(decode_violation("line_overload").is_err());
    }

    #[test]
    fn test_non_convergence_row_has_no_pcc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.csv");
        let diverged = trial(
            0,
            None,
            Some(Violation {
                kind: ViolationKind::NonConvergence,
                element: String::new(),
                value: f64::INFINITY,
                limit: 0.0,
            }),
        );
        let columns = vec!["fsp_pv_0_p_mw", "fsp_pv_0_q_mvar"];
        let mut wtr = csv::Writer::from_path(&path).unwrap();
        let mut header: Vec<&str> = FIXED_COLUMNS.to_vec();
        header.extend(columns);
        wtr.write_record(&header).unwrap();
        wtr.write_record(["0", "false", "false", "", "", "non_convergence||inf|0", "0", "-0.02"])
            .unwrap();
        wtr.flush().unwrap();
        drop(wtr);

        let set = read_point_set(&path).unwrap();
        assert_eq!(set.fsp_labels, vec!["fsp_pv_0"]);
        assert_eq!(set.results, vec![diverged]);
    }

    #[test]
    fn test_missing_file_is_persistence_error() {
        let dir = tempdir().unwrap();
        let err = read_point_set(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, FlexError::Persistence(_)));
    }

    #[test]
    fn test_wrong_header_is_persistence_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "trial,p,q\n0,1,2\n").unwrap();
        assert!(matches!(
            read_point_set(&path).unwrap_err(),
            FlexError::Persistence(_)
        ));

        header_only(&path, ",fsp_pv_0_p_mw,fsp_wt_8_q_mvar");
        assert!(matches!(
            read_point_set(&path).unwrap_err(),
            FlexError::Persistence(_)
        ));
    }

    #[test]
    fn test_corrupt_row_is_persistence_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.csv");
        fs::write(
            &path,
            "trial,feasible,converged,pcc_p_mw,pcc_q_mvar,violation,fsp_pv_0_p_mw,fsp_pv_0_q_mvar\n\
             0,true,true,abc,0.1,,0.1,0.0\n",
        )
        .unwrap();
        let err = read_point_set(&path).unwrap_err();
        assert!(err.to_string().contains("pcc_p_mw"));

        fs::write(
            &path,
            "trial,feasible,converged,pcc_p_mw,pcc_q_mvar,violation,fsp_pv_0_p_mw,fsp_pv_0_q_mvar\n\
             0,true,true,0.5,0.1,,0.1\n",
        )
        .unwrap();
        assert!(matches!(
            read_point_set(&path).unwrap_err(),
            FlexError::Persistence(_)
        ));
    }

    #[test]
    fn test_write_rejects_mismatched_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.csv");
        let results = [trial(0, Some((0.5, 0.1)), None)];
        let err = write_point_set(&path, &[], &results).unwrap_err();
        assert!(matches!(err, FlexError::Persistence(_)));
        assert!(!path.exists());
        assert!(!path.with_extension("csv.partial").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_feasible_row_with_violation_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("set.csv");
        let header = "trial,feasible,converged,pcc_p_mw,pcc_q_mvar,violation,fsp_pv_0_p_mw,fsp_pv_0_q_mvar\n";
        fs::write(
            &path,
            format!("{header}0,true,true,0.5,0.1,over_voltage|Bus 3|1.07|1.05,0.1,0.0\n"),
        )
        .unwrap();
        let err = read_point_set(&path).unwrap_err();
        assert!(matches!(err, FlexError::Persistence(_)));
        assert!(err.to_string().contains("row 1"));

        fs::write(&path, format!("{header}0,false,true,0.5,0.1,,0.1,0.0\n")).unwrap();
        assert!(matches!(
            read_point_set(&path).unwrap_err(),
            FlexError::Persistence(_)
        ));
    }

    #[test]
    fn test_degenerate_hull_exports_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hull.csv");
        let hull = flex_algo::convex_hull(&[PqPoint::new(0.0, 0.0)]);
        write_hull_vertices(&path, &hull).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "vertex,p_mw,q_mvar\n");
    }

    #[test]
    fn test_multiplicity_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        write_multiplicity(&path, &[(PqPoint::new(0.5, -0.25), 3)]).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "p_mw,q_mvar,count\n0.5,-0.25,3\n"
        );
    }
}
