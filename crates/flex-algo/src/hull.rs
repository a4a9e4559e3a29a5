//! Convex hull aggregation of feasible PCC points.
//!
//! The flexibility area of a scenario is the convex hull of the PCC (P, Q)
//! points of its feasible trials. Hulls are built with Andrew's monotone chain
//! after removing coincident points; collinear boundary points are dropped, so
//! every hull vertex is a corner and an input point.
//!
//! Fewer than three distinct points, or points on a single line, do not span an
//! area. That case is reported as [`HullOutcome::Degenerate`] rather than as a
//! hull of zero area, since it means the scenario was under-sampled or nearly
//! fully infeasible.
//!
//! ## References
//!
//! - **Andrew (1979)**: "Another efficient algorithm for convex hulls in two
//!   dimensions", Information Processing Letters 9(5), 216-219.
//!   DOI: [10.1016/0020-0190(79)90072-3](https://doi.org/10.1016/0020-0190(79)90072-3)

use crate::evaluator::TrialResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Points closer than this in both coordinates are the same point.
pub const DEDUP_TOLERANCE: f64 = 1e-9;

/// Slack allowed when testing whether a point lies inside a hull.
pub const CONTAINMENT_TOLERANCE: f64 = 1e-9;

/// An operating point in the PCC (P, Q) plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PqPoint {
    pub p_mw: f64,
    pub q_mvar: f64,
}

impl PqPoint {
    pub fn new(p_mw: f64, q_mvar: f64) -> Self {
        Self { p_mw, q_mvar }
    }

    fn approx_eq(&self, other: &PqPoint, tol: f64) -> bool {
        (self.p_mw - other.p_mw).abs() <= tol && (self.q_mvar - other.q_mvar).abs() <= tol
    }
}

impl fmt::Display for PqPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4} MW, {:.4} Mvar)", self.p_mw, self.q_mvar)
    }
}

/// z-component of (a − o) × (b − o); positive for a counter-clockwise turn.
fn cross(o: &PqPoint, a: &PqPoint, b: &PqPoint) -> f64 {
    (a.p_mw - o.p_mw) * (b.q_mvar - o.q_mvar) - (a.q_mvar - o.q_mvar) * (b.p_mw - o.p_mw)
}

fn segment_distance(point: &PqPoint, a: &PqPoint, b: &PqPoint) -> f64 {
    let (dp, dq) = (b.p_mw - a.p_mw, b.q_mvar - a.q_mvar);
    let len_sq = dp * dp + dq * dq;
    let t = if len_sq > 0.0 {
        (((point.p_mw - a.p_mw) * dp + (point.q_mvar - a.q_mvar) * dq) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (point.p_mw - (a.p_mw + t * dp)).hypot(point.q_mvar - (a.q_mvar + t * dq))
}

/// A non-degenerate hull: counter-clockwise corners, starting at the lowest P.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlexibilityArea {
    pub vertices: Vec<PqPoint>,
    pub area: f64,
}

impl FlexibilityArea {
    /// Whether `point` lies inside or on the hull, with an absolute tolerance
    /// measured as distance to each edge line.
    pub fn contains_point(&self, point: &PqPoint, tol: f64) -> bool {
        let n = self.vertices.len();
        (0..n).all(|i| {
            let a = &self.vertices[i];
            let b = &self.vertices[(i + 1) % n];
            let len = (b.p_mw - a.p_mw).hypot(b.q_mvar - a.q_mvar);
            len == 0.0 || cross(a, b, point) / len >= -tol
        })
    }

    /// Whether every vertex of `other` lies inside or on this hull.
    pub fn contains(&self, other: &FlexibilityArea, tol: f64) -> bool {
        other.vertices.iter().all(|v| self.contains_point(v, tol))
    }

    /// Euclidean distance from `point` to the nearest hull edge.
    pub fn boundary_distance(&self, point: &PqPoint) -> f64 {
        let n = self.vertices.len();
        (0..n)
            .map(|i| segment_distance(point, &self.vertices[i], &self.vertices[(i + 1) % n]))
            .fold(f64::INFINITY, f64::min)
    }

    /// Axis-aligned extent: (P_min, P_max, Q_min, Q_max).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.vertices.iter().fold(
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY),
            |(p0, p1, q0, q1), v| (p0.min(v.p_mw), p1.max(v.p_mw), q0.min(v.q_mvar), q1.max(v.q_mvar)),
        )
    }
}

/// Why a point set does not span an area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateReason {
    TooFewPoints,
    Collinear,
}

impl fmt::Display for DegenerateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegenerateReason::TooFewPoints => f.write_str("fewer than 3 distinct feasible points"),
            DegenerateReason::Collinear => f.write_str("all feasible points are collinear"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HullOutcome {
    Hull(FlexibilityArea),
    Degenerate {
        reason: DegenerateReason,
        distinct_points: usize,
    },
}

impl HullOutcome {
    /// Area of the hull; zero when degenerate.
    pub fn area(&self) -> f64 {
        match self {
            HullOutcome::Hull(h) => h.area,
            HullOutcome::Degenerate { .. } => 0.0,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, HullOutcome::Degenerate { .. })
    }

    pub fn as_area(&self) -> Option<&FlexibilityArea> {
        match self {
            HullOutcome::Hull(h) => Some(h),
            HullOutcome::Degenerate { .. } => None,
        }
    }

    pub fn vertices(&self) -> &[PqPoint] {
        self.as_area().map(|h| h.vertices.as_slice()).unwrap_or(&[])
    }

    /// Containment between two outcomes. An undefined hull neither contains
    /// nor is contained in anything.
    pub fn contains(&self, other: &HullOutcome) -> bool {
        match (self.as_area(), other.as_area()) {
            (Some(a), Some(b)) => a.contains(b, CONTAINMENT_TOLERANCE),
            _ => false,
        }
    }
}

impl fmt::Display for HullOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HullOutcome::Hull(h) => write!(f, "{} vertices, area {:.6}", h.vertices.len(), h.area),
            HullOutcome::Degenerate { reason, .. } => write!(f, "undefined ({reason})"),
        }
    }
}

/// Shoelace area of a closed polygon, always non-negative.
pub fn polygon_area(vertices: &[PqPoint]) -> f64 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let a = &vertices[i];
            let b = &vertices[(i + 1) % n];
            a.p_mw * b.q_mvar - b.p_mw * a.q_mvar
        })
        .sum();
    twice.abs() / 2.0
}

/// Sort and drop coincident points.
fn distinct_points(points: &[PqPoint]) -> Vec<PqPoint> {
    let mut sorted: Vec<PqPoint> = points
        .iter()
        .copied()
        .filter(|p| p.p_mw.is_finite() && p.q_mvar.is_finite())
        .collect();
    sorted.sort_by(|a, b| {
        a.p_mw
            .total_cmp(&b.p_mw)
            .then_with(|| a.q_mvar.total_cmp(&b.q_mvar))
    });
    let mut distinct: Vec<PqPoint> = Vec::with_capacity(sorted.len());
    for point in sorted {
        if !distinct
            .iter()
            .rev()
            .take_while(|d| point.p_mw - d.p_mw <= DEDUP_TOLERANCE)
            .any(|d| d.approx_eq(&point, DEDUP_TOLERANCE))
        {
            distinct.push(point);
        }
    }
    distinct
}

/// Convex hull of `points` (monotone chain).
pub fn convex_hull(points: &[PqPoint]) -> HullOutcome {
    let pts = distinct_points(points);
    if pts.len() < 3 {
        return HullOutcome::Degenerate {
            reason: DegenerateReason::TooFewPoints,
            distinct_points: pts.len(),
        };
    }

    // `<= 0` pops collinear points, keeping only corners.
    let mut lower: Vec<PqPoint> = Vec::new();
    for p in &pts {
        while lower.len() >= 2 && cross(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(*p);
    }
    let mut upper: Vec<PqPoint> = Vec::new();
    for p in pts.iter().rev() {
        while upper.len() >= 2 && cross(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(*p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);

    let area = polygon_area(&lower);
    if lower.len() < 3 || area <= 0.0 {
        return HullOutcome::Degenerate {
            reason: DegenerateReason::Collinear,
            distinct_points: pts.len(),
        };
    }
    HullOutcome::Hull(FlexibilityArea {
        vertices: lower,
        area,
    })
}

/// PCC points of the feasible trials.
pub fn feasible_points(results: &[TrialResult]) -> Vec<PqPoint> {
    results
        .iter()
        .filter(|r| r.feasible)
        .filter_map(|r| r.pcc)
        .collect()
}

/// Flexibility area of a labeled point set.
pub fn flexibility_area(results: &[TrialResult]) -> HullOutcome {
    let hull = convex_hull(&feasible_points(results));
    if hull.is_degenerate() {
        warn!(trials = results.len(), %hull, "flexibility area is undefined");
    }
    hull
}

/// Number of points per cell after rounding both coordinates to `decimals`,
/// ordered by (P, Q).
pub fn multiplicity_grid(points: &[PqPoint], decimals: u32) -> Vec<(PqPoint, usize)> {
    let scale = 10f64.powi(decimals as i32);
    let mut cells: BTreeMap<(i64, i64), usize> = BTreeMap::new();
    for point in points {
        let key = (
            (point.p_mw * scale).round() as i64,
            (point.q_mvar * scale).round() as i64,
        );
        *cells.entry(key).or_insert(0) += 1;
    }
    cells
        .into_iter()
        .map(|((p, q), count)| (PqPoint::new(p as f64 / scale, q as f64 / scale), count))
        .collect()
}
