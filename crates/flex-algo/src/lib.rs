//! # flex-algo: Monte Carlo flexibility area estimation
//!
//! Estimates which active/reactive power exchanges at the point of common
//! coupling (PCC) a distribution feeder can offer when its flexible service
//! providers (FSPs) move within their capability envelopes, subject to voltage
//! and thermal limits on the part of the network that is observed.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | FSP selection | [`fsp`] | ordered `Vec<Fsp>` |
//! | Sampling | [`sampler`] | `no_samples` perturbation vectors |
//! | Feasibility | [`evaluator`] | one [`TrialResult`] per vector |
//! | Aggregation | [`hull`] | [`HullOutcome`] of the feasible PCC points |
//! | Comparison | [`compare`] | before/after and hull summary tables |
//!
//! [`monte_carlo::run_monte_carlo`] wires sampling and evaluation together and
//! spreads the power flows over a rayon pool.
//!
//! ## Example
//!
//! ```ignore
//! use flex_algo::*;
//!
//! let fsps = select_fsps(&network, &FspSelection::default())?;
//! let evaluator = FeasibilityEvaluator::new(&network, &fsps, &observability, Limits::default())?;
//! let run = run_monte_carlo(&evaluator, &MonteCarloConfig::default())?;
//! let area = flexibility_area(&run.results);
//! println!("{} feasible points, area {:.4} MW·Mvar", run.summary.feasible, area.area());
//! ```

pub mod compare;
pub mod evaluator;
pub mod fsp;
pub mod hull;
pub mod monte_carlo;
pub mod power_flow;
pub mod sampler;

pub use compare::{
    compare_states, summarize_hulls, ComparisonRow, ComparisonTable, HullSummaryRow,
    HullSummaryTable, StateSummary,
};
pub use evaluator::{
    FeasibilityEvaluator, Limits, Observability, ObservedSet, TrialResult, Violation,
    ViolationKind,
};
pub use fsp::{select_fsps, Fsp, FspCategory, FspKind, FspSelection, FspTarget, IndexSelection};
pub use hull::{
    convex_hull, feasible_points, flexibility_area, multiplicity_grid,
    FlexibilityArea, HullOutcome, PqPoint,
};
pub use monte_carlo::{run_monte_carlo, MonteCarloConfig, MonteCarloRun, RunSummary};
pub use power_flow::{AcPowerFlowSolution, AcPowerFlowSolver, PowerFlowError};
pub use sampler::{Distribution, Envelope, OperatingPoint, PerturbationVector, Sampler, SamplerConfig};
