//! Feasibility evaluation of sampled FSP operating points.
//!
//! A trial writes its perturbation vector into a private clone of the base
//! network, solves the AC power flow and classifies the result:
//!
//! - **feasible**: converged, every observable bus voltage inside
//!   `[min_volt_pu, max_volt_pu]`, every observable line and every transformer
//!   loaded at most `max_curr_per` percent
//! - **infeasible**: a limit is violated on the observed part of the network,
//!   or the power flow has no solution
//!
//! Buses and lines outside the observable set are never checked. A violation
//! there stays invisible to the operator, and so it does not make a trial
//! infeasible.

use crate::fsp::{Fsp, FspTarget, IndexSelection};
use crate::hull::PqPoint;
use crate::power_flow::{AcPowerFlowSolution, AcPowerFlowSolver, PowerFlowError};
use crate::sampler::PerturbationVector;
use flex_core::{BranchId, BusId, FlexError, FlexResult, Network};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Operating limits checked on the observable network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min_volt_pu: f64,
    pub max_volt_pu: f64,
    /// Thermal limit in percent of the branch rating
    pub max_curr_per: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            min_volt_pu: 0.95,
            max_volt_pu: 1.05,
            max_curr_per: 100.0,
        }
    }
}

impl Limits {
    pub fn validate(&self) -> FlexResult<()> {
        if !(self.min_volt_pu > 0.0 && self.min_volt_pu < self.max_volt_pu) {
            return Err(FlexError::config(format!(
                "voltage limits must satisfy 0 < min_volt_pu < max_volt_pu, got [{}, {}]",
                self.min_volt_pu, self.max_volt_pu
            )));
        }
        if !(self.max_curr_per > 0.0) {
            return Err(FlexError::config(format!(
                "max_curr_per must be positive, got {}",
                self.max_curr_per
            )));
        }
        Ok(())
    }
}

/// Positional indices of the monitored buses and lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observability {
    pub buses: IndexSelection,
    pub lines: IndexSelection,
}

impl Default for Observability {
    fn default() -> Self {
        Self {
            buses: IndexSelection::All,
            lines: IndexSelection::All,
        }
    }
}

/// Resolved observable elements of one network.
#[derive(Debug, Clone, Default)]
pub struct ObservedSet {
    pub buses: Vec<BusId>,
    pub lines: Vec<BranchId>,
}

impl ObservedSet {
    pub fn resolve(network: &Network, observability: &Observability) -> FlexResult<Self> {
        let buses = network.buses();
        let lines = network.lines();
        Ok(Self {
            buses: observability
                .buses
                .resolve(buses.len(), "observable bus")?
                .into_iter()
                .map(|i| buses[i].id)
                .collect(),
            lines: observability
                .lines
                .resolve(lines.len(), "observable line")?
                .into_iter()
                .map(|i| lines[i].id)
                .collect(),
        })
    }

    pub fn observes_bus(&self, id: BusId) -> bool {
        self.buses.contains(&id)
    }

    pub fn observes_line(&self, id: BranchId) -> bool {
        self.lines.contains(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    UnderVoltage,
    OverVoltage,
    LineOverload,
    TransformerOverload,
    NonConvergence,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::UnderVoltage => "under_voltage",
            ViolationKind::OverVoltage => "over_voltage",
            ViolationKind::LineOverload => "line_overload",
            ViolationKind::TransformerOverload => "transformer_overload",
            ViolationKind::NonConvergence => "non_convergence",
        }
    }
}

impl FromStr for ViolationKind {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "under_voltage" => Ok(ViolationKind::UnderVoltage),
            "over_voltage" => Ok(ViolationKind::OverVoltage),
            "line_overload" => Ok(ViolationKind::LineOverload),
            "transformer_overload" => Ok(ViolationKind::TransformerOverload),
            "non_convergence" => Ok(ViolationKind::NonConvergence),
            other => Err(FlexError::Parse(format!("unknown violation kind '{other}'"))),
        }
    }
}

/// Worst limit violation of an infeasible trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Name of the bus or branch, empty for non-convergence.
    pub element: String,
    pub value: f64,
    pub limit: f64,
}

impl Violation {
    /// Signed distance past the limit (pu or percent).
    pub fn margin(&self) -> f64 {
        match self.kind {
            ViolationKind::UnderVoltage => self.limit - self.value,
            _ => self.value - self.limit,
        }
    }

    /// Excess relative to the limit, used to rank violations.
    pub fn relative_excess(&self) -> f64 {
        if self.limit.abs() > f64::EPSILON {
            self.margin() / self.limit.abs()
        } else {
            self.margin()
        }
    }

    fn non_convergence(err: &PowerFlowError) -> Self {
        let value = match err {
            PowerFlowError::Diverged { max_mismatch, .. } => *max_mismatch,
            _ => f64::INFINITY,
        };
        Self {
            kind: ViolationKind::NonConvergence,
            element: String::new(),
            value,
            limit: 0.0,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::NonConvergence => f.write_str(self.kind.as_str()),
            _ => write!(
                f,
                "{} at {} ({:.4} vs limit {:.4})",
                self.kind.as_str(),
                self.element,
                self.value,
                self.limit
            ),
        }
    }
}

/// Outcome of one Monte Carlo trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial: usize,
    pub perturbation: PerturbationVector,
    /// External grid exchange; `None` when the power flow did not converge.
    pub pcc: Option<PqPoint>,
    pub feasible: bool,
    pub converged: bool,
    pub violation: Option<Violation>,
}

/// Evaluates perturbation vectors against one immutable base network.
pub struct FeasibilityEvaluator<'a> {
    base: &'a Network,
    fsps: &'a [Fsp],
    observed: ObservedSet,
    limits: Limits,
    solver: AcPowerFlowSolver,
}

impl<'a> FeasibilityEvaluator<'a> {
    /// Fails with a configuration error for invalid limits or observable indices
    /// outside the network.
    pub fn new(
        base: &'a Network,
        fsps: &'a [Fsp],
        observability: &Observability,
        limits: Limits,
    ) -> FlexResult<Self> {
        limits.validate()?;
        let observed = ObservedSet::resolve(base, observability)?;
        Ok(Self {
            base,
            fsps,
            observed,
            limits,
            solver: AcPowerFlowSolver::new(),
        })
    }

    pub fn with_solver(mut self, solver: AcPowerFlowSolver) -> Self {
        self.solver = solver;
        self
    }

    pub fn fsps(&self) -> &[Fsp] {
        self.fsps
    }

    pub fn base(&self) -> &Network {
        self.base
    }

    pub fn observed(&self) -> &ObservedSet {
        &self.observed
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Copy of the base network with `vector` written into the FSP setpoints.
    pub fn apply(&self, vector: &PerturbationVector) -> FlexResult<Network> {
        if vector.len() != self.fsps.len() {
            return Err(FlexError::Other(format!(
                "perturbation has {} setpoints for {} FSPs",
                vector.len(),
                self.fsps.len()
            )));
        }
        let mut network = self.base.clone();
        for (fsp, point) in self.fsps.iter().zip(&vector.setpoints) {
            match fsp.target {
                FspTarget::Sgen(id) => network.set_sgen_power(id, point.p, point.q)?,
                FspTarget::Load(id) => network.set_load_power(id, point.p, point.q)?,
            }
        }
        Ok(network)
    }

    /// Run one trial. Non-convergence yields an infeasible result, not an error;
    /// only a malformed network or vector is an error.
    pub fn evaluate(&self, trial: usize, vector: &PerturbationVector) -> FlexResult<TrialResult> {
        let network = self.apply(vector)?;
        let result = match self.solver.solve(&network) {
            Ok(solution) => {
                let violation = self.worst_violation(&network, &solution);
                TrialResult {
                    trial,
                    perturbation: vector.clone(),
                    pcc: Some(PqPoint::new(solution.ext_grid_p_mw, solution.ext_grid_q_mvar)),
                    feasible: violation.is_none(),
                    converged: true,
                    violation,
                }
            }
            Err(err) if err.is_non_convergence() => TrialResult {
                trial,
                perturbation: vector.clone(),
                pcc: None,
                feasible: false,
                converged: false,
                violation: Some(Violation::non_convergence(&err)),
            },
            Err(err) => return Err(FlexError::Solver(err.to_string())),
        };
        debug!(
            trial,
            feasible = result.feasible,
            converged = result.converged,
            "trial evaluated"
        );
        Ok(result)
    }

    /// The trial with every FSP at its baseline setpoint.
    pub fn evaluate_baseline(&self) -> FlexResult<TrialResult> {
        self.evaluate(usize::MAX, &PerturbationVector::baseline(self.fsps))
    }

    /// Worst violation on the observed network, by relative excess over the limit.
    pub fn worst_violation(
        &self,
        network: &Network,
        solution: &AcPowerFlowSolution,
    ) -> Option<Violation> {
        let mut violations = Vec::new();

        for bus in network.buses() {
            if !self.observed.observes_bus(bus.id) {
                continue;
            }
            let Some(&vm) = solution.bus_voltage_magnitude.get(&bus.id) else {
                continue;
            };
            if vm < self.limits.min_volt_pu {
                violations.push(Violation {
                    kind: ViolationKind::UnderVoltage,
                    element: bus.name.clone(),
                    value: vm,
                    limit: self.limits.min_volt_pu,
                });
            } else if vm > self.limits.max_volt_pu {
                violations.push(Violation {
                    kind: ViolationKind::OverVoltage,
                    element: bus.name.clone(),
                    value: vm,
                    limit: self.limits.max_volt_pu,
                });
            }
        }

        let lines = network
            .lines()
            .into_iter()
            .filter(|l| self.observed.observes_line(l.id))
            .map(|l| (l, ViolationKind::LineOverload));
        let trafos = network
            .transformers()
            .into_iter()
            .map(|t| (t, ViolationKind::TransformerOverload));
        for (branch, kind) in lines.chain(trafos) {
            let loading = solution
                .branch_flows
                .get(&branch.id)
                .and_then(|f| f.loading_percent);
            if let Some(loading) = loading {
                if loading > self.limits.max_curr_per {
                    violations.push(Violation {
                        kind,
                        element: branch.name.clone(),
                        value: loading,
                        limit: self.limits.max_curr_per,
                    });
                }
            }
        }

        violations
            .into_iter()
            .max_by(|a, b| a.relative_excess().total_cmp(&b.relative_excess()))
    }
}
