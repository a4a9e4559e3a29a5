//! # AC power flow for radial and weakly meshed feeders
//!
//! Full Newton-Raphson in polar coordinates. The bus of the external grid is the
//! slack (|V| and θ fixed); every other bus is PQ, with loads as negative and
//! static generators as positive injections. After convergence the solver
//! reports branch flows, currents and loading so that thermal limits can be
//! checked, and the slack injection, which is the power exchanged at the PCC.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  NEWTON-RAPHSON ITERATION                                     │
//! │  ΔP = P_spec − P(V, θ)      ΔQ = Q_spec − Q(V, θ)             │
//! │  J = [ ∂P/∂θ  ∂P/∂V ]       J · [Δθ, ΔV]ᵀ = [ΔP, ΔQ]ᵀ         │
//! │      [ ∂Q/∂θ  ∂Q/∂V ]                                          │
//! │  stop when max(|ΔP|, |ΔQ|) < tolerance                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Divergence is reported as [`PowerFlowError::Diverged`] or
//! [`PowerFlowError::SingularJacobian`]; callers that sweep operating points
//! treat both as "no operating point exists here" rather than as a crash.
//!
//! ## References
//!
//! - **Tinney & Hart (1967)**: "Power Flow Solution by Newton's Method"
//!   IEEE Trans. PAS, 86(11), 1449-1460.
//!   DOI: [10.1109/TPAS.1967.291823](https://doi.org/10.1109/TPAS.1967.291823)

use faer::{prelude::*, solvers::PartialPivLu, Mat};
use flex_core::{BranchId, BusId, Edge, Network, Node};
use num_complex::Complex64;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PowerFlowError {
    #[error("network has no buses")]
    EmptyNetwork,
    #[error("network has no external grid to act as slack")]
    NoSlack,
    #[error("external grid bus {0} is not part of the network")]
    UnknownSlackBus(BusId),
    #[error(
        "Newton-Raphson did not converge after {iterations} iterations (max mismatch: {max_mismatch:.6})"
    )]
    Diverged { iterations: usize, max_mismatch: f64 },
    #[error("singular Jacobian matrix")]
    SingularJacobian,
}

impl PowerFlowError {
    /// True when the operating point does not exist, as opposed to a malformed network.
    pub fn is_non_convergence(&self) -> bool {
        matches!(
            self,
            PowerFlowError::Diverged { .. } | PowerFlowError::SingularJacobian
        )
    }
}

/// Flow on one line or transformer, from-side and to-side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchFlow {
    pub p_from_mw: f64,
    pub q_from_mvar: f64,
    pub p_to_mw: f64,
    pub q_to_mvar: f64,
    pub i_from_ka: f64,
    pub i_to_ka: f64,
    /// Current (lines) or apparent power (transformers) relative to the rating.
    /// `None` when the branch carries no rating.
    pub loading_percent: Option<f64>,
    pub is_transformer: bool,
}

impl BranchFlow {
    fn de_energized(is_transformer: bool) -> Self {
        Self {
            p_from_mw: 0.0,
            q_from_mvar: 0.0,
            p_to_mw: 0.0,
            q_to_mvar: 0.0,
            i_from_ka: 0.0,
            i_to_ka: 0.0,
            loading_percent: Some(0.0),
            is_transformer,
        }
    }
}

/// AC power flow solution
#[derive(Debug, Clone, Default)]
pub struct AcPowerFlowSolution {
    pub iterations: usize,
    /// Maximum power mismatch at convergence (p.u.)
    pub max_mismatch: f64,
    /// Bus voltage magnitudes (p.u.)
    pub bus_voltage_magnitude: HashMap<BusId, f64>,
    /// Bus voltage angles (radians)
    pub bus_voltage_angle: HashMap<BusId, f64>,
    pub branch_flows: HashMap<BranchId, BranchFlow>,
    /// Active power drawn from the external grid (MW, import positive)
    pub ext_grid_p_mw: f64,
    /// Reactive power drawn from the external grid (Mvar, import positive)
    pub ext_grid_q_mvar: f64,
}

/// AC power flow solver configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AcPowerFlowSolver {
    /// Convergence tolerance for power mismatches (p.u.)
    pub tolerance: f64,
    /// Maximum Newton-Raphson iterations
    pub max_iterations: usize,
}

impl Default for AcPowerFlowSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl AcPowerFlowSolver {
    pub fn new() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 30,
        }
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// Solve the power flow of `network` from a flat start.
    pub fn solve(&self, network: &Network) -> Result<AcPowerFlowSolution, PowerFlowError> {
        let model = FeederModel::from_network(network)?;
        let n = model.buses.len();

        let mut v_mag = vec![1.0; n];
        let mut v_ang = vec![model.slack_va; n];
        v_mag[model.slack] = model.slack_vm;

        let y_bus = model.build_y_bus();
        let (p_spec, q_spec) = model.specified_power();
        let nr = self.newton_raphson(&model, &y_bus, &p_spec, &q_spec, &mut v_mag, &mut v_ang)?;

        Ok(model.build_solution(&y_bus, &v_mag, &v_ang, nr))
    }

    fn newton_raphson(
        &self,
        model: &FeederModel,
        y_bus: &[Vec<Complex64>],
        p_spec: &[f64],
        q_spec: &[f64],
        v_mag: &mut [f64],
        v_ang: &mut [f64],
    ) -> Result<NrResult, PowerFlowError> {
        // Every non-slack bus is PQ, so the unknowns are (θ, |V|) of those buses.
        let pq_buses: Vec<usize> = (0..model.buses.len())
            .filter(|&i| i != model.slack)
            .collect();
        let n_pq = pq_buses.len();
        if n_pq == 0 {
            return Ok(NrResult {
                iterations: 0,
                max_mismatch: 0.0,
            });
        }

        let mut max_mismatch = f64::INFINITY;
        for iter in 0..self.max_iterations {
            let (p_calc, q_calc) = compute_power(y_bus, v_mag, v_ang);

            let mut mismatch = vec![0.0; 2 * n_pq];
            max_mismatch = 0.0;
            for (k, &i) in pq_buses.iter().enumerate() {
                mismatch[k] = p_spec[i] - p_calc[i];
                mismatch[n_pq + k] = q_spec[i] - q_calc[i];
                max_mismatch = max_mismatch
                    .max(mismatch[k].abs())
                    .max(mismatch[n_pq + k].abs());
            }

            if !max_mismatch.is_finite() {
                break;
            }
            if max_mismatch < self.tolerance {
                return Ok(NrResult {
                    iterations: iter,
                    max_mismatch,
                });
            }

            let jacobian = build_jacobian(y_bus, v_mag, v_ang, &p_calc, &q_calc, &pq_buses);
            let delta = solve_linear_system(&jacobian, &mismatch)?;

            for (k, &i) in pq_buses.iter().enumerate() {
                v_ang[i] += delta[k];
                v_mag[i] += delta[n_pq + k];
            }
            if v_mag.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                break;
            }
        }

        Err(PowerFlowError::Diverged {
            iterations: self.max_iterations,
            max_mismatch,
        })
    }
}

/// Dense per-unit view of the feeder, indexed by bus position.
struct FeederModel {
    buses: Vec<BusData>,
    slack: usize,
    slack_vm: f64,
    slack_va: f64,
    branches: Vec<BranchData>,
    injections: Vec<InjectionData>,
    base_mva: f64,
}

struct BusData {
    id: BusId,
    base_kv: f64,
}

struct BranchData {
    id: BranchId,
    from: usize,
    to: usize,
    r_pu: f64,
    x_pu: f64,
    b_pu: f64,
    tap: f64,
    shift: f64,
    energized: bool,
    is_transformer: bool,
    max_i_ka: Option<f64>,
    sn_mva: Option<f64>,
}

/// Net injection of a load (negative) or static generator (positive), in MW/Mvar.
struct InjectionData {
    bus: usize,
    p_mw: f64,
    q_mvar: f64,
}

struct NrResult {
    iterations: usize,
    max_mismatch: f64,
}

impl FeederModel {
    fn from_network(network: &Network) -> Result<Self, PowerFlowError> {
        let buses: Vec<BusData> = network
            .buses()
            .iter()
            .map(|b| BusData {
                id: b.id,
                base_kv: b.base_kv.value(),
            })
            .collect();
        if buses.is_empty() {
            return Err(PowerFlowError::EmptyNetwork);
        }
        let bus_idx: HashMap<BusId, usize> =
            buses.iter().enumerate().map(|(i, b)| (b.id, i)).collect();

        let grid = network
            .ext_grids()
            .first()
            .map(|g| (g.bus, g.vm_pu.value(), g.va.value()))
            .ok_or(PowerFlowError::NoSlack)?;
        let slack = *bus_idx
            .get(&grid.0)
            .ok_or(PowerFlowError::UnknownSlackBus(grid.0))?;

        let mut injections = Vec::new();
        for node in network.graph.node_weights() {
            match node {
                Node::Load(load) => {
                    if let Some(&bus) = bus_idx.get(&load.bus) {
                        injections.push(InjectionData {
                            bus,
                            p_mw: -load.active_power.value(),
                            q_mvar: -load.reactive_power.value(),
                        });
                    }
                }
                Node::Sgen(sgen) if sgen.in_service => {
                    if let Some(&bus) = bus_idx.get(&sgen.bus) {
                        injections.push(InjectionData {
                            bus,
                            p_mw: sgen.active_power.value(),
                            q_mvar: sgen.reactive_power.value(),
                        });
                    }
                }
                _ => {}
            }
        }

        let mut branches = Vec::new();
        for edge in network.graph.edge_weights() {
            let branch = edge.branch();
            let (Some(&from), Some(&to)) =
                (bus_idx.get(&branch.from_bus), bus_idx.get(&branch.to_bus))
            else {
                continue;
            };
            branches.push(BranchData {
                id: branch.id,
                from,
                to,
                r_pu: branch.resistance,
                x_pu: branch.reactance,
                b_pu: branch.charging_b.value(),
                tap: branch.tap_ratio,
                shift: branch.phase_shift.value(),
                energized: branch.is_energized(),
                is_transformer: matches!(edge, Edge::Transformer(_)),
                max_i_ka: branch.max_i_ka.map(|i| i.value()),
                sn_mva: branch.sn_mva.map(|s| s.value()),
            });
        }

        Ok(Self {
            buses,
            slack,
            slack_vm: grid.1,
            slack_va: grid.2,
            branches,
            injections,
            base_mva: network.base_mva,
        })
    }

    /// Two-port admittances (Yff, Yft, Ytf, Ytt) of a π branch with a from-side tap.
    fn branch_admittance(branch: &BranchData) -> Option<[Complex64; 4]> {
        let z = Complex64::new(branch.r_pu, branch.x_pu);
        if z.norm_sqr() < 1e-12 {
            return None;
        }
        let y_series = z.inv();
        let y_shunt = Complex64::new(0.0, branch.b_pu / 2.0);
        let tap_mag = if branch.tap > 0.0 { branch.tap } else { 1.0 };
        let tap = Complex64::from_polar(tap_mag, branch.shift);

        Some([
            (y_series + y_shunt) / (tap_mag * tap_mag),
            -(y_series / tap.conj()),
            -(y_series / tap),
            y_series + y_shunt,
        ])
    }

    fn build_y_bus(&self) -> Vec<Vec<Complex64>> {
        let n = self.buses.len();
        let mut y_bus = vec![vec![Complex64::new(0.0, 0.0); n]; n];
        for branch in self.branches.iter().filter(|b| b.energized) {
            let Some([yff, yft, ytf, ytt]) = Self::branch_admittance(branch) else {
                continue;
            };
            let (i, j) = (branch.from, branch.to);
            y_bus[i][i] += yff;
            y_bus[i][j] += yft;
            y_bus[j][i] += ytf;
            y_bus[j][j] += ytt;
        }
        y_bus
    }

    fn specified_power(&self) -> (Vec<f64>, Vec<f64>) {
        let n = self.buses.len();
        let mut p_spec = vec![0.0; n];
        let mut q_spec = vec![0.0; n];
        for inj in &self.injections {
            p_spec[inj.bus] += inj.p_mw / self.base_mva;
            q_spec[inj.bus] += inj.q_mvar / self.base_mva;
        }
        (p_spec, q_spec)
    }

    fn build_solution(
        &self,
        y_bus: &[Vec<Complex64>],
        v_mag: &[f64],
        v_ang: &[f64],
        nr: NrResult,
    ) -> AcPowerFlowSolution {
        let mut solution = AcPowerFlowSolution {
            iterations: nr.iterations,
            max_mismatch: nr.max_mismatch,
            ..Default::default()
        };

        for (i, bus) in self.buses.iter().enumerate() {
            solution.bus_voltage_magnitude.insert(bus.id, v_mag[i]);
            solution.bus_voltage_angle.insert(bus.id, v_ang[i]);
        }

        let voltages: Vec<Complex64> = v_mag
            .iter()
            .zip(v_ang)
            .map(|(&m, &a)| Complex64::from_polar(m, a))
            .collect();
        for branch in &self.branches {
            let flow = match Self::branch_admittance(branch) {
                Some(y) if branch.energized => self.branch_flow(branch, &y, &voltages),
                _ => BranchFlow::de_energized(branch.is_transformer),
            };
            solution.branch_flows.insert(branch.id, flow);
        }

        // The grid supplies whatever the slack bus injects into the feeder plus the
        // local net demand connected directly at the slack bus.
        let (p_calc, q_calc) = compute_power(y_bus, v_mag, v_ang);
        let (local_p, local_q) = self
            .injections
            .iter()
            .filter(|inj| inj.bus == self.slack)
            .fold((0.0, 0.0), |(p, q), inj| (p + inj.p_mw, q + inj.q_mvar));
        solution.ext_grid_p_mw = p_calc[self.slack] * self.base_mva - local_p;
        solution.ext_grid_q_mvar = q_calc[self.slack] * self.base_mva - local_q;

        solution
    }

    fn branch_flow(
        &self,
        branch: &BranchData,
        y: &[Complex64; 4],
        voltages: &[Complex64],
    ) -> BranchFlow {
        let [yff, yft, ytf, ytt] = *y;
        let vf = voltages[branch.from];
        let vt = voltages[branch.to];
        let i_from = yff * vf + yft * vt;
        let i_to = ytf * vf + ytt * vt;
        let s_from = vf * i_from.conj() * self.base_mva;
        let s_to = vt * i_to.conj() * self.base_mva;

        // |S| [MVA] / (√3 · |V| [kV]) = I [kA]
        let sqrt3 = 3f64.sqrt();
        let kv_from = self.buses[branch.from].base_kv * vf.norm();
        let kv_to = self.buses[branch.to].base_kv * vt.norm();
        let i_from_ka = if kv_from > 0.0 { s_from.norm() / (sqrt3 * kv_from) } else { 0.0 };
        let i_to_ka = if kv_to > 0.0 { s_to.norm() / (sqrt3 * kv_to) } else { 0.0 };

        let loading_percent = if branch.is_transformer {
            branch
                .sn_mva
                .filter(|sn| *sn > 0.0)
                .map(|sn| 100.0 * s_from.norm().max(s_to.norm()) / sn)
        } else {
            branch
                .max_i_ka
                .filter(|imax| *imax > 0.0)
                .map(|imax| 100.0 * i_from_ka.max(i_to_ka) / imax)
        };

        BranchFlow {
            p_from_mw: s_from.re,
            q_from_mvar: s_from.im,
            p_to_mw: s_to.re,
            q_to_mvar: s_to.im,
            i_from_ka,
            i_to_ka,
            loading_percent,
            is_transformer: branch.is_transformer,
        }
    }
}

/// P and Q injections (p.u.) from the current voltage state.
fn compute_power(y_bus: &[Vec<Complex64>], v_mag: &[f64], v_ang: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = v_mag.len();
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];

    for i in 0..n {
        for j in 0..n {
            let y = y_bus[i][j];
            if y.re == 0.0 && y.im == 0.0 {
                continue;
            }
            let theta_ij = v_ang[i] - v_ang[j];
            let (sin_t, cos_t) = theta_ij.sin_cos();
            // P_i = Σ V_i V_j (G_ij cos θ_ij + B_ij sin θ_ij)
            p[i] += v_mag[i] * v_mag[j] * (y.re * cos_t + y.im * sin_t);
            // Q_i = Σ V_i V_j (G_ij sin θ_ij − B_ij cos θ_ij)
            q[i] += v_mag[i] * v_mag[j] * (y.re * sin_t - y.im * cos_t);
        }
    }

    (p, q)
}

/// Polar Jacobian over the PQ buses, using the already computed injections for
/// the diagonal terms.
fn build_jacobian(
    y_bus: &[Vec<Complex64>],
    v_mag: &[f64],
    v_ang: &[f64],
    p_calc: &[f64],
    q_calc: &[f64],
    pq_buses: &[usize],
) -> Vec<Vec<f64>> {
    let n_pq = pq_buses.len();
    let mut jacobian = vec![vec![0.0; 2 * n_pq]; 2 * n_pq];

    for (row, &i) in pq_buses.iter().enumerate() {
        for (col, &j) in pq_buses.iter().enumerate() {
            let y = y_bus[i][j];
            let (g, b) = (y.re, y.im);
            if i == j {
                let v = v_mag[i];
                // ∂P/∂θ, ∂P/∂V, ∂Q/∂θ, ∂Q/∂V on the diagonal
                jacobian[row][col] = -q_calc[i] - b * v * v;
                jacobian[row][n_pq + col] = p_calc[i] / v + g * v;
                jacobian[n_pq + row][col] = p_calc[i] - g * v * v;
                jacobian[n_pq + row][n_pq + col] = q_calc[i] / v - b * v;
            } else {
                if g == 0.0 && b == 0.0 {
                    continue;
                }
                let (sin_t, cos_t) = (v_ang[i] - v_ang[j]).sin_cos();
                let a = g * sin_t - b * cos_t;
                let c = g * cos_t + b * sin_t;
                jacobian[row][col] = v_mag[i] * v_mag[j] * a;
                jacobian[row][n_pq + col] = v_mag[i] * c;
                jacobian[n_pq + row][col] = -v_mag[i] * v_mag[j] * c;
                jacobian[n_pq + row][n_pq + col] = v_mag[i] * a;
            }
        }
    }

    jacobian
}

/// Solve J·x = b with faer's partially pivoted LU.
fn solve_linear_system(a: &[Vec<f64>], b: &[f64]) -> Result<Vec<f64>, PowerFlowError> {
    let n = b.len();
    if n == 0 {
        return Ok(vec![]);
    }

    let mat = Mat::from_fn(n, n, |i, j| a[i][j]);
    let rhs = Mat::from_fn(n, 1, |i, _| b[i]);
    let lu = PartialPivLu::new(mat.as_ref());
    let solution = lu.solve(&rhs);

    let x: Vec<f64> = (0..n).map(|i| solution.read(i, 0)).collect();
    if x.iter().any(|v| !v.is_finite()) {
        return Err(PowerFlowError::SingularJacobian);
    }
    Ok(x)
}
