//! Power flow for feeder studies
//!
//! - [`ac_pf`]: full AC power flow using Newton-Raphson, with branch loading
//!   and the external grid (PCC) injection reported per solve
//!
//! Every bus except the external grid bus is treated as PQ. Static generators in
//! distribution feeders are inverter-connected and dispatched at a (P, Q)
//! setpoint, so there is no PV-bus switching.

pub mod ac_pf;

pub use ac_pf::{AcPowerFlowSolution, AcPowerFlowSolver, BranchFlow, PowerFlowError};
