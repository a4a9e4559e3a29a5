//! CIGRE medium-voltage benchmark feeder (Task Force C6.04.02) with PV and
//! wind DER.
//!
//! Layout:
//! - bus 0 at 110 kV behind the external grid (the PCC), buses 1-14 at 20 kV
//! - two 25 MVA transformers, 0-1 (feeder 1) and 0-12 (feeder 2)
//! - 15 lines; lines 12, 13 and 14 sit behind the sectionalizing switches
//!   S2, S3 and S1, which are open in the base topology
//! - 18 loads: residential R* first, then commercial/industrial CI*
//! - 9 static generators: eight PV units, then the wind turbine at bus 7
//!
//! Line impedances are converted to per unit on a 1 MVA base; charging is the
//! total susceptance at 50 Hz.
//!
//! ## References
//!
//! - **CIGRE TF C6.04.02 (2014)**: "Benchmark Systems for Network Integration
//!   of Renewable and Distributed Energy Resources", CIGRE Technical Brochure 575.

use flex_core::{
    Branch, BranchId, Bus, BusId, Edge, ExtGrid, ExtGridId, FlexError, FlexResult, Kilovolts, Load,
    LoadId, Network, Sgen, SgenId, SgenKind,
};
use std::f64::consts::PI;
use tracing::debug;

/// Network name used in scenario files.
pub const CIGRE_MV: &str = "CIGRE MV";

const BASE_MVA: f64 = 1.0;
const HV_KV: f64 = 110.0;
const MV_KV: f64 = 20.0;
const FREQUENCY_HZ: f64 = 50.0;
const EXT_GRID_VM_PU: f64 = 1.03;

const TRAFO_SN_MVA: f64 = 25.0;
/// Short-circuit voltage (fraction)
const TRAFO_VK: f64 = 0.12;
/// Real part of the short-circuit voltage (fraction)
const TRAFO_VKR: f64 = 0.0016;

#[derive(Debug, Clone, Copy)]
struct LineType {
    r_ohm_per_km: f64,
    x_ohm_per_km: f64,
    c_nf_per_km: f64,
    max_i_ka: f64,
}

const CABLE: LineType = LineType {
    r_ohm_per_km: 0.501,
    x_ohm_per_km: 0.716,
    c_nf_per_km: 151.1749,
    max_i_ka: 0.145,
};

const OVERHEAD: LineType = LineType {
    r_ohm_per_km: 0.510,
    x_ohm_per_km: 0.366,
    c_nf_per_km: 10.09679,
    max_i_ka: 0.195,
};

/// (from, to, length km, type, switch name when fitted with an open switch)
const LINES: [(usize, usize, f64, LineType, Option<&str>); 15] = [
    (1, 2, 2.82, CABLE, None),
    (2, 3, 4.42, CABLE, None),
    (3, 4, 0.61, CABLE, None),
    (4, 5, 0.56, CABLE, None),
    (5, 6, 1.54, CABLE, None),
    (7, 8, 1.67, CABLE, None),
    (8, 9, 0.32, CABLE, None),
    (9, 10, 0.77, CABLE, None),
    (10, 11, 0.33, CABLE, None),
    (3, 8, 1.30, CABLE, None),
    (12, 13, 4.89, OVERHEAD, None),
    (13, 14, 2.99, OVERHEAD, None),
    (6, 7, 0.24, CABLE, Some("S2")),
    (11, 4, 0.49, CABLE, Some("S3")),
    (14, 8, 2.00, OVERHEAD, Some("S1")),
];

/// (name, bus, p MW, q Mvar, rated MVA)
const LOADS: [(&str, usize, f64, f64, f64); 18] = [
    ("Load R1", 1, 14.994, 3.044662, 15.3),
    ("Load R3", 3, 0.2793, 0.056710, 0.285),
    ("Load R4", 4, 0.4361, 0.088548, 0.445),
    ("Load R5", 5, 0.7350, 0.149242, 0.75),
    ("Load R6", 6, 0.5537, 0.112430, 0.565),
    ("Load R8", 8, 0.5929, 0.120389, 0.605),
    ("Load R10", 10, 0.4802, 0.097506, 0.49),
    ("Load R11", 11, 0.3332, 0.067656, 0.34),
    ("Load R12", 12, 14.994, 3.044662, 15.3),
    ("Load R14", 14, 0.2107, 0.042783, 0.215),
    ("Load CI1", 1, 4.845, 1.592474, 5.1),
    ("Load CI3", 3, 0.25175, 0.082745, 0.265),
    ("Load CI7", 7, 0.0855, 0.028103, 0.09),
    ("Load CI9", 9, 0.64125, 0.210772, 0.675),
    ("Load CI10", 10, 0.076, 0.024980, 0.08),
    ("Load CI12", 12, 5.016, 1.648679, 5.28),
    ("Load CI13", 13, 0.038, 0.012490, 0.04),
    ("Load CI14", 14, 0.3705, 0.121779, 0.39),
];

/// (name, bus, kind, rated MVA); generators start at full output, unity power factor.
const SGENS: [(&str, usize, SgenKind, f64); 9] = [
    ("PV 3", 3, SgenKind::Pv, 0.02),
    ("PV 4", 4, SgenKind::Pv, 0.02),
    ("PV 5", 5, SgenKind::Pv, 0.03),
    ("PV 6", 6, SgenKind::Pv, 0.03),
    ("PV 8", 8, SgenKind::Pv, 0.03),
    ("PV 9", 9, SgenKind::Pv, 0.03),
    ("PV 10", 10, SgenKind::Pv, 0.04),
    ("PV 11", 11, SgenKind::Pv, 0.01),
    ("WKA 7", 7, SgenKind::Wind, 1.5),
];

/// Build a network by its scenario-file name.
pub fn network_by_name(name: &str) -> FlexResult<Network> {
    match name {
        CIGRE_MV => cigre_mv_pv_wind(),
        other => Err(FlexError::config(format!(
            "unknown network '{other}' (available: {CIGRE_MV})"
        ))),
    }
}

/// The CIGRE MV feeder with its PV units and wind turbine.
pub fn cigre_mv_pv_wind() -> FlexResult<Network> {
    let mut network = Network::with_base_mva(BASE_MVA);

    network.add_bus(Bus::new(BusId::new(0), "Bus 0", Kilovolts(HV_KV)));
    for i in 1..=14 {
        network.add_bus(Bus::new(BusId::new(i), format!("Bus {i}"), Kilovolts(MV_KV)));
    }
    network.add_ext_grid(
        ExtGrid::new(ExtGridId::new(0), "External grid", BusId::new(0)).with_vm_pu(EXT_GRID_VM_PU),
    );

    let z_base = MV_KV * MV_KV / BASE_MVA;
    for (i, &(from, to, length_km, kind, switch)) in LINES.iter().enumerate() {
        let b_siemens = 2.0 * PI * FREQUENCY_HZ * kind.c_nf_per_km * 1e-9 * length_km;
        let mut line = Branch::new(
            BranchId::new(i),
            format!("Line {from}-{to}"),
            BusId::new(from),
            BusId::new(to),
            kind.r_ohm_per_km * length_km / z_base,
            kind.x_ohm_per_km * length_km / z_base,
        )
        .with_max_i_ka(kind.max_i_ka)
        .with_charging_b(b_siemens * z_base);
        if let Some(switch) = switch {
            debug!(line = i, switch, "line behind open switch");
            line = line.with_open_switch();
        }
        network.add_edge(Edge::Line(line))?;
    }

    let z_pu = TRAFO_VK * BASE_MVA / TRAFO_SN_MVA;
    let r_pu = TRAFO_VKR * BASE_MVA / TRAFO_SN_MVA;
    let x_pu = (z_pu * z_pu - r_pu * r_pu).sqrt();
    for (k, to) in [1usize, 12].into_iter().enumerate() {
        network.add_edge(Edge::Transformer(
            Branch::new(
                BranchId::new(LINES.len() + k),
                format!("Trafo 0-{to}"),
                BusId::new(0),
                BusId::new(to),
                r_pu,
                x_pu,
            )
            .with_sn_mva(TRAFO_SN_MVA),
        ))?;
    }

    for (i, &(name, bus, p, q, sn)) in LOADS.iter().enumerate() {
        network.add_load(Load::new(LoadId::new(i), name, BusId::new(bus), p, q).with_sn_mva(sn));
    }
    for (i, &(name, bus, kind, sn)) in SGENS.iter().enumerate() {
        network.add_sgen(Sgen::new(SgenId::new(i), name, BusId::new(bus), kind, sn, sn));
    }

    network.validate()?;
    Ok(network)
}
