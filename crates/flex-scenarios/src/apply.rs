use flex_core::{FlexError, FlexResult, Megavars, MegavoltAmperes, Megawatts, Network, SgenKind};
use tracing::info;

use crate::spec::{ResolvedScenario, ScenarioShift};

/// Positional line indices of the sectionalizing switches of the CIGRE MV feeder.
const SWITCH_S1: usize = 14;
const SWITCH_S2: usize = 12;
const SWITCH_S3: usize = 13;

/// The base feeder before and after the scenario shift.
#[derive(Debug, Clone)]
pub struct PreparedNetworks {
    pub unaltered: Network,
    /// Network sampled by the Monte Carlo run; equal to `unaltered` without a shift.
    pub altered: Network,
}

/// Build the scenario's network, scale its DG and apply the shift.
pub fn prepare_networks(scenario: &ResolvedScenario) -> FlexResult<PreparedNetworks> {
    let mut unaltered = flex_io::network_by_name(&scenario.network)?;
    scale_dg(&mut unaltered, scenario.scale_pv, scenario.scale_wt)?;
    let mut altered = unaltered.clone();
    apply_shift(&mut altered, scenario.shift)?;
    Ok(PreparedNetworks { unaltered, altered })
}

/// Multiply PV (and other DG) installations by `scale_pv` and wind by `scale_wt`.
/// Setpoint and rating scale together, so a unit keeps its loading.
pub fn scale_dg(network: &mut Network, scale_pv: f64, scale_wt: f64) -> FlexResult<()> {
    if (scale_pv - 1.0).abs() < f64::EPSILON && (scale_wt - 1.0).abs() < f64::EPSILON {
        return Ok(());
    }
    let targets: Vec<_> = network
        .sgens()
        .iter()
        .map(|s| {
            let scale = match s.kind {
                SgenKind::Wind => scale_wt,
                SgenKind::Pv | SgenKind::Other => scale_pv,
            };
            (s.id, scale)
        })
        .collect();
    for (id, scale) in targets {
        let sgen = network
            .sgen_mut(id)
            .ok_or_else(|| FlexError::Network(format!("unknown {id}")))?;
        sgen.active_power = Megawatts(sgen.active_power.value() * scale);
        sgen.reactive_power = Megavars(sgen.reactive_power.value() * scale);
        sgen.sn_mva = MegavoltAmperes(sgen.sn_mva.value() * scale);
    }
    info!(scale_pv, scale_wt, "DG output scaled");
    Ok(())
}

fn shift_load(network: &mut Network, index: usize, dp: f64, dq: f64) -> FlexResult<()> {
    let (id, p, q) = network
        .loads()
        .get(index)
        .map(|l| (l.id, l.active_power.value(), l.reactive_power.value()))
        .ok_or_else(|| {
            FlexError::config(format!("scenario shift references missing load {index}"))
        })?;
    network.set_load_power(id, Megawatts(p + dp), Megavars(q + dq))
}

fn set_line(
    network: &mut Network,
    index: usize,
    closed: Option<bool>,
    in_service: Option<bool>,
) -> FlexResult<()> {
    let line = network.line_mut(index).ok_or_else(|| {
        FlexError::config(format!("scenario shift references missing line {index}"))
    })?;
    if let Some(closed) = closed {
        line.switch_closed = closed;
    }
    if let Some(in_service) = in_service {
        line.in_service = in_service;
    }
    Ok(())
}

fn close_switch(network: &mut Network, line: usize) -> FlexResult<()> {
    set_line(network, line, Some(true), None)
}

fn take_out_of_service(network: &mut Network, line: usize) -> FlexResult<()> {
    set_line(network, line, None, Some(false))
}

/// Apply a USS/TSS shift of the CIGRE MV feeder.
///
/// USS moves demand from feeder 1 residential loads (R4-R6) to other loads;
/// the variant sets how much reactive demand moves along. TSS closes the S2
/// and S3 tie switches and takes lines out of service; TSS 3 also closes S1
/// and moves a large block of demand from load R11 to load CI3.
///
/// The result must still connect every bus to the external grid.
pub fn apply_shift(network: &mut Network, shift: ScenarioShift) -> FlexResult<()> {
    match shift {
        ScenarioShift::Unaltered => return Ok(()),
        ScenarioShift::Uss(n) => {
            let v = match n {
                1 | 2 => usize::from(n) - 1,
                other => return Err(FlexError::config(format!("unknown USS scenario {other}"))),
            };
            let q_moved = [0.3, 1.0][v];
            shift_load(network, 2, -0.43165, -q_moved)?;
            shift_load(network, 3, -0.7275, -q_moved)?;
            shift_load(network, 4, -0.54805, -q_moved)?;
            shift_load(network, 7, [0.414, 0.045][v], [0.276, 0.492][v])?;
            shift_load(network, 13, [0.7275, 1.06][v], [0.3, 1.0][v])?;
            shift_load(network, 14, 0.54805, [0.3, 1.431][v])?;
        }
        ScenarioShift::Tss(n) => {
            close_switch(network, SWITCH_S3)?;
            close_switch(network, SWITCH_S2)?;
            match n {
                1 => {
                    shift_load(network, 11, -0.031, -0.067)?;
                    take_out_of_service(network, 6)?;
                    take_out_of_service(network, 2)?;
                }
                2 => {
                    shift_load(network, 11, 0.0, -0.03)?;
                    take_out_of_service(network, 6)?;
                    take_out_of_service(network, 4)?;
                }
                3 => {
                    shift_load(network, 11, 2.14, 1.111)?;
                    shift_load(network, 7, -2.13, -1.115)?;
                    take_out_of_service(network, 9)?;
                    take_out_of_service(network, 2)?;
                    close_switch(network, SWITCH_S1)?;
                }
                other => {
                    return Err(FlexError::config(format!("unknown TSS scenario {other}")));
                }
            }
        }
    }
    network.validate()?;
    info!(%shift, stats = %network.stats(), "scenario shift applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flex_io::cigre_mv_pv_wind;

    fn load_pq(network: &Network, index: usize) -> (f64, f64) {
        let load = network.loads()[index];
        (load.active_power.value(), load.reactive_power.value())
    }

    #[test]
    fn test_unaltered_is_identity() {
        let base = cigre_mv_pv_wind().unwrap();
        let mut network = base.clone();
        apply_shift(&mut network, ScenarioShift::Unaltered).unwrap();
        assert_eq!(network.stats().to_string(), base.stats().to_string());
    }

    #[test]
    fn test_uss_moves_demand_between_loads() {
        let base = cigre_mv_pv_wind().unwrap();
        let mut network = base.clone();
        apply_shift(&mut network, ScenarioShift::Uss(1)).unwrap();
        let (p2, q2) = load_pq(&network, 2);
        let (p2_0, q2_0) = load_pq(&base, 2);
        assert!((p2 - (p2_0 - 0.43165)).abs() < 1e-12);
        assert!((q2 - (q2_0 - 0.3)).abs() < 1e-12);
        let (p14, _) = load_pq(&network, 14);
        assert!((p14 - (0.076 + 0.54805)).abs() < 1e-12);
        let (_, q14) = load_pq(&network, 14);
        assert!((q14 - (0.024980 + 0.3)).abs() < 1e-12);
    }

    #[test]
    fn test_uss_variants_differ_in_reactive_shift() {
        let mut one = cigre_mv_pv_wind().unwrap();
        let mut two = one.clone();
        apply_shift(&mut one, ScenarioShift::Uss(1)).unwrap();
        apply_shift(&mut two, ScenarioShift::Uss(2)).unwrap();
        assert!((load_pq(&one, 3).1 - load_pq(&two, 3).1 - 0.7).abs() < 1e-12);
        assert!((load_pq(&two, 13).0 - load_pq(&one, 13).0 - (1.06 - 0.7275)).abs() < 1e-12);
    }

    #[test]
    fn test_tss_topology() {
        let mut network = cigre_mv_pv_wind().unwrap();
        apply_shift(&mut network, ScenarioShift::Tss(1)).unwrap();
        let lines = network.lines();
        assert!(lines[SWITCH_S2].is_energized());
        assert!(lines[SWITCH_S3].is_energized());
        assert!(!lines[SWITCH_S1].is_energized());
        assert!(!lines[6].in_service);
        assert!(!lines[2].in_service);
        assert_eq!(network.stats().num_open_branches, 3);

        let mut network = cigre_mv_pv_wind().unwrap();
        apply_shift(&mut network, ScenarioShift::Tss(3)).unwrap();
        let lines = network.lines();
        assert!(lines[SWITCH_S1].is_energized());
        assert!(!lines[9].in_service);
        let (p7, _) = load_pq(&network, 7);
        assert!((p7 - (0.3332 - 2.13)).abs() < 1e-12);
    }

    #[test]
    fn test_scale_dg_by_kind() {
        let mut network = cigre_mv_pv_wind().unwrap();
        scale_dg(&mut network, 2.0, 0.5).unwrap();
        let sgens = network.sgens();
        assert!((sgens[0].active_power.value() - 0.04).abs() < 1e-12);
        assert!((sgens[8].active_power.value() - 0.75).abs() < 1e-12);
        // Ratings follow, so scaled-up output stays within its own rating.
        assert!((sgens[0].sn_mva.value() - 0.04).abs() < 1e-12);
        assert!((sgens[8].sn_mva.value() - 0.75).abs() < 1e-12);
        for sgen in sgens {
            assert!(sgen.active_power.value() <= sgen.sn_mva.value() + 1e-12);
        }
    }

    #[test]
    fn test_shift_on_small_network_is_configuration_error() {
        use flex_core::{Bus, BusId, ExtGrid, ExtGridId, Kilovolts};
        let mut network = Network::new();
        network.add_bus(Bus::new(BusId::new(0), "PCC", Kilovolts(20.0)));
        network.add_ext_grid(ExtGrid::new(ExtGridId::new(0), "Grid", BusId::new(0)));
        let err = apply_shift(&mut network, ScenarioShift::Tss(2)).unwrap_err();
        assert!(err.is_configuration());
    }
}
