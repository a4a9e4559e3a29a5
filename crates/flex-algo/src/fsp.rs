//! Flexible service provider (FSP) selection.
//!
//! Scenario files name controllable elements by positional index per category
//! (wind turbines, PV units, loads), with `[-1]` meaning "every element of that
//! category". [`IndexSelection`] turns that sentinel into an explicit variant at
//! the parsing boundary; [`select_fsps`] resolves the selections against a
//! network and returns the ordered FSP set the sampler works on.

use flex_core::{
    BusId, FlexError, FlexResult, LoadId, Megavars, MegavoltAmperes, Megawatts, Network, SgenId,
    SgenKind,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Which elements of one category are selected.
///
/// Deserializes from a list of integers; the single-element list `[-1]` is
/// [`IndexSelection::All`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<i64>")]
pub enum IndexSelection {
    #[default]
    All,
    Explicit(Vec<usize>),
}

impl IndexSelection {
    /// Parse a raw configuration list.
    pub fn from_raw(raw: &[i64]) -> FlexResult<Self> {
        match raw {
            [-1] => Ok(IndexSelection::All),
            _ => raw
                .iter()
                .map(|&i| {
                    usize::try_from(i).map_err(|_| {
                        FlexError::config(format!(
                            "invalid index {i}: use [-1] alone to select all elements"
                        ))
                    })
                })
                .collect::<FlexResult<Vec<_>>>()
                .map(IndexSelection::Explicit),
        }
    }

    /// Resolve against `len` available elements, deduplicating explicit indices
    /// in first-occurrence order.
    pub fn resolve(&self, len: usize, what: &str) -> FlexResult<Vec<usize>> {
        match self {
            IndexSelection::All => Ok((0..len).collect()),
            IndexSelection::Explicit(indices) => {
                let mut seen = HashSet::new();
                let mut resolved = Vec::with_capacity(indices.len());
                for &idx in indices {
                    if idx >= len {
                        return Err(FlexError::config(format!(
                            "{what} index {idx} is out of range (network has {len})"
                        )));
                    }
                    if seen.insert(idx) {
                        resolved.push(idx);
                    }
                }
                Ok(resolved)
            }
        }
    }
}

impl TryFrom<Vec<i64>> for IndexSelection {
    type Error = FlexError;

    fn try_from(raw: Vec<i64>) -> Result<Self, Self::Error> {
        IndexSelection::from_raw(&raw)
    }
}

impl From<IndexSelection> for Vec<i64> {
    fn from(selection: IndexSelection) -> Self {
        match selection {
            IndexSelection::All => vec![-1],
            IndexSelection::Explicit(indices) => indices.into_iter().map(|i| i as i64).collect(),
        }
    }
}

/// Which FSP categories may be moved in a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FspCategory {
    #[default]
    #[serde(rename = "All")]
    All,
    #[serde(rename = "DG only")]
    DgOnly,
    #[serde(rename = "Load only")]
    LoadOnly,
}

impl FspCategory {
    fn allows(self, kind: FspKind) -> bool {
        match self {
            FspCategory::All => true,
            FspCategory::DgOnly => kind != FspKind::Load,
            FspCategory::LoadOnly => kind == FspKind::Load,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FspKind {
    Wind,
    Pv,
    Load,
}

impl FspKind {
    /// Short tag used in persisted column names.
    pub fn as_str(&self) -> &'static str {
        match self {
            FspKind::Wind => "wt",
            FspKind::Pv => "pv",
            FspKind::Load => "load",
        }
    }

    pub fn is_dg(&self) -> bool {
        !matches!(self, FspKind::Load)
    }
}

/// Network element an FSP's setpoint is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FspTarget {
    Sgen(SgenId),
    Load(LoadId),
}

/// A controllable element with its baseline and capability envelope.
#[derive(Debug, Clone)]
pub struct Fsp {
    pub kind: FspKind,
    /// Position in the network's ordered list of static generators or loads.
    pub index: usize,
    pub name: String,
    pub bus: BusId,
    pub target: FspTarget,
    pub p0: Megawatts,
    pub q0: Megavars,
    /// Apparent power capability
    pub s_max: MegavoltAmperes,
    /// Minimum power factor, when the element is bound by one.
    pub pf_min: Option<f64>,
}

impl Fsp {
    /// Column prefix in persisted point sets, e.g. `fsp_pv_3`.
    pub fn label(&self) -> String {
        format!("fsp_{}_{}", self.kind.as_str(), self.index)
    }

    pub fn with_pf_min(mut self, pf_min: f64) -> Self {
        self.pf_min = Some(pf_min);
        self
    }
}

impl fmt::Display for Fsp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.label(), self.name, self.bus)
    }
}

/// Raw FSP choice of a scenario.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FspSelection {
    pub category: FspCategory,
    pub wind: IndexSelection,
    pub pv: IndexSelection,
    pub loads: IndexSelection,
    /// Minimum power factor of every DG inverter, if bound by one.
    pub dg_pf_min: Option<f64>,
}

/// Resolve `selection` into the ordered controllable set: DG first by static
/// generator index, then loads by load index.
///
/// Fails with a configuration error for out-of-range indices, for indices that
/// point at a generator of the other kind, and when nothing is left to control.
pub fn select_fsps(network: &Network, selection: &FspSelection) -> FlexResult<Vec<Fsp>> {
    if let Some(pf) = selection.dg_pf_min {
        if !(pf > 0.0 && pf <= 1.0) {
            return Err(FlexError::config(format!(
                "DG minimum power factor must be in (0, 1], got {pf}"
            )));
        }
    }
    let sgens = network.sgens();
    let loads = network.loads();
    let mut fsps = Vec::new();

    if selection.category.allows(FspKind::Wind) {
        let mut dg: Vec<(usize, FspKind)> = Vec::new();
        for (list, kind, sgen_kind) in [
            (&selection.wind, FspKind::Wind, SgenKind::Wind),
            (&selection.pv, FspKind::Pv, SgenKind::Pv),
        ] {
            match list {
                IndexSelection::All => dg.extend(
                    sgens
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| s.kind == sgen_kind)
                        .map(|(i, _)| (i, kind)),
                ),
                IndexSelection::Explicit(_) => {
                    for idx in list.resolve(sgens.len(), kind.as_str())? {
                        if sgens[idx].kind != sgen_kind {
                            return Err(FlexError::config(format!(
                                "static generator {idx} ({}) is {}, not {}",
                                sgens[idx].name,
                                sgens[idx].kind.as_str(),
                                kind.as_str()
                            )));
                        }
                        dg.push((idx, kind));
                    }
                }
            }
        }
        dg.sort_by_key(|(idx, _)| *idx);
        dg.dedup_by_key(|(idx, _)| *idx);

        for (idx, kind) in dg {
            let sgen = sgens[idx];
            let fsp = Fsp {
                kind,
                index: idx,
                name: sgen.name.clone(),
                bus: sgen.bus,
                target: FspTarget::Sgen(sgen.id),
                p0: sgen.active_power,
                q0: sgen.reactive_power,
                s_max: sgen.sn_mva,
                pf_min: None,
            };
            fsps.push(match selection.dg_pf_min {
                Some(pf) => fsp.with_pf_min(pf),
                None => fsp,
            });
        }
    }

    if selection.category.allows(FspKind::Load) {
        let mut indices = selection.loads.resolve(loads.len(), "load")?;
        indices.sort_unstable();
        for idx in indices {
            let load = loads[idx];
            fsps.push(Fsp {
                kind: FspKind::Load,
                index: idx,
                name: load.name.clone(),
                bus: load.bus,
                target: FspTarget::Load(load.id),
                p0: load.active_power,
                q0: load.reactive_power,
                s_max: load.rating(),
                pf_min: None,
            });
        }
    }

    if fsps.is_empty() {
        return Err(FlexError::config(format!(
            "FSP selection {:?} leaves no controllable element in the network",
            selection.category
        )));
    }
    Ok(fsps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flex_core::{Bus, ExtGrid, ExtGridId, Kilovolts, Load, Sgen};

    fn feeder() -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new(BusId::new(0), "PCC", Kilovolts(20.0)));
        network.add_ext_grid(ExtGrid::new(ExtGridId::new(0), "Grid", BusId::new(0)));
        let kinds = [SgenKind::Pv, SgenKind::Wind, SgenKind::Pv];
        for (i, kind) in kinds.into_iter().enumerate() {
            network.add_sgen(Sgen::new(SgenId::new(i), format!("DG{i}"), BusId::new(0), kind, 0.1, 0.2));
        }
        for i in 0..3 {
            network.add_load(Load::new(LoadId::new(i), format!("L{i}"), BusId::new(0), 0.3, 0.1));
        }
        network
    }

    #[test]
    fn test_sentinel_parses_to_all() {
        assert_eq!(IndexSelection::from_raw(&[-1]).unwrap(), IndexSelection::All);
        assert_eq!(
            IndexSelection::from_raw(&[2, 0]).unwrap(),
            IndexSelection::Explicit(vec![2, 0])
        );
        assert!(IndexSelection::from_raw(&[1, -1]).unwrap_err().is_configuration());
    }

    #[test]
    fn test_selection_serde() {
        let all: IndexSelection = serde_json::from_str("[-1]").unwrap();
        assert_eq!(all, IndexSelection::All);
        let explicit: IndexSelection = serde_json::from_str("[3, 1]").unwrap();
        assert_eq!(serde_json::to_string(&explicit).unwrap(), "[3,1]");
        assert!(serde_json::from_str::<IndexSelection>("[-2]").is_err());
        let category: FspCategory = serde_json::from_str("\"DG only\"").unwrap();
        assert_eq!(category, FspCategory::DgOnly);
    }

    #[test]
    fn test_all_expands_full_category_in_order() {
        let network = feeder();
        let fsps = select_fsps(&network, &FspSelection::default()).unwrap();
        let labels: Vec<String> = fsps.iter().map(Fsp::label).collect();
        assert_eq!(
            labels,
            ["fsp_pv_0", "fsp_wt_1", "fsp_pv_2", "fsp_load_0", "fsp_load_1", "fsp_load_2"]
        );
        let again: Vec<String> = select_fsps(&network, &FspSelection::default())
            .unwrap()
            .iter()
            .map(Fsp::label)
            .collect();
        assert_eq!(labels, again);
    }

    #[test]
    fn test_explicit_lists_are_deduplicated() {
        let network = feeder();
        let selection = FspSelection {
            category: FspCategory::LoadOnly,
            loads: IndexSelection::Explicit(vec![2, 0, 2]),
            ..Default::default()
        };
        let fsps = select_fsps(&network, &selection).unwrap();
        let indices: Vec<usize> = fsps.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert!(fsps.iter().all(|f| f.kind == FspKind::Load));
    }

    #[test]
    fn test_out_of_range_index_is_configuration_error() {
        let network = feeder();
        let selection = FspSelection {
            loads: IndexSelection::Explicit(vec![7]),
            ..Default::default()
        };
        let err = select_fsps(&network, &selection).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_wrong_generator_kind_is_rejected() {
        let network = feeder();
        let selection = FspSelection {
            wind: IndexSelection::Explicit(vec![0]),
            ..Default::default()
        };
        assert!(select_fsps(&network, &selection).unwrap_err().is_configuration());
    }

    #[test]
    fn test_empty_controllable_set_is_rejected() {
        let mut network = Network::new();
        network.add_bus(Bus::new(BusId::new(0), "PCC", Kilovolts(20.0)));
        network.add_load(Load::new(LoadId::new(0), "L0", BusId::new(0), 0.3, 0.1));
        let selection = FspSelection {
            category: FspCategory::DgOnly,
            ..Default::default()
        };
        let err = select_fsps(&network, &selection).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_dg_power_factor_limit_applies_to_dg_only() {
        let network = feeder();
        let selection = FspSelection {
            dg_pf_min: Some(0.95),
            ..Default::default()
        };
        let fsps = select_fsps(&network, &selection).unwrap();
        for fsp in &fsps {
            let expected = fsp.kind.is_dg().then_some(0.95);
            assert_eq!(fsp.pf_min, expected, "{fsp}");
        }

        for bad in [0.0, 1.2, f64::NAN] {
            let selection = FspSelection {
                dg_pf_min: Some(bad),
                ..Default::default()
            };
            assert!(select_fsps(&network, &selection).unwrap_err().is_configuration());
        }
    }

    #[test]
    fn test_load_envelope_uses_rating() {
        let network = feeder();
        let selection = FspSelection {
            category: FspCategory::LoadOnly,
            ..Default::default()
        };
        let fsp = &select_fsps(&network, &selection).unwrap()[0];
        let expected = (0.3f64).hypot(0.1);
        assert!((fsp.s_max.value() - expected).abs() < 1e-12);
        assert_eq!(fsp.target, FspTarget::Load(LoadId::new(0)));
    }
}
