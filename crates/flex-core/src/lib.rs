//! # flex-core: Feeder model for PCC flexibility studies
//!
//! Distribution feeders are modeled as an undirected petgraph graph where:
//! - **Nodes**: buses, the external grid connection (the PCC / slack), loads and
//!   static generators (PV, wind)
//! - **Edges**: lines and transformers
//!
//! Loads and static generators are stored as nodes that are not connected by
//! edges; they reference their bus by [`BusId`]. Positional order of each element
//! kind (sorted by id) is the stable index used by scenario configuration, so
//! `sgens()[3]` is "static generator 3" everywhere in the workspace.
//!
//! ## Quick Start
//!
//! ```rust
//! use flex_core::*;
//!
//! let mut network = Network::with_base_mva(1.0);
//! network.add_bus(Bus::new(BusId::new(0), "PCC", Kilovolts(20.0)));
//! network.add_bus(Bus::new(BusId::new(1), "Feeder end", Kilovolts(20.0)));
//! network.add_ext_grid(ExtGrid::new(ExtGridId::new(0), "Grid", BusId::new(0)));
//! network
//!     .add_edge(Edge::Line(Branch::new(
//!         BranchId::new(0),
//!         "Line 0-1",
//!         BusId::new(0),
//!         BusId::new(1),
//!         0.01,
//!         0.02,
//!     )))
//!     .unwrap();
//! network.add_load(Load::new(LoadId::new(0), "Load 1", BusId::new(1), 0.4, 0.1));
//! assert!(network.validate().is_ok());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - [`FlexError`] and [`FlexResult`]
//! - [`units`] - unit newtypes (MW, Mvar, MVA, pu, kV, kA, rad)

use petgraph::{prelude::*, visit::Dfs, Undirected};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub mod error;
pub mod units;

pub use error::{FlexError, FlexResult};
pub use petgraph::graph::{EdgeIndex, NodeIndex};
pub use units::{
    Degrees, Kiloamperes, Kilovolts, Megavars, MegavoltAmperes, Megawatts, PerUnit, Radians,
};

macro_rules! impl_id {
    ($name:ident, $label:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", $label, self.0)
            }
        }
    };
}

impl_id!(BusId, "Bus");
impl_id!(BranchId, "Branch");
impl_id!(LoadId, "Load");
impl_id!(SgenId, "Sgen");
impl_id!(ExtGridId, "ExtGrid");

#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    /// Nominal voltage (for current and per-unit conversions)
    pub base_kv: Kilovolts,
    pub zone: Option<String>,
}

impl Bus {
    pub fn new(id: BusId, name: impl Into<String>, base_kv: Kilovolts) -> Self {
        Self {
            id,
            name: name.into(),
            base_kv,
            zone: None,
        }
    }
}

/// Series branch data shared by lines and transformers.
///
/// Impedances are per-unit on the network MVA base and the from-bus voltage base.
#[derive(Debug, Clone)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub from_bus: BusId,
    pub to_bus: BusId,
    /// Series resistance (per-unit)
    pub resistance: f64,
    /// Series reactance (per-unit)
    pub reactance: f64,
    /// Total charging susceptance (per-unit, split half/half)
    pub charging_b: PerUnit,
    /// Off-nominal tap magnitude on the from side
    pub tap_ratio: f64,
    pub phase_shift: Radians,
    /// Thermal current limit (lines)
    pub max_i_ka: Option<Kiloamperes>,
    /// Rated apparent power (transformers)
    pub sn_mva: Option<MegavoltAmperes>,
    pub in_service: bool,
    /// State of a sectionalizing switch on the branch; `true` when none is fitted.
    pub switch_closed: bool,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            id: BranchId(0),
            name: String::new(),
            from_bus: BusId(0),
            to_bus: BusId(0),
            resistance: 0.0,
            reactance: 0.0,
            charging_b: PerUnit(0.0),
            tap_ratio: 1.0,
            phase_shift: Radians(0.0),
            max_i_ka: None,
            sn_mva: None,
            in_service: true,
            switch_closed: true,
        }
    }
}

impl Branch {
    pub fn new(
        id: BranchId,
        name: impl Into<String>,
        from_bus: BusId,
        to_bus: BusId,
        resistance: f64,
        reactance: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            from_bus,
            to_bus,
            resistance,
            reactance,
            ..Self::default()
        }
    }

    pub fn with_max_i_ka(mut self, max_i_ka: f64) -> Self {
        self.max_i_ka = Some(Kiloamperes(max_i_ka));
        self
    }

    pub fn with_sn_mva(mut self, sn_mva: f64) -> Self {
        self.sn_mva = Some(MegavoltAmperes(sn_mva));
        self
    }

    pub fn with_charging_b(mut self, b_pu: f64) -> Self {
        self.charging_b = PerUnit(b_pu);
        self
    }

    pub fn with_open_switch(mut self) -> Self {
        self.switch_closed = false;
        self
    }

    /// Whether the branch carries current in the power flow.
    pub fn is_energized(&self) -> bool {
        self.in_service && self.switch_closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SgenKind {
    Pv,
    Wind,
    Other,
}

impl SgenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SgenKind::Pv => "pv",
            SgenKind::Wind => "wt",
            SgenKind::Other => "dg",
        }
    }
}

/// Static generator (inverter-connected DG), modeled as a PQ injection.
#[derive(Debug, Clone)]
pub struct Sgen {
    pub id: SgenId,
    pub name: String,
    pub bus: BusId,
    pub kind: SgenKind,
    pub active_power: Megawatts,
    pub reactive_power: Megavars,
    /// Inverter apparent power rating
    pub sn_mva: MegavoltAmperes,
    pub in_service: bool,
}

impl Sgen {
    pub fn new(
        id: SgenId,
        name: impl Into<String>,
        bus: BusId,
        kind: SgenKind,
        p_mw: f64,
        sn_mva: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            bus,
            kind,
            active_power: Megawatts(p_mw),
            reactive_power: Megavars(0.0),
            sn_mva: MegavoltAmperes(sn_mva),
            in_service: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Load {
    pub id: LoadId,
    pub name: String,
    pub bus: BusId,
    /// Active power demand (MW)
    pub active_power: Megawatts,
    /// Reactive power demand (Mvar)
    pub reactive_power: Megavars,
    /// Apparent power rating; defaults to |S| of the initial demand when absent.
    pub sn_mva: Option<MegavoltAmperes>,
}

impl Load {
    pub fn new(id: LoadId, name: impl Into<String>, bus: BusId, p_mw: f64, q_mvar: f64) -> Self {
        Self {
            id,
            name: name.into(),
            bus,
            active_power: Megawatts(p_mw),
            reactive_power: Megavars(q_mvar),
            sn_mva: None,
        }
    }

    pub fn with_sn_mva(mut self, sn_mva: f64) -> Self {
        self.sn_mva = Some(MegavoltAmperes(sn_mva));
        self
    }

    pub fn rating(&self) -> MegavoltAmperes {
        self.sn_mva
            .unwrap_or_else(|| self.active_power.apparent_power(self.reactive_power))
    }
}

/// Connection to the upstream grid. Its bus is the slack and the PCC.
#[derive(Debug, Clone)]
pub struct ExtGrid {
    pub id: ExtGridId,
    pub name: String,
    pub bus: BusId,
    pub vm_pu: PerUnit,
    pub va: Radians,
}

impl ExtGrid {
    pub fn new(id: ExtGridId, name: impl Into<String>, bus: BusId) -> Self {
        Self {
            id,
            name: name.into(),
            bus,
            vm_pu: PerUnit::ONE,
            va: Radians(0.0),
        }
    }

    pub fn with_vm_pu(mut self, vm_pu: f64) -> Self {
        self.vm_pu = PerUnit(vm_pu);
        self
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    Bus(Bus),
    ExtGrid(ExtGrid),
    Load(Load),
    Sgen(Sgen),
}

#[derive(Debug, Clone)]
pub enum Edge {
    Line(Branch),
    Transformer(Branch),
}

impl Edge {
    pub fn branch(&self) -> &Branch {
        match self {
            Edge::Line(b) | Edge::Transformer(b) => b,
        }
    }

    pub fn branch_mut(&mut self) -> &mut Branch {
        match self {
            Edge::Line(b) | Edge::Transformer(b) => b,
        }
    }

    pub fn is_transformer(&self) -> bool {
        matches!(self, Edge::Transformer(_))
    }
}

/// A distribution feeder.
///
/// Cloning is cheap enough for one private copy per Monte Carlo trial.
#[derive(Debug, Clone)]
pub struct Network {
    pub graph: Graph<Node, Edge, Undirected>,
    /// System MVA base of all per-unit impedances in the graph
    pub base_mva: f64,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    pub fn new() -> Self {
        Self::with_base_mva(1.0)
    }

    pub fn with_base_mva(base_mva: f64) -> Self {
        Self {
            graph: Graph::new_undirected(),
            base_mva,
        }
    }

    pub fn add_bus(&mut self, bus: Bus) -> NodeIndex {
        self.graph.add_node(Node::Bus(bus))
    }

    pub fn add_ext_grid(&mut self, ext_grid: ExtGrid) -> NodeIndex {
        self.graph.add_node(Node::ExtGrid(ext_grid))
    }

    pub fn add_load(&mut self, load: Load) -> NodeIndex {
        self.graph.add_node(Node::Load(load))
    }

    pub fn add_sgen(&mut self, sgen: Sgen) -> NodeIndex {
        self.graph.add_node(Node::Sgen(sgen))
    }

    /// Connect two existing buses with a line or transformer.
    pub fn add_edge(&mut self, edge: Edge) -> FlexResult<EdgeIndex> {
        let branch = edge.branch();
        let from = self.bus_index(branch.from_bus).ok_or_else(|| {
            FlexError::Network(format!("{} references unknown {}", branch.name, branch.from_bus))
        })?;
        let to = self.bus_index(branch.to_bus).ok_or_else(|| {
            FlexError::Network(format!("{} references unknown {}", branch.name, branch.to_bus))
        })?;
        Ok(self.graph.add_edge(from, to, edge))
    }

    pub fn bus_index(&self, id: BusId) -> Option<NodeIndex> {
        self.graph
            .node_indices()
            .find(|&idx| matches!(&self.graph[idx], Node::Bus(b) if b.id == id))
    }

    /// Buses ordered by id.
    pub fn buses(&self) -> Vec<&Bus> {
        let mut buses: Vec<&Bus> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                Node::Bus(b) => Some(b),
                _ => None,
            })
            .collect();
        buses.sort_by_key(|b| b.id);
        buses
    }

    /// Loads ordered by id. The position in this list is the load's index.
    pub fn loads(&self) -> Vec<&Load> {
        let mut loads: Vec<&Load> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                Node::Load(l) => Some(l),
                _ => None,
            })
            .collect();
        loads.sort_by_key(|l| l.id);
        loads
    }

    /// Static generators ordered by id. The position in this list is the sgen's index.
    pub fn sgens(&self) -> Vec<&Sgen> {
        let mut sgens: Vec<&Sgen> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                Node::Sgen(s) => Some(s),
                _ => None,
            })
            .collect();
        sgens.sort_by_key(|s| s.id);
        sgens
    }

    pub fn ext_grids(&self) -> Vec<&ExtGrid> {
        let mut grids: Vec<&ExtGrid> = self
            .graph
            .node_weights()
            .filter_map(|n| match n {
                Node::ExtGrid(g) => Some(g),
                _ => None,
            })
            .collect();
        grids.sort_by_key(|g| g.id);
        grids
    }

    /// Lines ordered by branch id. Transformers are not included.
    pub fn lines(&self) -> Vec<&Branch> {
        let mut lines: Vec<&Branch> = self
            .graph
            .edge_weights()
            .filter_map(|e| match e {
                Edge::Line(b) => Some(b),
                Edge::Transformer(_) => None,
            })
            .collect();
        lines.sort_by_key(|b| b.id);
        lines
    }

    pub fn transformers(&self) -> Vec<&Branch> {
        let mut trafos: Vec<&Branch> = self
            .graph
            .edge_weights()
            .filter_map(|e| match e {
                Edge::Transformer(b) => Some(b),
                Edge::Line(_) => None,
            })
            .collect();
        trafos.sort_by_key(|b| b.id);
        trafos
    }

    pub fn load_mut(&mut self, id: LoadId) -> Option<&mut Load> {
        self.graph.node_weights_mut().find_map(|n| match n {
            Node::Load(l) if l.id == id => Some(l),
            _ => None,
        })
    }

    pub fn sgen_mut(&mut self, id: SgenId) -> Option<&mut Sgen> {
        self.graph.node_weights_mut().find_map(|n| match n {
            Node::Sgen(s) if s.id == id => Some(s),
            _ => None,
        })
    }

    /// Mutable access to the line at positional `index` (ordered like [`Network::lines`]).
    pub fn line_mut(&mut self, index: usize) -> Option<&mut Branch> {
        let id = self.lines().get(index).map(|b| b.id)?;
        self.graph.edge_weights_mut().find_map(|e| match e {
            Edge::Line(b) if b.id == id => Some(b),
            _ => None,
        })
    }

    /// Overwrite a load's operating point.
    pub fn set_load_power(&mut self, id: LoadId, p: Megawatts, q: Megavars) -> FlexResult<()> {
        let load = self
            .load_mut(id)
            .ok_or_else(|| FlexError::Network(format!("unknown {id}")))?;
        load.active_power = p;
        load.reactive_power = q;
        Ok(())
    }

    /// Overwrite a static generator's operating point.
    pub fn set_sgen_power(&mut self, id: SgenId, p: Megawatts, q: Megavars) -> FlexResult<()> {
        let sgen = self
            .sgen_mut(id)
            .ok_or_else(|| FlexError::Network(format!("unknown {id}")))?;
        sgen.active_power = p;
        sgen.reactive_power = q;
        Ok(())
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats::default();
        for node in self.graph.node_weights() {
            match node {
                Node::Bus(_) => stats.num_buses += 1,
                Node::ExtGrid(_) => stats.num_ext_grids += 1,
                Node::Load(l) => {
                    stats.num_loads += 1;
                    stats.total_load_mw += l.active_power.value();
                    stats.total_load_mvar += l.reactive_power.value();
                }
                Node::Sgen(s) => {
                    stats.num_sgens += 1;
                    if s.in_service {
                        stats.total_sgen_mw += s.active_power.value();
                    }
                }
            }
        }
        for edge in self.graph.edge_weights() {
            match edge {
                Edge::Line(_) => stats.num_lines += 1,
                Edge::Transformer(_) => stats.num_transformers += 1,
            }
            if !edge.branch().is_energized() {
                stats.num_open_branches += 1;
            }
        }
        stats
    }

    /// Check the structural assumptions of the power flow: exactly one external
    /// grid, every element attached to a known bus, every bus reachable from the
    /// PCC through energized branches.
    pub fn validate(&self) -> FlexResult<()> {
        let buses = self.buses();
        if buses.is_empty() {
            return Err(FlexError::Network("network has no buses".into()));
        }
        let grids = self.ext_grids();
        let grid = match grids.as_slice() {
            [grid] => *grid,
            [] => return Err(FlexError::Network("network has no external grid".into())),
            _ => {
                return Err(FlexError::Network(format!(
                    "network has {} external grids, expected one",
                    grids.len()
                )))
            }
        };

        let known: HashSet<BusId> = buses.iter().map(|b| b.id).collect();
        for node in self.graph.node_weights() {
            let (label, bus) = match node {
                Node::Bus(_) => continue,
                Node::ExtGrid(g) => (&g.name, g.bus),
                Node::Load(l) => (&l.name, l.bus),
                Node::Sgen(s) => (&s.name, s.bus),
            };
            if !known.contains(&bus) {
                return Err(FlexError::Network(format!("{label} references unknown {bus}")));
            }
        }

        let start = self
            .bus_index(grid.bus)
            .ok_or_else(|| FlexError::Network(format!("external grid bus {} missing", grid.bus)))?;
        let energized = self.graph.filter_map(
            |_, node| Some(matches!(node, Node::Bus(_))),
            |_, edge| edge.branch().is_energized().then_some(()),
        );
        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&energized, start);
        while let Some(idx) = dfs.next(&energized) {
            reached.insert(idx);
        }
        for idx in self.graph.node_indices() {
            if let Node::Bus(b) = &self.graph[idx] {
                if !reached.contains(&idx) {
                    return Err(FlexError::Network(format!(
                        "{} ({}) is not connected to the external grid",
                        b.id, b.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Statistics about a feeder's size and demand
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub num_buses: usize,
    pub num_ext_grids: usize,
    pub num_loads: usize,
    pub num_sgens: usize,
    pub num_lines: usize,
    pub num_transformers: usize,
    pub num_open_branches: usize,
    pub total_load_mw: f64,
    pub total_load_mvar: f64,
    pub total_sgen_mw: f64,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} buses, {} lines, {} transformers ({} open), {} loads ({:.3} MW), {} sgens ({:.3} MW)",
            self.num_buses,
            self.num_lines,
            self.num_transformers,
            self.num_open_branches,
            self.num_loads,
            self.total_load_mw,
            self.num_sgens,
            self.total_sgen_mw
        )
    }
}

impl Node {
    pub fn label(&self) -> &str {
        match self {
            Node::Bus(bus) => &bus.name,
            Node::ExtGrid(grid) => &grid.name,
            Node::Load(load) => &load.name,
            Node::Sgen(sgen) => &sgen.name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bus() -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new(BusId::new(0), "Bus 0", Kilovolts(20.0)));
        network.add_bus(Bus::new(BusId::new(1), "Bus 1", Kilovolts(20.0)));
        network.add_ext_grid(ExtGrid::new(ExtGridId::new(0), "Grid", BusId::new(0)));
        network
            .add_edge(Edge::Line(Branch::new(
                BranchId::new(0),
                "Line 0-1",
                BusId::new(0),
                BusId::new(1),
                0.01,
                0.02,
            )))
            .unwrap();
        network
    }

    #[test]
    fn test_network_creation() {
        let mut network = two_bus();
        network.add_load(Load::new(LoadId::new(0), "Load 1", BusId::new(1), 0.5, 0.1));
        network.add_sgen(Sgen::new(
            SgenId::new(0),
            "PV 1",
            BusId::new(1),
            SgenKind::Pv,
            0.2,
            0.25,
        ));

        let stats = network.stats();
        assert_eq!(stats.num_buses, 2);
        assert_eq!(stats.num_lines, 1);
        assert_eq!(stats.num_loads, 1);
        assert_eq!(stats.num_sgens, 1);
        assert!((stats.total_load_mw - 0.5).abs() < 1e-12);
        assert!(network.validate().is_ok());
    }

    #[test]
    fn test_element_order_follows_ids() {
        let mut network = two_bus();
        for id in [2, 0, 1] {
            network.add_load(Load::new(LoadId::new(id), format!("L{id}"), BusId::new(1), 0.1, 0.0));
        }
        let ids: Vec<usize> = network.loads().iter().map(|l| l.id.value()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_add_edge_rejects_unknown_bus() {
        let mut network = two_bus();
        let err = network
            .add_edge(Edge::Line(Branch::new(
                BranchId::new(1),
                "Dangling",
                BusId::new(1),
                BusId::new(9),
                0.01,
                0.01,
            )))
            .unwrap_err();
        assert!(matches!(err, FlexError::Network(_)));
    }

    #[test]
    fn test_validation_detects_island() {
        let mut network = two_bus();
        network.line_mut(0).unwrap().switch_closed = false;
        let err = network.validate().unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn test_validation_requires_single_ext_grid() {
        let mut network = Network::new();
        network.add_bus(Bus::new(BusId::new(0), "Bus 0", Kilovolts(20.0)));
        assert!(network.validate().unwrap_err().to_string().contains("external grid"));
    }

    #[test]
    fn test_set_setpoints() {
        let mut network = two_bus();
        network.add_load(Load::new(LoadId::new(0), "Load 1", BusId::new(1), 0.5, 0.1));
        network
            .set_load_power(LoadId::new(0), Megawatts(0.3), Megavars(-0.05))
            .unwrap();
        let load = network.loads()[0];
        assert_eq!(load.active_power, Megawatts(0.3));
        assert_eq!(load.reactive_power, Megavars(-0.05));
        assert!(network
            .set_sgen_power(SgenId::new(4), Megawatts(0.0), Megavars(0.0))
            .is_err());
    }

    #[test]
    fn test_load_rating_defaults_to_initial_apparent_power() {
        let load = Load::new(LoadId::new(0), "L", BusId::new(0), 0.3, 0.4);
        assert!((load.rating().value() - 0.5).abs() < 1e-12);
        assert_eq!(load.with_sn_mva(0.8).rating(), MegavoltAmperes(0.8));
    }
}
