pub mod apply;
pub mod spec;

pub use apply::{apply_shift, prepare_networks, scale_dg, PreparedNetworks};
pub use spec::{
    load_config_from_path, resolve_scenario, ComparisonEntry, ResolvedScenario, ScenarioConfig,
    ScenarioKind, ScenarioSettings, ScenarioShift, ScenarioTypeSpec,
};
