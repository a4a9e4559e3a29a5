use anyhow::{Context, Result};
use flex_algo::{select_fsps, Fsp};
use flex_scenarios::{
    load_config_from_path, prepare_networks, resolve_scenario, PreparedNetworks, ResolvedScenario,
};
use std::path::Path;

pub mod compare;
pub mod hull;
pub mod run;
pub mod validate;

/// A scenario file taken all the way to the networks and FSPs it describes.
pub struct LoadedScenario {
    pub scenario: ResolvedScenario,
    pub networks: PreparedNetworks,
    pub fsps: Vec<Fsp>,
}

pub fn load_scenario(path: &Path) -> Result<LoadedScenario> {
    let config = load_config_from_path(path)?;
    let scenario = resolve_scenario(&config)
        .with_context(|| format!("validating scenario '{}'", path.display()))?;
    let networks = prepare_networks(&scenario)
        .with_context(|| format!("preparing network for '{}'", scenario.name))?;
    let fsps = select_fsps(&networks.altered, &scenario.selection)?;
    Ok(LoadedScenario {
        scenario,
        networks,
        fsps,
    })
}
