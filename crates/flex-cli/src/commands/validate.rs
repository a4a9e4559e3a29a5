use anyhow::Result;
use flex_algo::ObservedSet;
use std::path::Path;

use crate::commands::load_scenario;

pub fn handle(path: &Path) -> Result<()> {
    let loaded = load_scenario(path)?;
    let scenario = &loaded.scenario;
    let observed = ObservedSet::resolve(&loaded.networks.altered, &scenario.observability)?;
    loaded.networks.altered.validate()?;
    println!(
        "Scenario '{}' is valid: {} ({}), {} FSPs, {} observable buses, {} observable lines",
        scenario.name,
        scenario.network,
        scenario.shift,
        loaded.fsps.len(),
        observed.buses.len(),
        observed.lines.len()
    );
    println!("  {}", loaded.networks.altered.stats());
    Ok(())
}
