use flex_algo::{
    AcPowerFlowSolver, Distribution, FspCategory, FspSelection, IndexSelection, Limits,
    MonteCarloConfig, Observability, SamplerConfig,
};
use flex_core::{FlexError, FlexResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// A scenario file as written by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub scenario_settings: ScenarioSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSettings {
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_no_samples")]
    pub no_samples: usize,
    #[serde(default = "default_distribution")]
    pub distribution: String,
    #[serde(default)]
    pub keep_mp: bool,
    #[serde(default = "default_max_curr_per")]
    pub max_curr_per: f64,
    #[serde(default = "default_max_volt_pu")]
    pub max_volt_pu: f64,
    #[serde(default = "default_min_volt_pu")]
    pub min_volt_pu: f64,
    #[serde(rename = "Monte_Carlo_simulation", default = "default_true")]
    pub monte_carlo_simulation: bool,
    #[serde(rename = "FSPs", default)]
    pub fsps: FspCategory,
    #[serde(rename = "FSP_WT_indices", default)]
    pub fsp_wt_indices: IndexSelection,
    #[serde(rename = "FSP_PV_indices", default)]
    pub fsp_pv_indices: IndexSelection,
    #[serde(rename = "FSP_load_indices", default)]
    pub fsp_load_indices: IndexSelection,
    #[serde(default = "default_observable_lines")]
    pub observable_lines_indices: IndexSelection,
    #[serde(default = "default_observable_buses")]
    pub observable_buses_indices: IndexSelection,
    #[serde(default)]
    pub scenario_type: ScenarioTypeSpec,
    #[serde(default = "default_scale")]
    pub scale_pv: f64,
    #[serde(default = "default_scale")]
    pub scale_wt: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Worker threads; 0 uses one per CPU.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// Persisted point sets summarized together in the hull table.
    #[serde(default)]
    pub comparison: Vec<ComparisonEntry>,
    /// Rounding of the multiplicity grid cells
    #[serde(default = "default_multiplicity_decimals")]
    pub multiplicity_decimals: u32,
    /// Minimum power factor of the DG inverters; unbounded when absent.
    #[serde(default)]
    pub pf_min_dg: Option<f64>,
    /// Newton-Raphson mismatch tolerance (p.u.)
    #[serde(default = "default_pf_tolerance")]
    pub pf_tolerance: f64,
    #[serde(default = "default_pf_max_iterations")]
    pub pf_max_iterations: usize,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            network: default_network(),
            no_samples: default_no_samples(),
            distribution: default_distribution(),
            keep_mp: false,
            max_curr_per: default_max_curr_per(),
            max_volt_pu: default_max_volt_pu(),
            min_volt_pu: default_min_volt_pu(),
            monte_carlo_simulation: true,
            fsps: FspCategory::All,
            fsp_wt_indices: IndexSelection::All,
            fsp_pv_indices: IndexSelection::All,
            fsp_load_indices: IndexSelection::All,
            observable_lines_indices: default_observable_lines(),
            observable_buses_indices: default_observable_buses(),
            scenario_type: ScenarioTypeSpec::default(),
            scale_pv: default_scale(),
            scale_wt: default_scale(),
            seed: default_seed(),
            workers: 0,
            results_dir: default_results_dir(),
            comparison: Vec::new(),
            multiplicity_decimals: default_multiplicity_decimals(),
            pf_min_dg: None,
            pf_tolerance: default_pf_tolerance(),
            pf_max_iterations: default_pf_max_iterations(),
        }
    }
}

fn default_name() -> String {
    "Unnamed".to_string()
}

fn default_network() -> String {
    flex_io::CIGRE_MV.to_string()
}

fn default_no_samples() -> usize {
    100
}

fn default_distribution() -> String {
    Distribution::default().name().to_string()
}

fn default_max_curr_per() -> f64 {
    100.0
}

fn default_max_volt_pu() -> f64 {
    1.05
}

fn default_min_volt_pu() -> f64 {
    0.95
}

fn default_true() -> bool {
    true
}

fn default_observable_lines() -> IndexSelection {
    IndexSelection::Explicit(vec![0, 1, 10, 11])
}

fn default_observable_buses() -> IndexSelection {
    IndexSelection::Explicit(vec![0, 1, 2, 3, 12, 13, 14])
}

fn default_scale() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    flex_algo::sampler::DEFAULT_SEED
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_multiplicity_decimals() -> u32 {
    1
}

fn default_pf_tolerance() -> f64 {
    AcPowerFlowSolver::new().tolerance
}

fn default_pf_max_iterations() -> usize {
    AcPowerFlowSolver::new().max_iterations
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScenarioKind {
    #[default]
    #[serde(rename = "Unaltered Model")]
    Unaltered,
    #[serde(rename = "USS")]
    Uss,
    #[serde(rename = "TSS")]
    Tss,
}

/// `scenario_type` entry: `{"name": "TSS", "no.": 2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScenarioTypeSpec {
    #[serde(default)]
    pub name: ScenarioKind,
    #[serde(rename = "no.", default)]
    pub number: u32,
}

/// One labeled point set of the hull comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub label: String,
    pub file: PathBuf,
}

/// A validated change applied to the base feeder before sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioShift {
    Unaltered,
    /// Load redistribution across the feeders (1 or 2)
    Uss(u8),
    /// Topology change with switch operations and line outages (1 to 3)
    Tss(u8),
}

impl ScenarioShift {
    pub fn from_spec(spec: &ScenarioTypeSpec) -> FlexResult<Self> {
        let number = u8::try_from(spec.number).unwrap_or(u8::MAX);
        match spec.name {
            ScenarioKind::Unaltered => Ok(ScenarioShift::Unaltered),
            ScenarioKind::Uss if (1..=2).contains(&number) => Ok(ScenarioShift::Uss(number)),
            ScenarioKind::Tss if (1..=3).contains(&number) => Ok(ScenarioShift::Tss(number)),
            ScenarioKind::Uss => Err(FlexError::config(format!(
                "USS scenario number must be 1 or 2, got {}",
                spec.number
            ))),
            ScenarioKind::Tss => Err(FlexError::config(format!(
                "TSS scenario number must be 1, 2 or 3, got {}",
                spec.number
            ))),
        }
    }

    pub fn is_unaltered(&self) -> bool {
        matches!(self, ScenarioShift::Unaltered)
    }
}

impl fmt::Display for ScenarioShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioShift::Unaltered => f.write_str("Unaltered Model"),
            ScenarioShift::Uss(n) => write!(f, "USS {n}"),
            ScenarioShift::Tss(n) => write!(f, "TSS {n}"),
        }
    }
}

/// Everything a run needs, validated and typed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScenario {
    pub name: String,
    pub network: String,
    pub shift: ScenarioShift,
    pub selection: FspSelection,
    pub observability: Observability,
    pub limits: Limits,
    pub solver: AcPowerFlowSolver,
    pub monte_carlo: MonteCarloConfig,
    /// Sample and evaluate; when false the persisted point set is reused.
    pub sample: bool,
    pub scale_pv: f64,
    pub scale_wt: f64,
    pub results_dir: PathBuf,
    pub comparison: Vec<ComparisonEntry>,
    pub multiplicity_decimals: u32,
}

impl ResolvedScenario {
    /// Where this scenario's labeled point set lives.
    pub fn result_path(&self) -> PathBuf {
        flex_io::result_path(&self.results_dir, &self.name)
    }
}

pub fn load_config_from_path(path: &Path) -> FlexResult<ScenarioConfig> {
    let data = fs::read_to_string(path).map_err(|e| {
        FlexError::config(format!("reading scenario file '{}': {e}", path.display()))
    })?;
    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).map_err(|e| e.to_string())
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).map_err(|e| e.to_string())
        }
        _ => serde_json::from_str(&data)
            .or_else(|_| serde_yaml::from_str(&data))
            .map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| {
        FlexError::config(format!("parsing scenario file '{}': {e}", path.display()))
    })
}

/// Validate a scenario file and turn it into typed run options.
pub fn resolve_scenario(config: &ScenarioConfig) -> FlexResult<ResolvedScenario> {
    let settings = &config.scenario_settings;
    if config.name.trim().is_empty() {
        return Err(FlexError::config("scenario name cannot be empty"));
    }
    if settings.network != flex_io::CIGRE_MV {
        return Err(FlexError::config(format!(
            "only the '{}' network is supported, not '{}'",
            flex_io::CIGRE_MV,
            settings.network
        )));
    }
    if settings.monte_carlo_simulation && settings.no_samples == 0 {
        return Err(FlexError::config("no_samples must be positive"));
    }
    for (what, scale) in [("scale_pv", settings.scale_pv), ("scale_wt", settings.scale_wt)] {
        if !scale.is_finite() || scale < 0.0 {
            return Err(FlexError::config(format!(
                "{what} must be a non-negative number, got {scale}"
            )));
        }
    }
    if settings.multiplicity_decimals > 6 {
        return Err(FlexError::config(format!(
            "multiplicity_decimals must be at most 6, got {}",
            settings.multiplicity_decimals
        )));
    }
    if !(settings.pf_tolerance.is_finite() && settings.pf_tolerance > 0.0) {
        return Err(FlexError::config(format!(
            "pf_tolerance must be positive, got {}",
            settings.pf_tolerance
        )));
    }
    if settings.pf_max_iterations == 0 {
        return Err(FlexError::config("pf_max_iterations must be positive"));
    }
    if let Some(pf) = settings.pf_min_dg {
        if !(pf > 0.0 && pf <= 1.0) {
            return Err(FlexError::config(format!(
                "pf_min_dg must be in (0, 1], got {pf}"
            )));
        }
    }

    let distribution: Distribution = settings.distribution.parse()?;
    let limits = Limits {
        min_volt_pu: settings.min_volt_pu,
        max_volt_pu: settings.max_volt_pu,
        max_curr_per: settings.max_curr_per,
    };
    limits.validate()?;
    let shift = ScenarioShift::from_spec(&settings.scenario_type)?;

    Ok(ResolvedScenario {
        name: config.name.clone(),
        network: settings.network.clone(),
        shift,
        selection: FspSelection {
            category: settings.fsps,
            wind: settings.fsp_wt_indices.clone(),
            pv: settings.fsp_pv_indices.clone(),
            loads: settings.fsp_load_indices.clone(),
            dg_pf_min: settings.pf_min_dg,
        },
        observability: Observability {
            buses: settings.observable_buses_indices.clone(),
            lines: settings.observable_lines_indices.clone(),
        },
        limits,
        solver: AcPowerFlowSolver::new()
            .with_tolerance(settings.pf_tolerance)
            .with_max_iterations(settings.pf_max_iterations),
        monte_carlo: MonteCarloConfig {
            sampler: SamplerConfig {
                distribution,
                keep_mp: settings.keep_mp,
                no_samples: settings.no_samples,
                seed: settings.seed,
            },
            workers: settings.workers,
        },
        sample: settings.monte_carlo_simulation,
        scale_pv: settings.scale_pv,
        scale_wt: settings.scale_wt,
        results_dir: settings.results_dir.clone(),
        comparison: settings.comparison.clone(),
        multiplicity_decimals: settings.multiplicity_decimals,
    })
}
