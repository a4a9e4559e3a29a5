//! Monte Carlo driver: sample, evaluate in parallel, collect.
//!
//! All perturbation vectors are drawn up front from the seeded sampler, then
//! the trials are spread over a rayon pool. Each trial only reads the shared
//! base network and owns its clone, so the labeled point set is the same for
//! any worker count.

use crate::evaluator::{FeasibilityEvaluator, TrialResult};
use crate::sampler::{Sampler, SamplerConfig};
use flex_core::{FlexError, FlexResult};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonteCarloConfig {
    pub sampler: SamplerConfig,
    /// Worker threads; 0 uses one per CPU.
    pub workers: usize,
}

/// Counts and timings of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub trials: usize,
    pub feasible: usize,
    /// Converged but violating a limit on the observed network
    pub infeasible: usize,
    pub non_converged: usize,
    pub workers: usize,
    pub sampling_time: Duration,
    pub evaluation_time: Duration,
}

impl RunSummary {
    pub fn from_results(results: &[TrialResult]) -> Self {
        let feasible = results.iter().filter(|r| r.feasible).count();
        let non_converged = results.iter().filter(|r| !r.converged).count();
        Self {
            trials: results.len(),
            feasible,
            infeasible: results.len() - feasible - non_converged,
            non_converged,
            ..Default::default()
        }
    }

    pub fn feasible_share(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.feasible as f64 / self.trials as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonteCarloRun {
    /// One result per trial, ordered by trial id.
    pub results: Vec<TrialResult>,
    pub summary: RunSummary,
}

/// Run `config.sampler.no_samples` trials against the evaluator's base network.
pub fn run_monte_carlo(
    evaluator: &FeasibilityEvaluator<'_>,
    config: &MonteCarloConfig,
) -> FlexResult<MonteCarloRun> {
    if config.sampler.no_samples == 0 {
        return Err(FlexError::config("no_samples must be positive"));
    }

    let sampling_start = Instant::now();
    let mut sampler = Sampler::new(config.sampler.clone())?;
    let vectors = sampler.generate(evaluator.fsps());
    let sampling_time = sampling_start.elapsed();
    info!(
        samples = vectors.len(),
        fsps = evaluator.fsps().len(),
        distribution = %config.sampler.distribution,
        keep_mp = config.sampler.keep_mp,
        "perturbation vectors drawn"
    );

    let workers = if config.workers == 0 {
        num_cpus::get()
    } else {
        config.workers
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| FlexError::Other(format!("building rayon thread pool for trials: {e}")))?;

    let evaluation_start = Instant::now();
    let mut results = pool.install(|| {
        vectors
            .par_iter()
            .enumerate()
            .map(|(trial, vector)| evaluator.evaluate(trial, vector))
            .collect::<FlexResult<Vec<_>>>()
    })?;
    results.sort_by_key(|r| r.trial);
    let evaluation_time = evaluation_start.elapsed();

    let summary = RunSummary {
        workers,
        sampling_time,
        evaluation_time,
        ..RunSummary::from_results(&results)
    };
    info!(
        trials = summary.trials,
        feasible = summary.feasible,
        infeasible = summary.infeasible,
        non_converged = summary.non_converged,
        elapsed_ms = evaluation_time.as_millis() as u64,
        "power flows completed"
    );

    Ok(MonteCarloRun { results, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{Limits, Observability};
    use crate::fsp::{select_fsps, FspSelection};
    use crate::sampler::Distribution;
    use flex_core::*;

    fn feeder() -> Network {
        let mut network = Network::new();
        network.add_bus(Bus::new(BusId::new(0), "PCC", Kilovolts(20.0)));
        network.add_bus(Bus::new(BusId::new(1), "Feeder", Kilovolts(20.0)));
        network.add_ext_grid(ExtGrid::new(ExtGridId::new(0), "Grid", BusId::new(0)));
        network
            .add_edge(Edge::Line(
                Branch::new(BranchId::new(0), "Line", BusId::new(0), BusId::new(1), 0.01, 0.01)
                    .with_max_i_ka(0.2),
            ))
            .unwrap();
        network.add_load(Load::new(LoadId::new(0), "Load", BusId::new(1), 0.4, 0.1).with_sn_mva(0.6));
        network.add_sgen(Sgen::new(SgenId::new(0), "PV", BusId::new(1), SgenKind::Pv, 0.3, 0.5));
        network
    }

    fn config(workers: usize) -> MonteCarloConfig {
        MonteCarloConfig {
            sampler: SamplerConfig {
                distribution: Distribution::Uniform,
                keep_mp: false,
                no_samples: 60,
                seed: 3,
            },
            workers,
        }
    }

    #[test]
    fn test_results_independent_of_worker_count() {
        let network = feeder();
        let fsps = select_fsps(&network, &FspSelection::default()).unwrap();
        let evaluator =
            FeasibilityEvaluator::new(&network, &fsps, &Observability::default(), Limits::default())
                .unwrap();
        let single = run_monte_carlo(&evaluator, &config(1)).unwrap();
        let pooled = run_monte_carlo(&evaluator, &config(4)).unwrap();
        assert_eq!(single.results, pooled.results);
        assert_eq!(single.summary.trials, 60);
        let ids: Vec<usize> = single.results.iter().map(|r| r.trial).collect();
        assert_eq!(ids, (0..60).collect::<Vec<_>>());
    }

    #[test]
    fn test_summary_counts_add_up() {
        let network = feeder();
        let fsps = select_fsps(&network, &FspSelection::default()).unwrap();
        let limits = Limits {
            min_volt_pu: 0.995,
            max_volt_pu: 1.005,
            max_curr_per: 100.0,
        };
        let evaluator =
            FeasibilityEvaluator::new(&network, &fsps, &Observability::default(), limits).unwrap();
        let run = run_monte_carlo(&evaluator, &config(2)).unwrap();
        let s = &run.summary;
        assert_eq!(s.feasible + s.infeasible + s.non_converged, s.trials);
        assert!(s.infeasible > 0, "tight voltage band should reject some trials");
        assert!(s.feasible_share() < 1.0);
    }

    #[test]
    fn test_zero_samples_is_configuration_error() {
        let network = feeder();
        let fsps = select_fsps(&network, &FspSelection::default()).unwrap();
        let evaluator =
            FeasibilityEvaluator::new(&network, &fsps, &Observability::default(), Limits::default())
                .unwrap();
        let mut cfg = config(1);
        cfg.sampler.no_samples = 0;
        assert!(run_monte_carlo(&evaluator, &cfg).unwrap_err().is_configuration());
    }
}
