//! Monte Carlo sampling of FSP operating points.
//!
//! Each FSP gets an [`Envelope`]: an active power interval and, for any active
//! power inside it, a symmetric reactive interval bounded by the apparent power
//! capability (and optionally a minimum power factor). Every free coordinate is
//! drawn as a unit variate `u ∈ [0, 1]` from the configured [`Distribution`] and
//! mapped linearly onto its interval. Active power is drawn first since the
//! reactive interval depends on it. Under `keep_mp` a DG unit only changes its
//! power factor: its apparent power stays at the rating and the sign of Q is
//! drawn at random.
//!
//! ```text
//!        Q ▲
//!   +Q_max ┤   ╭───╮        NormalLimitsOriented puts most draws near the
//!          │ ╭─╯   ╰─╮      edges of each interval, where the PCC hull
//!        0 ┼─┼───────┼──►P  boundary comes from; Uniform spreads them evenly.
//!          │ ╰─╮   ╭─╯
//!   −Q_max ┤   ╰───╯
//! ```
//!
//! Vectors are generated from a single seeded [`StdRng`] in trial order, so a
//! run is reproducible for a given seed regardless of how trials are evaluated.

use crate::fsp::{Fsp, FspKind};
use flex_core::{FlexError, FlexResult, Megavars, MegavoltAmperes, Megawatts};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution as _, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seed of the reference study.
pub const DEFAULT_SEED: u64 = 21;

/// Redraws allowed for a bounded Gaussian before falling back to a uniform draw.
const MAX_REDRAWS: usize = 64;

/// Shape of the unit variate behind every sampled coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    Uniform,
    /// Centered on the middle of the range, `sigmas` standard deviations to each edge.
    Normal { sigmas: f64 },
    /// Equal mixture of Gaussians centered on both edges of the range.
    NormalLimitsOriented { spread: f64 },
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::NormalLimitsOriented { spread: 0.15 }
    }
}

impl Distribution {
    pub fn normal() -> Self {
        Distribution::Normal { sigmas: 3.0 }
    }

    /// Configuration name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Uniform => "Uniform",
            Distribution::Normal { .. } => "Normal",
            Distribution::NormalLimitsOriented { .. } => "Normal_Limits_Oriented",
        }
    }

    fn validate(&self) -> FlexResult<()> {
        match *self {
            Distribution::Uniform => Ok(()),
            Distribution::Normal { sigmas } if sigmas.is_finite() && sigmas > 0.0 => Ok(()),
            Distribution::NormalLimitsOriented { spread } if spread.is_finite() && spread > 0.0 => {
                Ok(())
            }
            other => Err(FlexError::config(format!(
                "invalid parameters for {} distribution: {other:?}",
                other.name()
            ))),
        }
    }
}

impl FromStr for Distribution {
    type Err = FlexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Uniform" => Ok(Distribution::Uniform),
            "Normal" => Ok(Distribution::normal()),
            "Normal_Limits_Oriented" => Ok(Distribution::default()),
            other => Err(FlexError::config(format!(
                "unknown distribution '{other}', expected Normal_Limits_Oriented, Normal or Uniform"
            ))),
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A (P, Q) setpoint for one FSP.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub p: Megawatts,
    pub q: Megavars,
}

impl OperatingPoint {
    pub fn new(p: f64, q: f64) -> Self {
        Self {
            p: Megawatts(p),
            q: Megavars(q),
        }
    }
}

/// One sample: a setpoint per FSP, in the order of the FSP list it was drawn for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerturbationVector {
    pub setpoints: Vec<OperatingPoint>,
}

impl PerturbationVector {
    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    /// The unperturbed vector: every FSP at its baseline.
    pub fn baseline(fsps: &[Fsp]) -> Self {
        Self {
            setpoints: fsps
                .iter()
                .map(|f| OperatingPoint { p: f.p0, q: f.q0 })
                .collect(),
        }
    }
}

/// Admissible operating region of one FSP.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub p_min: Megawatts,
    pub p_max: Megawatts,
    pub s_max: f64,
    pub pf_min: Option<f64>,
    /// Apparent power held at the rating: |Q| is always `q_limit(P)`.
    pub rated: bool,
}

impl Envelope {
    /// Envelope of `fsp`.
    ///
    /// With `keep_mp` a load keeps its active power and only shifts Q, while a
    /// DG unit keeps its apparent power at the inverter rating and only moves
    /// its power factor: P stays in `[0, P₀]` (at least `S·pf_min` under a
    /// power factor limit) and Q sits on the rating circle.
    pub fn of(fsp: &Fsp, keep_mp: bool) -> Self {
        let s_max = fsp.s_max.value().max(0.0);
        // Renewable output cannot exceed the inverter rating.
        let p_cap = match fsp.kind {
            FspKind::Load => fsp.p0.value().max(0.0),
            FspKind::Pv | FspKind::Wind => fsp.p0.value().clamp(0.0, s_max),
        };
        let rated = keep_mp && fsp.kind.is_dg();
        let p_min = if rated {
            fsp.pf_min
                .filter(|pf| *pf > 0.0)
                .map_or(0.0, |pf| (s_max * pf.min(1.0)).min(p_cap))
        } else if keep_mp {
            p_cap
        } else {
            0.0
        };
        Self {
            p_min: Megawatts(p_min),
            p_max: Megawatts(p_cap),
            s_max,
            pf_min: fsp.pf_min,
            rated,
        }
    }

    /// Largest |Q| admissible at active power `p`.
    pub fn q_limit(&self, p: Megawatts) -> Megavars {
        let headroom = MegavoltAmperes(self.s_max).reactive_headroom(p);
        match self.pf_min {
            Some(pf) if pf > 0.0 && pf < 1.0 => {
                let tan_phi = pf.acos().tan();
                headroom.min(Megavars(p.value().abs() * tan_phi))
            }
            Some(pf) if pf >= 1.0 => Megavars(0.0),
            _ => headroom,
        }
    }

    pub fn contains(&self, point: &OperatingPoint, tol: f64) -> bool {
        let p = point.p.value();
        if p < self.p_min.value() - tol || p > self.p_max.value() + tol {
            return false;
        }
        let q_limit = self.q_limit(point.p).value();
        let q = point.q.value().abs();
        if self.rated {
            (q - q_limit).abs() <= tol
        } else {
            q <= q_limit + tol
        }
    }
}

/// Sampling options of one scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    pub distribution: Distribution,
    pub keep_mp: bool,
    pub no_samples: usize,
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            distribution: Distribution::default(),
            keep_mp: false,
            no_samples: 100,
            seed: DEFAULT_SEED,
        }
    }
}

enum UnitVariate {
    Uniform,
    Bounded(Normal<f64>),
    Mixture(Normal<f64>, Normal<f64>),
}

impl UnitVariate {
    fn new(distribution: Distribution) -> FlexResult<Self> {
        distribution.validate()?;
        let normal = |mean: f64, std: f64| {
            Normal::new(mean, std).map_err(|e| FlexError::config(format!("{distribution}: {e}")))
        };
        Ok(match distribution {
            Distribution::Uniform => UnitVariate::Uniform,
            Distribution::Normal { sigmas } => UnitVariate::Bounded(normal(0.5, 0.5 / sigmas)?),
            Distribution::NormalLimitsOriented { spread } => {
                UnitVariate::Mixture(normal(0.0, spread)?, normal(1.0, spread)?)
            }
        })
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let gaussian = match self {
            UnitVariate::Uniform => return rng.gen::<f64>(),
            UnitVariate::Bounded(normal) => *normal,
            UnitVariate::Mixture(low, high) => {
                if rng.gen_bool(0.5) {
                    *low
                } else {
                    *high
                }
            }
        };
        // Out-of-range draws are redrawn, never clamped onto the edge.
        for _ in 0..MAX_REDRAWS {
            let u = gaussian.sample(rng);
            if (0.0..=1.0).contains(&u) {
                return u;
            }
        }
        rng.gen::<f64>()
    }
}

/// Seeded generator of perturbation vectors.
pub struct Sampler {
    config: SamplerConfig,
    variate: UnitVariate,
    rng: StdRng,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> FlexResult<Self> {
        let variate = UnitVariate::new(config.distribution)?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            variate,
            rng,
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Draw one operating point inside `envelope`.
    pub fn draw_point(&mut self, envelope: &Envelope) -> OperatingPoint {
        let (p_min, p_max) = (envelope.p_min.value(), envelope.p_max.value());
        let p = if p_max > p_min {
            p_min + self.variate.draw(&mut self.rng) * (p_max - p_min)
        } else {
            p_max
        };
        let q_max = envelope.q_limit(Megawatts(p)).value();
        let q = if q_max <= 0.0 {
            0.0
        } else if envelope.rated {
            if self.rng.gen_bool(0.5) {
                q_max
            } else {
                -q_max
            }
        } else {
            -q_max + self.variate.draw(&mut self.rng) * 2.0 * q_max
        };
        OperatingPoint::new(p, q)
    }

    /// Draw a full vector, one independent point per FSP.
    pub fn draw(&mut self, fsps: &[Fsp]) -> PerturbationVector {
        let keep_mp = self.config.keep_mp;
        PerturbationVector {
            setpoints: fsps
                .iter()
                .map(|fsp| self.draw_point(&Envelope::of(fsp, keep_mp)))
                .collect(),
        }
    }

    /// Draw `no_samples` vectors in trial order.
    pub fn generate(&mut self, fsps: &[Fsp]) -> Vec<PerturbationVector> {
        (0..self.config.no_samples).map(|_| self.draw(fsps)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsp::FspTarget;
    use flex_core::{BusId, LoadId, SgenId};

    fn fsps() -> Vec<Fsp> {
        vec![
            Fsp {
                kind: FspKind::Pv,
                index: 0,
                name: "PV".into(),
                bus: BusId::new(1),
                target: FspTarget::Sgen(SgenId::new(0)),
                p0: Megawatts(0.6),
                q0: Megavars(0.0),
                s_max: MegavoltAmperes(1.0),
                pf_min: None,
            },
            Fsp {
                kind: FspKind::Load,
                index: 0,
                name: "Load".into(),
                bus: BusId::new(1),
                target: FspTarget::Load(LoadId::new(0)),
                p0: Megawatts(0.4),
                q0: Megavars(0.1),
                s_max: MegavoltAmperes(0.5),
                pf_min: None,
            },
        ]
    }

    fn config(distribution: Distribution, keep_mp: bool) -> SamplerConfig {
        SamplerConfig {
            distribution,
            keep_mp,
            no_samples: 2000,
            seed: 7,
        }
    }

    const ALL: [Distribution; 3] = [
        Distribution::Uniform,
        Distribution::Normal { sigmas: 3.0 },
        Distribution::NormalLimitsOriented { spread: 0.15 },
    ];

    #[test]
    fn test_distribution_names() {
        for d in ALL {
            assert_eq!(d.name().parse::<Distribution>().unwrap().name(), d.name());
        }
        let err = "Gamma".parse::<Distribution>().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let cfg = config(Distribution::Normal { sigmas: 0.0 }, false);
        assert!(Sampler::new(cfg).is_err());
    }

    #[test]
    fn test_samples_stay_inside_envelope() {
        let fsps = fsps();
        for keep_mp in [true, false] {
            for distribution in ALL {
                let mut sampler = Sampler::new(config(distribution, keep_mp)).unwrap();
                for vector in sampler.generate(&fsps) {
                    assert_eq!(vector.len(), fsps.len());
                    for (fsp, point) in fsps.iter().zip(&vector.setpoints) {
                        let envelope = Envelope::of(fsp, keep_mp);
                        assert!(
                            envelope.contains(point, 1e-12),
                            "{distribution} keep_mp={keep_mp}: {point:?} outside {envelope:?}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_keep_mp_moves_dg_along_rating() {
        let fsps = fsps();
        let mut sampler = Sampler::new(config(Distribution::Uniform, true)).unwrap();
        let vectors = sampler.generate(&fsps);
        for vector in &vectors {
            let dg = vector.setpoints[0];
            assert!((dg.p.value().hypot(dg.q.value()) - 1.0).abs() < 1e-12);
            assert!(dg.p.value() <= 0.6 + 1e-12);
            assert_eq!(vector.setpoints[1].p, Megawatts(0.4));
        }
        let p_spread = vectors
            .iter()
            .map(|v| v.setpoints[0].p.value())
            .fold((f64::MAX, f64::MIN), |(lo, hi), p| (lo.min(p), hi.max(p)));
        assert!(p_spread.0 < 0.05 && p_spread.1 > 0.55, "{p_spread:?}");
        assert!(vectors.iter().any(|v| v.setpoints[0].q.value() > 0.0));
        assert!(vectors.iter().any(|v| v.setpoints[0].q.value() < 0.0));
    }

    #[test]
    fn test_keep_mp_draws_lie_in_free_envelope() {
        let fsps = fsps();
        let mut sampler = Sampler::new(config(Distribution::default(), true)).unwrap();
        for vector in sampler.generate(&fsps) {
            for (fsp, point) in fsps.iter().zip(&vector.setpoints) {
                assert!(Envelope::of(fsp, false).contains(point, 1e-12));
            }
        }
    }

    #[test]
    fn test_rating_circle_without_headroom_still_moves() {
        // DG at full output with P₀ equal to its rating.
        let mut fsp = fsps()[0].clone();
        fsp.p0 = Megawatts(1.0);
        let envelope = Envelope::of(&fsp, true);
        let mut sampler = Sampler::new(config(Distribution::Uniform, true)).unwrap();
        let max_q = (0..200)
            .map(|_| sampler.draw_point(&envelope).q.value().abs())
            .fold(0.0, f64::max);
        assert!(max_q > 0.5, "max |Q| {max_q}");
    }

    #[test]
    fn test_power_factor_limit() {
        let fsp = fsps()[0].clone().with_pf_min(0.9);
        let envelope = Envelope::of(&fsp, false);
        let expected = 0.6 * (0.9f64).acos().tan();
        assert!((envelope.q_limit(Megawatts(0.6)).value() - expected).abs() < 1e-12);

        // On the rating circle the limit raises the lowest admissible P to S·pf.
        let rated = Envelope::of(&fsp, true);
        assert!((rated.p_min.value() - 0.6).abs() < 1e-12);
        let mut sampler = Sampler::new(config(Distribution::Uniform, true)).unwrap();
        let point = sampler.draw_point(&rated);
        assert!(rated.contains(&point, 1e-12));
    }

    #[test]
    fn test_same_seed_same_vectors() {
        let fsps = fsps();
        let a = Sampler::new(config(Distribution::default(), false))
            .unwrap()
            .generate(&fsps);
        let b = Sampler::new(config(Distribution::default(), false))
            .unwrap()
            .generate(&fsps);
        assert_eq!(a, b);
        let mut other = config(Distribution::default(), false);
        other.seed = 8;
        assert_ne!(a, Sampler::new(other).unwrap().generate(&fsps));
    }

    #[test]
    fn test_limits_oriented_concentrates_near_edges() {
        let edge_share = |distribution| {
            let mut sampler = Sampler::new(config(distribution, true)).unwrap();
            let fsp = &fsps()[1];
            let envelope = Envelope::of(fsp, true);
            let q_max = envelope.q_limit(fsp.p0).value();
            let near_edge = (0..4000)
                .map(|_| sampler.draw_point(&envelope))
                .filter(|pt| pt.q.value().abs() > 0.8 * q_max)
                .count();
            near_edge as f64 / 4000.0
        };
        let uniform = edge_share(Distribution::Uniform);
        let oriented = edge_share(Distribution::default());
        assert!((uniform - 0.2).abs() < 0.05, "uniform edge share {uniform}");
        assert!(oriented > 2.0 * uniform, "oriented {oriented} vs uniform {uniform}");
    }

    #[test]
    fn test_normal_concentrates_in_middle() {
        let mut sampler = Sampler::new(config(Distribution::normal(), true)).unwrap();
        let envelope = Envelope::of(&fsps()[1], true);
        let q_max = envelope.q_limit(Megawatts(0.4)).value();
        let centre = (0..2000)
            .map(|_| sampler.draw_point(&envelope))
            .filter(|pt| pt.q.value().abs() < 0.5 * q_max)
            .count();
        assert!(centre > 1600, "only {centre} draws near the centre");
    }
}
