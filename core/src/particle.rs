//! Particle filter for planar localization against a known landmark map.
//!
//! The filter holds a fixed-size ensemble of weighted pose hypotheses. A session looks like:
//!
//! ```rust
//! use landmark_pf::map::{Landmark, Map};
//! use landmark_pf::measurements::{LandmarkNoise, Observation};
//! use landmark_pf::particle::ParticleFilter;
//! use landmark_pf::{ControlInput, Pose, PoseNoise};
//!
//! let map = Map::new(vec![Landmark::new(1, 5.0, 3.0), Landmark::new(2, -2.0, 8.0)]);
//! let mut pf = ParticleFilter::new(100, 42).unwrap();
//! pf.init(&Pose::new(0.0, 0.0, 0.0), &PoseNoise::new(0.3, 0.3, 0.01).unwrap()).unwrap();
//!
//! let noise = PoseNoise::new(0.3, 0.3, 0.01).unwrap();
//! pf.predict(0.1, &ControlInput::new(1.0, 0.05), &noise).unwrap();
//! let observations = vec![Observation::new(5.1, 3.2)];
//! let sensor_noise = LandmarkNoise::new(0.3, 0.3).unwrap();
//! pf.update_weights(50.0, &sensor_noise, &observations, &map).unwrap();
//! pf.resample().unwrap();
//! assert_eq!(pf.num_particles(), 100);
//! ```
//!
//! # Randomness
//! The filter owns one seeded master generator. Initialization and resampling draw from it
//! directly. Prediction draws a single `u64` from it and then gives particle `i` an independent
//! generator seeded with that value plus `i`, so the per-particle work can run on the `rayon` pool
//! without sharing generator state and still reproduce exactly under the same seed.
//!
//! # Weights
//! Weights live only on the particles. [ParticleFilter::weights] derives the weight vector when it
//! is needed. Weights are raw likelihoods and are not normalized, unless the best likelihood of an
//! update falls outside the range of `f64`; then the whole ensemble is rescaled so that the best
//! weight is one. When every particle has an unmatched observation all weights are zero, and
//! resampling falls back to a uniform draw.
use log::{debug, warn};
use nalgebra::Matrix3;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Distribution;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

use crate::map::Map;
use crate::measurements::{
    Association, DataAssociation, LandmarkNoise, NearestNeighbor, Observation,
    observation_log_likelihood, predict_sightings, validate_sensor_range,
};
use crate::motion::{add_gaussian_noise, sample_pose, validate_control, validate_time_step};
use crate::{ControlInput, FilterError, Pose, PoseNoise, wrap_to_pi};

/// One weighted pose hypothesis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Position in the current ensemble; reassigned after every resampling.
    pub id: usize,
    pub pose: Pose,
    pub weight: f64,
    /// Observation-to-landmark matches from the latest weight update.
    pub associations: Vec<Association>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.pose.x)
            .field("y", &self.pose.y)
            .field("theta", &self.pose.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            pose,
            weight,
            associations: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    #[default]
    WeightedAverage,
    UnweightedAverage,
    HighestWeight,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ParticleResamplingStrategy {
    /// Independent draws with replacement, probability proportional to weight.
    #[default]
    Multinomial,
    Systematic,
    Stratified,
    Residual,
}

impl ParticleResamplingStrategy {
    /// Ancestor indices for a new ensemble of `num_samples` particles.
    pub fn resample_indices<R: Rng + ?Sized>(
        &self,
        weights: &[f64],
        num_samples: usize,
        rng: &mut R,
    ) -> Vec<usize> {
        match self {
            ParticleResamplingStrategy::Multinomial => {
                multinomial_resample(weights, num_samples, rng)
            }
            ParticleResamplingStrategy::Systematic => systematic_resample(weights, num_samples, rng),
            ParticleResamplingStrategy::Stratified => stratified_resample(weights, num_samples, rng),
            ParticleResamplingStrategy::Residual => residual_resample(weights, num_samples, rng),
        }
    }
}

/// Weights scaled to sum to one, or `None` when they cannot define a distribution
/// (empty, negative or NaN entries, zero or non-finite sum).
fn normalize(weights: &[f64]) -> Option<Vec<f64>> {
    if weights.is_empty() || weights.iter().any(|w| w.is_nan() || *w < 0.0) {
        return None;
    }
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        Some(weights.iter().map(|w| w / sum).collect())
    } else {
        None
    }
}

/// Uniform draw with replacement, used when the weights are degenerate.
fn uniform_resample<R: Rng + ?Sized>(
    num_particles: usize,
    num_samples: usize,
    rng: &mut R,
) -> Vec<usize> {
    if num_particles == 0 {
        return Vec::new();
    }
    warn!(
        "Degenerate particle weights; resampling {} of {} particles uniformly",
        num_samples, num_particles
    );
    (0..num_samples)
        .map(|_| rng.random_range(0..num_particles))
        .collect()
}

/// Walk the cumulative distribution once for a non-decreasing sequence of targets in `[0, 1)`.
///
/// Index `i` owns the half-open interval `[c_{i-1}, c_i)`, so an entry with zero weight owns an
/// empty interval and is never returned. `normalized` must have a positive entry.
fn sweep<I: Iterator<Item = f64>>(normalized: &[f64], targets: I) -> Vec<usize> {
    let last = normalized.iter().rposition(|w| *w > 0.0).unwrap_or(0);
    let mut i = 0;
    let mut cumulative = normalized[0];
    let mut indices = Vec::new();
    for target in targets {
        while target >= cumulative && i < last {
            i += 1;
            cumulative += normalized[i];
        }
        indices.push(i);
    }
    indices
}

/// Multinomial resampling: `num_samples` independent draws, index `i` with probability
/// `weights[i] / sum(weights)`.
pub fn multinomial_resample<R: Rng + ?Sized>(
    weights: &[f64],
    num_samples: usize,
    rng: &mut R,
) -> Vec<usize> {
    if normalize(weights).is_none() {
        return uniform_resample(weights.len(), num_samples, rng);
    }
    match WeightedIndex::new(weights.iter().copied()) {
        Ok(distribution) => (0..num_samples).map(|_| distribution.sample(rng)).collect(),
        Err(_) => uniform_resample(weights.len(), num_samples, rng),
    }
}

/// Systematic resampling: one uniform offset, then evenly spaced pointers.
pub fn systematic_resample<R: Rng + ?Sized>(
    weights: &[f64],
    num_samples: usize,
    rng: &mut R,
) -> Vec<usize> {
    let Some(normalized) = normalize(weights) else {
        return uniform_resample(weights.len(), num_samples, rng);
    };
    if num_samples == 0 {
        return Vec::new();
    }
    let step = 1.0 / num_samples as f64;
    let offset = rng.random_range(0.0..step);
    sweep(
        &normalized,
        (0..num_samples).map(|k| offset + k as f64 * step),
    )
}

/// Stratified resampling: one independent uniform pointer inside each of `num_samples` strata.
pub fn stratified_resample<R: Rng + ?Sized>(
    weights: &[f64],
    num_samples: usize,
    rng: &mut R,
) -> Vec<usize> {
    let Some(normalized) = normalize(weights) else {
        return uniform_resample(weights.len(), num_samples, rng);
    };
    if num_samples == 0 {
        return Vec::new();
    }
    let step = 1.0 / num_samples as f64;
    let targets: Vec<f64> = (0..num_samples)
        .map(|k| (k as f64 + rng.random::<f64>()) * step)
        .collect();
    sweep(&normalized, targets.into_iter())
}

/// Residual resampling: `floor(n * w_i)` deterministic copies, the remainder drawn
/// systematically from the fractional parts.
pub fn residual_resample<R: Rng + ?Sized>(
    weights: &[f64],
    num_samples: usize,
    rng: &mut R,
) -> Vec<usize> {
    let Some(normalized) = normalize(weights) else {
        return uniform_resample(weights.len(), num_samples, rng);
    };
    let n = num_samples as f64;
    let mut indices = Vec::with_capacity(num_samples);
    let mut residual = vec![0.0; normalized.len()];
    for (i, &w) in normalized.iter().enumerate() {
        let copies = (w * n).floor() as usize;
        residual[i] = w * n - copies as f64;
        indices.extend(std::iter::repeat_n(i, copies));
    }
    // floor() can only undercount, but guard against rounding overshoot
    indices.truncate(num_samples);
    let remaining = num_samples - indices.len();
    if remaining > 0 {
        indices.extend(systematic_resample(&residual, remaining, rng));
    }
    indices
}

/// Particle filter over planar poses.
///
/// Created empty with [ParticleFilter::new]; [ParticleFilter::init] must be called exactly once
/// before any other stage. The ensemble size is fixed at construction and preserved by every stage.
#[derive(Clone)]
pub struct ParticleFilter {
    particles: Vec<Particle>,
    num_particles: usize,
    initialized: bool,
    rng: StdRng,
    pub averaging_strategy: ParticleAveragingStrategy,
    pub resampling_strategy: ParticleResamplingStrategy,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (min_weight, max_weight) = self
            .particles
            .iter()
            .fold((f64::INFINITY, 0.0_f64), |(lo, hi), p| {
                (lo.min(p.weight), hi.max(p.weight))
            });
        let mut s = f.debug_struct("ParticleFilter");
        s.field("num_particles", &self.num_particles)
            .field("initialized", &self.initialized)
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            );
        if let Ok(mean) = self.get_estimate() {
            s.field(
                "estimate",
                &format_args!("({:.4}, {:.4}, {:.4} rad)", mean.x, mean.y, mean.theta),
            );
        }
        s.finish()
    }
}
impl ParticleFilter {
    /// Create an uninitialized filter that will hold `num_particles` particles.
    ///
    /// # Arguments
    /// * `num_particles` - Ensemble size, fixed for the lifetime of the filter. Must be positive.
    /// * `seed` - Master seed for every random draw the filter makes.
    pub fn new(num_particles: usize, seed: u64) -> Result<Self, FilterError> {
        if num_particles == 0 {
            return Err(FilterError::InvalidParameter(
                "number of particles must be positive".to_string(),
            ));
        }
        Ok(ParticleFilter {
            particles: Vec::new(),
            num_particles,
            initialized: false,
            rng: StdRng::seed_from_u64(seed),
            averaging_strategy: ParticleAveragingStrategy::default(),
            resampling_strategy: ParticleResamplingStrategy::default(),
        })
    }
    /// Same as [ParticleFilter::new] with a seed taken from the operating system.
    pub fn new_unseeded(num_particles: usize) -> Result<Self, FilterError> {
        Self::new(num_particles, rand::random())
    }
    pub fn with_strategies(
        mut self,
        resampling_strategy: ParticleResamplingStrategy,
        averaging_strategy: ParticleAveragingStrategy,
    ) -> Self {
        self.resampling_strategy = resampling_strategy;
        self.averaging_strategy = averaging_strategy;
        self
    }
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    /// Mutable access to the particles. A slice, so the ensemble size cannot change.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }
    /// Current weights in particle order.
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }
    fn require_initialized(&self) -> Result<(), FilterError> {
        if self.initialized {
            Ok(())
        } else {
            Err(FilterError::NotInitialized)
        }
    }
    /// Seed the ensemble from a Gaussian prior around `pose`.
    ///
    /// Each coordinate of each particle is drawn independently from
    /// $\mathcal{N}(\text{pose}_k, \sigma_k^2)$. Every particle starts with weight one.
    pub fn init(&mut self, pose: &Pose, std: &PoseNoise) -> Result<(), FilterError> {
        if self.initialized {
            return Err(FilterError::AlreadyInitialized);
        }
        let rng = &mut self.rng;
        self.particles = (0..self.num_particles)
            .map(|id| {
                let sampled = Pose {
                    x: add_gaussian_noise(pose.x, std.x(), rng),
                    y: add_gaussian_noise(pose.y, std.y(), rng),
                    theta: add_gaussian_noise(pose.theta, std.theta(), rng),
                };
                Particle::new(id, sampled, 1.0)
            })
            .collect();
        self.initialized = true;
        debug!(
            "Initialized {} particles around {}",
            self.num_particles, pose
        );
        Ok(())
    }
    /// Move every particle through the motion model and add process noise.
    ///
    /// # Arguments
    /// * `dt` - Elapsed time, finite and positive.
    /// * `control` - Linear velocity and yaw rate over the interval, both finite.
    /// * `noise` - Process noise standard deviations added after the motion model.
    pub fn predict(
        &mut self,
        dt: f64,
        control: &ControlInput,
        noise: &PoseNoise,
    ) -> Result<(), FilterError> {
        self.require_initialized()?;
        validate_time_step(dt)?;
        validate_control(control)?;
        let base_seed: u64 = self.rng.random();
        self.particles
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, particle)| {
                let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(i as u64));
                particle.pose = sample_pose(&particle.pose, control, dt, noise, &mut rng);
            });
        Ok(())
    }
    /// Reweight every particle against a set of observations using nearest-neighbour association.
    ///
    /// See [ParticleFilter::update_weights_with].
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        landmark_noise: &LandmarkNoise,
        observations: &[Observation],
        map: &Map,
    ) -> Result<(), FilterError> {
        self.update_weights_with(
            &NearestNeighbor,
            sensor_range,
            landmark_noise,
            observations,
            map,
        )
    }
    /// Reweight every particle against a set of observations.
    ///
    /// For each particle: project the map into its frame and keep landmarks within
    /// `sensor_range`, label a private copy of the observations with `association`, then set the
    /// weight to the joint Gaussian likelihood of the residuals. The previous weight is replaced,
    /// not multiplied.
    ///
    /// Likelihoods are accumulated as log-likelihoods. When the largest one overflows or
    /// underflows `f64`, every weight is divided by it, so the best particle gets weight one and
    /// the ratios between particles are kept. Weights are never negative, infinite or `NaN`.
    pub fn update_weights_with<A: DataAssociation>(
        &mut self,
        association: &A,
        sensor_range: f64,
        landmark_noise: &LandmarkNoise,
        observations: &[Observation],
        map: &Map,
    ) -> Result<(), FilterError> {
        self.require_initialized()?;
        validate_sensor_range(sensor_range)?;
        let log_weights: Vec<f64> = self
            .particles
            .par_iter_mut()
            .map(|particle| {
                let predicted = predict_sightings(&particle.pose, map, sensor_range);
                let mut labelled = observations.to_vec();
                association.associate(&predicted, &mut labelled);
                let (log_weight, associations) =
                    observation_log_likelihood(&predicted, &labelled, landmark_noise);
                particle.associations = associations;
                log_weight
            })
            .collect();
        let max_log_weight = log_weights
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let shift = if max_log_weight == f64::NEG_INFINITY || max_log_weight.exp().is_normal() {
            0.0
        } else {
            debug!(
                "Largest log-likelihood {:.3e} is outside the range of f64; rescaling weights",
                max_log_weight
            );
            max_log_weight
        };
        for (particle, log_weight) in self.particles.iter_mut().zip(log_weights) {
            particle.weight = (log_weight - shift).exp();
        }
        let zero_weights = self.particles.iter().filter(|p| p.weight == 0.0).count();
        if zero_weights == self.num_particles {
            warn!(
                "All {} particle weights are zero after update with {} observations",
                self.num_particles,
                observations.len()
            );
        } else {
            debug!(
                "Updated weights with {} observations: {} zero weights, N_eff = {:.2}",
                observations.len(),
                zero_weights,
                self.effective_sample_size()
            );
        }
        Ok(())
    }
    /// Replace the ensemble with `num_particles` draws with replacement, proportional to weight.
    ///
    /// Sampled particles are deep copies, renumbered `0..N`, and keep the weight of the particle
    /// they were drawn from.
    pub fn resample(&mut self) -> Result<(), FilterError> {
        self.require_initialized()?;
        let weights = self.weights();
        let indices =
            self.resampling_strategy
                .resample_indices(&weights, self.num_particles, &mut self.rng);
        self.particles = indices
            .into_iter()
            .enumerate()
            .map(|(id, ancestor)| {
                let mut particle = self.particles[ancestor].clone();
                particle.id = id;
                particle
            })
            .collect();
        Ok(())
    }
    /// Effective sample size $1 / \sum \tilde{w}_i^2$ of the normalized weights; zero when the
    /// weights are degenerate.
    pub fn effective_sample_size(&self) -> f64 {
        match normalize(&self.weights()) {
            Some(normalized) => 1.0 / normalized.iter().map(|w| w * w).sum::<f64>(),
            None => 0.0,
        }
    }
    /// Particle with the largest weight; the first one on ties. `None` before initialization.
    pub fn best_particle(&self) -> Option<&Particle> {
        self.particles.iter().fold(None, |best, p| match best {
            Some(b) if b.weight >= p.weight => Some(b),
            _ => Some(p),
        })
    }
    /// Single pose estimate according to the averaging strategy.
    pub fn get_estimate(&self) -> Result<Pose, FilterError> {
        self.require_initialized()?;
        match self.averaging_strategy {
            ParticleAveragingStrategy::WeightedAverage => Ok(self.weighted_average_state()),
            ParticleAveragingStrategy::UnweightedAverage => Ok(self.unweighted_average_state()),
            ParticleAveragingStrategy::HighestWeight => self
                .best_particle()
                .map(|p| p.pose)
                .ok_or(FilterError::NotInitialized),
        }
    }
    /// Spread of the ensemble about the estimate as a 3x3 `[x, y, theta]` covariance.
    ///
    /// Heading deviations are wrapped before they are squared. The highest-weight strategy
    /// reports a zero matrix.
    pub fn get_certainty(&self) -> Result<Matrix3<f64>, FilterError> {
        let mean = self.get_estimate()?;
        let weights = match self.averaging_strategy {
            ParticleAveragingStrategy::HighestWeight => return Ok(Matrix3::zeros()),
            ParticleAveragingStrategy::WeightedAverage => self.averaging_weights(),
            ParticleAveragingStrategy::UnweightedAverage => self.uniform_weights(),
        };
        let mut cov = Matrix3::<f64>::zeros();
        for (particle, w) in self.particles.iter().zip(weights) {
            let diff = nalgebra::Vector3::new(
                particle.pose.x - mean.x,
                particle.pose.y - mean.y,
                wrap_to_pi(particle.pose.theta - mean.theta),
            );
            cov += w * diff * diff.transpose();
        }
        Ok(cov)
    }
    fn uniform_weights(&self) -> Vec<f64> {
        vec![1.0 / self.particles.len() as f64; self.particles.len()]
    }
    /// Normalized weights, or uniform ones when the weights are degenerate.
    fn averaging_weights(&self) -> Vec<f64> {
        normalize(&self.weights()).unwrap_or_else(|| self.uniform_weights())
    }
    fn average_with(&self, weights: &[f64]) -> Pose {
        let (mut x, mut y, mut sin_sum, mut cos_sum) = (0.0, 0.0, 0.0, 0.0);
        for (particle, w) in self.particles.iter().zip(weights) {
            x += w * particle.pose.x;
            y += w * particle.pose.y;
            sin_sum += w * particle.pose.theta.sin();
            cos_sum += w * particle.pose.theta.cos();
        }
        Pose::new(x, y, sin_sum.atan2(cos_sum))
    }
    fn weighted_average_state(&self) -> Pose {
        self.average_with(&self.averaging_weights())
    }
    fn unweighted_average_state(&self) -> Pose {
        self.average_with(&self.uniform_weights())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::Landmark;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::PI;

    fn initialized_filter(n: usize, std: PoseNoise) -> ParticleFilter {
        let mut pf = ParticleFilter::new(n, 42).unwrap();
        pf.init(&Pose::new(4.0, -2.0, 0.5), &std).unwrap();
        pf
    }

    fn set_weights(pf: &mut ParticleFilter, weights: &[f64]) {
        for (particle, &w) in pf.particles_mut().iter_mut().zip(weights) {
            particle.weight = w;
        }
    }

    #[test]
    fn test_zero_particles_rejected() {
        assert!(matches!(
            ParticleFilter::new(0, 1),
            Err(FilterError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_stages_before_init_fail() {
        let mut pf = ParticleFilter::new(10, 1).unwrap();
        let map = Map::default();
        let noise = LandmarkNoise::new(0.3, 0.3).unwrap();
        assert_eq!(
            pf.predict(0.1, &ControlInput::new(1.0, 0.0), &PoseNoise::zero()),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(
            pf.update_weights(50.0, &noise, &[], &map),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(pf.resample(), Err(FilterError::NotInitialized));
        assert_eq!(pf.get_estimate(), Err(FilterError::NotInitialized));
        assert!(pf.best_particle().is_none());
        assert!(!pf.is_initialized());
    }

    #[test]
    fn test_init_twice_fails() {
        let mut pf = initialized_filter(5, PoseNoise::zero());
        assert_eq!(
            pf.init(&Pose::default(), &PoseNoise::zero()),
            Err(FilterError::AlreadyInitialized)
        );
    }

    #[test]
    fn test_init_sets_size_ids_and_unit_weights() {
        let pf = initialized_filter(100, PoseNoise::new(0.3, 0.3, 0.01).unwrap());
        assert!(pf.is_initialized());
        assert_eq!(pf.particles().len(), 100);
        assert_eq!(pf.weights().len(), 100);
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i);
            assert_eq!(particle.weight, 1.0);
        }
    }

    #[test]
    fn test_init_prior_statistics() {
        let pf = initialized_filter(2000, PoseNoise::new(0.3, 0.3, 0.01).unwrap());
        let n = pf.num_particles() as f64;
        let mean_x = pf.particles().iter().map(|p| p.pose.x).sum::<f64>() / n;
        let mean_y = pf.particles().iter().map(|p| p.pose.y).sum::<f64>() / n;
        let std_x =
            (pf.particles().iter().map(|p| (p.pose.x - mean_x).powi(2)).sum::<f64>() / n).sqrt();
        assert!((mean_x - 4.0).abs() < 0.05);
        assert!((mean_y + 2.0).abs() < 0.05);
        assert!((std_x - 0.3).abs() < 0.03);
    }

    #[test]
    fn test_init_without_noise_places_every_particle_on_the_pose() {
        let pf = initialized_filter(10, PoseNoise::zero());
        for particle in pf.particles() {
            assert_eq!(particle.pose, Pose::new(4.0, -2.0, 0.5));
        }
    }

    #[test]
    fn test_predict_without_noise_is_exact() {
        let mut pf = ParticleFilter::new(20, 3).unwrap();
        pf.init(&Pose::default(), &PoseNoise::zero()).unwrap();
        pf.predict(1.0, &ControlInput::new(10.0, 0.0), &PoseNoise::zero())
            .unwrap();
        for particle in pf.particles() {
            assert_approx_eq!(particle.pose.x, 10.0, 1e-12);
            assert_approx_eq!(particle.pose.y, 0.0, 1e-12);
            assert_approx_eq!(particle.pose.theta, 0.0, 1e-12);
        }
    }

    #[test]
    fn test_predict_rejects_bad_time_step() {
        let mut pf = initialized_filter(5, PoseNoise::zero());
        assert!(matches!(
            pf.predict(0.0, &ControlInput::new(1.0, 0.0), &PoseNoise::zero()),
            Err(FilterError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_predict_noise_is_independent_per_particle() {
        let mut pf = initialized_filter(50, PoseNoise::zero());
        pf.predict(
            0.1,
            &ControlInput::new(1.0, 0.1),
            &PoseNoise::new(0.3, 0.3, 0.01).unwrap(),
        )
        .unwrap();
        let first = pf.particles()[0].pose;
        assert!(pf.particles().iter().skip(1).all(|p| p.pose != first));
    }

    fn seeded_cycle() -> Vec<Particle> {
        let map = Map::new(vec![Landmark::new(1, 5.0, 5.0), Landmark::new(2, -3.0, 4.0)]);
        let observations = vec![Observation::new(9.0, 3.0), Observation::new(1.0, 2.0)];
        let noise = LandmarkNoise::new(0.3, 0.3).unwrap();
        let mut pf = initialized_filter(64, PoseNoise::new(0.3, 0.3, 0.01).unwrap());
        pf.predict(
            0.1,
            &ControlInput::new(2.0, 0.2),
            &PoseNoise::new(0.3, 0.3, 0.01).unwrap(),
        )
        .unwrap();
        pf.update_weights(50.0, &noise, &observations, &map).unwrap();
        pf.resample().unwrap();
        pf.particles().to_vec()
    }

    #[test]
    fn test_same_seed_reproduces_cycle() {
        assert_eq!(seeded_cycle(), seeded_cycle());
    }

    #[test]
    fn test_cycle_is_independent_of_thread_count() {
        let on_threads = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(seeded_cycle)
        };
        let single = on_threads(1);
        assert_eq!(single, on_threads(4));
        assert_eq!(single, on_threads(7));
    }

    #[test]
    fn test_predict_rejects_non_finite_control() {
        let mut pf = initialized_filter(5, PoseNoise::zero());
        for control in [
            ControlInput::new(f64::INFINITY, 0.0),
            ControlInput::new(1.0, f64::NAN),
        ] {
            assert!(matches!(
                pf.predict(0.1, &control, &PoseNoise::zero()),
                Err(FilterError::InvalidParameter(_))
            ));
        }
        assert!(pf.particles().iter().all(|p| p.pose == Pose::new(4.0, -2.0, 0.5)));
    }

    fn repeated_observations(count: usize) -> Vec<Observation> {
        vec![Observation::new(1.0, 1.0); count]
    }

    #[test]
    fn test_update_with_overflowing_likelihood_keeps_weights_finite() {
        let mut pf = ParticleFilter::new(10, 9).unwrap();
        pf.init(&Pose::default(), &PoseNoise::zero()).unwrap();
        let map = Map::new(vec![Landmark::new(1, 1.0, 1.0)]);
        let tight = LandmarkNoise::new(0.01, 0.01).unwrap();
        pf.update_weights(50.0, &tight, &repeated_observations(110), &map)
            .unwrap();
        for particle in pf.particles() {
            assert_eq!(particle.weight, 1.0);
            assert_eq!(particle.associations.len(), 110);
        }
        assert_approx_eq!(pf.effective_sample_size(), 10.0, 1e-9);
    }

    #[test]
    fn test_rescaled_weights_keep_their_ratios() {
        let mut pf = ParticleFilter::new(3, 9).unwrap();
        pf.init(&Pose::default(), &PoseNoise::zero()).unwrap();
        pf.particles_mut()[1].pose = Pose::new(0.005, 0.0, 0.0);
        let map = Map::new(vec![Landmark::new(1, 1.0, 1.0)]);
        let tight = LandmarkNoise::new(0.01, 0.01).unwrap();
        pf.update_weights(50.0, &tight, &repeated_observations(110), &map)
            .unwrap();
        let weights = pf.weights();
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[2], 1.0);
        // each residual of 0.005 costs 0.005^2 / (2 * 0.01^2) = 0.125 in log-likelihood
        assert_approx_eq!(weights[1], (-110.0 * 0.125_f64).exp(), 1e-12);
        assert!(weights.iter().all(|w| w.is_finite() && *w >= 0.0));

        pf.resample().unwrap();
        assert!(pf.particles().iter().filter(|p| p.pose.x == 0.0).count() >= 2);
    }

    #[test]
    fn test_update_exact_match_weight() {
        let mut pf = ParticleFilter::new(3, 9).unwrap();
        pf.init(&Pose::default(), &PoseNoise::zero()).unwrap();
        let map = Map::new(vec![Landmark::new(1, 2.0, 3.0)]);
        let noise = LandmarkNoise::new(0.3, 0.3).unwrap();
        pf.update_weights(50.0, &noise, &[Observation::new(2.0, 3.0)], &map)
            .unwrap();
        for particle in pf.particles() {
            assert_approx_eq!(particle.weight, 1.0 / (2.0 * PI * 0.09), 1e-12);
            assert_eq!(particle.associations.len(), 1);
            assert_eq!(particle.associations[0].landmark_id, 1);
        }
    }

    #[test]
    fn test_update_with_no_landmarks_in_range_zeroes_weights() {
        let mut pf = initialized_filter(10, PoseNoise::zero());
        let map = Map::new(vec![Landmark::new(1, 500.0, 500.0)]);
        let noise = LandmarkNoise::new(0.3, 0.3).unwrap();
        pf.update_weights(50.0, &noise, &[Observation::new(1.0, 1.0)], &map)
            .unwrap();
        assert!(pf.weights().iter().all(|&w| w == 0.0));
        assert_eq!(pf.effective_sample_size(), 0.0);
        pf.resample().unwrap();
        assert_eq!(pf.particles().len(), 10);
    }

    #[test]
    fn test_update_rejects_bad_sensor_range() {
        let mut pf = initialized_filter(5, PoseNoise::zero());
        let noise = LandmarkNoise::new(0.3, 0.3).unwrap();
        assert!(matches!(
            pf.update_weights(-1.0, &noise, &[], &Map::default()),
            Err(FilterError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_resample_copies_are_independent() {
        let mut pf = initialized_filter(10, PoseNoise::new(1.0, 1.0, 0.1).unwrap());
        let mut weights = vec![0.0; 10];
        weights[3] = 1.0;
        set_weights(&mut pf, &weights);
        let origin = pf.particles()[3].pose;
        pf.resample().unwrap();
        assert!(pf.particles().iter().all(|p| p.pose == origin));
        pf.particles_mut()[0].pose.x += 100.0;
        pf.particles_mut()[0].associations.push(Association {
            landmark_id: 1,
            x: 0.0,
            y: 0.0,
        });
        for particle in pf.particles().iter().skip(1) {
            assert_eq!(particle.pose, origin);
            assert!(particle.associations.is_empty());
        }
    }

    #[test]
    fn test_resample_renumbers_and_keeps_weights() {
        let mut pf = initialized_filter(8, PoseNoise::zero());
        set_weights(&mut pf, &[0.5, 0.1, 0.1, 0.1, 0.05, 0.05, 0.05, 0.05]);
        pf.resample().unwrap();
        for (i, particle) in pf.particles().iter().enumerate() {
            assert_eq!(particle.id, i);
            assert!(particle.weight > 0.0);
        }
    }

    #[test]
    fn test_all_strategies_keep_size() {
        for strategy in [
            ParticleResamplingStrategy::Multinomial,
            ParticleResamplingStrategy::Systematic,
            ParticleResamplingStrategy::Stratified,
            ParticleResamplingStrategy::Residual,
        ] {
            let mut pf = initialized_filter(37, PoseNoise::new(0.3, 0.3, 0.01).unwrap())
                .with_strategies(strategy, ParticleAveragingStrategy::WeightedAverage);
            let weights: Vec<f64> = (0..37).map(|i| (i % 5) as f64).collect();
            set_weights(&mut pf, &weights);
            pf.resample().unwrap();
            assert_eq!(pf.particles().len(), 37, "{:?}", strategy);
            // zero-weight particles are never selected
            assert!(pf.particles().iter().all(|p| p.weight > 0.0), "{:?}", strategy);
        }
    }

    #[test]
    fn test_multinomial_proportionality() {
        let weights = [1.0, 2.0, 3.0, 4.0];
        let draws = 20_000;
        let mut rng = StdRng::seed_from_u64(2024);
        let indices = multinomial_resample(&weights, draws, &mut rng);
        let mut counts = [0usize; 4];
        for i in indices {
            counts[i] += 1;
        }
        let total: f64 = weights.iter().sum();
        let chi_squared: f64 = counts
            .iter()
            .zip(weights.iter())
            .map(|(&observed, &w)| {
                let expected = draws as f64 * w / total;
                (observed as f64 - expected).powi(2) / expected
            })
            .sum();
        // 99.9th percentile of chi-squared with 3 degrees of freedom
        assert!(chi_squared < 16.27, "chi-squared was {}", chi_squared);
    }

    #[test]
    fn test_systematic_counts_are_within_one() {
        let weights = [0.1, 0.2, 0.3, 0.4];
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let indices = systematic_resample(&weights, 10, &mut rng);
            assert_eq!(indices.len(), 10);
            for (i, w) in weights.iter().enumerate() {
                let count = indices.iter().filter(|&&k| k == i).count() as f64;
                assert!((count - 10.0 * w).abs() <= 1.0);
            }
        }
    }

    #[test]
    fn test_residual_keeps_deterministic_copies() {
        let weights = [0.55, 0.25, 0.2];
        let mut rng = StdRng::seed_from_u64(11);
        let indices = residual_resample(&weights, 10, &mut rng);
        assert_eq!(indices.len(), 10);
        assert!(indices.iter().filter(|&&k| k == 0).count() >= 5);
        assert!(indices.iter().filter(|&&k| k == 1).count() >= 2);
        assert!(indices.iter().filter(|&&k| k == 2).count() >= 1);
    }

    #[test]
    fn test_stratified_is_ordered_and_sized() {
        let weights = [3.0, 0.0, 1.0];
        let mut rng = StdRng::seed_from_u64(8);
        let indices = stratified_resample(&weights, 12, &mut rng);
        assert_eq!(indices.len(), 12);
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
        assert!(!indices.contains(&1));
    }

    #[test]
    fn test_sweep_never_selects_zero_weights() {
        assert_eq!(
            sweep(&[0.0, 0.5, 0.5], [0.0, 0.25, 0.5, 0.75].into_iter()),
            vec![1, 1, 2, 2]
        );
        assert_eq!(sweep(&[0.5, 0.5, 0.0], [0.5, 1.0].into_iter()), vec![1, 1]);
        assert_eq!(sweep(&[0.25, 0.0, 0.75], [0.25].into_iter()), vec![2]);
    }

    #[test]
    fn test_leading_zero_weight_is_never_resampled() {
        let weights = [0.0, 1.0, 2.0];
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            assert!(!systematic_resample(&weights, 6, &mut rng).contains(&0));
            assert!(!stratified_resample(&weights, 6, &mut rng).contains(&0));
            assert!(!residual_resample(&weights, 7, &mut rng).contains(&0));
        }
    }

    #[test]
    fn test_degenerate_weights_fall_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(1);
        for weights in [vec![0.0; 4], vec![f64::NAN, 1.0, 1.0, 1.0], vec![-1.0, 1.0, 1.0, 1.0]] {
            let indices = multinomial_resample(&weights, 4000, &mut rng);
            let mut counts = [0usize; 4];
            for i in indices {
                counts[i] += 1;
            }
            assert!(counts.iter().all(|&c| c > 800 && c < 1200), "{:?}", counts);
        }
        assert_eq!(systematic_resample(&[0.0, 0.0], 5, &mut rng).len(), 5);
        assert_eq!(residual_resample(&[0.0, 0.0], 5, &mut rng).len(), 5);
        assert!(multinomial_resample(&[], 5, &mut rng).is_empty());
    }

    #[test]
    fn test_effective_sample_size() {
        let mut pf = initialized_filter(100, PoseNoise::zero());
        assert_approx_eq!(pf.effective_sample_size(), 100.0, 1e-9);
        let mut weights = vec![0.0; 100];
        weights[7] = 0.25;
        set_weights(&mut pf, &weights);
        assert_approx_eq!(pf.effective_sample_size(), 1.0, 1e-12);
    }

    #[test]
    fn test_best_particle_prefers_first_on_ties() {
        let mut pf = initialized_filter(4, PoseNoise::zero());
        set_weights(&mut pf, &[0.1, 0.7, 0.7, 0.2]);
        assert_eq!(pf.best_particle().map(|p| p.id), Some(1));
    }

    #[test]
    fn test_estimates() {
        let mut pf = initialized_filter(4, PoseNoise::zero());
        let poses = [
            Pose::new(0.0, 0.0, PI - 0.1),
            Pose::new(2.0, 0.0, -PI + 0.1),
            Pose::new(0.0, 2.0, PI - 0.1),
            Pose::new(2.0, 2.0, -PI + 0.1),
        ];
        for (particle, pose) in pf.particles_mut().iter_mut().zip(poses) {
            particle.pose = pose;
        }
        set_weights(&mut pf, &[1.0, 1.0, 1.0, 5.0]);

        pf.averaging_strategy = ParticleAveragingStrategy::UnweightedAverage;
        let mean = pf.get_estimate().unwrap();
        assert_approx_eq!(mean.x, 1.0, 1e-12);
        assert_approx_eq!(mean.y, 1.0, 1e-12);
        assert_approx_eq!(wrap_to_pi(mean.theta - PI), 0.0, 1e-9);

        pf.averaging_strategy = ParticleAveragingStrategy::WeightedAverage;
        let mean = pf.get_estimate().unwrap();
        assert_approx_eq!(mean.x, 1.5, 1e-12);
        assert_approx_eq!(mean.y, 1.5, 1e-12);

        pf.averaging_strategy = ParticleAveragingStrategy::HighestWeight;
        assert_eq!(pf.get_estimate().unwrap(), poses[3]);
        assert_eq!(pf.get_certainty().unwrap(), Matrix3::zeros());
    }

    #[test]
    fn test_weighted_estimate_with_zero_weights_is_unweighted() {
        let mut pf = initialized_filter(2, PoseNoise::zero());
        pf.particles_mut()[1].pose = Pose::new(6.0, -2.0, 0.5);
        set_weights(&mut pf, &[0.0, 0.0]);
        let mean = pf.get_estimate().unwrap();
        assert_approx_eq!(mean.x, 5.0, 1e-12);
        assert_approx_eq!(mean.y, -2.0, 1e-12);
    }

    #[test]
    fn test_certainty_of_identical_particles_is_zero() {
        let pf = initialized_filter(10, PoseNoise::zero());
        let cov = pf.get_certainty().unwrap();
        for v in cov.iter() {
            assert_approx_eq!(*v, 0.0, 1e-12);
        }
    }

    #[test]
    fn test_debug_output() {
        let pf = initialized_filter(3, PoseNoise::zero());
        let text = format!("{:?}", pf);
        assert!(text.contains("num_particles: 3"));
        assert!(text.contains("estimate"));
    }
}
