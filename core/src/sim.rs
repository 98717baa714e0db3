//! Simulation utilities, configuration and CSV data loading for landmark localization.
//!
//! This module provides:
//! - `FilterConfig`, the serialisable filter configuration (JSON, YAML or TOML by file extension)
//! - `Scenario`, a recorded or synthetic sequence of controls and observations against a map
//! - `run_localization`, which runs the full init / predict / update / resample cycle over a scenario
//! - `LocalizationResult` for storing and exporting the per-step estimates
//! - `ParticleLog`, an append-only text sink for the particle cloud
//! - Unit tests for validating functionality
use log::{debug, error, info, warn};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::geometry::heading_error;
use crate::map::Map;
use crate::measurements::{
    LandmarkNoise, Observation, predict_sightings, validate_sensor_range,
};
use crate::motion::{add_gaussian_noise, predict_pose, validate_time_step};
use crate::particle::{
    Particle, ParticleAveragingStrategy, ParticleFilter, ParticleResamplingStrategy,
};
use crate::{ControlInput, FilterError, Pose, PoseNoise};

/// Reads every record of a headed CSV file.
pub fn read_csv<T: DeserializeOwned, P: AsRef<Path>>(
    path: P,
) -> Result<Vec<T>, Box<dyn std::error::Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: T = result?;
        records.push(record);
    }
    Ok(records)
}

/// Writes records to a CSV file with a header row.
pub fn write_csv<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// One row of an observation file: a vehicle-frame landmark sighting made at `step`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Zero-based index of the filter step the sighting belongs to
    pub step: usize,
    pub x: f64,
    pub y: f64,
}

/// Groups observation rows into one list per step, preserving file order within a step.
///
/// Rows referring to a step at or beyond `num_steps` are dropped with a warning.
pub fn group_observations(records: &[ObservationRecord], num_steps: usize) -> Vec<Vec<Observation>> {
    let mut grouped = vec![Vec::new(); num_steps];
    let mut dropped = 0;
    for record in records {
        match grouped.get_mut(record.step) {
            Some(step) => step.push(Observation::new(record.x, record.y)),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(
            "Dropped {} observations with a step index outside 0..{}",
            dropped, num_steps
        );
    }
    grouped
}

fn default_num_particles() -> usize {
    100
}
fn default_delta_t() -> f64 {
    0.1
}
fn default_sensor_range() -> f64 {
    50.0
}
fn default_pose_std() -> Vec<f64> {
    vec![0.3, 0.3, 0.01]
}
fn default_landmark_std() -> Vec<f64> {
    vec![0.3, 0.3]
}
fn default_seed() -> u64 {
    42
}
fn default_averaging_strategy() -> ParticleAveragingStrategy {
    ParticleAveragingStrategy::HighestWeight
}

/// Configuration for a localization run.
///
/// Noise parameters are kept as plain lists so that configuration files stay readable; use
/// [FilterConfig::validate] to turn them into typed values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,
    /// Time between consecutive steps, in seconds
    #[serde(default = "default_delta_t")]
    pub delta_t: f64,
    /// Maximum distance at which landmarks are considered visible
    #[serde(default = "default_sensor_range")]
    pub sensor_range: f64,
    /// Prior standard deviations `[x, y, theta]` used to seed the particles
    #[serde(default = "default_pose_std")]
    pub initial_std: Vec<f64>,
    /// Process noise standard deviations `[x, y, theta]` added on every prediction
    #[serde(default = "default_pose_std")]
    pub motion_std: Vec<f64>,
    /// Observation noise standard deviations `[x, y]`
    #[serde(default = "default_landmark_std")]
    pub landmark_std: Vec<f64>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub resampling_strategy: ParticleResamplingStrategy,
    #[serde(default = "default_averaging_strategy")]
    pub averaging_strategy: ParticleAveragingStrategy,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: default_num_particles(),
            delta_t: default_delta_t(),
            sensor_range: default_sensor_range(),
            initial_std: default_pose_std(),
            motion_std: default_pose_std(),
            landmark_std: default_landmark_std(),
            seed: default_seed(),
            resampling_strategy: ParticleResamplingStrategy::default(),
            averaging_strategy: default_averaging_strategy(),
        }
    }
}

/// Typed noise parameters produced by [FilterConfig::validate].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterParameters {
    pub initial_std: PoseNoise,
    pub motion_std: PoseNoise,
    pub landmark_std: LandmarkNoise,
}

impl FilterConfig {
    /// Check every scalar parameter and convert the noise lists to typed values.
    pub fn validate(&self) -> Result<FilterParameters, FilterError> {
        if self.num_particles == 0 {
            return Err(FilterError::InvalidParameter(
                "number of particles must be positive".to_string(),
            ));
        }
        validate_time_step(self.delta_t)?;
        validate_sensor_range(self.sensor_range)?;
        Ok(FilterParameters {
            initial_std: PoseNoise::try_from(self.initial_std.as_slice())?,
            motion_std: PoseNoise::try_from(self.motion_std.as_slice())?,
            landmark_std: LandmarkNoise::try_from(self.landmark_std.as_slice())?,
        })
    }
    /// An uninitialized filter with this configuration's size, seed and strategies.
    pub fn build_filter(&self) -> Result<ParticleFilter, FilterError> {
        Ok(ParticleFilter::new(self.num_particles, self.seed)?
            .with_strategies(self.resampling_strategy, self.averaging_strategy))
    }
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(unsupported_extension(p)),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported_extension(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("unsupported file extension: {}", path.display()),
    )
}

/// Append-only text log of the particle cloud.
///
/// Every call to [ParticleLog::write_particles] appends one `x y theta` line per particle. An
/// existing file is never truncated.
#[derive(Debug)]
pub struct ParticleLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl ParticleLog {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ParticleLog {
            writer: BufWriter::new(file),
            path,
        })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    pub fn write_particles(&mut self, particles: &[Particle]) -> io::Result<()> {
        for particle in particles {
            writeln!(
                self.writer,
                "{} {} {}",
                particle.pose.x, particle.pose.y, particle.pose.theta
            )?;
        }
        self.writer.flush()
    }
}

/// Coordinates that an agent sitting exactly at `pose` would report for every landmark in range.
///
/// The values are the ones the weight update projects for a particle at `pose`, so a particle on
/// that pose sees zero residuals.
pub fn simulate_observations(map: &Map, pose: &Pose, sensor_range: f64) -> Vec<Observation> {
    predict_sightings(pose, map, sensor_range)
        .into_iter()
        .map(|sighting| Observation::new(sighting.x, sighting.y))
        .collect()
}

/// A sequence of filter steps against a fixed map.
///
/// Step `k` consumes `observations[k]`; the prediction into step `k` uses `controls[k - 1]`.
/// `ground_truth` is either empty or holds one pose per step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scenario {
    pub map: Map,
    pub controls: Vec<ControlInput>,
    pub observations: Vec<Vec<Observation>>,
    pub ground_truth: Vec<Pose>,
}

impl Scenario {
    /// Loads a recorded scenario. The number of steps is the number of control rows.
    ///
    /// # Arguments
    /// * `map_path` - CSV with `id,x,y` columns.
    /// * `controls_path` - CSV with `velocity,yaw_rate` columns, one row per step.
    /// * `observations_path` - CSV with `step,x,y` columns.
    /// * `ground_truth_path` - Optional CSV with `x,y,theta` columns, one row per step.
    pub fn load<P: AsRef<Path>>(
        map_path: P,
        controls_path: P,
        observations_path: P,
        ground_truth_path: Option<P>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let map = Map::from_csv(map_path)?;
        let controls: Vec<ControlInput> = read_csv(controls_path)?;
        let records: Vec<ObservationRecord> = read_csv(observations_path)?;
        let observations = group_observations(&records, controls.len());
        let ground_truth: Vec<Pose> = match ground_truth_path {
            Some(path) => read_csv(path)?,
            None => Vec::new(),
        };
        info!(
            "Loaded scenario: {} landmarks, {} steps, {} observations, {} ground truth poses",
            map.len(),
            controls.len(),
            records.len(),
            ground_truth.len()
        );
        Ok(Scenario {
            map,
            controls,
            observations,
            ground_truth,
        })
    }
    /// Generate a synthetic scenario by driving `controls` forward from `start`.
    ///
    /// Ground truth follows the noiseless motion model. Observations are the in-range landmark
    /// coordinates from [simulate_observations], perturbed by `observation_noise` when given.
    pub fn simulate<R: Rng + ?Sized>(
        map: Map,
        start: Pose,
        controls: Vec<ControlInput>,
        delta_t: f64,
        sensor_range: f64,
        observation_noise: Option<&LandmarkNoise>,
        rng: &mut R,
    ) -> Self {
        let mut ground_truth = Vec::with_capacity(controls.len());
        let mut pose = start;
        for step in 0..controls.len() {
            if step > 0 {
                pose = predict_pose(&pose, &controls[step - 1], delta_t);
            }
            ground_truth.push(pose);
        }
        let observations = ground_truth
            .iter()
            .map(|truth| {
                let mut sightings = simulate_observations(&map, truth, sensor_range);
                if let Some(noise) = observation_noise {
                    for obs in &mut sightings {
                        obs.x = add_gaussian_noise(obs.x, noise.x(), rng);
                        obs.y = add_gaussian_noise(obs.y, noise.y(), rng);
                    }
                }
                sightings
            })
            .collect();
        Scenario {
            map,
            controls,
            observations,
            ground_truth,
        }
    }
    pub fn num_steps(&self) -> usize {
        self.controls.len()
    }
    /// Writes the controls, observations and ground truth in the layout [Scenario::load] reads.
    pub fn to_csv<P: AsRef<Path>>(
        &self,
        controls_path: P,
        observations_path: P,
        ground_truth_path: P,
    ) -> io::Result<()> {
        write_csv(&self.controls, controls_path)?;
        let records: Vec<ObservationRecord> = self
            .observations
            .iter()
            .enumerate()
            .flat_map(|(step, observations)| {
                observations.iter().map(move |obs| ObservationRecord {
                    step,
                    x: obs.x,
                    y: obs.y,
                })
            })
            .collect();
        write_csv(&records, observations_path)?;
        write_csv(&self.ground_truth, ground_truth_path)
    }
}

/// Per-step output of [run_localization].
#[derive(Clone, Debug, Default)]
pub struct LocalizationResult {
    /// Estimate from the filter's averaging strategy, after resampling
    pub estimates: Vec<Pose>,
    /// Highest-weight particle after resampling
    pub best: Vec<Particle>,
    /// Best particle minus ground truth, heading wrapped; empty without ground truth
    pub ground_truth_errors: Vec<Pose>,
    /// Effective sample size of the weights before resampling
    pub effective_sample_sizes: Vec<f64>,
}

impl LocalizationResult {
    pub fn len(&self) -> usize {
        self.estimates.len()
    }
    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }
    /// Mean absolute error of the best particle in each dimension, if ground truth was available.
    pub fn mean_absolute_error(&self) -> Option<Pose> {
        if self.ground_truth_errors.is_empty() {
            return None;
        }
        let n = self.ground_truth_errors.len() as f64;
        let sum = self
            .ground_truth_errors
            .iter()
            .fold(Pose::default(), |acc, e| {
                Pose::new(acc.x + e.x.abs(), acc.y + e.y.abs(), acc.theta + e.theta.abs())
            });
        Some(Pose::new(sum.x / n, sum.y / n, sum.theta / n))
    }
    /// Writes one row per step. Error columns are left empty when there is no ground truth.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(
            file,
            "step,x,y,theta,best_x,best_y,best_theta,best_weight,err_x,err_y,err_theta,n_eff"
        )?;
        for (step, (estimate, best)) in self.estimates.iter().zip(&self.best).enumerate() {
            let errors = match self.ground_truth_errors.get(step) {
                Some(e) => format!("{:.6},{:.6},{:.6}", e.x, e.y, e.theta),
                None => ",,".to_string(),
            };
            writeln!(
                file,
                "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:e},{},{:.4}",
                step,
                estimate.x,
                estimate.y,
                estimate.theta,
                best.pose.x,
                best.pose.y,
                best.pose.theta,
                best.weight,
                errors,
                self.effective_sample_sizes.get(step).copied().unwrap_or(0.0)
            )?;
        }
        file.flush()
    }
}

/// Run the particle filter over a scenario.
///
/// Step zero seeds the filter from `initial_pose`, or from the first ground truth pose when no
/// initial pose is given. Every later step predicts with the previous step's control. Each step
/// then updates the weights with that step's observations, resamples, and records the estimate.
/// Failures writing `particle_log` are logged and do not interrupt the run.
///
/// # Returns
/// * `Ok(LocalizationResult)` with one entry per step.
/// * `Err` for an invalid configuration, a missing starting pose, or ground truth that does not
///   cover every step.
pub fn run_localization(
    config: &FilterConfig,
    scenario: &Scenario,
    initial_pose: Option<Pose>,
    mut particle_log: Option<&mut ParticleLog>,
) -> Result<LocalizationResult, Box<dyn std::error::Error>> {
    let params = config.validate()?;
    let num_steps = scenario.num_steps();
    if scenario.observations.len() != num_steps {
        return Err(format!(
            "expected observations for {} steps, found {}",
            num_steps,
            scenario.observations.len()
        )
        .into());
    }
    let has_truth = !scenario.ground_truth.is_empty();
    if has_truth && scenario.ground_truth.len() < num_steps {
        return Err(format!(
            "ground truth has {} poses for {} steps",
            scenario.ground_truth.len(),
            num_steps
        )
        .into());
    }
    let start = match initial_pose.or_else(|| scenario.ground_truth.first().copied()) {
        Some(pose) => pose,
        None if num_steps == 0 => return Ok(LocalizationResult::default()),
        None => return Err("an initial pose is required when no ground truth is given".into()),
    };

    let mut pf = config.build_filter()?;
    let mut result = LocalizationResult::default();
    for step in 0..num_steps {
        if step == 0 {
            pf.init(&start, &params.initial_std)?;
        } else {
            pf.predict(config.delta_t, &scenario.controls[step - 1], &params.motion_std)?;
        }
        pf.update_weights(
            config.sensor_range,
            &params.landmark_std,
            &scenario.observations[step],
            &scenario.map,
        )?;
        result.effective_sample_sizes.push(pf.effective_sample_size());
        pf.resample()?;

        if let Some(log) = particle_log.as_deref_mut() {
            if let Err(e) = log.write_particles(pf.particles()) {
                error!(
                    "Failed to write particles to {}: {}",
                    log.path().display(),
                    e
                );
            }
        }

        let estimate = pf.get_estimate()?;
        let best = pf.best_particle().cloned().ok_or(FilterError::NotInitialized)?;
        if has_truth {
            let truth = scenario.ground_truth[step];
            let err = Pose::new(
                best.pose.x - truth.x,
                best.pose.y - truth.y,
                heading_error(best.pose.theta, truth.theta),
            );
            debug!(
                "Step {}: best {} weight {:.4e}, error ({:.4}, {:.4}, {:.4})",
                step, best.pose, best.weight, err.x, err.y, err.theta
            );
            result.ground_truth_errors.push(err);
        } else {
            debug!("Step {}: best {} weight {:.4e}", step, best.pose, best.weight);
        }
        result.estimates.push(estimate);
        result.best.push(best);
    }
    info!("Localization finished after {} steps", num_steps);
    Ok(result)
}
