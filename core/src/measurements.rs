//! Landmark observations and the observation likelihood
//!
//! This module holds everything the weight update needs for a single particle:
//!
//! - projecting the landmark map into the particle's frame and keeping the landmarks within sensor
//!   range ([predict_sightings]),
//! - labelling each raw observation with the identifier of a predicted sighting
//!   ([DataAssociation], [NearestNeighbor]),
//! - scoring the labelled observations with an axis-aligned bivariate Gaussian
//!   ([bivariate_gaussian], [observation_log_likelihood]).
//!
//! # Unmatched observations
//! An observation that ends up without a matching predicted sighting (because no landmark was in
//! range of the particle) contributes a factor of exactly zero to the particle's weight. Skipping it
//! would reward particles that see fewer landmarks.
use std::collections::HashMap;
use std::fmt::{self, Display};

use log::trace;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::geometry::{distance, rigid_transform};
use crate::map::{LandmarkId, Map};
use crate::{FilterError, Pose};

/// Raw landmark observation in the vehicle frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Identifier of the associated landmark; `None` until association runs or when nothing matched.
    #[serde(default, skip_serializing)]
    pub id: Option<LandmarkId>,
    pub x: f64,
    pub y: f64,
}

impl Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "Observation(id: {}, x: {}, y: {})", id, self.x, self.y),
            None => write!(f, "Observation(id: unset, x: {}, y: {})", self.x, self.y),
        }
    }
}

impl Observation {
    pub fn new(x: f64, y: f64) -> Self {
        Observation { id: None, x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// A landmark as a single particle expects to see it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictedSighting {
    pub id: LandmarkId,
    pub x: f64,
    pub y: f64,
}

impl PredictedSighting {
    pub fn new(id: LandmarkId, x: f64, y: f64) -> Self {
        PredictedSighting { id, x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// Record of one observation matched to a landmark, kept on the particle for inspection.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub landmark_id: LandmarkId,
    /// Observation x coordinate
    pub x: f64,
    /// Observation y coordinate
    pub y: f64,
}

/// Standard deviations of the landmark sensor along each axis. Both must be strictly positive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 2]", into = "[f64; 2]")]
pub struct LandmarkNoise {
    x: f64,
    y: f64,
}

impl LandmarkNoise {
    pub fn new(x: f64, y: f64) -> Result<Self, FilterError> {
        for (name, value) in [("x", x), ("y", y)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(FilterError::InvalidNoise(format!(
                    "landmark standard deviation for {} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        Ok(LandmarkNoise { x, y })
    }
    pub fn x(&self) -> f64 {
        self.x
    }
    pub fn y(&self) -> f64 {
        self.y
    }
}

impl From<LandmarkNoise> for [f64; 2] {
    fn from(noise: LandmarkNoise) -> Self {
        [noise.x, noise.y]
    }
}

impl TryFrom<[f64; 2]> for LandmarkNoise {
    type Error = FilterError;
    fn try_from(std: [f64; 2]) -> Result<Self, Self::Error> {
        LandmarkNoise::new(std[0], std[1])
    }
}

impl TryFrom<&[f64]> for LandmarkNoise {
    type Error = FilterError;
    fn try_from(std: &[f64]) -> Result<Self, Self::Error> {
        match std {
            [x, y] => LandmarkNoise::new(*x, *y),
            _ => Err(FilterError::NoiseDimension {
                expected: 2,
                found: std.len(),
            }),
        }
    }
}

/// Check that a sensor range is usable.
pub fn validate_sensor_range(sensor_range: f64) -> Result<(), FilterError> {
    if sensor_range > 0.0 && !sensor_range.is_nan() {
        Ok(())
    } else {
        Err(FilterError::InvalidParameter(format!(
            "sensor range must be positive, got {}",
            sensor_range
        )))
    }
}

/// Strategy for labelling observations with predicted sighting identifiers.
///
/// Implementations must be deterministic: the same inputs in the same order always produce the
/// same labels. They are shared across the worker threads of a weight update, hence `Sync`.
pub trait DataAssociation: Sync {
    /// Overwrite `id` on every observation. Observations with no candidate get `None`.
    fn associate(&self, predicted: &[PredictedSighting], observations: &mut [Observation]);
}

/// Brute-force nearest neighbour association.
///
/// Every observation takes the identifier of the closest predicted sighting by Euclidean distance.
/// On ties the sighting that comes first in map order wins. Cost is
/// `O(predicted.len() * observations.len())`.
#[derive(Clone, Copy, Debug, Default)]
pub struct NearestNeighbor;

impl DataAssociation for NearestNeighbor {
    fn associate(&self, predicted: &[PredictedSighting], observations: &mut [Observation]) {
        for observation in observations.iter_mut() {
            let position = observation.position();
            let mut min_distance = f64::INFINITY;
            let mut nearest = None;
            for sighting in predicted {
                let d = distance(&sighting.position(), &position);
                if d < min_distance {
                    min_distance = d;
                    nearest = Some(sighting.id);
                }
            }
            observation.id = nearest;
        }
    }
}

/// Project the map into a particle's frame and keep the landmarks within sensor range.
///
/// Each landmark is rotated by the particle heading and translated by the particle position
/// ([rigid_transform]). Landmarks whose projection lies farther than `sensor_range` from the
/// particle position are dropped; a projection exactly at the range is kept.
pub fn predict_sightings(pose: &Pose, map: &Map, sensor_range: f64) -> Vec<PredictedSighting> {
    let origin = Point2::new(pose.x, pose.y);
    map.landmarks()
        .iter()
        .filter_map(|landmark| {
            let projected = rigid_transform(pose, &landmark.position());
            if distance(&projected, &origin) <= sensor_range {
                Some(PredictedSighting::new(landmark.id, projected.x, projected.y))
            } else {
                None
            }
        })
        .collect()
}

/// Axis-aligned bivariate Gaussian density of a residual
///
/// $$
/// p(d_x, d_y) = \frac{1}{2\pi\sigma_x\sigma_y}
/// \exp\left(-\left(\frac{d_x^2}{2\sigma_x^2} + \frac{d_y^2}{2\sigma_y^2}\right)\right)
/// $$
pub fn bivariate_gaussian(dx: f64, dy: f64, noise: &LandmarkNoise) -> f64 {
    log_bivariate_gaussian(dx, dy, noise).exp()
}

/// Natural logarithm of [bivariate_gaussian], finite for any finite residual.
pub fn log_bivariate_gaussian(dx: f64, dy: f64, noise: &LandmarkNoise) -> f64 {
    let log_normalizer = -(2.0 * std::f64::consts::PI * noise.x * noise.y).ln();
    let exponent = dx.powi(2) / (2.0 * noise.x.powi(2)) + dy.powi(2) / (2.0 * noise.y.powi(2));
    log_normalizer - exponent
}

/// Joint log-likelihood of a set of associated observations.
///
/// The result is the sum of [log_bivariate_gaussian] over every observation, using the residual
/// between the observation and the predicted sighting carrying the same identifier. When several
/// sightings share an identifier the first one is used. An observation with no match, or a
/// residual that is not a number, makes the result negative infinity. With no observations at
/// all the log-likelihood is zero.
///
/// The sum never overflows the way a running product of densities does, so it stays meaningful
/// for many observations with a small sensor noise.
///
/// # Returns
/// * The log-likelihood and the association record for every matched observation.
pub fn observation_log_likelihood(
    predicted: &[PredictedSighting],
    observations: &[Observation],
    noise: &LandmarkNoise,
) -> (f64, Vec<Association>) {
    let mut by_id: HashMap<LandmarkId, &PredictedSighting> = HashMap::with_capacity(predicted.len());
    for sighting in predicted {
        by_id.entry(sighting.id).or_insert(sighting);
    }

    let mut log_likelihood = 0.0;
    let mut associations = Vec::with_capacity(observations.len());
    for observation in observations {
        match observation.id.and_then(|id| by_id.get(&id)) {
            Some(sighting) => {
                let dx = observation.x - sighting.x;
                let dy = observation.y - sighting.y;
                log_likelihood += log_bivariate_gaussian(dx, dy, noise);
                associations.push(Association {
                    landmark_id: sighting.id,
                    x: observation.x,
                    y: observation.y,
                });
            }
            None => {
                trace!("{} has no predicted sighting, weight set to zero", observation);
                log_likelihood = f64::NEG_INFINITY;
            }
        }
    }
    if log_likelihood.is_nan() {
        log_likelihood = f64::NEG_INFINITY;
    }
    (log_likelihood, associations)
}

/// Joint likelihood of a set of associated observations.
///
/// The exponential of [observation_log_likelihood]: the product of [bivariate_gaussian] over
/// every observation, zero when any observation is unmatched and one with no observations. The
/// result is never negative or `NaN`, but it saturates to infinity when the true product exceeds
/// the range of `f64`; the filter works from the log-likelihood instead.
pub fn observation_likelihood(
    predicted: &[PredictedSighting],
    observations: &[Observation],
    noise: &LandmarkNoise,
) -> (f64, Vec<Association>) {
    let (log_likelihood, associations) = observation_log_likelihood(predicted, observations, noise);
    (log_likelihood.exp(), associations)
}
