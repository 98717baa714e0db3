//! Landmark particle filter toolbox
//!
//! This crate estimates the planar pose (position and heading) of a mobile agent from noisy motion
//! commands and noisy observations of landmarks whose map coordinates are known in advance. The
//! estimator is a sequential Monte Carlo (particle) filter built around a four stage cycle:
//!
//! 1. **Initialization** seeds a fixed number of particles from a Gaussian prior around a first pose
//!    estimate ([particle::ParticleFilter::init]).
//! 2. **Prediction** moves every particle through a unicycle motion model and adds process noise
//!    ([motion], [particle::ParticleFilter::predict]).
//! 3. **Update** projects the landmark map into each particle's frame, associates every observation
//!    with its nearest projected landmark and scores the particle with a bivariate Gaussian
//!    ([measurements], [particle::ParticleFilter::update_weights]).
//! 4. **Resampling** draws a new ensemble with replacement in proportion to the weights
//!    ([particle::ParticleFilter::resample]).
//!
//! Primarily built off of the following crate dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the points, rotations and isometries used for frame changes.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides the seeded
//!   random number generation and the Gaussian / weighted-index distributions.
//! - [`rayon`](https://crates.io/crates/rayon): Runs the per-particle prediction and weighting work in parallel.
//!
//! All other functionality is auxiliary (CSV and configuration I/O in [sim], logging through the
//! [`log`](https://crates.io/crates/log) facade).
//!
//! ## Crate overview
//!
//! - [error]: The error type returned for precondition violations.
//! - [geometry]: Distance and rigid-transform primitives.
//! - [map]: The read-only table of known landmarks.
//! - [motion]: The unicycle motion model used for prediction.
//! - [measurements]: Observations, predicted sightings, data association and the observation likelihood.
//! - [particle]: Particles, the particle filter itself and the resampling / averaging strategies.
//! - [sim]: Data loading, configuration, the particle log and a driver that runs the filter over a recorded sequence.
//!
//! ## Coordinate and state definitions
//!
//! A pose is the three-state vector
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are map-frame coordinates and $\theta$ is the heading in radians measured
//! counter-clockwise from the map x-axis. Headings are never wrapped by the filter itself; the
//! trigonometry downstream is periodic so this is harmless, but anything that displays or differences
//! headings should pass them through [wrap_to_pi].
pub mod error;
pub mod geometry;
pub mod map;
pub mod measurements;
pub mod motion;
pub mod particle;
pub mod sim;

use nalgebra::{Isometry2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

pub use crate::error::FilterError;

/// Planar pose of the agent or of a single particle hypothesis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Map-frame x coordinate
    pub x: f64,
    /// Map-frame y coordinate
    pub y: f64,
    /// Heading in radians
    pub theta: f64,
}

impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4}, y: {:.4}, theta: {:.4} rad }}",
            self.x, self.y, self.theta
        )
    }
}

impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Rigid-body transform that rotates by the heading and then translates by the position.
    pub fn to_isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }
}

impl From<Vector3<f64>> for Pose {
    fn from(v: Vector3<f64>) -> Self {
        Pose::new(v[0], v[1], v[2])
    }
}

impl From<Pose> for Vector3<f64> {
    fn from(pose: Pose) -> Self {
        Vector3::new(pose.x, pose.y, pose.theta)
    }
}

/// Per-dimension standard deviations of a pose, `[x, y, theta]`.
///
/// Used both for the Gaussian prior that seeds the particles and for the process noise injected
/// during prediction. Zero is allowed and means "no noise in this dimension". The fields are only
/// reachable through [PoseNoise::new] and the `TryFrom` conversions, so a held value is always valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 3]", into = "[f64; 3]")]
pub struct PoseNoise {
    x: f64,
    y: f64,
    theta: f64,
}

impl PoseNoise {
    /// Build a noise description, rejecting negative or non-finite standard deviations.
    pub fn new(x: f64, y: f64, theta: f64) -> Result<Self, FilterError> {
        for (name, value) in [("x", x), ("y", y), ("theta", theta)] {
            if !value.is_finite() || value < 0.0 {
                return Err(FilterError::InvalidNoise(format!(
                    "pose standard deviation for {} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        Ok(PoseNoise { x, y, theta })
    }
    /// No noise in any dimension.
    pub fn zero() -> Self {
        PoseNoise::default()
    }
    pub fn x(&self) -> f64 {
        self.x
    }
    pub fn y(&self) -> f64 {
        self.y
    }
    pub fn theta(&self) -> f64 {
        self.theta
    }
}

impl From<PoseNoise> for [f64; 3] {
    fn from(noise: PoseNoise) -> Self {
        [noise.x, noise.y, noise.theta]
    }
}

impl TryFrom<[f64; 3]> for PoseNoise {
    type Error = FilterError;
    fn try_from(std: [f64; 3]) -> Result<Self, Self::Error> {
        PoseNoise::new(std[0], std[1], std[2])
    }
}

impl TryFrom<&[f64]> for PoseNoise {
    type Error = FilterError;
    fn try_from(std: &[f64]) -> Result<Self, Self::Error> {
        match std {
            [x, y, theta] => PoseNoise::new(*x, *y, *theta),
            _ => Err(FilterError::NoiseDimension {
                expected: 3,
                found: std.len(),
            }),
        }
    }
}

/// Motion command applied over one prediction interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    /// Linear velocity (distance units per second)
    pub velocity: f64,
    /// Yaw rate (radians per second)
    pub yaw_rate: f64,
}

impl Display for ControlInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ControlInput {{ velocity: {:.4}, yaw_rate: {:.4} }}",
            self.velocity, self.yaw_rate
        )
    }
}

impl ControlInput {
    pub fn new(velocity: f64, yaw_rate: f64) -> Self {
        ControlInput { velocity, yaw_rate }
    }
}

/// Wrap an angle to the range $\pm\pi$ radians
///
/// Angles already inside $[-\pi, \pi]$ are returned unchanged. Larger angles wrap to $(-\pi, \pi]$
/// and smaller ones to $[-\pi, \pi)$, so odd multiples of $\pi$ keep their sign. The cost does not
/// depend on the magnitude of `angle`; a non-finite angle gives `NaN`.
///
/// # Arguments
/// * `angle` - The angle to be wrapped.
/// # Returns
/// * The wrapped angle, which will be in the range -π to π radians.
/// # Example
/// ```rust
/// use landmark_pf::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0; // radians
/// let wrapped_angle = wrap_to_pi(angle);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    if !angle.is_finite() {
        return f64::NAN;
    }
    if (-PI..=PI).contains(&angle) {
        return angle;
    }
    let offset = (angle + PI).rem_euclid(TAU);
    if angle > PI && offset == 0.0 {
        PI
    } else {
        offset - PI
    }
}
