//! Unicycle motion model used by the prediction step
//!
//! Given a pose, a linear velocity $v$, a yaw rate $\omega$ and an interval $\Delta t$, the expected
//! pose after the interval is computed in closed form. Two branches are used:
//!
//! **Straight** ($|\omega| <$ [YAW_RATE_THRESHOLD]):
//!
//! $$
//! x' = x + v \Delta t \cos\theta, \quad y' = y + v \Delta t \sin\theta, \quad \theta' = \theta
//! $$
//!
//! **Turning** (otherwise):
//!
//! $$
//! x' = x + \frac{v}{\omega}\left(\sin(\theta + \omega\Delta t) - \sin\theta\right), \quad
//! y' = y + \frac{v}{\omega}\left(\cos\theta - \cos(\theta + \omega\Delta t)\right), \quad
//! \theta' = \theta + \omega\Delta t
//! $$
//!
//! The straight branch guards against dividing by a vanishing yaw rate. Process noise is added
//! independently in each dimension after the expected pose is computed.
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{ControlInput, FilterError, Pose, PoseNoise};

/// Yaw rates with a smaller magnitude are integrated as straight-line motion.
pub const YAW_RATE_THRESHOLD: f64 = 1e-7;

/// Which closed-form branch of the motion model applies to a control input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionBranch {
    Straight,
    Turning,
}

impl MotionBranch {
    pub fn select(yaw_rate: f64) -> Self {
        if yaw_rate.abs() < YAW_RATE_THRESHOLD {
            MotionBranch::Straight
        } else {
            MotionBranch::Turning
        }
    }
}

/// Check that a prediction interval is usable.
pub fn validate_time_step(dt: f64) -> Result<(), FilterError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidParameter(format!(
            "time step must be finite and positive, got {}",
            dt
        )))
    }
}

/// Check that a control input is usable: both velocity and yaw rate must be finite.
pub fn validate_control(control: &ControlInput) -> Result<(), FilterError> {
    if control.velocity.is_finite() && control.yaw_rate.is_finite() {
        Ok(())
    } else {
        Err(FilterError::InvalidParameter(format!(
            "control input must be finite, got {}",
            control
        )))
    }
}

/// Noiseless expected pose after applying `control` for `dt` seconds.
///
/// # Arguments
/// * `pose` - Pose at the start of the interval.
/// * `control` - Linear velocity and yaw rate held constant over the interval.
/// * `dt` - Interval length in seconds.
/// # Returns
/// * The expected pose at the end of the interval. The heading is not wrapped.
pub fn predict_pose(pose: &Pose, control: &ControlInput, dt: f64) -> Pose {
    let ControlInput { velocity, yaw_rate } = *control;
    match MotionBranch::select(yaw_rate) {
        MotionBranch::Straight => {
            let (sin_theta, cos_theta) = pose.theta.sin_cos();
            Pose {
                x: pose.x + velocity * dt * cos_theta,
                y: pose.y + velocity * dt * sin_theta,
                theta: pose.theta,
            }
        }
        MotionBranch::Turning => {
            let theta = pose.theta + yaw_rate * dt;
            let radius = velocity / yaw_rate;
            Pose {
                x: pose.x + radius * (theta.sin() - pose.theta.sin()),
                y: pose.y + radius * (pose.theta.cos() - theta.cos()),
                theta,
            }
        }
    }
}

/// Expected pose plus independent Gaussian noise in each dimension.
///
/// A zero standard deviation leaves that dimension untouched and draws nothing from `rng`.
pub fn sample_pose<R: Rng + ?Sized>(
    pose: &Pose,
    control: &ControlInput,
    dt: f64,
    noise: &PoseNoise,
    rng: &mut R,
) -> Pose {
    let expected = predict_pose(pose, control, dt);
    Pose {
        x: add_gaussian_noise(expected.x, noise.x(), rng),
        y: add_gaussian_noise(expected.y, noise.y(), rng),
        theta: add_gaussian_noise(expected.theta, noise.theta(), rng),
    }
}

/// Draw from $\mathcal{N}(\text{mean}, \sigma^2)$, or return `mean` when $\sigma = 0$.
pub(crate) fn add_gaussian_noise<R: Rng + ?Sized>(mean: f64, std_dev: f64, rng: &mut R) -> f64 {
    if std_dev > 0.0 {
        // std_dev is validated finite and positive by PoseNoise
        match Normal::new(mean, std_dev) {
            Ok(normal) => normal.sample(rng),
            Err(_) => mean,
        }
    } else {
        mean
    }
}
