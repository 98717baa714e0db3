//! Planar geometry primitives
//!
//! Every stage of the filter works in two dimensions: the map frame, fixed to the world, and the
//! frame attached to a single particle's hypothesised pose. Points are represented with
//! `nalgebra::Point2` and frame changes with `nalgebra::Isometry2`, which rotates by the heading
//! and then translates by the position.
//!
//! # Frame convention
//! [rigid_transform] is the projection the weight update applies to every landmark: the landmark's
//! coordinates are rotated by the particle's heading and then shifted by the particle's position.
//! The resulting point is compared directly against the raw observations, so both sides of the
//! residual live in the same frame.
use crate::{Pose, wrap_to_pi};
use ::nalgebra::Point2;

/// Euclidean distance between two points
///
/// # Example
/// ```rust
/// use nalgebra::Point2;
/// use landmark_pf::geometry;
/// let d = geometry::distance(&Point2::new(0.0, 0.0), &Point2::new(3.0, 4.0));
/// assert_eq!(d, 5.0);
/// ```
pub fn distance(a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    nalgebra::distance(a, b)
}
/// Rotate a point by the pose heading and translate it by the pose position
///
/// $$
/// \begin{bmatrix} x' \\\\ y' \end{bmatrix} =
/// \begin{bmatrix} \cos\theta & -\sin\theta \\\\ \sin\theta & \cos\theta \end{bmatrix}
/// \begin{bmatrix} x \\\\ y \end{bmatrix} + \begin{bmatrix} p_x \\\\ p_y \end{bmatrix}
/// $$
///
/// # Arguments
/// * `pose` - Pose providing the rotation angle and the translation.
/// * `point` - Point to transform.
/// # Returns
/// * The transformed point.
pub fn rigid_transform(pose: &Pose, point: &Point2<f64>) -> Point2<f64> {
    pose.to_isometry().transform_point(point)
}
/// Signed difference `estimate - truth` of two headings, wrapped to $\pm\pi$.
pub fn heading_error(estimate: f64, truth: f64) -> f64 {
    wrap_to_pi(estimate - truth)
}
