//! Rigid-object location from triangulated marker positions.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use retrocap_types::TrackedObject;

/// Rigid-body distance constants of the tracked objects.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ObjectParams {
    /// Separation of the two markers on a body, in meters.
    pub marker_separation: f64,
    /// Accepted deviation from the nominal separation, in meters.
    pub separation_tolerance: f64,
    /// Near marker separation of the three-marker body variant. Carried for
    /// configuration compatibility; the three-marker matcher is not active.
    pub triple_near_separation: f64,
    /// Far marker separation of the three-marker body variant.
    pub triple_far_separation: f64,
}

impl Default for ObjectParams {
    fn default() -> Self {
        Self {
            marker_separation: 0.131,
            separation_tolerance: 0.025,
            triple_near_separation: 0.089,
            triple_far_separation: 0.133,
        }
    }
}

/// Pair up markers whose mutual distance matches the rigid-body separation.
///
/// Points are scanned in index order; the first partner within tolerance
/// wins and both points are claimed. Claiming only skips future reference
/// points `i`: a point already consumed as a partner may still be chosen as
/// the partner of a later reference point. The object sits at the pair
/// midpoint with its heading folded into `[-pi/2, pi/2]` (the front/back
/// distinction of the body is not recoverable from two identical markers).
pub fn locate_objects(
    object_points: &[Point3<f64>],
    errors: &[f64],
    params: &ObjectParams,
) -> Vec<TrackedObject> {
    debug_assert_eq!(object_points.len(), errors.len());

    let n = object_points.len();
    let mut claimed = vec![false; n];
    let mut objects = Vec::new();

    for i in 0..n {
        if claimed[i] {
            continue;
        }
        let partner = (0..n).find(|&j| {
            j != i
                && ((object_points[i] - object_points[j]).norm() - params.marker_separation)
                    .abs()
                    < params.separation_tolerance
        });
        let Some(j) = partner else { continue };

        claimed[i] = true;
        claimed[j] = true;

        let pos = nalgebra::center(&object_points[i], &object_points[j]);
        let delta = object_points[j] - object_points[i];

        let mut heading = delta.y.atan2(delta.x);
        if heading > std::f64::consts::FRAC_PI_2 {
            heading -= std::f64::consts::PI;
        } else if heading < -std::f64::consts::FRAC_PI_2 {
            heading += std::f64::consts::PI;
        }

        objects.push(TrackedObject {
            pos,
            heading,
            error: (errors[i] + errors[j]) / 2.0,
            drone_index: 0,
        });
    }

    objects
}
