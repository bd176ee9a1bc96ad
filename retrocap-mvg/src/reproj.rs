// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Reprojection errors of triangulated points.

use nalgebra::Point3;

use retrocap_types::ImagePoint;

use crate::Camera;

/// Mean squared pixel error of one sample: the 3D point is projected through
/// every camera that observed it and the squared coordinate residuals are
/// averaged. Samples with at most one valid view carry no error.
pub fn reprojection_error(
    cams: &[Camera<f64>],
    sample: &[ImagePoint],
    point: &Point3<f64>,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (cam, obs) in cams.iter().zip(sample.iter()) {
        let Some(obs) = obs else { continue };
        let projected = cam.project(point);
        let dx = obs.x - projected.x;
        let dy = obs.y - projected.y;
        sum += dx * dx + dy * dy;
        count += 2;
    }
    if count <= 2 {
        return None;
    }
    Some(sum / count as f64)
}

/// Per-sample reprojection errors for a batch; samples without a triangulated
/// point or with too few views are skipped.
pub fn reprojection_errors(
    cams: &[Camera<f64>],
    samples: &[Vec<ImagePoint>],
    points: &[Option<Point3<f64>>],
) -> Vec<f64> {
    samples
        .iter()
        .zip(points.iter())
        .filter_map(|(sample, point)| {
            point
                .as_ref()
                .and_then(|pt| reprojection_error(cams, sample, pt))
        })
        .collect()
}

/// Mean of the per-sample errors, or `None` if no sample contributed.
pub fn mean_reprojection_error(
    cams: &[Camera<f64>],
    samples: &[Vec<ImagePoint>],
    points: &[Option<Point3<f64>>],
) -> Option<f64> {
    let errors = reprojection_errors(cams, samples, points);
    if errors.is_empty() {
        return None;
    }
    Some(errors.iter().sum::<f64>() / errors.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Camera;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix3, Point2, Rotation3, Vector3};
    use retrocap_types::CameraPose;

    fn rig() -> Vec<Camera<f64>> {
        let k = Matrix3::new(320.0, 0.0, 160.0, 0.0, 320.0, 120.0, 0.0, 0.0, 1.0);
        let poses = [
            CameraPose::identity(),
            CameraPose {
                rotation: *Rotation3::from_euler_angles(0.0, -0.25, 0.0).matrix(),
                translation: Vector3::new(-0.6, 0.0, 0.1),
            },
        ];
        poses
            .iter()
            .map(|p| Camera::from_calibration(&k, &[0.0; 5], p).unwrap())
            .collect()
    }

    #[test]
    fn exact_observations_have_zero_error() {
        let cams = rig();
        let x = Point3::new(0.1, -0.2, 4.0);
        let sample: Vec<_> = cams.iter().map(|c| Some(c.project(&x))).collect();
        let err = reprojection_error(&cams, &sample, &x).unwrap();
        assert_abs_diff_eq!(err, 0.0, epsilon = 1e-16);
    }

    #[test]
    fn offset_observation_gives_mean_squared_error() {
        let cams = rig();
        let x = Point3::new(0.0, 0.0, 3.0);
        let mut sample: Vec<_> = cams.iter().map(|c| Some(c.project(&x))).collect();
        // shift one observation by 2 px in x: contributes 4 px^2 over 4 coords
        if let Some(pt) = &mut sample[1] {
            *pt = Point2::new(pt.x + 2.0, pt.y);
        }
        let err = reprojection_error(&cams, &sample, &x).unwrap();
        assert_abs_diff_eq!(err, 1.0, epsilon = 1e-10);
    }

    #[test]
    fn single_view_sample_has_no_error() {
        let cams = rig();
        let x = Point3::new(0.0, 0.0, 3.0);
        let sample = vec![Some(cams[0].project(&x)), None];
        assert!(reprojection_error(&cams, &sample, &x).is_none());
    }
}
