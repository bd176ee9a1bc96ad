// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Incremental structure-from-motion: robust fundamental-matrix estimation
//! and pairwise pose chaining.
//!
//! The recovered pose set is defined up to an unknown global scale; see
//! [`crate::world::scale_factor`] for metric scale recovery. Pairwise
//! chaining accumulates drift, so bundle adjustment must follow.

use nalgebra as na;
use na::dimension::Dyn;
use na::{Matrix3, OMatrix, Point2, Point3, Vector3};
use rand::Rng;
use tracing::debug;

use retrocap_types::{CameraPose, ImagePoint};

use crate::epipolar::{essential_from_fundamental, motion_from_essential};
use crate::triangulate::triangulate_dlt;
use crate::{projection_from_krt, GeometryError, Result};

/// Parameters of the RANSAC fundamental-matrix estimator.
#[derive(Debug, Clone, Copy)]
pub struct RansacParams {
    /// Inlier threshold on the Sampson distance, in pixels.
    pub inlier_threshold: f64,
    /// Probability of sampling at least one outlier-free minimal set.
    pub confidence: f64,
    /// Iteration cap (the adaptive schedule usually stops much earlier).
    pub max_iterations: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            inlier_threshold: 3.0,
            confidence: 0.99999,
            max_iterations: 2000,
        }
    }
}

/// Hartley normalization: translate the centroid to the origin and scale the
/// mean distance to sqrt(2).
fn normalize_points(pts: &[Point2<f64>]) -> (Matrix3<f64>, Vec<Point2<f64>>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 0.0 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    #[rustfmt::skip]
    let t = Matrix3::new(
        scale, 0.0, -scale * cx,
        0.0, scale, -scale * cy,
        0.0, 0.0, 1.0,
    );
    let transformed = pts
        .iter()
        .map(|p| Point2::new(scale * (p.x - cx), scale * (p.y - cy)))
        .collect();
    (t, transformed)
}

/// Linear (normalized 8-point) fit over the given correspondence indices,
/// with the rank-2 constraint enforced.
fn eight_point(
    pts1: &[Point2<f64>],
    pts2: &[Point2<f64>],
    indices: &[usize],
) -> Option<Matrix3<f64>> {
    let mut a = OMatrix::<f64, Dyn, na::dimension::U9>::zeros(indices.len());
    for (row, &i) in indices.iter().enumerate() {
        let (x1, y1) = (pts1[i].x, pts1[i].y);
        let (x2, y2) = (pts2[i].x, pts2[i].y);
        let r = [x2 * x1, x2 * y1, x2, y2 * x1, y2 * y1, y2, x1, y1, 1.0];
        for (col, v) in r.iter().enumerate() {
            a[(row, col)] = *v;
        }
    }

    let svd = na::linalg::SVD::try_new(a, false, true, 1e-12, 200)?;
    let v_t = svd.v_t?;
    let f_vec = v_t.row(8);
    #[rustfmt::skip]
    let f = Matrix3::new(
        f_vec[0], f_vec[1], f_vec[2],
        f_vec[3], f_vec[4], f_vec[5],
        f_vec[6], f_vec[7], f_vec[8],
    );

    // enforce rank 2
    let svd3 = na::linalg::SVD::try_new(f, true, true, 1e-12, 100)?;
    let u = svd3.u?;
    let v_t = svd3.v_t?;
    let mut s = svd3.singular_values;
    s[2] = 0.0;
    Some(u * Matrix3::from_diagonal(&s) * v_t)
}

/// First-order geometric (Sampson) distance of a correspondence to F.
fn sampson_distance(f: &Matrix3<f64>, p1: &Point2<f64>, p2: &Point2<f64>) -> f64 {
    let x1 = p1.to_homogeneous();
    let x2 = p2.to_homogeneous();
    let fx1 = f * x1;
    let ftx2 = f.transpose() * x2;
    let num = (x2.transpose() * f * x1)[(0, 0)];
    let denom = fx1.x * fx1.x + fx1.y * fx1.y + ftx2.x * ftx2.x + ftx2.y * ftx2.y;
    if denom <= 0.0 {
        return f64::INFINITY;
    }
    (num * num / denom).sqrt()
}

/// Estimate the fundamental matrix between two views with RANSAC.
///
/// Returns `DegenerateGeometry` when fewer than 8 correspondences are given
/// or no consensus set of at least 8 inliers is found.
pub fn estimate_fundamental<RNG: Rng>(
    pts1: &[Point2<f64>],
    pts2: &[Point2<f64>],
    params: &RansacParams,
    rng: &mut RNG,
) -> Result<Matrix3<f64>> {
    if pts1.len() != pts2.len() {
        return Err(GeometryError::BadMatrixSize);
    }
    let n = pts1.len();
    if n < 8 {
        return Err(GeometryError::NotEnoughPoints);
    }

    let (t1, n1) = normalize_points(pts1);
    let (t2, n2) = normalize_points(pts2);

    let denormalize = |f: &Matrix3<f64>| t2.transpose() * f * t1;

    let mut best_inliers: Vec<usize> = Vec::new();
    let mut iterations = params.max_iterations;
    let mut iter = 0usize;
    while iter < iterations {
        iter += 1;
        let sample = rand::seq::index::sample(rng, n, 8).into_vec();
        let Some(f_norm) = eight_point(&n1, &n2, &sample) else {
            continue;
        };
        let f = denormalize(&f_norm);

        let inliers: Vec<usize> = (0..n)
            .filter(|&i| sampson_distance(&f, &pts1[i], &pts2[i]) < params.inlier_threshold)
            .collect();

        if inliers.len() > best_inliers.len() {
            best_inliers = inliers;

            // adaptive iteration count
            let w = best_inliers.len() as f64 / n as f64;
            let denom = (1.0 - w.powi(8)).max(f64::MIN_POSITIVE).ln();
            if denom < 0.0 {
                let needed = ((1.0 - params.confidence).ln() / denom).ceil();
                iterations = iterations.min((needed as usize).max(1));
            }
        }
    }

    if best_inliers.len() < 8 {
        return Err(GeometryError::DegenerateGeometry(
            "no fundamental-matrix consensus",
        ));
    }
    debug!(
        inliers = best_inliers.len(),
        total = n,
        iterations = iter,
        "fundamental matrix estimated"
    );

    let f_norm = eight_point(&n1, &n2, &best_inliers).ok_or(GeometryError::SvdFailed)?;
    Ok(denormalize(&f_norm))
}

/// Select the motion candidate that places the most triangulated points in
/// front of both cameras.
fn select_by_chirality(
    candidates: &[(Matrix3<f64>, Vector3<f64>); 4],
    k1: &Matrix3<f64>,
    k2: &Matrix3<f64>,
    pts1: &[Point2<f64>],
    pts2: &[Point2<f64>],
) -> Result<(Matrix3<f64>, Vector3<f64>)> {
    let p1 = projection_from_krt(k1, &Matrix3::identity(), &Vector3::zeros());

    let mut best: Option<(usize, (Matrix3<f64>, Vector3<f64>))> = None;
    for (r, t) in candidates.iter() {
        let p2 = projection_from_krt(k2, r, t);
        let mut in_front = 0usize;
        for (a, b) in pts1.iter().zip(pts2.iter()) {
            let Some(x) = triangulate_dlt(&[(p1, *a), (p2, *b)]) else {
                continue;
            };
            let in_second = r * x.coords + t;
            if x.z > 0.0 && in_second.z > 0.0 {
                in_front += 1;
            }
        }
        match &best {
            Some((count, _)) if *count >= in_front => {}
            _ => best = Some((in_front, (*r, *t))),
        }
    }

    match best {
        Some((count, rt)) if count > 0 => Ok(rt),
        _ => Err(GeometryError::DegenerateGeometry(
            "no chirality-consistent motion",
        )),
    }
}

/// Recover an initial pose per camera from corresponded samples.
///
/// For each adjacent camera pair, the samples seen by both views yield a
/// robust fundamental matrix, the essential matrix, and the
/// chirality-selected relative motion, which is chained onto the previous
/// camera: `R[i+1] = R_rel * R[i]`, `t[i+1] = t[i] + R[i] * t_rel`.
pub fn bootstrap_poses<RNG: Rng>(
    samples: &[Vec<ImagePoint>],
    intrinsics: &[Matrix3<f64>],
    params: &RansacParams,
    rng: &mut RNG,
) -> Result<Vec<CameraPose>> {
    let num_cams = intrinsics.len();
    if num_cams < 2 {
        return Err(GeometryError::WrongCameraCount {
            expected: 2,
            actual: num_cams,
        });
    }
    for sample in samples {
        if sample.len() != num_cams {
            return Err(GeometryError::BadMatrixSize);
        }
    }

    let mut poses = vec![CameraPose::identity()];
    for cam_i in 0..num_cams - 1 {
        let (pts1, pts2): (Vec<_>, Vec<_>) = samples
            .iter()
            .filter_map(|sample| match (sample[cam_i], sample[cam_i + 1]) {
                (Some(a), Some(b)) => Some((a, b)),
                _ => None,
            })
            .unzip();

        let f = estimate_fundamental(&pts1, &pts2, params, rng)?;
        let e = essential_from_fundamental(&f, &intrinsics[cam_i], &intrinsics[cam_i + 1]);
        let candidates = motion_from_essential(&e)?;
        let (r_rel, t_rel) = select_by_chirality(
            &candidates,
            &intrinsics[cam_i],
            &intrinsics[cam_i + 1],
            &pts1,
            &pts2,
        )?;

        let prev = &poses[cam_i];
        let rotation = r_rel * prev.rotation;
        let translation = prev.translation + prev.rotation * t_rel;
        poses.push(CameraPose {
            rotation,
            translation,
        });
    }
    Ok(poses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Rotation3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn synthetic_pair() -> (Matrix3<f64>, Vec<Point2<f64>>, Vec<Point2<f64>>) {
        let k = Matrix3::new(320.0, 0.0, 160.0, 0.0, 320.0, 120.0, 0.0, 0.0, 1.0);
        let r = *Rotation3::from_euler_angles(0.05, -0.4, 0.02).matrix();
        let t = Vector3::new(-0.5, 0.02, 0.08);
        let p1 = projection_from_krt(&k, &Matrix3::identity(), &Vector3::zeros());
        let p2 = projection_from_krt(&k, &r, &t);

        let mut pts1 = Vec::new();
        let mut pts2 = Vec::new();
        for i in 0..6 {
            for j in 0..5 {
                let x = Point3::new(
                    -0.4 + 0.16 * i as f64,
                    -0.3 + 0.15 * j as f64,
                    2.0 + 0.1 * ((i * 5 + j) % 7) as f64,
                );
                let h1 = p1 * x.to_homogeneous();
                let h2 = p2 * x.to_homogeneous();
                pts1.push(Point2::new(h1.x / h1.z, h1.y / h1.z));
                pts2.push(Point2::new(h2.x / h2.z, h2.y / h2.z));
            }
        }
        (k, pts1, pts2)
    }

    #[test]
    fn ransac_fundamental_fits_noise_free_data() {
        let (_k, pts1, pts2) = synthetic_pair();
        let mut rng = StdRng::seed_from_u64(42);
        let f = estimate_fundamental(&pts1, &pts2, &RansacParams::default(), &mut rng).unwrap();
        for (a, b) in pts1.iter().zip(pts2.iter()) {
            assert!(sampson_distance(&f, a, b) < 1e-6);
        }
    }

    #[test]
    fn ransac_rejects_outliers() {
        let (_k, mut pts1, mut pts2) = synthetic_pair();
        // corrupt a few correspondences
        pts1[3] = Point2::new(11.0, 222.0);
        pts2[17] = Point2::new(300.0, 5.0);
        pts2[25] = Point2::new(1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let f = estimate_fundamental(&pts1, &pts2, &RansacParams::default(), &mut rng).unwrap();
        let inliers = pts1
            .iter()
            .zip(pts2.iter())
            .filter(|(a, b)| sampson_distance(&f, a, b) < 3.0)
            .count();
        assert!(inliers >= pts1.len() - 3);
    }

    #[test]
    fn too_few_points_is_degenerate() {
        let pts: Vec<Point2<f64>> = (0..5).map(|i| Point2::new(i as f64, 0.0)).collect();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            estimate_fundamental(&pts, &pts, &RansacParams::default(), &mut rng),
            Err(GeometryError::NotEnoughPoints)
        ));
    }

    #[test]
    fn bootstrap_recovers_relative_pose_direction() {
        let (k, pts1, pts2) = synthetic_pair();
        let samples: Vec<Vec<ImagePoint>> = pts1
            .iter()
            .zip(pts2.iter())
            .map(|(a, b)| vec![Some(*a), Some(*b)])
            .collect();

        let mut rng = StdRng::seed_from_u64(3);
        let poses =
            bootstrap_poses(&samples, &[k, k], &RansacParams::default(), &mut rng).unwrap();
        assert_eq!(poses.len(), 2);
        assert_abs_diff_eq!(poses[0].rotation, Matrix3::identity(), epsilon = 1e-12);

        let expected_r = *Rotation3::from_euler_angles(0.05, -0.4, 0.02).matrix();
        assert_abs_diff_eq!(poses[1].rotation, expected_r, epsilon = 1e-4);

        // translation is recovered up to scale
        let t_true = Vector3::new(-0.5, 0.02, 0.08).normalize();
        let t_est = poses[1].translation.normalize();
        assert!((t_est - t_true).norm() < 1e-4 || (t_est + t_true).norm() < 1e-4);
    }
}
