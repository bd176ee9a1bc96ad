// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! World-frame alignment: floor-plane fitting, origin placement and metric
//! scale recovery.

use nalgebra as na;
use na::dimension::{Dyn, U3};
use na::{Matrix3, Matrix4, OMatrix, Point3, Unit, Vector3};

use retrocap_types::CameraPose;

use crate::{GeometryError, Result};

/// Target world axis for plane alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Axis {
    X,
    Y,
    #[default]
    Z,
}

impl Axis {
    pub fn unit(self) -> Vector3<f64> {
        match self {
            Axis::X => Vector3::x(),
            Axis::Y => Vector3::y(),
            Axis::Z => Vector3::z(),
        }
    }
}

/// Skew-symmetric cross-product matrix of `v`.
pub fn cross_matrix(v: &Vector3<f64>) -> Matrix3<f64> {
    #[rustfmt::skip]
    let m = Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    );
    m
}

/// Rodrigues' rotation formula: rotate by `angle` about the unit `axis`.
pub fn rodrigues(axis: &Unit<Vector3<f64>>, angle: f64) -> Matrix3<f64> {
    let k = cross_matrix(axis);
    Matrix3::identity() + k * angle.sin() + (k * k) * (1.0 - angle.cos())
}

/// Unit normal of the best-fit plane through `points`, by SVD of the
/// centered coordinates.
pub fn fit_plane_normal(points: &[Point3<f64>]) -> Result<Unit<Vector3<f64>>> {
    if points.len() < 3 {
        return Err(GeometryError::DegenerateGeometry(
            "plane fit needs at least 3 points",
        ));
    }
    let n = points.len() as f64;
    let centroid = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n;

    let mut centered = OMatrix::<f64, Dyn, U3>::zeros(points.len());
    for (i, p) in points.iter().enumerate() {
        centered.row_mut(i).copy_from(&(p.coords - centroid).transpose());
    }

    let svd = na::linalg::SVD::try_new(centered, false, true, 1e-12, 200)
        .ok_or(GeometryError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;
    let normal = Vector3::new(v_t[(2, 0)], v_t[(2, 1)], v_t[(2, 2)]);
    Ok(Unit::new_normalize(normal))
}

/// Rotation that carries `from` onto `to` (both unit vectors), handling the
/// 180-degree anti-parallel case through a perpendicular auxiliary axis.
pub fn rotation_between(from: &Unit<Vector3<f64>>, to: &Unit<Vector3<f64>>) -> Matrix3<f64> {
    let axis = from.cross(to);
    let axis_norm = axis.norm();
    let cos_angle = from.dot(to);

    if axis_norm < 1e-12 {
        if cos_angle > 0.0 {
            return Matrix3::identity();
        }
        // anti-parallel: rotate 180 degrees about any perpendicular axis
        let aux = if from.z.abs() < 1.0 - 1e-9 {
            Vector3::z()
        } else {
            Vector3::y()
        };
        let perp = Unit::new_normalize(from.cross(&aux));
        return rodrigues(&perp, std::f64::consts::PI);
    }

    let axis = Unit::new_normalize(axis);
    let angle = cos_angle.clamp(-1.0, 1.0).acos();
    rodrigues(&axis, angle)
}

/// Compute a new to-world matrix that aligns the plane through
/// `world_points` with the given axis: `new = R_align * current`.
///
/// The fitted normal is first made to point toward the target axis so the
/// rotation is the short way around.
pub fn align_plane_to_axis(
    world_points: &[Point3<f64>],
    to_world: &Matrix4<f64>,
    axis: Axis,
) -> Result<Matrix4<f64>> {
    let target = Unit::new_normalize(axis.unit());
    let mut normal = fit_plane_normal(world_points)?;
    if normal.dot(&target) < 0.0 {
        normal = -normal;
    }
    let rotation = rotation_between(&normal, &target);
    Ok(rotation.to_homogeneous() * to_world)
}

/// Translate the to-world matrix so `point` maps to the world origin.
///
/// Some supervisors send the origin point with y and z exchanged; `swap_yz`
/// reproduces that historical convention.
pub fn origin_translation(
    to_world: &Matrix4<f64>,
    point: &Point3<f64>,
    swap_yz: bool,
) -> Matrix4<f64> {
    let p = if swap_yz {
        Vector3::new(point.x, point.z, point.y)
    } else {
        point.coords
    };
    let mut transform = Matrix4::identity();
    transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&(-p));
    transform * to_world
}

/// Apply a 4x4 homogeneous transform to a 3D point.
pub fn transform_point(m: &Matrix4<f64>, p: &Point3<f64>) -> Point3<f64> {
    let h = m * p.to_homogeneous();
    Point3::new(h.x / h.w, h.y / h.w, h.z / h.w)
}

/// Scale factor from observed two-marker separations.
///
/// Entries without exactly two points are skipped; the factor is the real
/// separation divided by the mean observed separation.
pub fn scale_factor(observations: &[Vec<Point3<f64>>], real_distance: f64) -> Result<f64> {
    let distances: Vec<f64> = observations
        .iter()
        .filter(|obs| obs.len() == 2)
        .map(|obs| (obs[0] - obs[1]).norm())
        .collect();
    if distances.is_empty() {
        return Err(GeometryError::NotEnoughPoints);
    }
    let mean = distances.iter().sum::<f64>() / distances.len() as f64;
    if mean <= 0.0 {
        return Err(GeometryError::DegenerateGeometry("zero marker separation"));
    }
    Ok(real_distance / mean)
}

/// Apply a metric scale factor to every pose translation. Rotations are
/// untouched.
pub fn apply_scale(poses: &mut [CameraPose], factor: f64) {
    for pose in poses.iter_mut() {
        pose.translation *= factor;
    }
}
