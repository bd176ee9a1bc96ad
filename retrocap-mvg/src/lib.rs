// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Multi-view geometry for the retrocap pipeline: camera models, epipolar
//! geometry, DLT triangulation, reprojection errors, incremental pose
//! bootstrap and world-frame alignment.

#![deny(rust_2018_idioms)]

use nalgebra::{Matrix3, Rotation3, UnitQuaternion};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("bad matrix size")]
    BadMatrixSize,
    #[error("not enough points")]
    NotEnoughPoints,
    #[error("invalid rotation matrix")]
    InvalidRotationMatrix,
    #[error("SVD failed")]
    SvdFailed,
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),
    #[error("expected {expected} cameras, got {actual}")]
    WrongCameraCount { expected: usize, actual: usize },
}

pub type Result<M> = std::result::Result<M, GeometryError>;

mod camera;
pub use crate::camera::{projection_from_krt, Camera, CameraSystem};

pub mod epipolar;
pub mod reproj;
pub mod sfm;
pub mod triangulate;
pub mod world;

/// Calculate the angle of a quaternion without the `.acos()` inaccuracy near
/// identity.
fn quat_angle(quat: &UnitQuaternion<f64>) -> f64 {
    let w = quat.quaternion().scalar().abs();
    if w >= 1.0 {
        0.0
    } else {
        w.acos() * 2.0
    }
}

/// Convert a 3x3 matrix into a valid right-handed rotation.
///
/// The matrix is converted to a unit quaternion and back; if the round trip
/// does not reproduce the input, the matrix was not a proper rotation.
pub fn rotation_from_matrix(orig: &Matrix3<f64>) -> Result<UnitQuaternion<f64>> {
    let rotmat = Rotation3::from_matrix_unchecked(*orig);
    let rquat = UnitQuaternion::from_rotation_matrix(&rotmat);
    let rotmat2 = rquat.to_rotation_matrix();
    let rquat2 = UnitQuaternion::from_rotation_matrix(&rotmat2);
    let delta = rquat.rotation_to(&rquat2);
    if quat_angle(&delta).abs() > 1.0e-7 {
        return Err(GeometryError::InvalidRotationMatrix);
    }
    Ok(rquat)
}
