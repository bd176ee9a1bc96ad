// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use nalgebra as na;
use na::dimension::{U1, U2, U3, U4};
use na::{Matrix3, OMatrix, Point2, Point3, RealField, UnitQuaternion, Vector3, Vector5};

use cam_geom::ExtrinsicParameters;
use opencv_ros_camera::{Distortion, RosOpenCvIntrinsics};

use retrocap_types::{CameraPose, ImagePoint};

use crate::{reproj, triangulate, GeometryError, Result};

/// Build the 3x4 projection matrix `K * [R | t]`.
pub fn projection_from_krt<R: RealField + Copy>(
    k: &Matrix3<R>,
    rotation: &Matrix3<R>,
    translation: &Vector3<R>,
) -> OMatrix<R, U3, U4> {
    let mut rt = OMatrix::<R, U3, U4>::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    rt.set_column(3, translation);
    k * rt
}

/// Construct extrinsic parameters from a world-to-camera rotation and
/// translation. The camera center is `-R^T * t`.
fn extrinsics_from_rt<R: RealField + Copy>(
    rquat: UnitQuaternion<R>,
    translation: &Vector3<R>,
) -> ExtrinsicParameters<R> {
    let camcenter = Point3::from(-(rquat.inverse() * translation));
    ExtrinsicParameters::from_rotation_and_camcenter(rquat, camcenter)
}

/// A calibrated pinhole camera: intrinsics with Brown-Conrady distortion,
/// extrinsics, and the cached linear projection matrix.
///
/// The cache is rebuilt by every constructor, so `P = K * [R | t]` holds at
/// all times.
#[derive(Debug, Clone)]
pub struct Camera<R: RealField + Copy> {
    intrinsics: RosOpenCvIntrinsics<R>,
    extrinsics: ExtrinsicParameters<R>,
    m: OMatrix<R, U3, U4>,
}

impl<R: RealField + Copy> Camera<R> {
    pub fn new(intrinsics: RosOpenCvIntrinsics<R>, extrinsics: ExtrinsicParameters<R>) -> Self {
        let m = {
            let k = intrinsics.p.fixed_view::<3, 3>(0, 0);
            k * extrinsics.matrix()
        };
        Self {
            intrinsics,
            extrinsics,
            m,
        }
    }

    #[inline]
    pub fn intrinsics(&self) -> &RosOpenCvIntrinsics<R> {
        &self.intrinsics
    }

    #[inline]
    pub fn extrinsics(&self) -> &ExtrinsicParameters<R> {
        &self.extrinsics
    }

    /// The cached 3x4 projection matrix `K * [R | t]`.
    #[inline]
    pub fn pmat(&self) -> &OMatrix<R, U3, U4> {
        &self.m
    }

    /// World-to-camera rotation matrix.
    pub fn rotation(&self) -> Matrix3<R> {
        *self.extrinsics.pose().rotation.to_rotation_matrix().matrix()
    }

    /// World-to-camera translation vector.
    pub fn translation(&self) -> Vector3<R> {
        self.extrinsics.pose().translation.vector
    }

    /// The 3x3 camera matrix K.
    pub fn k(&self) -> Matrix3<R> {
        self.intrinsics.p.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Project a world point through the linear pinhole model (inputs to the
    /// pipeline are undistorted, so distortion is not applied here).
    pub fn project(&self, pt: &Point3<R>) -> Point2<R> {
        let cc = self.m * pt.to_homogeneous();
        Point2::new(cc[0] / cc[2], cc[1] / cc[2])
    }

    /// Undistort a raw pixel coordinate into the linear camera frame.
    pub fn undistort(&self, pt: &Point2<R>) -> Point2<R> {
        let distorted = cam_geom::Pixels::new(OMatrix::<R, U1, U2>::new(pt.x, pt.y));
        let undistorted = self.intrinsics.undistort(&distorted);
        Point2::new(undistorted.data[(0, 0)], undistorted.data[(0, 1)])
    }
}

impl Camera<f64> {
    /// Build a camera from a raw camera matrix, distortion vector and pose.
    ///
    /// The bottom row of K must be `[0, 0, 1]` and the pose rotation must be
    /// a proper rotation.
    pub fn from_calibration(
        k: &Matrix3<f64>,
        distortion: &[f64; 5],
        pose: &CameraPose,
    ) -> Result<Self> {
        if (k[(2, 0)], k[(2, 1)], k[(2, 2)]) != (0.0, 0.0, 1.0) {
            return Err(GeometryError::BadMatrixSize);
        }
        let dist = Distortion::from_opencv_vec(Vector5::from_column_slice(distortion));
        let intrinsics = RosOpenCvIntrinsics::from_params_with_distortion(
            k[(0, 0)],
            k[(0, 1)],
            k[(1, 1)],
            k[(0, 2)],
            k[(1, 2)],
            dist,
        );
        let rquat = crate::rotation_from_matrix(&pose.rotation)?;
        let extrinsics = extrinsics_from_rt(rquat, &pose.translation);
        Ok(Self::new(intrinsics, extrinsics))
    }

    /// Replace the pose, rebuilding the projection cache.
    pub fn set_pose(&mut self, pose: &CameraPose) -> Result<()> {
        let rquat = crate::rotation_from_matrix(&pose.rotation)?;
        *self = Self::new(self.intrinsics.clone(), extrinsics_from_rt(rquat, &pose.translation));
        Ok(())
    }

    pub fn pose(&self) -> CameraPose {
        CameraPose {
            rotation: self.rotation(),
            translation: self.translation(),
        }
    }

    pub fn distortion_coefs(&self) -> [f64; 5] {
        let d = &self.intrinsics.distortion;
        [
            d.radial1(),
            d.radial2(),
            d.tangential1(),
            d.tangential2(),
            d.radial3(),
        ]
    }
}

/// The full calibrated rig, ordered by camera index. Camera 0 is canonical
/// (identity pose) unless replaced by the supervisor.
#[derive(Debug, Clone)]
pub struct CameraSystem {
    cams: Vec<Camera<f64>>,
}

impl CameraSystem {
    pub fn new(cams: Vec<Camera<f64>>) -> Self {
        Self { cams }
    }

    /// Build a rig with identity poses from per-camera calibration data.
    pub fn from_calibration(
        intrinsic_matrices: &[Matrix3<f64>],
        distortion_coefs: &[[f64; 5]],
    ) -> Result<Self> {
        if intrinsic_matrices.len() != distortion_coefs.len() {
            return Err(GeometryError::WrongCameraCount {
                expected: intrinsic_matrices.len(),
                actual: distortion_coefs.len(),
            });
        }
        let cams = intrinsic_matrices
            .iter()
            .zip(distortion_coefs.iter())
            .map(|(k, d)| Camera::from_calibration(k, d, &CameraPose::identity()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { cams })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cams.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cams.is_empty()
    }

    #[inline]
    pub fn cams(&self) -> &[Camera<f64>] {
        &self.cams
    }

    #[inline]
    pub fn cam(&self, idx: usize) -> Option<&Camera<f64>> {
        self.cams.get(idx)
    }

    pub fn poses(&self) -> Vec<CameraPose> {
        self.cams.iter().map(|c| c.pose()).collect()
    }

    pub fn intrinsic_matrices(&self) -> Vec<Matrix3<f64>> {
        self.cams.iter().map(|c| c.k()).collect()
    }

    pub fn distortion_coefs(&self) -> Vec<[f64; 5]> {
        self.cams.iter().map(|c| c.distortion_coefs()).collect()
    }

    pub fn projection_matrices(&self) -> Vec<OMatrix<f64, U3, U4>> {
        self.cams.iter().map(|c| *c.pmat()).collect()
    }

    /// Replace every pose. The projection caches are rebuilt.
    pub fn set_poses(&mut self, poses: &[CameraPose]) -> Result<()> {
        if poses.len() != self.cams.len() {
            return Err(GeometryError::WrongCameraCount {
                expected: self.cams.len(),
                actual: poses.len(),
            });
        }
        // validate all poses before mutating anything
        let mut updated = self.cams.clone();
        for (cam, pose) in updated.iter_mut().zip(poses.iter()) {
            cam.set_pose(pose)?;
        }
        self.cams = updated;
        Ok(())
    }

    /// Replace every camera matrix, keeping distortion and poses.
    pub fn set_intrinsic_matrices(&mut self, ks: &[Matrix3<f64>]) -> Result<()> {
        if ks.len() != self.cams.len() {
            return Err(GeometryError::WrongCameraCount {
                expected: self.cams.len(),
                actual: ks.len(),
            });
        }
        let updated = self
            .cams
            .iter()
            .zip(ks.iter())
            .map(|(cam, k)| Camera::from_calibration(k, &cam.distortion_coefs(), &cam.pose()))
            .collect::<Result<Vec<_>>>()?;
        self.cams = updated;
        Ok(())
    }

    /// Replace every distortion vector, keeping camera matrices and poses.
    pub fn set_distortion_coefs(&mut self, coefs: &[[f64; 5]]) -> Result<()> {
        if coefs.len() != self.cams.len() {
            return Err(GeometryError::WrongCameraCount {
                expected: self.cams.len(),
                actual: coefs.len(),
            });
        }
        let updated = self
            .cams
            .iter()
            .zip(coefs.iter())
            .map(|(cam, d)| Camera::from_calibration(&cam.k(), d, &cam.pose()))
            .collect::<Result<Vec<_>>>()?;
        self.cams = updated;
        Ok(())
    }

    /// Triangulate one multi-view sample (missing entries skipped).
    pub fn triangulate(&self, sample: &[ImagePoint]) -> Option<Point3<f64>> {
        triangulate::triangulate_sample(&self.projection_matrices(), sample)
    }

    /// Mean squared reprojection error of one sample, in pixels^2.
    pub fn reprojection_error(&self, sample: &[ImagePoint], point: &Point3<f64>) -> Option<f64> {
        reproj::reprojection_error(&self.cams, sample, point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Rotation3;

    fn test_k() -> Matrix3<f64> {
        Matrix3::new(274.3, 0.0, 168.9, 0.0, 274.27, 107.7, 0.0, 0.0, 1.0)
    }

    #[test]
    fn projection_cache_matches_krt() {
        let pose = CameraPose {
            rotation: *Rotation3::from_euler_angles(0.2, -0.1, 0.05).matrix(),
            translation: Vector3::new(0.1, -0.2, 0.3),
        };
        let cam = Camera::from_calibration(&test_k(), &[0.0; 5], &pose).unwrap();
        let expected = projection_from_krt(&test_k(), &pose.rotation, &pose.translation);
        assert_abs_diff_eq!(*cam.pmat(), expected, epsilon = 1e-10);

        // cache is rebuilt on pose update
        let mut cam = cam;
        let pose2 = CameraPose {
            rotation: *Rotation3::from_euler_angles(-0.3, 0.2, 0.0).matrix(),
            translation: Vector3::new(1.0, 0.0, -1.0),
        };
        cam.set_pose(&pose2).unwrap();
        let expected2 = projection_from_krt(&test_k(), &pose2.rotation, &pose2.translation);
        assert_abs_diff_eq!(*cam.pmat(), expected2, epsilon = 1e-10);
    }

    #[test]
    fn pose_roundtrip() {
        let pose = CameraPose {
            rotation: *Rotation3::from_euler_angles(0.4, 0.1, -0.6).matrix(),
            translation: Vector3::new(-0.5, 0.25, 1.5),
        };
        let cam = Camera::from_calibration(&test_k(), &[0.0; 5], &pose).unwrap();
        let back = cam.pose();
        assert_abs_diff_eq!(back.rotation, pose.rotation, epsilon = 1e-10);
        assert_abs_diff_eq!(back.translation, pose.translation, epsilon = 1e-10);
    }

    #[test]
    fn undistort_is_identity_without_distortion() {
        let cam =
            Camera::from_calibration(&test_k(), &[0.0; 5], &CameraPose::identity()).unwrap();
        let pt = Point2::new(123.4, 56.7);
        let und = cam.undistort(&pt);
        assert_abs_diff_eq!(und, pt, epsilon = 1e-8);
    }

    #[test]
    fn reflection_pose_is_rejected() {
        let mut bad = Matrix3::identity();
        bad[(0, 0)] = -1.0;
        let pose = CameraPose {
            rotation: bad,
            translation: Vector3::zeros(),
        };
        assert!(Camera::from_calibration(&test_k(), &[0.0; 5], &pose).is_err());
    }
}
