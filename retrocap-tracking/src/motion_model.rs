// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use nalgebra as na;
use na::dimension::{U3, U6};
use na::{OMatrix, RealField};

use adskalman::TransitionModelLinearNoControl;

/// Constant-velocity 3D motion model parameterized by the process noise
/// scale. Calling [`ConstantVelocityModel::calc_for_dt`] yields the model
/// for a specific `dt`.
///
/// The state vector is `[x y z xvel yvel zvel]`.
#[derive(Debug, Clone)]
pub struct ConstantVelocityModel<R: RealField + Copy> {
    motion_noise_scale: R,
}

impl<R: RealField + Copy> ConstantVelocityModel<R> {
    pub fn new(motion_noise_scale: R) -> Self {
        Self { motion_noise_scale }
    }

    pub fn calc_for_dt(&self, dt: R) -> MotionModelFixedDt<R> {
        let eye3 = OMatrix::<R, U3, U3>::identity();

        // position integrates velocity over the frame interval; velocity
        // carries over unchanged
        let mut transition_model = OMatrix::<R, U6, U6>::identity();
        transition_model
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(eye3 * dt));

        // process noise of a white-noise acceleration, integrated once for
        // velocity and twice for position, with the usual cross coupling
        let half: R = na::convert(0.5);
        let third: R = na::convert(1.0 / 3.0);
        let q_pos = eye3 * (dt * dt * dt * third);
        let q_coupling = eye3 * (dt * dt * half);
        let q_vel = eye3 * dt;

        let mut q = OMatrix::<R, U6, U6>::zeros();
        q.fixed_view_mut::<3, 3>(0, 0).copy_from(&q_pos);
        q.fixed_view_mut::<3, 3>(0, 3).copy_from(&q_coupling);
        q.fixed_view_mut::<3, 3>(3, 0).copy_from(&q_coupling);
        q.fixed_view_mut::<3, 3>(3, 3).copy_from(&q_vel);

        MotionModelFixedDt {
            transition_model_transpose: transition_model.transpose(),
            transition_model,
            transition_noise_covariance: q * self.motion_noise_scale,
        }
    }
}

/// Constant-velocity motion model for a fixed `dt`.
#[derive(Debug)]
pub struct MotionModelFixedDt<R: RealField + Copy> {
    pub transition_model: OMatrix<R, U6, U6>,
    pub transition_model_transpose: OMatrix<R, U6, U6>,
    pub transition_noise_covariance: OMatrix<R, U6, U6>,
}

impl<R: RealField + Copy> TransitionModelLinearNoControl<R, U6> for MotionModelFixedDt<R> {
    fn F(&self) -> &OMatrix<R, U6, U6> {
        &self.transition_model
    }
    fn FT(&self) -> &OMatrix<R, U6, U6> {
        &self.transition_model_transpose
    }
    fn Q(&self) -> &OMatrix<R, U6, U6> {
        &self.transition_noise_covariance
    }
}
