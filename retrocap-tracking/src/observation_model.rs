// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use nalgebra::{
    dimension::{U3, U6},
    OMatrix, OVector, RealField,
};

/// Direct 3D position observation of the `[pos, vel]` state:
/// `H = [I3 | 0]` with fixed isotropic measurement noise.
#[derive(Debug)]
pub struct PositionObservationModel<R: RealField + Copy> {
    observation_matrix: OMatrix<R, U3, U6>,
    observation_matrix_transpose: OMatrix<R, U6, U3>,
    observation_noise_covariance: OMatrix<R, U3, U3>,
}

impl<R: RealField + Copy> PositionObservationModel<R> {
    pub fn new(observation_noise: R) -> Self {
        let mut observation_matrix = OMatrix::<R, U3, U6>::zeros();
        observation_matrix
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&OMatrix::<R, U3, U3>::identity());
        let observation_matrix_transpose = observation_matrix.transpose();
        let observation_noise_covariance =
            OMatrix::<R, U3, U3>::identity() * observation_noise;
        Self {
            observation_matrix,
            observation_matrix_transpose,
            observation_noise_covariance,
        }
    }
}

impl<R: RealField + Copy> adskalman::ObservationModel<R, U6, U3>
    for PositionObservationModel<R>
{
    fn H(&self) -> &OMatrix<R, U3, U6> {
        &self.observation_matrix
    }
    fn HT(&self) -> &OMatrix<R, U6, U3> {
        &self.observation_matrix_transpose
    }
    fn R(&self) -> &OMatrix<R, U3, U3> {
        &self.observation_noise_covariance
    }
    fn predict_observation(&self, state: &OVector<R, U6>) -> OVector<R, U3> {
        self.observation_matrix * state
    }
}
