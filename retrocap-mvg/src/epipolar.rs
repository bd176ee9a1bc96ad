// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Two-view epipolar geometry: fundamental and essential matrices, motion
//! candidates, epipolar lines.

use nalgebra as na;
use na::dimension::{U3, U4};
use na::{Matrix3, Matrix4, OMatrix, Point2, RealField, RowVector4, Vector3};

use crate::{GeometryError, Result};

/// Fundamental matrix from two projection matrices.
///
/// Cofactor construction: `F[i][j]` is the determinant of the 4x4 matrix
/// stacking the two rows of `P1` other than `j` above the two rows of `P2`
/// other than `i`, with the rows taken in cyclic order.
pub fn fundamental_from_projections<R: RealField + Copy>(
    p1: &OMatrix<R, U3, U4>,
    p2: &OMatrix<R, U3, U4>,
) -> Matrix3<R> {
    let rows = |p: &OMatrix<R, U3, U4>, skip: usize| -> (RowVector4<R>, RowVector4<R>) {
        match skip {
            0 => (p.row(1).into_owned(), p.row(2).into_owned()),
            1 => (p.row(2).into_owned(), p.row(0).into_owned()),
            _ => (p.row(0).into_owned(), p.row(1).into_owned()),
        }
    };

    let mut f = Matrix3::zeros();
    for i in 0..3 {
        let (y0, y1) = rows(p2, i);
        for j in 0..3 {
            let (x0, x1) = rows(p1, j);
            let stacked = Matrix4::from_rows(&[x0, x1, y0, y1]);
            f[(i, j)] = stacked.determinant();
        }
    }
    f
}

/// Essential matrix from the fundamental matrix and the two camera matrices:
/// `E = K2^T * F * K1`.
pub fn essential_from_fundamental<R: RealField + Copy>(
    f: &Matrix3<R>,
    k1: &Matrix3<R>,
    k2: &Matrix3<R>,
) -> Matrix3<R> {
    k2.transpose() * f * k1
}

/// The four motion candidates `{(R1, t), (R1, -t), (R2, t), (R2, -t)}`
/// recovered from an essential matrix.
pub fn motion_from_essential<R: RealField + Copy>(
    e: &Matrix3<R>,
) -> Result<[(Matrix3<R>, Vector3<R>); 4]> {
    let svd = na::linalg::SVD::try_new(*e, true, true, na::convert(1e-12), 100)
        .ok_or(GeometryError::SvdFailed)?;
    let mut u = svd.u.ok_or(GeometryError::SvdFailed)?;
    let mut v_t = svd.v_t.ok_or(GeometryError::SvdFailed)?;

    let zero: R = na::convert(0.0);
    if u.determinant() < zero {
        u = -u;
    }
    if v_t.determinant() < zero {
        v_t = -v_t;
    }

    let one: R = na::convert(1.0);
    #[rustfmt::skip]
    let w = Matrix3::new(
        zero, -one, zero,
        one, zero, zero,
        zero, zero, one,
    );

    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t = u.column(2).into_owned();

    Ok([(r1, t), (r1, -t), (r2, t), (r2, -t)])
}

/// Epipolar line of `pt` (from the first view) in the second view,
/// normalized so that `a^2 + b^2 = 1`.
pub fn epipolar_line<R: RealField + Copy>(f: &Matrix3<R>, pt: &Point2<R>) -> Vector3<R> {
    let l = f * pt.to_homogeneous();
    let norm = (l.x * l.x + l.y * l.y).sqrt();
    if norm > na::convert(0.0) {
        l / norm
    } else {
        l
    }
}

/// Perpendicular distance from a point to a line `(a, b, c)`.
pub fn line_to_point_distance<R: RealField + Copy>(line: &Vector3<R>, pt: &Point2<R>) -> R {
    let num = (line.x * pt.x + line.y * pt.y + line.z).abs();
    num / (line.x * line.x + line.y * line.y).sqrt()
}
