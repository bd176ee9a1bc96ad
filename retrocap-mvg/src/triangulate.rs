// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! N-view linear triangulation (direct linear transform).

use nalgebra as na;
use na::dimension::{Dyn, U3, U4};
use na::{OMatrix, Point2, Point3, RealField};

use retrocap_types::ImagePoint;

/// Triangulate a single 3D point from two or more views.
///
/// Each view contributes the rows `y*P[2] - P[1]` and `P[0] - x*P[2]` to the
/// design matrix A; the solution is the smallest right-singular vector of
/// `B = A^T * A`, dehomogenized. Returns `None` with fewer than two views or
/// when the solution is at infinity.
pub fn triangulate_dlt<R: RealField + Copy>(
    views: &[(OMatrix<R, U3, U4>, Point2<R>)],
) -> Option<Point3<R>> {
    if views.len() < 2 {
        return None;
    }

    let mut a = OMatrix::<R, Dyn, U4>::zeros(views.len() * 2);
    for (i, (p, pt)) in views.iter().enumerate() {
        let row0 = p.row(2) * pt.y - p.row(1);
        let row1 = p.row(0) - p.row(2) * pt.x;
        a.row_mut(i * 2).copy_from(&row0);
        a.row_mut(i * 2 + 1).copy_from(&row1);
    }

    let b = a.transpose() * &a;
    let svd = na::linalg::SVD::try_new(b, false, true, na::convert(1e-12), 100)?;
    let v_t = svd.v_t?;
    let h = v_t.row(3);

    let w = h[3];
    if w.abs() <= na::convert(1e-12) {
        return None;
    }
    Some(Point3::new(h[0] / w, h[1] / w, h[2] / w))
}

/// Triangulate one multi-view sample with in-band missing entries.
///
/// Missing observations and their projection matrices are partitioned out
/// before assembly.
pub fn triangulate_sample(
    projections: &[OMatrix<f64, U3, U4>],
    sample: &[ImagePoint],
) -> Option<Point3<f64>> {
    let views: Vec<_> = projections
        .iter()
        .zip(sample.iter())
        .filter_map(|(p, pt)| pt.map(|pt| (*p, pt)))
        .collect();
    triangulate_dlt(&views)
}

/// Triangulate a batch of samples; unresolvable samples yield `None`.
pub fn triangulate_samples(
    projections: &[OMatrix<f64, U3, U4>],
    samples: &[Vec<ImagePoint>],
) -> Vec<Option<Point3<f64>>> {
    samples
        .iter()
        .map(|sample| triangulate_sample(projections, sample))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection_from_krt;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix3, Rotation3, Vector3};

    #[test]
    fn two_view_dlt_is_exact() {
        let k = Matrix3::new(320.0, 0.0, 160.0, 0.0, 320.0, 160.0, 0.0, 0.0, 1.0);
        let r = *Rotation3::from_euler_angles(0.0, -0.2, 0.05).matrix();
        let t = Vector3::new(-1.0, 0.1, 0.3);

        let p1 = projection_from_krt(&k, &Matrix3::identity(), &Vector3::zeros());
        let p2 = projection_from_krt(&k, &r, &t);

        let x = Point3::new(1.0, 2.0, 10.0);
        let project = |p: &OMatrix<f64, U3, U4>| {
            let h = p * x.to_homogeneous();
            Point2::new(h.x / h.z, h.y / h.z)
        };

        let recovered = triangulate_dlt(&[(p1, project(&p1)), (p2, project(&p2))]).unwrap();
        assert_abs_diff_eq!(recovered, x, epsilon = 1e-8);
    }

    #[test]
    fn missing_views_are_skipped() {
        let k = Matrix3::new(320.0, 0.0, 160.0, 0.0, 320.0, 160.0, 0.0, 0.0, 1.0);
        let r = *Rotation3::from_euler_angles(0.1, 0.3, 0.0).matrix();
        let t = Vector3::new(0.5, 0.0, 0.2);
        let p1 = projection_from_krt(&k, &Matrix3::identity(), &Vector3::zeros());
        let p2 = projection_from_krt(&k, &r, &t);
        let p3 = projection_from_krt(&k, &r, &Vector3::new(-0.5, 0.1, 0.0));

        let x = Point3::new(0.2, -0.1, 5.0);
        let project = |p: &OMatrix<f64, U3, U4>| {
            let h = p * x.to_homogeneous();
            Point2::new(h.x / h.z, h.y / h.z)
        };

        let sample = vec![Some(project(&p1)), None, Some(project(&p3))];
        let recovered = triangulate_sample(&[p1, p2, p3], &sample).unwrap();
        assert_abs_diff_eq!(recovered, x, epsilon = 1e-6);

        // fewer than two usable views: undefined
        let sample = vec![Some(project(&p1)), None, None];
        assert!(triangulate_sample(&[p1, p2, p3], &sample).is_none());
    }
}
