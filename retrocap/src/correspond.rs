//! Epipolar correspondence across the camera set.
//!
//! Every blob of the reference camera (index 0) seeds a set of candidate
//! groups. Walking the remaining cameras in index order, each group is
//! extended with the blobs lying close to the reference blob's epipolar
//! line, forking the group when the match is ambiguous. The group with the
//! lowest mean reprojection error after triangulation wins.
//!
//! Blobs may end up shared between different reference blobs' groups and
//! blobs invisible in the reference camera are lost; both are accepted
//! limitations of the root-camera formulation.

use itertools::Itertools;
use nalgebra::Point3;
use tracing::trace;

use retrocap_mvg::{epipolar, CameraSystem};
use retrocap_types::ImagePoint;

/// Per-frame correspondence result: world-frameless (reconstruction-frame)
/// 3D points with their reprojection errors.
#[derive(Debug, Default)]
pub struct Correspondences {
    pub object_points: Vec<Point3<f64>>,
    pub errors: Vec<f64>,
}

/// Match blobs across views through epipolar consistency and triangulate
/// each resolved group.
pub fn find_correspondences(
    image_points: &[Vec<ImagePoint>],
    cams: &CameraSystem,
    epipolar_threshold: f64,
) -> Correspondences {
    debug_assert_eq!(image_points.len(), cams.len());

    // the missing sentinel of empty per-camera lists takes no part here
    let real_points: Vec<Vec<_>> = image_points
        .iter()
        .map(|pts| pts.iter().copied().flatten().collect::<Vec<_>>())
        .collect();

    let projections = cams.projection_matrices();
    let roots = &real_points[0];

    // candidate groups per reference blob, each a full-length sample vector
    let mut groups: Vec<Vec<Vec<ImagePoint>>> =
        roots.iter().map(|pt| vec![vec![Some(*pt)]]).collect();

    for cam_i in 1..cams.len() {
        let f = epipolar::fundamental_from_projections(&projections[0], &projections[cam_i]);
        let candidates = &real_points[cam_i];

        for (root, root_groups) in roots.iter().zip(groups.iter_mut()) {
            let line = epipolar::epipolar_line(&f, root);

            // matches sorted nearest-first for a deterministic tie-break
            let matches: Vec<_> = candidates
                .iter()
                .map(|pt| (epipolar::line_to_point_distance(&line, pt), *pt))
                .filter(|(dist, _)| *dist < epipolar_threshold)
                .sorted_by(|a, b| a.0.total_cmp(&b.0))
                .map(|(_, pt)| pt)
                .collect();

            if matches.is_empty() {
                for group in root_groups.iter_mut() {
                    group.push(None);
                }
            } else {
                let mut forked = Vec::with_capacity(root_groups.len() * matches.len());
                for candidate in &matches {
                    for group in root_groups.iter() {
                        let mut extended = group.clone();
                        extended.push(Some(*candidate));
                        forked.push(extended);
                    }
                }
                *root_groups = forked;
            }
        }
    }

    let mut result = Correspondences::default();
    for root_groups in &groups {
        let best = root_groups
            .iter()
            .filter_map(|group| {
                let point = cams.triangulate(group)?;
                let error = cams.reprojection_error(group, &point)?;
                Some((point, error))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((point, error)) = best {
            result.object_points.push(point);
            result.errors.push(error);
        }
    }

    trace!(
        roots = roots.len(),
        resolved = result.object_points.len(),
        "correspondence"
    );
    result
}
