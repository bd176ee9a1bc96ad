//! Blob extraction for retro-reflective markers.
//!
//! Bright markers are segmented by a global binary threshold, grouped into
//! 8-connected components, and reduced to their intensity centroids via
//! zeroth- and first-order image moments. The output order follows the
//! raster order of each component's first pixel, so repeated runs over the
//! same frame are deterministic.

use machine_vision_formats::{pixel_format::Mono8, pixel_format::RGB8, ImageStride};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tracing::trace;

use retrocap_types::{ImagePoint, VideoFrame};

mod moments;

use moments::ComponentMoments;

/// Configuration parameters for marker detection.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DetectionConfig {
    /// Binarization threshold as a fraction of full scale; a pixel is
    /// foreground when its value exceeds `contour_threshold * 255`.
    ///
    /// Valid range is 0.0 - 1.0.
    pub contour_threshold: f64,
    /// Components with fewer pixels than this are discarded as noise.
    pub min_blob_area: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            contour_threshold: 0.4,
            min_blob_area: 1,
        }
    }
}

/// Extract marker centroids from a grayscale frame.
///
/// When no component survives, the result contains a single missing
/// sentinel. This keeps downstream per-camera lists rank-preserving; callers
/// that want only real detections must filter the sentinel out.
pub fn detect_points<IM>(frame: &IM, config: &DetectionConfig) -> Vec<ImagePoint>
where
    IM: ImageStride<Mono8>,
{
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride();
    let data = frame.image_data();

    let cutoff = (config.contour_threshold.clamp(0.0, 1.0) * 255.0) as u8;

    // two-pass 8-connected component labeling over the binarized image
    let mut labels = vec![0u32; width * height];
    let mut parents: Vec<u32> = vec![0]; // label 0 is background
    let mut next_label = 1u32;

    for row in 0..height {
        let rowdata = &data[row * stride..row * stride + width];
        for col in 0..width {
            if rowdata[col] <= cutoff {
                continue;
            }
            let idx = row * width + col;

            // neighbors already visited in raster order
            let mut neighbor_label = 0u32;
            let mut merge = |label: u32, parents: &mut Vec<u32>| {
                if label == 0 {
                    return;
                }
                if neighbor_label == 0 {
                    neighbor_label = label;
                } else if label != neighbor_label {
                    union(parents, neighbor_label, label);
                }
            };
            if col > 0 {
                merge(labels[idx - 1], &mut parents);
            }
            if row > 0 {
                let above = idx - width;
                merge(labels[above], &mut parents);
                if col > 0 {
                    merge(labels[above - 1], &mut parents);
                }
                if col + 1 < width {
                    merge(labels[above + 1], &mut parents);
                }
            }

            labels[idx] = if neighbor_label != 0 {
                neighbor_label
            } else {
                parents.push(next_label);
                let label = next_label;
                next_label += 1;
                label
            };
        }
    }

    // second pass: accumulate moments per resolved component
    let mut components: Vec<ComponentMoments> = Vec::new();
    let mut component_of_root: std::collections::BTreeMap<u32, usize> =
        std::collections::BTreeMap::new();
    for row in 0..height {
        let rowdata = &data[row * stride..row * stride + width];
        for col in 0..width {
            let label = labels[row * width + col];
            if label == 0 {
                continue;
            }
            let root = find(&mut parents, label);
            let slot = *component_of_root.entry(root).or_insert_with(|| {
                components.push(ComponentMoments::default());
                components.len() - 1
            });
            components[slot].accumulate(col as f64, row as f64, rowdata[col]);
        }
    }

    let mut points: Vec<ImagePoint> = components
        .iter()
        .filter(|c| c.area() >= config.min_blob_area)
        .filter_map(|c| c.centroid())
        .map(|(x, y)| Some(Point2::new(x, y)))
        .collect();

    trace!(count = points.len(), "detected markers");

    if points.is_empty() {
        points.push(None);
    }
    points
}

fn find(parents: &mut [u32], label: u32) -> u32 {
    let mut root = label;
    while parents[root as usize] != root {
        root = parents[root as usize];
    }
    // path compression
    let mut cur = label;
    while parents[cur as usize] != root {
        let next = parents[cur as usize];
        parents[cur as usize] = root;
        cur = next;
    }
    root
}

fn union(parents: &mut [u32], a: u32, b: u32) {
    let ra = find(parents, a);
    let rb = find(parents, b);
    if ra != rb {
        let (hi, lo) = if ra > rb { (ra, rb) } else { (rb, ra) };
        parents[hi as usize] = lo;
    }
}

/// Convert an RGB8 frame to Mono8 with Rec.601 luma weights.
pub fn rgb8_to_mono8<IM>(frame: &IM) -> VideoFrame<Mono8>
where
    IM: ImageStride<RGB8>,
{
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let stride = frame.stride();
    let src = frame.image_data();

    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        let rowdata = &src[row * stride..row * stride + width * 3];
        for px in rowdata.chunks_exact(3) {
            let luma = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
            data.push(luma.round().clamp(0.0, 255.0) as u8);
        }
    }
    VideoFrame::new(width as u32, height as u32, width as u32, data)
        .expect("buffer sized from dimensions")
}
