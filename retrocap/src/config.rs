use serde::{Deserialize, Serialize};

use retrocap_feature_detector::DetectionConfig;
use retrocap_mvg::sfm::RansacParams;
use retrocap_tracking::TrackingParams;

use crate::locate::ObjectParams;

/// Top-level pipeline configuration, deserializable from the supervisor's
/// JSON config with per-section defaults.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CoreConfig {
    /// Target acquisition rate, used for the Kalman `dt` before the first
    /// two timestamps are known.
    pub fps: f64,
    /// Marker detection parameters.
    pub detection: DetectionConfig,
    /// Maximum perpendicular distance between a candidate blob and the
    /// epipolar line of a reference blob, in pixels.
    pub epipolar_threshold: f64,
    /// Rigid-body constants of the object locator.
    pub object: ObjectParams,
    /// Kalman tracker tuning.
    pub tracking: TrackingParams,
    /// RANSAC settings for fundamental-matrix estimation during pose
    /// calculation.
    pub ransac_inlier_threshold: f64,
    pub ransac_confidence: f64,
    /// Known separation of the two scale-reference markers, in meters.
    pub scale_reference_distance: f64,
    /// Reproduce the historical y/z swap of the `set-origin` input point.
    pub swap_origin_yz: bool,
    /// Reproduce the historical y/z swap of emitted world coordinates.
    pub swap_output_yz: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            fps: 125.0,
            detection: DetectionConfig::default(),
            epipolar_threshold: 5.0,
            object: ObjectParams::default(),
            tracking: TrackingParams::default(),
            ransac_inlier_threshold: 3.0,
            ransac_confidence: 0.99999,
            scale_reference_distance: 0.119,
            swap_origin_yz: false,
            swap_output_yz: false,
        }
    }
}

impl CoreConfig {
    pub(crate) fn ransac_params(&self) -> RansacParams {
        RansacParams {
            inlier_threshold: self.ransac_inlier_threshold,
            confidence: self.ransac_confidence,
            ..RansacParams::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_json() {
        let config = CoreConfig::default();
        let buf = serde_json::to_string(&config).unwrap();
        let back: CoreConfig = serde_json::from_str(&buf).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: CoreConfig = serde_json::from_str("{\"fps\": 60.0}").unwrap();
        assert_eq!(config.fps, 60.0);
        assert_eq!(config.epipolar_threshold, 5.0);
        assert_eq!(config.scale_reference_distance, 0.119);
    }
}
