use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};

use crate::{
    serde_rows, CameraPose, CameraSettings, FilteredObject, ImagePoint, Mode, TrackedObject,
};

/// Control messages from the supervisor to the pipeline core.
///
/// Wire format is `{"type": "<name>", "payload": {...}}` with kebab-case
/// names and camelCase payload keys, matching the original front end. The
/// two recording messages keep their historical snake_case names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ControlMsg {
    UpdateCameraSettings(CameraSettings),
    #[serde(rename_all = "camelCase")]
    UpdatePointCaptureSettings { contour_threshold: f64 },
    #[serde(rename_all = "camelCase")]
    CalculateCameraPose {
        /// One entry per sample; each sample is one image point (or missing)
        /// per camera.
        camera_points: Vec<Vec<ImagePoint>>,
    },
    #[serde(rename_all = "camelCase")]
    CalculateBundleAdjustment { camera_points: Vec<Vec<ImagePoint>> },
    #[serde(rename_all = "camelCase")]
    SetCameraPoses { camera_poses: Vec<CameraPose> },
    #[serde(rename_all = "camelCase")]
    SetIntrinsicMatrices { intrinsic_matrices: Vec<[[f64; 3]; 3]> },
    #[serde(rename_all = "camelCase")]
    SetDistortionCoefs { distortion_coefs: Vec<[f64; 5]> },
    #[serde(rename_all = "camelCase")]
    SetToWorldMatrix {
        #[serde(with = "serde_rows::matrix4")]
        to_world_coords_matrix: Matrix4<f64>,
    },
    #[serde(rename_all = "camelCase")]
    AcquireFloor { object_points: Vec<Vec<[f64; 3]>> },
    #[serde(rename_all = "camelCase")]
    SetOrigin { object_point: [f64; 3] },
    #[serde(rename_all = "camelCase")]
    DetermineScale {
        /// Lists of simultaneously observed marker positions; only entries
        /// with exactly two points contribute to the scale estimate.
        object_points: Vec<Vec<[f64; 3]>>,
    },
    ChangeMocapMode(i32),
    #[serde(rename = "start_recording", rename_all = "camelCase")]
    StartRecording { name: String, record_video: bool },
    #[serde(rename = "stop_recording")]
    StopRecording,
    Shutdown,
}

/// Per-frame payload of the `object-points` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ObjectPointsPayload {
    pub object_points: Vec<[f64; 3]>,
    pub time_ms: f64,
    pub image_points: Vec<Vec<ImagePoint>>,
    pub errors: Vec<f64>,
    pub objects: Vec<TrackedObject>,
    pub filtered_objects: Vec<FilteredObject>,
}

/// Events emitted by the pipeline core toward the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum Event {
    /// First detected point of each camera, for calibration sample capture.
    ImagePoints(Vec<ImagePoint>),
    ObjectPoints(ObjectPointsPayload),
    CameraPose {
        camera_poses: Vec<CameraPose>,
        intrinsic_matrices: Vec<[[f64; 3]; 3]>,
        distortion_coefs: Vec<[f64; 5]>,
        /// Per object point, the reprojection into every camera.
        reprojected: Vec<Vec<[f64; 2]>>,
        /// Mean squared reprojection error in pixels^2.
        error: f64,
    },
    ToWorldCoordsMatrix {
        #[serde(with = "serde_rows::matrix4")]
        to_world_coords_matrix: Matrix4<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_points: Option<Vec<[f64; 3]>>,
    },
    ModeChange(Mode),
    ModeChangeFailure { message: String },
    Fps { fps: u32 },
    Scaled {
        scale_factor: f64,
        camera_poses: Vec<CameraPose>,
    },
    NumCams(usize),
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_msg_wire_names() {
        let msg: ControlMsg = serde_json::from_str(
            "{\"type\":\"change-mocap-mode\",\"payload\":5}",
        )
        .unwrap();
        assert_eq!(msg, ControlMsg::ChangeMocapMode(5));

        let msg: ControlMsg = serde_json::from_str(
            "{\"type\":\"update-point-capture-settings\",\"payload\":{\"contourThreshold\":0.3}}",
        )
        .unwrap();
        assert_eq!(
            msg,
            ControlMsg::UpdatePointCaptureSettings {
                contour_threshold: 0.3
            }
        );

        let msg: ControlMsg = serde_json::from_str(
            "{\"type\":\"start_recording\",\"payload\":{\"name\":\"run1\",\"recordVideo\":false}}",
        )
        .unwrap();
        assert_eq!(
            msg,
            ControlMsg::StartRecording {
                name: "run1".to_string(),
                record_video: false
            }
        );
    }

    #[test]
    fn camera_points_with_missing_entries() {
        let msg: ControlMsg = serde_json::from_str(
            "{\"type\":\"calculate-camera-pose\",\"payload\":{\"cameraPoints\":[[[1.0,2.0],null]]}}",
        )
        .unwrap();
        match msg {
            ControlMsg::CalculateCameraPose { camera_points } => {
                assert_eq!(camera_points.len(), 1);
                assert!(camera_points[0][0].is_some());
                assert!(camera_points[0][1].is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn event_mode_change_is_integer() {
        let buf = serde_json::to_string(&Event::ModeChange(Mode::Triangulation)).unwrap();
        assert_eq!(buf, "{\"type\":\"mode-change\",\"payload\":5}");
    }
}
