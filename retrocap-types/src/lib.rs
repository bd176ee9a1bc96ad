//! Shared data model for the retrocap motion-capture pipeline.
//!
//! These types cross the boundary between the pipeline core and its I/O
//! collaborators (device layer, supervisor transport), so everything here is
//! serde-serializable with an explicit, documented JSON shape.

use nalgebra::{Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

mod frame;
mod messages;
mod modes;
pub mod serde_rows;

pub use frame::VideoFrame;
pub use messages::{ControlMsg, Event, ObjectPointsPayload};
pub use modes::{Mode, ModeError};

pub type MyFloat = f64;

/// A detected 2D blob centroid in pixel coordinates, or a missing slot.
///
/// Per-camera point lists use an in-band missing sentinel so that group
/// vectors stay rank-preserving across cameras. JSON: `[x, y]` or `null`.
pub type ImagePoint = Option<Point2<f64>>;

/// Rigid transform from the world frame to a camera frame.
///
/// Camera 0 is canonical with identity rotation and zero translation. The
/// JSON shape is `{"R": [[..];3], "t": [..;3]}` with `R` in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    #[serde(rename = "R", with = "serde_rows::matrix3")]
    pub rotation: Matrix3<f64>,
    #[serde(rename = "t")]
    pub translation: Vector3<f64>,
}

impl CameraPose {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }
}

/// A rigid body located from a pair of markers on one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub pos: Point3<f64>,
    /// Heading angle in radians, folded into `[-pi/2, pi/2]`.
    pub heading: f64,
    /// Mean squared reprojection error of the two contributing markers.
    pub error: f64,
    #[serde(rename = "droneIndex")]
    pub drone_index: u8,
}

/// A Kalman-smoothed object estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredObject {
    pub pos: Point3<f64>,
    pub vel: Vector3<f64>,
    /// Heading in radians, rounded to 4 decimal places.
    pub heading: f64,
    #[serde(rename = "droneIndex")]
    pub drone_index: u8,
}

/// Acquisition settings forwarded verbatim to the device layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub exposure: i32,
    pub gain: i32,
    pub sharpness: i32,
    pub contrast: i32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            exposure: 50,
            gain: 1,
            sharpness: 0,
            contrast: 0,
        }
    }
}
