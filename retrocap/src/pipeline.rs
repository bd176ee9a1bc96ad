//! Per-frame pipeline state and control-message handling.

use machine_vision_formats::pixel_format::Mono8;
use nalgebra::{Matrix3, Matrix4, Point3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use retrocap_feature_detector::{detect_points, DetectionConfig};
use retrocap_mvg::world::{self, Axis};
use retrocap_mvg::{reproj, sfm, triangulate, CameraSystem};
use retrocap_tracking::ObjectTracker;
use retrocap_types::{ControlMsg, Event, ImagePoint, Mode, ObjectPointsPayload, VideoFrame};

use crate::config::CoreConfig;
use crate::correspond::find_correspondences;
use crate::locate::locate_objects;
use crate::write_data::CsvRecorder;
use crate::{Error, Result};

/// Everything one frame produced: events to forward, plus a request to let
/// the acquisition layer persist the raw frames (SaveImage mode).
#[derive(Debug, Default)]
pub struct FrameOutput {
    pub events: Vec<Event>,
    pub save_frames: bool,
}

/// The pipeline core. All state lives here and is mutated only between
/// frames: the driver drains the control queue, then runs the frame to
/// completion against the resulting snapshot.
pub struct MocapCore {
    cams: CameraSystem,
    to_world: Matrix4<f64>,
    mode: Mode,
    config: CoreConfig,
    detection: DetectionConfig,
    tracker: ObjectTracker,
    recorder: Option<CsvRecorder>,
    last_time_ms: Option<f64>,
    rng: StdRng,
}

impl MocapCore {
    pub fn new(
        intrinsic_matrices: Vec<Matrix3<f64>>,
        distortion_coefs: Vec<[f64; 5]>,
        config: CoreConfig,
    ) -> Result<Self> {
        let cams = CameraSystem::from_calibration(&intrinsic_matrices, &distortion_coefs)?;
        let detection = config.detection.clone();
        let tracker = ObjectTracker::new(config.tracking);
        Ok(Self {
            cams,
            to_world: Matrix4::identity(),
            mode: Mode::Initializing,
            config,
            detection,
            tracker,
            recorder: None,
            last_time_ms: None,
            rng: StdRng::from_entropy(),
        })
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn cams(&self) -> &CameraSystem {
        &self.cams
    }

    #[inline]
    pub fn to_world(&self) -> &Matrix4<f64> {
        &self.to_world
    }

    /// The acquisition layer reported a working camera set.
    pub fn device_ready(&mut self) -> Vec<Event> {
        self.mode = Mode::ImageProcessing;
        info!(cameras = self.cams.len(), "cameras initialized");
        vec![Event::ModeChange(self.mode)]
    }

    /// The acquisition layer failed; frames stop until it recovers.
    pub fn device_failed(&mut self, err: &Error) -> Vec<Event> {
        warn!("camera acquisition failed: {err}");
        self.mode = Mode::CamerasNotFound;
        vec![
            Event::Error {
                message: err.to_string(),
            },
            Event::ModeChange(self.mode),
        ]
    }

    /// Run the per-frame pipeline to completion. Failing stages contribute
    /// empty outputs; the frame loop itself never aborts.
    pub fn process_frame(&mut self, frames: &[VideoFrame<Mono8>], time_ms: f64) -> FrameOutput {
        let mut out = FrameOutput::default();

        if frames.len() != self.cams.len() {
            out.events.push(Event::Error {
                message: format!(
                    "expected {} frames, got {}",
                    self.cams.len(),
                    frames.len()
                ),
            });
            return out;
        }

        if self.mode == Mode::SaveImage {
            out.save_frames = true;
            // single-shot: fall back once the snapshot is requested
            self.mode = Mode::CamerasFound;
            out.events.push(Event::ModeChange(self.mode));
        }

        let mut detected: Vec<Vec<ImagePoint>> = Vec::new();
        if self.mode.enables(Mode::ImageProcessing) {
            detected = frames
                .iter()
                .map(|frame| detect_points(frame, &self.detection))
                .collect();
        }

        let mut undistorted: Vec<Vec<ImagePoint>> = Vec::new();
        if self.mode.enables(Mode::PointCapture) {
            undistorted = detected
                .iter()
                .zip(self.cams.cams())
                .map(|(points, cam)| {
                    points
                        .iter()
                        .map(|pt| pt.map(|pt| cam.undistort(&pt)))
                        .collect()
                })
                .collect();

            if self.mode == Mode::PointCapture {
                let firsts = undistorted
                    .iter()
                    .map(|points| points.first().copied().flatten())
                    .collect();
                out.events.push(Event::ImagePoints(firsts));
            }
        }

        if self.mode.enables(Mode::Triangulation) {
            let correspondences =
                find_correspondences(&undistorted, &self.cams, self.config.epipolar_threshold);
            let world_points: Vec<Point3<f64>> = correspondences
                .object_points
                .iter()
                .map(|pt| self.to_world_point(pt))
                .collect();

            if let Some(recorder) = &mut self.recorder {
                if let Err(e) = recorder.write_frame(time_ms, &world_points) {
                    warn!("recording failed: {e}");
                    out.events.push(Event::Error {
                        message: format!("recording failed: {e}"),
                    });
                    self.recorder = None;
                }
            }

            let mut payload = ObjectPointsPayload {
                object_points: world_points.iter().map(|p| [p.x, p.y, p.z]).collect(),
                time_ms,
                image_points: undistorted,
                errors: correspondences.errors.clone(),
                ..Default::default()
            };

            if self.mode.enables(Mode::ObjectDetection) {
                let objects =
                    locate_objects(&world_points, &correspondences.errors, &self.config.object);
                let dt = match self.last_time_ms {
                    Some(prev) if time_ms > prev => (time_ms - prev) / 1e3,
                    _ => 1.0 / self.config.fps,
                };
                let filtered = self.tracker.step(dt, &objects);
                payload.objects = objects;
                payload.filtered_objects = filtered;
            }

            out.events.push(Event::ObjectPoints(payload));
        }

        self.last_time_ms = Some(time_ms);
        out
    }

    /// Apply the camera-frame flip and the to-world transform to a
    /// triangulated point.
    fn to_world_point(&self, pt: &Point3<f64>) -> Point3<f64> {
        let flipped = Point3::new(-pt.x, -pt.y, pt.z);
        let world = world::transform_point(&self.to_world, &flipped);
        if self.config.swap_output_yz {
            Point3::new(world.x, world.z, world.y)
        } else {
            world
        }
    }

    /// Handle one control message, returning the events it produced.
    /// Errors are surfaced by the driver as `error` events and never mutate
    /// pipeline state.
    pub fn handle_control(&mut self, msg: ControlMsg) -> Result<Vec<Event>> {
        match msg {
            // applied by the driver, which owns the device handle
            ControlMsg::UpdateCameraSettings(_) => Ok(Vec::new()),

            ControlMsg::UpdatePointCaptureSettings { contour_threshold } => {
                if !(0.0..=1.0).contains(&contour_threshold) {
                    return Err(Error::InputShape(format!(
                        "contour threshold {contour_threshold} outside [0, 1]"
                    )));
                }
                self.detection.contour_threshold = contour_threshold;
                Ok(Vec::new())
            }

            ControlMsg::CalculateCameraPose { camera_points } => {
                self.solve_poses(&camera_points, true)
            }
            ControlMsg::CalculateBundleAdjustment { camera_points } => {
                self.solve_poses(&camera_points, false)
            }

            ControlMsg::SetCameraPoses { camera_poses } => {
                self.cams.set_poses(&camera_poses)?;
                Ok(Vec::new())
            }
            ControlMsg::SetIntrinsicMatrices { intrinsic_matrices } => {
                let ks: Vec<Matrix3<f64>> = intrinsic_matrices
                    .iter()
                    .map(|rows| Matrix3::from_fn(|r, c| rows[r][c]))
                    .collect();
                self.cams.set_intrinsic_matrices(&ks)?;
                Ok(Vec::new())
            }
            ControlMsg::SetDistortionCoefs { distortion_coefs } => {
                self.cams.set_distortion_coefs(&distortion_coefs)?;
                Ok(Vec::new())
            }
            ControlMsg::SetToWorldMatrix {
                to_world_coords_matrix,
            } => {
                self.to_world = to_world_coords_matrix;
                Ok(Vec::new())
            }

            ControlMsg::AcquireFloor { object_points } => {
                let floor_points: Vec<Point3<f64>> = object_points
                    .iter()
                    .flatten()
                    .map(|p| Point3::new(p[0], p[1], p[2]))
                    .collect();

                let current = self.to_world;
                let inverse = current
                    .try_inverse()
                    .ok_or(Error::Numeric("to-world matrix is not invertible"))?;
                let local_points: Vec<Point3<f64>> = floor_points
                    .iter()
                    .map(|p| world::transform_point(&inverse, p))
                    .collect();

                let aligned = world::align_plane_to_axis(&floor_points, &current, Axis::Z)?;
                self.to_world = aligned;

                let new_points: Vec<[f64; 3]> = local_points
                    .iter()
                    .map(|p| {
                        let np = world::transform_point(&aligned, p);
                        [np.x, np.y, np.z]
                    })
                    .collect();

                Ok(vec![Event::ToWorldCoordsMatrix {
                    to_world_coords_matrix: self.to_world,
                    new_points: Some(new_points),
                }])
            }

            ControlMsg::SetOrigin { object_point } => {
                let point = Point3::new(object_point[0], object_point[1], object_point[2]);
                self.to_world =
                    world::origin_translation(&self.to_world, &point, self.config.swap_origin_yz);
                Ok(vec![Event::ToWorldCoordsMatrix {
                    to_world_coords_matrix: self.to_world,
                    new_points: None,
                }])
            }

            ControlMsg::DetermineScale { object_points } => {
                let observations: Vec<Vec<Point3<f64>>> = object_points
                    .iter()
                    .map(|set| {
                        set.iter()
                            .map(|p| Point3::new(p[0], p[1], p[2]))
                            .collect()
                    })
                    .collect();
                let factor =
                    world::scale_factor(&observations, self.config.scale_reference_distance)?;
                let mut poses = self.cams.poses();
                world::apply_scale(&mut poses, factor);
                self.cams.set_poses(&poses)?;
                info!(scale_factor = factor, "reconstruction scaled");
                Ok(vec![Event::Scaled {
                    scale_factor: factor,
                    camera_poses: self.cams.poses(),
                }])
            }

            ControlMsg::ChangeMocapMode(target) => {
                let target = match Mode::try_from(target) {
                    Ok(target) => target,
                    Err(e) => {
                        return Ok(vec![Event::ModeChangeFailure {
                            message: e.to_string(),
                        }])
                    }
                };
                match self.mode.transition(target) {
                    Ok(mode) => {
                        self.mode = mode;
                        Ok(vec![Event::ModeChange(mode)])
                    }
                    Err(e) => Ok(vec![Event::ModeChangeFailure {
                        message: e.to_string(),
                    }]),
                }
            }

            ControlMsg::StartRecording { name, record_video } => {
                if record_video {
                    // video persistence lives with the acquisition layer
                    info!(name = %name, "video recording delegated to the device layer");
                }
                self.recorder = Some(CsvRecorder::create(format!("{name}.csv"))?);
                Ok(Vec::new())
            }
            ControlMsg::StopRecording => {
                if let Some(recorder) = self.recorder.take() {
                    recorder.finish()?;
                }
                Ok(Vec::new())
            }

            // consumed by the driver loop
            ControlMsg::Shutdown => Ok(Vec::new()),
        }
    }

    /// Common tail of `calculate-camera-pose` and
    /// `calculate-bundle-adjustment`: refine poses, install them, and report
    /// the reprojection of every calibration sample.
    fn solve_poses(&mut self, samples: &[Vec<ImagePoint>], bootstrap: bool) -> Result<Vec<Event>> {
        if samples.is_empty() {
            return Err(Error::InputShape("no calibration samples".to_string()));
        }
        if let Some(bad) = samples.iter().find(|s| s.len() != self.cams.len()) {
            return Err(Error::InputShape(format!(
                "sample has {} entries, expected {}",
                bad.len(),
                self.cams.len()
            )));
        }

        let ks = self.cams.intrinsic_matrices();
        let initial = if bootstrap {
            sfm::bootstrap_poses(
                samples,
                &ks,
                &self.config.ransac_params(),
                &mut self.rng,
            )?
        } else {
            self.cams.poses()
        };

        let solution =
            retrocap_bundle_adj::bundle_adjustment(samples.to_vec(), ks, &initial)?;
        self.cams.set_poses(&solution.poses)?;
        info!(
            error = solution.mean_reprojection_error,
            "new pose computed"
        );

        let projections = self.cams.projection_matrices();
        let points = triangulate::triangulate_samples(&projections, samples);
        let error = reproj::mean_reprojection_error(self.cams.cams(), samples, &points)
            .unwrap_or(solution.mean_reprojection_error);

        let reprojected: Vec<Vec<[f64; 2]>> = points
            .iter()
            .flatten()
            .map(|pt| {
                self.cams
                    .cams()
                    .iter()
                    .map(|cam| {
                        let p = cam.project(pt);
                        [p.x, p.y]
                    })
                    .collect()
            })
            .collect();

        Ok(vec![Event::CameraPose {
            camera_poses: self.cams.poses(),
            intrinsic_matrices: self
                .cams
                .intrinsic_matrices()
                .iter()
                .map(matrix3_rows)
                .collect(),
            distortion_coefs: self.cams.distortion_coefs(),
            reprojected,
            error,
        }])
    }
}

fn matrix3_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}
