//! Frame-level end-to-end test: synthetic marker images through blob
//! extraction, correspondence, triangulation, object location and tracking.

use machine_vision_formats::pixel_format::Mono8;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};

use retrocap::{CoreConfig, FrameSource, MocapCore};
use retrocap_mvg::projection_from_krt;
use retrocap_types::{
    CameraPose, CameraSettings, ControlMsg, Event, Mode, VideoFrame,
};

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn test_k() -> Matrix3<f64> {
    Matrix3::new(320.0, 0.0, 160.0, 0.0, 320.0, 120.0, 0.0, 0.0, 1.0)
}

fn test_poses() -> Vec<CameraPose> {
    vec![
        CameraPose::identity(),
        CameraPose {
            rotation: *Rotation3::from_euler_angles(0.0, 0.35, 0.0).matrix(),
            translation: Vector3::new(-0.7, 0.0, 0.25),
        },
        CameraPose {
            rotation: *Rotation3::from_euler_angles(0.0, -0.3, 0.0).matrix(),
            translation: Vector3::new(0.7, 0.0, 0.2),
        },
    ]
}

fn project(pose: &CameraPose, x: &Point3<f64>) -> Point2<f64> {
    let p = projection_from_krt(&test_k(), &pose.rotation, &pose.translation);
    let h = p * x.to_homogeneous();
    Point2::new(h.x / h.z, h.y / h.z)
}

/// Paint a 2x2 marker blob with its top-left pixel at the rounded position.
fn paint(data: &mut [u8], pt: &Point2<f64>) {
    let col = pt.x.round() as usize;
    let row = pt.y.round() as usize;
    for dr in 0..2 {
        for dc in 0..2 {
            data[(row + dr) * WIDTH as usize + col + dc] = 255;
        }
    }
}

/// Render the markers into one frame per camera.
fn render_frames(markers: &[Point3<f64>]) -> Vec<VideoFrame<Mono8>> {
    test_poses()
        .iter()
        .map(|pose| {
            let mut data = vec![0u8; (WIDTH * HEIGHT) as usize];
            for marker in markers {
                paint(&mut data, &project(pose, marker));
            }
            VideoFrame::new(WIDTH, HEIGHT, WIDTH, data).unwrap()
        })
        .collect()
}

fn make_core() -> MocapCore {
    let mut core = MocapCore::new(
        vec![test_k(); 3],
        vec![[0.0; 5]; 3],
        CoreConfig::default(),
    )
    .unwrap();
    core.device_ready();
    core.handle_control(ControlMsg::SetCameraPoses {
        camera_poses: test_poses(),
    })
    .unwrap();
    core
}

fn advance_to(core: &mut MocapCore, target: Mode) {
    for mode in [
        Mode::PointCapture,
        Mode::Triangulation,
        Mode::ObjectDetection,
    ] {
        if core.mode() == target {
            return;
        }
        core.handle_control(ControlMsg::ChangeMocapMode(mode.into()))
            .unwrap();
    }
}

/// Markers of one rigid body, 0.131 m apart, inside every camera's view.
fn body_markers() -> Vec<Point3<f64>> {
    vec![
        Point3::new(-0.0655, 0.05, 1.5),
        Point3::new(0.0655, 0.05, 1.5),
    ]
}

#[test]
fn point_capture_emits_first_detection_per_camera() {
    let mut core = make_core();
    advance_to(&mut core, Mode::PointCapture);

    let frames = render_frames(&body_markers());
    let out = core.process_frame(&frames, 8.0);
    assert_eq!(out.events.len(), 1);
    match &out.events[0] {
        Event::ImagePoints(firsts) => {
            assert_eq!(firsts.len(), 3);
            assert!(firsts.iter().all(|p| p.is_some()));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn triangulation_recovers_marker_positions() {
    let mut core = make_core();
    advance_to(&mut core, Mode::Triangulation);

    let markers = body_markers();
    let frames = render_frames(&markers);
    let out = core.process_frame(&frames, 8.0);

    let payload = out
        .events
        .iter()
        .find_map(|ev| match ev {
            Event::ObjectPoints(payload) => Some(payload),
            _ => None,
        })
        .expect("object-points event");

    assert_eq!(payload.object_points.len(), 2);
    assert_eq!(payload.errors.len(), 2);

    // the emitted points carry the camera-frame flip
    for marker in &markers {
        let expected = Point3::new(-marker.x, -marker.y, marker.z);
        let found = payload.object_points.iter().any(|p| {
            (Point3::new(p[0], p[1], p[2]) - expected).norm() < 0.02
        });
        assert!(found, "marker {marker} not triangulated");
    }
}

#[test]
fn object_detection_locates_and_tracks_the_body() {
    let mut core = make_core();
    advance_to(&mut core, Mode::ObjectDetection);

    let markers = body_markers();
    let frames = render_frames(&markers);

    let mut last_payload = None;
    for frame_no in 0..5 {
        let out = core.process_frame(&frames, 8.0 * (frame_no + 1) as f64);
        for ev in out.events {
            if let Event::ObjectPoints(payload) = ev {
                last_payload = Some(payload);
            }
        }
    }
    let payload = last_payload.expect("object-points payload");

    assert_eq!(payload.objects.len(), 1, "one rigid body expected");
    let object = &payload.objects[0];
    // midpoint of the flipped marker positions
    let expected = Point3::new(0.0, -0.05, 1.5);
    assert!((object.pos - expected).norm() < 0.02);
    assert_eq!(object.drone_index, 0);

    assert_eq!(payload.filtered_objects.len(), 1);
    let filtered = &payload.filtered_objects[0];
    assert!((filtered.pos - expected).norm() < 0.02);
}

struct ScriptedSource {
    frames: Vec<VideoFrame<Mono8>>,
    time_ms: f64,
}

impl FrameSource for ScriptedSource {
    fn num_cameras(&self) -> usize {
        self.frames.len()
    }

    fn next_frames(&mut self) -> retrocap::Result<(Vec<VideoFrame<Mono8>>, f64)> {
        self.time_ms += 8.0;
        // pace the loop like a real camera would
        std::thread::sleep(std::time::Duration::from_millis(1));
        Ok((self.frames.clone(), self.time_ms))
    }

    fn apply_settings(&mut self, _settings: &CameraSettings) -> retrocap::Result<()> {
        Ok(())
    }
}

#[test]
fn driver_runs_the_pipeline_and_shuts_down() {
    let core = make_core_with_poses_preset();
    let source = ScriptedSource {
        frames: render_frames(&body_markers()),
        time_ms: 0.0,
    };
    let handle = retrocap::spawn(core, Box::new(source));

    for mode in [
        Mode::PointCapture,
        Mode::Triangulation,
        Mode::ObjectDetection,
    ] {
        handle
            .control()
            .send(ControlMsg::ChangeMocapMode(mode.into()))
            .unwrap();
    }

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    let mut saw_objects = false;
    while std::time::Instant::now() < deadline {
        match handle
            .events()
            .recv_timeout(std::time::Duration::from_secs(5))
        {
            Ok(Event::ObjectPoints(payload)) if !payload.objects.is_empty() => {
                saw_objects = true;
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    assert!(saw_objects, "driver never produced located objects");
    handle.shutdown();
}

/// Core with the rig poses installed before the driver takes ownership.
fn make_core_with_poses_preset() -> MocapCore {
    let mut core = MocapCore::new(
        vec![test_k(); 3],
        vec![[0.0; 5]; 3],
        CoreConfig::default(),
    )
    .unwrap();
    core.handle_control(ControlMsg::SetCameraPoses {
        camera_poses: test_poses(),
    })
    .unwrap();
    core
}
