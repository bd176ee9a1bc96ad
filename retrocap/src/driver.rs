//! The frame-loop driver thread.
//!
//! One thread owns the core and the frame source: it drains the control
//! queue, pulls a synchronized frame set, runs the pipeline to completion
//! and forwards the resulting events. Outputs therefore leave the core in
//! strict source-timestamp order.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use machine_vision_formats::pixel_format::Mono8;
use tracing::{debug, info};

use retrocap_types::{CameraSettings, ControlMsg, Event, Mode, VideoFrame};

use crate::pipeline::MocapCore;
use crate::Result;

/// Frames per `fps` event.
const FPS_WINDOW: u32 = 20;

/// The acquisition-device boundary. Implementations block in
/// [`FrameSource::next_frames`] until a synchronized frame set is available.
pub trait FrameSource: Send {
    fn num_cameras(&self) -> usize;

    /// The next synchronized frame set and its timestamp in milliseconds.
    fn next_frames(&mut self) -> Result<(Vec<VideoFrame<Mono8>>, f64)>;

    /// Forwarded `update-camera-settings` payloads.
    fn apply_settings(&mut self, _settings: &CameraSettings) -> Result<()> {
        Ok(())
    }

    /// Persist a raw frame set (SaveImage mode).
    fn save_image(&mut self, _frames: &[VideoFrame<Mono8>]) -> Result<()> {
        Ok(())
    }
}

/// Handle to a running driver: the inbound control channel, the outbound
/// event channel, and the thread itself. Dropping the handle shuts the
/// driver down.
pub struct CoreHandle {
    control: Sender<ControlMsg>,
    events: Receiver<Event>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl CoreHandle {
    #[inline]
    pub fn control(&self) -> &Sender<ControlMsg> {
        &self.control
    }

    #[inline]
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Stop the driver and release the frame source.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    fn shutdown_inner(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = self.control.send(ControlMsg::Shutdown);
            let _ = join.join();
        }
    }
}

impl Drop for CoreHandle {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Start the driver thread for a constructed core and an injected frame
/// source.
pub fn spawn(core: MocapCore, source: Box<dyn FrameSource>) -> CoreHandle {
    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let (event_tx, event_rx) = crossbeam_channel::unbounded();

    let join = std::thread::Builder::new()
        .name("retrocap-driver".to_string())
        .spawn(move || driver_loop(core, source, control_rx, event_tx))
        .expect("spawn driver thread");

    CoreHandle {
        control: control_tx,
        events: event_rx,
        join: Some(join),
    }
}

enum LoopAction {
    Continue,
    Stop,
}

fn handle_message(
    core: &mut MocapCore,
    source: &mut Box<dyn FrameSource>,
    events: &Sender<Event>,
    msg: ControlMsg,
) -> LoopAction {
    match msg {
        ControlMsg::Shutdown => return LoopAction::Stop,
        ControlMsg::UpdateCameraSettings(settings) => {
            if let Err(e) = source.apply_settings(&settings) {
                let _ = events.send(Event::Error {
                    message: e.to_string(),
                });
            }
        }
        msg => match core.handle_control(msg) {
            Ok(produced) => {
                for event in produced {
                    if events.send(event).is_err() {
                        return LoopAction::Stop;
                    }
                }
            }
            Err(e) => {
                debug!("control message rejected: {e}");
                let _ = events.send(Event::Error {
                    message: e.to_string(),
                });
            }
        },
    }
    LoopAction::Continue
}

fn driver_loop(
    mut core: MocapCore,
    mut source: Box<dyn FrameSource>,
    control: Receiver<ControlMsg>,
    events: Sender<Event>,
) {
    let _ = events.send(Event::NumCams(source.num_cameras()));
    for event in core.device_ready() {
        let _ = events.send(event);
    }

    let mut frame_count = 0u32;
    let mut fps_window_start = Instant::now();

    loop {
        // control messages mutate state only between frames
        loop {
            match control.try_recv() {
                Ok(msg) => {
                    if let LoopAction::Stop = handle_message(&mut core, &mut source, &events, msg)
                    {
                        info!("driver stopping");
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        // without a working camera set there is nothing to pull; wait for
        // control traffic instead of spinning
        if core.mode() < Mode::CamerasFound {
            match control.recv_timeout(Duration::from_millis(50)) {
                Ok(msg) => {
                    if let LoopAction::Stop = handle_message(&mut core, &mut source, &events, msg)
                    {
                        return;
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
            }
            continue;
        }

        match source.next_frames() {
            Ok((frames, time_ms)) => {
                let out = core.process_frame(&frames, time_ms);
                if out.save_frames {
                    if let Err(e) = source.save_image(&frames) {
                        let _ = events.send(Event::Error {
                            message: format!("image save failed: {e}"),
                        });
                    }
                }
                for event in out.events {
                    if events.send(event).is_err() {
                        return;
                    }
                }

                frame_count += 1;
                if frame_count % FPS_WINDOW == 0 {
                    let elapsed = fps_window_start.elapsed().as_secs_f64();
                    if elapsed > 0.0 {
                        let fps = (FPS_WINDOW as f64 / elapsed).round() as u32;
                        let _ = events.send(Event::Fps { fps });
                    }
                    fps_window_start = Instant::now();
                }
            }
            Err(e) => {
                for event in core.device_failed(&e) {
                    let _ = events.send(event);
                }
            }
        }
    }
}
