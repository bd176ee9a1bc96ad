// Copyright 2023-2026 the retrocap developers.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT
// or http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use adskalman::{CovarianceUpdateMethod, ObservationModel, StateAndCovariance};
use nalgebra::{dimension::U6, OMatrix, OVector, Point3, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use retrocap_types::{FilteredObject, TrackedObject};

use crate::motion_model::ConstantVelocityModel;
use crate::observation_model::PositionObservationModel;

/// Tracker tuning parameters.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrackingParams {
    /// Process noise scale of the constant-velocity model.
    pub motion_noise_scale: f64,
    /// Isotropic measurement noise of located positions, in meters^2.
    pub observation_noise: f64,
    /// Association gate: maximum distance between a predicted position and a
    /// detection, in meters.
    pub max_association_distance: f64,
    /// Frames a track survives without an associated detection.
    pub max_missed_frames: u32,
    /// Initial position variance of a newborn track.
    pub initial_position_variance: f64,
    /// Initial velocity variance of a newborn track.
    pub initial_velocity_variance: f64,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            motion_noise_scale: 0.1,
            observation_noise: 1e-4,
            max_association_distance: 0.25,
            max_missed_frames: 30,
            initial_position_variance: 1e-2,
            initial_velocity_variance: 1e-1,
        }
    }
}

#[derive(Debug)]
struct Track {
    id: u32,
    drone_index: u8,
    estimate: StateAndCovariance<f64, U6>,
    heading: f64,
    missed_frames: u32,
}

/// Multi-object tracker over located rigid bodies.
///
/// Association is greedy nearest-neighbour between predicted positions and
/// detections, gated by `max_association_distance`. Detections that match no
/// track start a new one; tracks die after `max_missed_frames` consecutive
/// misses.
#[derive(Debug)]
pub struct ObjectTracker {
    params: TrackingParams,
    motion_model: ConstantVelocityModel<f64>,
    observation_model: PositionObservationModel<f64>,
    tracks: Vec<Track>,
    next_track_id: u32,
}

impl ObjectTracker {
    pub fn new(params: TrackingParams) -> Self {
        Self {
            params,
            motion_model: ConstantVelocityModel::new(params.motion_noise_scale),
            observation_model: PositionObservationModel::new(params.observation_noise),
            tracks: Vec::new(),
            next_track_id: 0,
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Advance all tracks by `dt` seconds and fold in this frame's
    /// detections. Output order follows track creation order, so it is
    /// deterministic across runs.
    pub fn step(&mut self, dt: f64, detections: &[TrackedObject]) -> Vec<FilteredObject> {
        let model = self.motion_model.calc_for_dt(dt);

        // predict
        use adskalman::TransitionModelLinearNoControl;
        let priors: Vec<StateAndCovariance<f64, U6>> = self
            .tracks
            .iter()
            .map(|track| model.predict(&track.estimate))
            .collect();

        // greedy nearest-neighbour association, tracks in creation order
        let mut claimed = vec![false; detections.len()];
        for (track, prior) in self.tracks.iter_mut().zip(priors.into_iter()) {
            let predicted = prior.state().fixed_rows::<3>(0).into_owned();

            let nearest = detections
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed[*i])
                .map(|(i, det)| ((det.pos.coords - predicted).norm(), i))
                .min_by(|a, b| a.0.total_cmp(&b.0));

            match nearest {
                Some((dist, idx)) if dist <= self.params.max_association_distance => {
                    claimed[idx] = true;
                    let det = &detections[idx];
                    let observation: OVector<f64, nalgebra::U3> = det.pos.coords;
                    match self.observation_model.update(
                        &prior,
                        &observation,
                        CovarianceUpdateMethod::JosephForm,
                    ) {
                        Ok(posterior) => {
                            track.estimate = posterior;
                            track.heading = det.heading;
                            track.drone_index = det.drone_index;
                            track.missed_frames = 0;
                        }
                        Err(e) => {
                            warn!(track = track.id, "kalman update failed: {:?}", e);
                            track.estimate = prior;
                            track.missed_frames += 1;
                        }
                    }
                }
                _ => {
                    track.estimate = prior;
                    track.missed_frames += 1;
                }
            }
        }

        // births: unclaimed detections start fresh tracks
        for (idx, det) in detections.iter().enumerate() {
            if claimed[idx] {
                continue;
            }
            let state: OVector<f64, U6> = Vector6::new(
                det.pos.x, det.pos.y, det.pos.z, 0.0, 0.0, 0.0,
            );
            let mut covariance = OMatrix::<f64, U6, U6>::zeros();
            for i in 0..3 {
                covariance[(i, i)] = self.params.initial_position_variance;
                covariance[(i + 3, i + 3)] = self.params.initial_velocity_variance;
            }
            debug!(id = self.next_track_id, "new track");
            self.tracks.push(Track {
                id: self.next_track_id,
                drone_index: det.drone_index,
                estimate: StateAndCovariance::new(state, covariance),
                heading: det.heading,
                missed_frames: 0,
            });
            self.next_track_id += 1;
        }

        // deaths
        let max_missed = self.params.max_missed_frames;
        self.tracks.retain(|track| {
            if track.missed_frames > max_missed {
                debug!(id = track.id, "track lost");
                false
            } else {
                true
            }
        });

        self.tracks
            .iter()
            .map(|track| {
                let s = track.estimate.state();
                FilteredObject {
                    pos: Point3::new(s[0], s[1], s[2]),
                    vel: Vector3::new(s[3], s[4], s[5]),
                    heading: (track.heading * 1e4).round() / 1e4,
                    drone_index: track.drone_index,
                }
            })
            .collect()
    }
}
