//! The retrocap pipeline core.
//!
//! Consumes synchronized multi-camera frames, extracts marker centroids,
//! resolves multi-view correspondence, triangulates 3D points, locates rigid
//! objects and smooths them with a Kalman filter. Control messages mutate
//! the pipeline between frames; outputs are emitted as typed events.
//!
//! Device I/O is injected through [`FrameSource`]; the supervisor transport
//! attaches to the control/event channels returned by [`spawn`].

#![deny(rust_2018_idioms)]

pub mod config;
mod correspond;
mod error;
mod locate;
mod pipeline;
mod driver;
mod write_data;

pub use config::CoreConfig;
pub use correspond::{find_correspondences, Correspondences};
pub use error::Error;
pub use locate::{locate_objects, ObjectParams};
pub use pipeline::{FrameOutput, MocapCore};
pub use driver::{spawn, CoreHandle, FrameSource};

pub type Result<M> = std::result::Result<M, Error>;
