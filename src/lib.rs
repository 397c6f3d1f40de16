//! depthcap: capture a depth+color frame stream into colored point clouds.
//!
//! Frames from a [`frame::FrameSource`] are accumulated by the capture
//! thread while a session is recording. Stopping a session moves its points
//! into a background export that writes `pointcloud.ply` into the session's
//! timestamped folder; snapshots save the next frame's color image, and
//! optionally its depth, beside it. [`orchestrator::Orchestrator`] is the
//! entry point that ties these together.

pub mod app;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod frame;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod recording;
pub mod setup;
pub mod share;
pub mod tasks;
pub mod ui;

pub use error::{CaptureError, FrameSourceError};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
