//! Elevation protocol (C8): the typed request/response vocabulary
//! carried over [`crate::pipe`] between the controller and its
//! elevated companion process.

pub mod client;
pub mod messages;
pub mod server;

pub use client::{Elevation, ElevationClient};
pub use messages::{CacheMessage, ControlMessage, RestartState};
pub use server::{serve, ElevationHandler, StdElevationHandler};
