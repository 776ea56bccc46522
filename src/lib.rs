//! Control library for an automated well-plate imaging rig.
//!
//! A motorized XYZ stage, driven with G-code over a serial link, carries a
//! multi-well plate under a camera. Four manually-taught corner positions
//! are solved into a snake-ordered list of per-well coordinates, and a
//! capture worker walks that list — optionally across a Z-stack — moving,
//! settling and photographing each well while staying cancellable between
//! wells.
//!
//! Data flow:
//!
//! ```text
//! corners -> grid solver -> well list -> capture worker -> motion link (serial)
//!                                                       -> image sensor
//!                                                       -> status events
//! ```

pub mod adapters;
pub mod capture;
pub mod config;
pub mod error;
pub mod grid;
pub mod link;
pub mod sensor;
pub mod wells;

pub use error::{RigError, RigResult};
