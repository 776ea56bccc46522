//! Image sensor collaborator.
//!
//! The rig never interprets camera settings — they are an opaque key/value
//! map forwarded verbatim to whatever driver sits behind [`ImageSensor`].
//! The one reading the orchestrator does depend on is the actual exposure
//! time, which scales the post-capture settle sleep.

pub mod mock;

pub use mock::MockSensor;

use crate::error::RigResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// Opaque driver settings (resolution, iso, shutter, gains, ...).
pub type SensorSettings = HashMap<String, serde_json::Value>;

/// Hardware-agnostic camera seam.
#[async_trait]
pub trait ImageSensor: Send + Sync {
    /// Apply driver settings, opening the device if needed.
    async fn configure(&mut self, settings: &SensorSettings) -> RigResult<()>;

    /// Capture one frame to `path`. Fails with `RigError::Capture` when the
    /// sensor cannot produce or save the frame.
    async fn capture(&mut self, path: &Path) -> RigResult<()>;

    /// Actual exposure time currently in effect, in microseconds.
    async fn exposure_us(&self) -> RigResult<u64>;

    /// Release the device. Idempotent; called unconditionally on teardown.
    async fn close(&mut self) -> RigResult<()>;
}
