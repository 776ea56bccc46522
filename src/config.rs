//! Application settings.
//!
//! Settings are layered: compiled-in defaults, then an optional TOML file,
//! then `RIG_*` environment variables. The tree mirrors the rig's physical
//! layout — plate geometry, capture output naming, camera settings, and the
//! stage serial link with its motion constants.
//!
//! Camera settings under `[camera.settings]` are opaque to this crate: they
//! are forwarded verbatim to the [`ImageSensor`](crate::sensor::ImageSensor)
//! collaborator, which interprets them however its driver requires.

use crate::error::RigResult;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Well-plate geometry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlateSettings {
    /// Number of plate rows (must be at least 2 for the grid solver).
    pub rows: u32,
    /// Number of plate columns (must be at least 2 for the grid solver).
    pub cols: u32,
}

/// Capture input/output defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureIoSettings {
    /// Default well-list CSV consumed by a capture run ("" = solve a grid).
    pub input_csv: String,
    /// Directory that captured frames are written into.
    pub output_dir: String,
    /// Filename prefix, e.g. "plate4_".
    pub output_prefix: String,
    /// Filename suffix inserted before the ".jpg" extension.
    pub output_suffix: String,
}

/// Camera configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraSettings {
    /// Opaque driver settings (resolution, iso, shutter, gains, ...),
    /// forwarded to the sensor without interpretation.
    pub settings: HashMap<String, serde_json::Value>,
    /// Post-capture sleep = exposure_seconds * multiplier + addition.
    pub sleep_multiplier: f64,
    /// Fixed component of the post-capture sleep, in seconds.
    pub sleep_addition: f64,
}

/// Stage serial link and motion constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StageSettings {
    /// Serial device path, e.g. "/dev/ttyUSB0".
    pub port: String,
    /// Baud rate of the stage firmware.
    pub baud_rate: u32,
    /// Raw transport read timeout. A stalled firmware surfaces as a hard
    /// connection error after this long; there is no retry.
    pub read_timeout_ms: u64,
    /// Pause after opening the link, before the first real command.
    pub connect_settle_ms: u64,
    /// Pause after each completed move, letting vibration damp.
    pub move_sleep_ms: u64,
    /// Z raise used to clear the plate before seeking the first well (mm).
    pub clearance_mm: f64,
    /// Feed rate for the clearance raise (mm/min).
    pub clearance_feed: u32,
    /// Feed rate for well-to-well travel (mm/min).
    pub travel_feed: u32,
    /// Z distance between adjacent Z-stack planes (mm).
    pub zstack_step_mm: f64,
    /// Soft travel limits (mm). All-zero disables pre-flight validation.
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl StageSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_settle(&self) -> Duration {
        Duration::from_millis(self.connect_settle_ms)
    }

    pub fn move_sleep(&self) -> Duration {
        Duration::from_millis(self.move_sleep_ms)
    }
}

/// Top-level settings tree.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub plate: PlateSettings,
    pub capture: CaptureIoSettings,
    pub camera: CameraSettings,
    pub stage: StageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            plate: PlateSettings { rows: 6, cols: 8 },
            capture: CaptureIoSettings {
                input_csv: String::new(),
                output_dir: "well_photos".to_string(),
                output_prefix: String::new(),
                output_suffix: String::new(),
            },
            camera: CameraSettings {
                settings: default_camera_settings(),
                sleep_multiplier: 2.0,
                sleep_addition: 0.5,
            },
            stage: StageSettings {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115_200,
                read_timeout_ms: 2_000,
                connect_settle_ms: 2_000,
                move_sleep_ms: 250,
                clearance_mm: 40.0,
                clearance_feed: 20_000,
                travel_feed: 800,
                zstack_step_mm: 0.2,
                max_x: 0.0,
                max_y: 0.0,
                max_z: 0.0,
            },
        }
    }
}

fn default_camera_settings() -> HashMap<String, serde_json::Value> {
    let mut settings = HashMap::new();
    settings.insert("resolution".to_string(), json!([3280, 2464]));
    settings.insert("rotation".to_string(), json!(0));
    settings.insert("framerate".to_string(), json!(15.0));
    settings.insert("iso".to_string(), json!(100));
    settings.insert("shutter_us".to_string(), json!(20_000));
    settings.insert("exposure_mode".to_string(), json!("off"));
    settings.insert("awb_mode".to_string(), json!("off"));
    settings.insert("awb_gains".to_string(), json!([1.6, 1.4]));
    settings
}

impl Settings {
    /// Load settings: defaults, then the optional TOML file, then `RIG_*`
    /// environment overrides (e.g. `RIG_STAGE__PORT=/dev/ttyACM0`).
    pub fn new(path: Option<&Path>) -> RigResult<Self> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(Environment::with_prefix("RIG").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Load settings from a specific TOML file.
    pub fn from_path(path: &Path) -> RigResult<Self> {
        Self::new(Some(path))
    }
}
