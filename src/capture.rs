//! Capture orchestration.
//!
//! A capture run is a state machine sequenced by one dedicated worker:
//!
//! ```text
//! Idle -> Homing -> Clearing -> Seeking
//!      -> (Moving -> Settling -> [Capturing] -> Moving ...) -> Done
//! ```
//!
//! The controlling context communicates with the worker through exactly
//! three channels: a cancellation flag it sets and the worker polls at well
//! boundaries, a status event queue the worker writes and it drains, and the
//! worker's join handle. Cancellation is cooperative — a blocking protocol
//! exchange is never interrupted, because aborting mid-write would desync
//! the firmware stream — so cancellation latency is bounded by one full
//! move + settle + capture cycle. A cancelled run ends in `Done` with a
//! `Terminated` event, not `Failed`.
//!
//! Sensor release is unconditional on every exit path; error propagation is
//! additional.

use crate::config::{CameraSettings, Settings, StageSettings};
use crate::error::{RigError, RigResult};
use crate::grid::{expand_z_stack, well_number, WellPosition, ZStackPlan};
use crate::link::MotionLink;
use crate::sensor::{ImageSensor, SensorSettings};
use chrono::Local;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Whether a run writes frames to disk or only walks the timing sequence.
///
/// Preview performs every move, settle and exposure-proportional sleep but
/// creates no files, letting an operator validate positioning and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Preview,
    Picture,
}

/// Phases of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Homing,
    Clearing,
    Seeking,
    Moving,
    Settling,
    Capturing,
    Cancelling,
    Done,
    Failed,
}

/// Status events emitted by the capture worker (single producer) and drained
/// by the controlling context (single consumer).
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// One well finished within the current Z pass.
    Progress { cycle: u32, total: u32 },
    /// A frame was written.
    Saved { path: PathBuf },
    /// The run was cancelled by the operator.
    Terminated,
    /// The run visited every well; `count` frames were written.
    Completed { count: u32 },
    /// The run aborted on an error.
    Failed { reason: String },
}

/// Fully-resolved configuration of one capture run.
#[derive(Debug, Clone)]
pub struct CapturePlan {
    pub mode: CaptureMode,
    pub zstack: ZStackPlan,
    pub output_dir: PathBuf,
    pub output_prefix: String,
    pub output_suffix: String,
    pub sensor_settings: SensorSettings,
}

/// How a run ended: frame count, and whether the operator terminated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub captured: u32,
    pub terminated: bool,
}

/// Per-run bookkeeping: current phase and position in the expanded sequence.
#[derive(Debug)]
pub struct CaptureSession {
    phase: CapturePhase,
    offset_index: usize,
    well_index: usize,
}

impl CaptureSession {
    fn new() -> Self {
        Self {
            phase: CapturePhase::Idle,
            offset_index: 0,
            well_index: 0,
        }
    }

    fn enter(&mut self, phase: CapturePhase) {
        debug!("capture phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    /// (Z pass, well index) currently being executed.
    pub fn location(&self) -> (usize, usize) {
        (self.offset_index, self.well_index)
    }
}

/// Run a capture to completion on the calling task.
///
/// The sensor is closed before this returns, on success, cancellation and
/// failure alike. Most callers want [`spawn_capture`] instead; this entry
/// point exists for harnesses that need to own the loop.
pub async fn run_capture(
    link: &MotionLink,
    sensor: &mut dyn ImageSensor,
    wells: &[WellPosition],
    plan: &CapturePlan,
    settings: &Settings,
    cancel: &AtomicBool,
    events: &mpsc::UnboundedSender<CaptureEvent>,
) -> RigResult<CaptureOutcome> {
    let mut session = CaptureSession::new();
    let result = drive(link, sensor, wells, plan, settings, cancel, events, &mut session).await;

    if let Err(e) = sensor.close().await {
        warn!("Sensor close failed during teardown: {e}");
    }

    match result {
        Ok(outcome) => {
            session.enter(CapturePhase::Done);
            if outcome.terminated {
                info!(
                    "Capture terminated by operator after {} frames",
                    outcome.captured
                );
                let _ = events.send(CaptureEvent::Terminated);
            } else {
                info!("Capture complete: {} frames", outcome.captured);
                let _ = events.send(CaptureEvent::Completed {
                    count: outcome.captured,
                });
            }
            Ok(outcome)
        }
        Err(e) => {
            session.enter(CapturePhase::Failed);
            let _ = events.send(CaptureEvent::Failed {
                reason: e.to_string(),
            });
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn drive(
    link: &MotionLink,
    sensor: &mut dyn ImageSensor,
    wells: &[WellPosition],
    plan: &CapturePlan,
    settings: &Settings,
    cancel: &AtomicBool,
    events: &mpsc::UnboundedSender<CaptureEvent>,
    session: &mut CaptureSession,
) -> RigResult<CaptureOutcome> {
    let stage = &settings.stage;
    let first = wells
        .first()
        .ok_or_else(|| RigError::InvalidGrid("empty well list".to_string()))?;
    validate_travel(wells, &plan.zstack, stage)?;

    link.connect().await?;
    sensor.configure(&plan.sensor_settings).await?;

    session.enter(CapturePhase::Homing);
    link.home().await?;

    session.enter(CapturePhase::Clearing);
    link.set_relative().await?;
    link.send(&format!(
        "G0 Z+{:.2} F{}",
        stage.clearance_mm, stage.clearance_feed
    ))
    .await?;
    link.wait_for_idle().await?;

    session.enter(CapturePhase::Seeking);
    link.set_absolute().await?;
    link.send(&move_command(first, stage.travel_feed)).await?;
    link.wait_for_idle().await?;

    info!("===== Capture starting =====");
    let total = wells.len() as u32;
    let cols = settings.plate.cols;
    let mut captured = 0u32;

    for (offset_index, well) in expand_z_stack(wells, &plan.zstack, stage.zstack_step_mm) {
        // Cancellation is only honored here, at the well boundary: an
        // in-flight move must finish before motion can be considered idle.
        if cancel.load(Ordering::Relaxed) {
            session.enter(CapturePhase::Cancelling);
            return Ok(CaptureOutcome {
                captured,
                terminated: true,
            });
        }
        session.offset_index = offset_index;
        session.well_index = (well.cycle - 1) as usize;

        session.enter(CapturePhase::Moving);
        let logical = well_number(well.cycle, cols);
        info!(
            "Cycle {}/{}: going to well {:02}",
            well.cycle, total, logical
        );
        link.send(&move_command(&well, stage.travel_feed)).await?;
        link.wait_for_idle().await?;

        session.enter(CapturePhase::Settling);
        sleep(stage.move_sleep()).await;

        if plan.mode == CaptureMode::Picture {
            session.enter(CapturePhase::Capturing);
            let path = photo_path(
                &plan.output_dir,
                &plan.output_prefix,
                &plan.output_suffix,
                logical,
            );
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            sensor.capture(&path).await?;
            captured += 1;
            debug!("Saved frame to {}", path.display());
            let _ = events.send(CaptureEvent::Saved { path });
        }

        // Sensor pipeline drain scales with the actual exposure time; a
        // fixed sleep stalls short exposures and truncates long ones.
        sleep(exposure_drain(sensor.exposure_us().await?, &settings.camera)).await;

        let _ = events.send(CaptureEvent::Progress {
            cycle: well.cycle,
            total,
        });
    }

    Ok(CaptureOutcome {
        captured,
        terminated: false,
    })
}

/// Reject geometry outside the machine's travel before any device I/O.
/// Skipped when the configured limits are all zero (unknown machine).
fn validate_travel(
    wells: &[WellPosition],
    zstack: &ZStackPlan,
    stage: &StageSettings,
) -> RigResult<()> {
    if stage.max_x == 0.0 && stage.max_y == 0.0 && stage.max_z == 0.0 {
        return Ok(());
    }
    for (_, well) in expand_z_stack(wells, zstack, stage.zstack_step_mm) {
        let inside = (0.0..=stage.max_x).contains(&well.x)
            && (0.0..=stage.max_y).contains(&well.y)
            && (0.0..=stage.max_z).contains(&well.z);
        if !inside {
            return Err(RigError::InvalidGrid(format!(
                "well {} at ({:.3}, {:.3}, {:.3}) is outside travel ({:.1}, {:.1}, {:.1})",
                well.cycle, well.x, well.y, well.z, stage.max_x, stage.max_y, stage.max_z
            )));
        }
    }
    Ok(())
}

fn move_command(well: &WellPosition, feed: u32) -> String {
    format!("G0 X{:.3} Y{:.3} Z{:.3} F{}", well.x, well.y, well.z, feed)
}

fn exposure_drain(exposure_us: u64, camera: &CameraSettings) -> Duration {
    let seconds =
        exposure_us as f64 / 1_000_000.0 * camera.sleep_multiplier + camera.sleep_addition;
    Duration::from_secs_f64(seconds.max(0.0))
}

/// Destination for one frame:
/// `{prefix}well{NN}_{YYYY-MM-DD_HHMMSS}{suffix}.jpg`, `NN` the zero-padded
/// logical well number.
pub fn photo_path(dir: &Path, prefix: &str, suffix: &str, well_number: u32) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H%M%S");
    dir.join(format!("{prefix}well{well_number:02}_{timestamp}{suffix}.jpg"))
}

/// Running capture worker: cancellation flag, status events, join handle.
pub struct CaptureHandle {
    cancel: Arc<AtomicBool>,
    pub events: mpsc::UnboundedReceiver<CaptureEvent>,
    task: JoinHandle<RigResult<CaptureOutcome>>,
}

impl CaptureHandle {
    /// Request a cooperative stop. The worker finishes its current well
    /// (move, settle, and capture if one is in progress) and then tears
    /// down; it does not touch the remaining wells.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Clone of the cancellation flag, for controllers that need to request
    /// a stop from another task.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Wait for the worker to finish and return its outcome.
    pub async fn join(self) -> RigResult<CaptureOutcome> {
        self.task
            .await
            .map_err(|e| RigError::Capture(format!("capture worker panicked: {e}")))?
    }
}

/// Spawn the capture worker. Exactly one such worker may drive the link at a
/// time; the operating rule is that starting a capture implies no jog worker
/// is active and vice versa.
pub fn spawn_capture(
    link: Arc<MotionLink>,
    mut sensor: Box<dyn ImageSensor>,
    wells: Vec<WellPosition>,
    plan: CapturePlan,
    settings: Settings,
) -> CaptureHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        run_capture(
            &link,
            sensor.as_mut(),
            &wells,
            &plan,
            &settings,
            &flag,
            &events_tx,
        )
        .await
    });

    CaptureHandle {
        cancel,
        events: events_rx,
        task,
    }
}

/// One discrete manual-jog displacement, millimeters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JogStep {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl JogStep {
    pub fn x(delta: f64) -> Self {
        Self {
            dx: delta,
            dy: 0.0,
            dz: 0.0,
        }
    }

    pub fn y(delta: f64) -> Self {
        Self {
            dx: 0.0,
            dy: delta,
            dz: 0.0,
        }
    }

    pub fn z(delta: f64) -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            dz: delta,
        }
    }
}

/// Manual-jog loop: applies queued steps strictly one at a time, waiting for
/// each move's completion before taking the next, so contradictory motion is
/// never queued on the firmware. Exits when the queue closes or the
/// cancellation flag is set (polled between commands).
pub async fn run_jog(
    link: &MotionLink,
    mut steps: mpsc::Receiver<JogStep>,
    cancel: &AtomicBool,
) -> RigResult<()> {
    link.connect().await?;
    link.set_relative().await?;

    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let step =
            match tokio::time::timeout(Duration::from_millis(100), steps.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(step)) => step,
            };
        if let Some(command) = jog_command(&step) {
            debug!("jog: {command}");
            link.send(&command).await?;
            link.wait_for_idle().await?;
        }
    }
    Ok(())
}

fn jog_command(step: &JogStep) -> Option<String> {
    let mut command = String::from("G0");
    for (axis, delta) in [("X", step.dx), ("Y", step.dy), ("Z", step.dz)] {
        if delta != 0.0 {
            command.push_str(&format!(" {axis}{delta:+.2}"));
        }
    }
    (command != "G0").then_some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_command_formatting() {
        let well = WellPosition {
            cycle: 1,
            x: 12.3456,
            y: 0.0,
            z: -1.2,
        };
        assert_eq!(move_command(&well, 800), "G0 X12.346 Y0.000 Z-1.200 F800");
    }

    #[test]
    fn test_jog_command_skips_zero_axes() {
        assert_eq!(jog_command(&JogStep::x(1.0)).as_deref(), Some("G0 X+1.00"));
        assert_eq!(jog_command(&JogStep::z(-0.1)).as_deref(), Some("G0 Z-0.10"));
        assert_eq!(
            jog_command(&JogStep {
                dx: 5.0,
                dy: -5.0,
                dz: 0.0
            })
            .as_deref(),
            Some("G0 X+5.00 Y-5.00")
        );
        assert_eq!(jog_command(&JogStep::x(0.0)), None);
    }

    #[test]
    fn test_exposure_drain_scales_with_exposure() {
        let mut settings = Settings::default();
        settings.camera.sleep_multiplier = 2.0;
        settings.camera.sleep_addition = 0.5;

        // 1s exposure -> 2.5s drain; 0.5s exposure -> 1.5s drain.
        assert_eq!(
            exposure_drain(1_000_000, &settings.camera),
            Duration::from_secs_f64(2.5)
        );
        assert_eq!(
            exposure_drain(500_000, &settings.camera),
            Duration::from_secs_f64(1.5)
        );
    }

    #[test]
    fn test_photo_path_shape() {
        let path = photo_path(Path::new("/tmp/out"), "plate4_", "_spot", 7);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("plate4_well07_"), "{name}");
        assert!(name.ends_with("_spot.jpg"), "{name}");
    }

    #[test]
    fn test_validate_travel_flags_out_of_range_wells() {
        let mut settings = Settings::default();
        settings.stage.max_x = 200.0;
        settings.stage.max_y = 200.0;
        settings.stage.max_z = 180.0;

        let wells = vec![WellPosition {
            cycle: 1,
            x: 10.0,
            y: 10.0,
            z: 179.9,
        }];
        // In range on its own, but the top Z-stack plane exceeds max_z.
        let err = validate_travel(&wells, &ZStackPlan::stack(1), &settings.stage).unwrap_err();
        assert!(matches!(err, RigError::InvalidGrid(_)));

        let ok = validate_travel(&wells, &ZStackPlan::disabled(), &settings.stage);
        assert!(ok.is_ok());
    }
}
