//! Headless CLI for the well-plate imaging rig.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use platescan::adapters::SerialTransport;
use platescan::capture::{spawn_capture, CaptureMode, CapturePlan};
use platescan::config::Settings;
use platescan::grid::{PlateGrid, Vec3, ZStackPlan};
use platescan::link::MotionLink;
use platescan::sensor::MockSensor;
use platescan::wells;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "platescan", about = "Well-plate imaging rig control")]
struct Cli {
    /// Path to a TOML settings file (defaults are used when omitted).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Home all stage axes.
    Home,
    /// Report the current stage position.
    Position,
    /// Solve a well grid from four corner positions and write it as CSV.
    Solve {
        /// Corner positions as "x,y,z" in mm.
        #[arg(long)]
        tl: String,
        #[arg(long)]
        tr: String,
        #[arg(long)]
        bl: String,
        #[arg(long)]
        br: String,
        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,
    },
    /// Run a capture over a well list.
    Capture {
        /// Well-list CSV (falls back to `capture.input_csv` in settings).
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Write frames instead of only walking the timing sequence.
        #[arg(long)]
        picture: bool,
        /// Z-stack half range: capture 2N+1 planes per well.
        #[arg(long)]
        zstack: Option<u32>,
    },
}

fn parse_corner(text: &str) -> Result<Vec3> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != 3 {
        return Err(anyhow!("corner must be 'x,y,z', got '{text}'"));
    }
    let mut values = [0.0f64; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part
            .trim()
            .parse()
            .with_context(|| format!("bad coordinate '{part}' in corner '{text}'"))?;
    }
    Ok(Vec3::new(values[0], values[1], values[2]))
}

fn open_link(settings: &Settings) -> MotionLink {
    let transport = SerialTransport::from_settings(&settings.stage);
    MotionLink::new(Box::new(transport), settings.stage.connect_settle())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref())?;

    match cli.command {
        Command::Home => {
            let link = open_link(&settings);
            link.connect().await?;
            info!("Homing...");
            link.home().await?;
            info!("Done");
            link.close().await?;
        }
        Command::Position => {
            let link = open_link(&settings);
            link.connect().await?;
            let position = link.query_position().await?;
            println!("X: {:.3} Y: {:.3} Z: {:.3}", position.x, position.y, position.z);
            link.close().await?;
        }
        Command::Solve { tl, tr, bl, br, out } => {
            let grid = PlateGrid::solve(
                settings.plate.rows,
                settings.plate.cols,
                parse_corner(&tl)?,
                parse_corner(&tr)?,
                parse_corner(&bl)?,
                parse_corner(&br)?,
            )?;
            wells::write_wells(&out, grid.positions())?;
        }
        Command::Capture {
            csv,
            picture,
            zstack,
        } => {
            let csv = csv.or_else(|| {
                (!settings.capture.input_csv.is_empty())
                    .then(|| PathBuf::from(&settings.capture.input_csv))
            });
            let csv = csv.ok_or_else(|| anyhow!("no well list: pass --csv or set capture.input_csv"))?;
            let well_list = wells::load_wells(&csv)?;

            let mode = if picture {
                // Camera backends are integration points behind the
                // ImageSensor trait; the built-in sensor writes stub frames.
                warn!("No camera backend compiled in; frames will be empty stubs");
                CaptureMode::Picture
            } else {
                CaptureMode::Preview
            };
            let plan = CapturePlan {
                mode,
                zstack: zstack.map_or_else(ZStackPlan::disabled, ZStackPlan::stack),
                output_dir: PathBuf::from(&settings.capture.output_dir),
                output_prefix: settings.capture.output_prefix.clone(),
                output_suffix: settings.capture.output_suffix.clone(),
                sensor_settings: settings.camera.settings.clone(),
            };

            let link = Arc::new(open_link(&settings));
            let mut handle = spawn_capture(
                link.clone(),
                Box::new(MockSensor::new()),
                well_list,
                plan,
                settings,
            );

            let cancel = handle.cancel_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Stop requested; finishing the current well");
                    cancel.store(true, Ordering::Relaxed);
                }
            });

            while let Some(event) = handle.events.recv().await {
                info!("{event:?}");
            }
            let outcome = handle.join().await?;
            if outcome.terminated {
                println!("Terminated after {} frames", outcome.captured);
            } else {
                println!("Completed: {} frames", outcome.captured);
            }
            link.close().await?;
        }
    }

    Ok(())
}
