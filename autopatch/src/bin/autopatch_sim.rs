//! Run calibration and patch attempts against the simulated rig.
//!
//! Subcommands:
//! - `calibrate`: calibrate and compare the result with the simulated geometry
//! - `patch`: calibrate (or load a stored calibration), then patch a cell
//!   placed under the given pixel
//! - `show`: print the effective configuration and any stored calibration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use autopatch::pressure_recorder::{default_file_name, save_samples, PressureRecorder};
use autopatch::telemetry::{FramePump, ResistanceSampler};
use autopatch::{
    CalibrationConfig, CalibrationStore, PatchConfig, PatchRobot, Rig, RigConfig, RigDevices,
    StatusEvent,
};
use chrono::Local;
use clap::{Args as ClapArgs, Parser, Subcommand};
use hardware::sim::{CellModel, OpticsModel, SimRig, SimRigConfig};
use hardware::Amplifier;
use meter_math::embed_planar;
use nalgebra::{Matrix3, Vector2, Vector3};
use shared::clock::{Clock, SimClock, SystemClock};
use shared::config_storage::ConfigStorage;
use shared::image_proc::PixelPos;
use tracing::{info, warn};

/// Simulated patch-clamp rig
#[derive(Parser, Debug)]
#[command(name = "autopatch_sim")]
#[command(about = "Calibrate and patch on a simulated rig")]
#[command(version)]
struct Args {
    /// Rig configuration JSON; replaces the calibration and patch options
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root of the calibration store (one directory per controller)
    #[arg(long, global = true)]
    store_root: Option<PathBuf>,

    #[command(flatten)]
    sim: SimArgs,

    #[command(flatten)]
    calibration: CalibrationConfig,

    #[command(flatten)]
    patch: PatchConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug)]
struct SimArgs {
    /// Square frame size in pixels
    #[arg(long, default_value = "192")]
    frame_size: usize,

    /// Image scale of the simulated optics
    #[arg(long, default_value = "2.0")]
    sim_um_per_px: f64,

    /// Platform rotation relative to the camera, degrees
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    sim_rotation_deg: f64,

    /// Run on wall time with frame and resistance telemetry threads
    #[arg(long)]
    threaded: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate and report the error against the simulated geometry
    Calibrate,

    /// Patch the cell shown at a pixel
    Patch {
        /// Column of the cell in the image
        #[arg(long)]
        x: f64,

        /// Row of the cell in the image
        #[arg(long)]
        y: f64,

        /// Record the pipette pressure to a CSV file (threaded mode only)
        #[arg(long)]
        record_pressure: bool,
    },

    /// Print the configuration and stored calibration
    Show,
}

fn controller_name(config: &RigConfig) -> &str {
    if config.controller.is_empty() {
        "sim"
    } else {
        &config.controller
    }
}

fn store_for(args: &Args, config: &RigConfig) -> Option<CalibrationStore> {
    args.store_root.as_ref().map(|root| {
        CalibrationStore::for_controller(
            &ConfigStorage::with_path(root.clone()),
            controller_name(config),
        )
    })
}

fn sim_config(sim: &SimArgs, cell: Option<Vector3<f64>>) -> SimRigConfig {
    let defaults = SimRigConfig::default();
    let optics = OpticsModel {
        rotation: meter_math::rotation_matrix(sim.sim_rotation_deg.to_radians()),
        um_per_px: sim.sim_um_per_px,
        ..defaults.optics.clone()
    };
    // Without a target the cell sits far below the working area
    let center = cell.unwrap_or_else(|| Vector3::new(0.0, 0.0, -1000.0));
    SimRigConfig {
        frame_width: sim.frame_size,
        frame_height: sim.frame_size,
        optics,
        cell: CellModel {
            center,
            ..CellModel::default()
        },
        ..defaults
    }
}

/// Microscope-frame point imaged at `pixel` with the microscope at its origin
fn point_under_pixel(config: &SimRigConfig, pixel: PixelPos) -> Result<Vector3<f64>> {
    let center = Vector2::new(
        (config.frame_width / 2) as f64,
        (config.frame_height / 2) as f64,
    );
    let rotation_inv = config
        .optics
        .rotation
        .try_inverse()
        .ok_or_else(|| anyhow!("simulated rotation is singular"))?;
    let offset = Vector2::new(pixel.x, pixel.y) - center;
    let shift = rotation_inv * offset * config.optics.um_per_px;
    Ok(Vector3::new(-shift.x, -shift.y, 0.0))
}

/// Background publishers kept alive for the duration of a run
struct Telemetry {
    frames: FramePump,
    resistance: ResistanceSampler,
}

impl Telemetry {
    fn stop(self) {
        info!("{} frames published", self.frames.frames_published());
        self.frames.stop();
        self.resistance.stop();
    }
}

fn build_rig(config: SimRigConfig, threaded: bool) -> Result<(SimRig, Rig, Option<Telemetry>)> {
    let clock: Arc<dyn Clock> = if threaded {
        Arc::new(SystemClock::new())
    } else {
        Arc::new(SimClock::new())
    };
    let sim = SimRig::new(config, clock);
    let mut devices = RigDevices::from_sim(&sim);

    if !threaded {
        let rig = Rig::new(devices);
        return Ok((sim, rig, None));
    }

    let amplifier: Arc<dyn Amplifier> = sim.amplifier.clone();
    let frames = FramePump::spawn(sim.camera(), Duration::from_millis(30))
        .context("starting frame pump")?;
    let resistance = ResistanceSampler::spawn(amplifier, Duration::from_millis(20))
        .context("starting resistance sampler")?;
    devices.frames = Box::new(frames.source());
    devices.resistance = Box::new(resistance.source());
    let rig = Rig::new(devices);
    Ok((sim, rig, Some(Telemetry { frames, resistance })))
}

fn log_events(robot: &PatchRobot) {
    robot.register_callback(|event| match event {
        StatusEvent::Message(message) => info!("{message}"),
        StatusEvent::Failed { stage, reason } => warn!("{stage}: {reason}"),
        _ => {}
    });
}

fn print_matrix(label: &str, m: &Matrix3<f64>) {
    println!("{label}:");
    for row in m.row_iter() {
        println!("  {:>9.4} {:>9.4} {:>9.4}", row[0], row[1], row[2]);
    }
}

fn cmd_calibrate(args: &Args, config: &RigConfig) -> Result<()> {
    let sim_config = sim_config(&args.sim, None);
    let (sim, rig, telemetry) = build_rig(sim_config, args.sim.threaded)?;
    let mut robot = PatchRobot::new(rig, config.calibration.clone(), config.patch.clone());
    if let Some(store) = store_for(args, config) {
        robot = robot.with_store(store)?;
    }
    log_events(&robot);

    robot.calibrate()?;
    let data = robot
        .engine()
        .data()
        .ok_or_else(|| anyhow!("calibration finished without results"))?;

    let optics = &sim.config().optics;
    print_matrix("Jacobian (measured)", &data.jacobian);
    print_matrix("Jacobian (simulated)", &optics.jacobian);
    print_matrix("Rotation (measured)", &data.rotation);
    print_matrix("Rotation (simulated)", &embed_planar(&optics.rotation));
    println!(
        "Scale: {:.4} µm/px measured, {:.4} µm/px simulated",
        data.um_per_px, optics.um_per_px
    );
    println!(
        "Jacobian error (max abs): {:.2e}",
        (data.jacobian - optics.jacobian).abs().max()
    );
    println!("Withdraw sign: {:+}", robot.engine().withdraw_sign());

    if let Some(t) = telemetry {
        t.stop();
    }
    Ok(())
}

fn cmd_patch(args: &Args, config: &RigConfig, pixel: PixelPos, record: bool) -> Result<()> {
    if record && !args.sim.threaded {
        bail!("--record-pressure needs --threaded");
    }
    let probe = sim_config(&args.sim, None);
    let cell = point_under_pixel(&probe, pixel)?;
    info!(
        "Cell placed at ({:.1}, {:.1}, {:.1}) µm",
        cell.x, cell.y, cell.z
    );

    let (sim, rig, telemetry) = build_rig(sim_config(&args.sim, Some(cell)), args.sim.threaded)?;
    let mut robot = PatchRobot::new(rig, config.calibration.clone(), config.patch.clone());
    if let Some(store) = store_for(args, config) {
        robot = robot.with_store(store)?;
    }
    log_events(&robot);

    if !robot.engine().is_calibrated() {
        robot.calibrate()?;
    }

    let recorder = if record {
        Some(PressureRecorder::start(
            sim.pressure.clone(),
            sim.clock.clone(),
            usize::MAX,
        )?)
    } else {
        None
    };

    let outcome = robot.patch_at(pixel);

    if let Some(recorder) = recorder {
        let samples = recorder.stop();
        let path = PathBuf::from(default_file_name(Local::now()));
        save_samples(&path, &samples)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("{} pressure samples written to {}", samples.len(), path.display());
    }
    if let Some(t) = telemetry {
        t.stop();
    }
    robot.shutdown();

    let outcome = outcome?;
    println!("Outcome: {outcome:?}");
    println!("Zaps delivered: {}", sim.amplifier.zap_count());
    Ok(())
}

fn cmd_show(args: &Args, config: &RigConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    let Some(store) = store_for(args, config) else {
        println!("No calibration store configured");
        return Ok(());
    };
    match store.load()? {
        Some(data) => {
            print_matrix("Jacobian", &data.jacobian);
            print_matrix("Rotation", &data.rotation);
            println!("Scale: {:.4} µm/px", data.um_per_px);
            println!(
                "Initial tip: ({:.1}, {:.1}), template offset ({:.1}, {:.1})",
                data.initial_tip.x,
                data.initial_tip.y,
                data.template_offset.x,
                data.template_offset.y
            );
        }
        None => println!("Not calibrated ({})", store.dir().display()),
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RigConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RigConfig {
            controller: String::new(),
            calibration: args.calibration.clone(),
            patch: args.patch.clone(),
        },
    };

    match &args.command {
        Command::Calibrate => cmd_calibrate(&args, &config),
        Command::Patch {
            x,
            y,
            record_pressure,
        } => cmd_patch(&args, &config, PixelPos::new(*x, *y), *record_pressure),
        Command::Show => cmd_show(&args, &config),
    }
}
