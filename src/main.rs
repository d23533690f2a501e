mod calibration;
mod config;
mod control;
mod devices;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;

use calibration::CalibrationStore;
use config::Config;
use control::{Calibrator, ConsolePrompt, ControlLoop, DutyCycleMapper};
use devices::{ModbusInverter, PwmMeter};

/// Drive an analog panel meter from a solar inverter's live output.
///
/// With no subcommand the meter is driven from live readings, same as `run`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Step the meter through the calibration levels and record the dial
    /// readings instead of running
    #[arg(long)]
    calibrate: bool,

    /// JSON configuration file; missing fields use built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Calibration curve location, overrides the configured path
    #[arg(long)]
    calibration_file: Option<PathBuf>,

    /// Log every sample to the log file
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Poll the inverter and drive the meter (default)
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Run,
    Calibrate,
}

impl Args {
    fn mode(&self) -> Result<Mode, clap::Error> {
        match (self.calibrate, self.command) {
            (true, Some(Command::Run)) => Err(Args::command().error(
                ErrorKind::ArgumentConflict,
                "--calibrate cannot be combined with the run subcommand",
            )),
            (true, None) => Ok(Mode::Calibrate),
            (false, _) => Ok(Mode::Run),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mode = args.mode().unwrap_or_else(|e| e.exit());

    let _guard = setup_logging(args.verbose);
    info!("Starting sundial");

    match run(mode, args) {
        Ok(()) => {
            info!("Sundial shutting down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fatal: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(mode: Mode, args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(path) = args.calibration_file {
        config.calibration_file = path;
    }
    let config = config;

    let store = CalibrationStore::new(&config.calibration_file);

    if mode == Mode::Calibrate {
        let mut meter = PwmMeter::open(&config.meter)?;
        let mut prompt = ConsolePrompt;
        let curve = Calibrator::new(&config, &mut meter, &mut prompt).run(&store)?;
        info!("Calibration captured {} points", curve.len());
        return Ok(());
    }

    // A file that exists but cannot be trusted stops startup
    let curve = store.load()?;
    if let Some(curve) = &curve {
        if !curve.is_monotonic() {
            warn!("Calibration readings are not strictly increasing, correction is approximate");
        }
    }
    let mapper = DutyCycleMapper::new(config.max_power_watts, curve.as_ref());
    let meter = PwmMeter::open(&config.meter)?;

    let inverter = ModbusInverter::new(&config);
    let mut control = ControlLoop::new(&config, inverter, meter, mapper);
    control.run()?;
    Ok(())
}

fn setup_logging(verbose: bool) -> WorkerGuard {
    // Daily rotated file; the console is kept for readings and prompts
    let file_appender = rolling::daily("logs", "sundial.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_level(true)
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .init();
    guard
}
