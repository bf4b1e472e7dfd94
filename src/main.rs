//! Cetus PCR: command-line front end.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Adapters (outer ring)                     │
//! │                                                              │
//! │  SystemPorts      CsvRunLogSink    JsonExperimentStore       │
//! │  (PortOpener)     (RunLogSink)     (ExperimentStore)         │
//! │  SystemClock      LogEventSink                               │
//! │  (Clock)          (EventSink)                                │
//! │                                                              │
//! │  ──────────────── Port Trait Boundary ───────────────────    │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  AppContext                                            │  │
//! │  │  DeviceLink · TelemetryMonitor · CycleController       │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::info;
use tracing_subscriber::EnvFilter;

use cetus_pcr::adapters::csv_log::CsvRunLogSink;
use cetus_pcr::adapters::log_sink::LogEventSink;
use cetus_pcr::adapters::serial::SystemPorts;
use cetus_pcr::adapters::store::JsonExperimentStore;
use cetus_pcr::app::service::{AppContext, RunHandle};
use cetus_pcr::config::SystemConfig;
use cetus_pcr::control::cycle::RunReport;
use cetus_pcr::experiment::{Experiment, Step, format_duration, validate_entry};
use cetus_pcr::fsm::RunStatus;
use cetus_pcr::link::transport::PortOpener;

#[derive(Parser)]
#[command(name = "cetus", version, about = "Cetus PCR thermal cycler controller")]
struct Cli {
    /// Settings file (missing file means defaults)
    #[arg(long, default_value = "settings.json")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports and their descriptions
    Ports,
    /// List saved experiments
    List,
    /// Show one experiment in detail
    Show {
        /// Experiment name
        name: String,
    },
    /// Create an experiment and save it
    Add {
        /// Experiment name
        name: String,
        /// Number of cycles
        #[arg(long)]
        cycles: u32,
        /// Final hold temperature (°C)
        #[arg(long, default_value_t = 4)]
        final_hold: i32,
        /// Step as NAME:TEMP:SECONDS (repeatable, in order)
        #[arg(long = "step", value_parser = parse_step, required = true)]
        steps: Vec<Step>,
    },
    /// Delete an experiment
    Remove {
        /// Experiment name
        name: String,
    },
    /// Connect to the device and run an experiment (press Enter to cancel)
    Run {
        /// Experiment name
        name: String,
    },
    /// Connect to the device and run the cooling routine
    Cool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SystemConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let store = JsonExperimentStore::new(config.experiments_path.clone());
    let mut app = AppContext::new(config, Box::new(store)).context("loading experiments")?;

    match cli.command {
        Commands::Ports => list_ports()?,
        Commands::List => {
            if app.experiments().is_empty() {
                println!("No experiments saved.");
            }
            for e in app.experiments() {
                println!(
                    "{:<24} {:>3} cycle(s)  {:>2} step(s)  ~{}",
                    e.name,
                    e.cycle_count,
                    e.steps.len(),
                    format_duration(e.estimated_duration_seconds())
                );
            }
        }
        Commands::Show { name } => {
            let e = app
                .experiment(&name)
                .with_context(|| format!("no experiment named {name:?}"))?;
            print!("{e}");
            println!("-> estimated: {}", format_duration(e.estimated_duration_seconds()));
        }
        Commands::Add {
            name,
            cycles,
            final_hold,
            steps,
        } => {
            let mut experiment = Experiment::new(&name, cycles, final_hold);
            experiment.steps = steps;
            experiment.validate()?;
            println!("{experiment}");
            app.add_experiment(experiment);
            app.save()?;
        }
        Commands::Remove { name } => {
            if app.remove_experiment(&name).is_none() {
                bail!("no experiment named {name:?}");
            }
            app.save()?;
            println!("Removed {name:?}.");
        }
        Commands::Run { name } => {
            connect(&mut app, &SystemPorts::new())?;
            let sink = CsvRunLogSink::new(app.config().log_dir.clone());
            let handle = app.start_run(&name, Box::new(sink), LogEventSink::new())?;
            report(&watch(handle)?);
        }
        Commands::Cool => {
            connect(&mut app, &SystemPorts::new())?;
            let sink = CsvRunLogSink::new(app.config().log_dir.clone());
            let handle = app.start_cooling(Box::new(sink), LogEventSink::new())?;
            report(&watch(handle)?);
            if app.take_cooling_complete() {
                println!("Device reports cooling finished.");
            }
        }
    }

    app.disconnect();
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = SystemPorts::new().available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found.");
    }
    for p in ports {
        println!("{:<20} {}", p.name, p.description);
    }
    Ok(())
}

fn connect(app: &mut AppContext, opener: &dyn PortOpener) -> Result<()> {
    println!("Looking for the Cetus PCR...");
    let state = app.connect(opener).context("connecting to the device")?;
    println!(
        "Connected on {}.",
        state.port_identifier.as_deref().unwrap_or("?")
    );
    Ok(())
}

/// Print progress until the run ends; Enter on stdin cancels it.
fn watch(handle: RunHandle) -> Result<RunReport> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin-cancel".into())
        .spawn(move || {
            let mut line = String::new();
            // EOF (stdin closed) is not a cancel request.
            if matches!(io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
                let _ = tx.send(());
            }
        })
        .context("spawning stdin watcher")?;
    println!("Running. Press Enter to cancel.");

    let mut cancelled = false;
    while !handle.is_finished() {
        if !cancelled && rx.try_recv().is_ok() {
            info!("cancel requested from the terminal");
            handle.cancel();
            cancelled = true;
        }
        let p = handle.progress();
        if p.is_running {
            print!(
                "\rcycle {:>3} | step {:<12} | sp {:>5.1}\u{00b0}C | {} left      ",
                p.current_cycle,
                p.current_step_name,
                p.setpoint,
                format_duration(p.remaining_seconds())
            );
            let _ = io::stdout().flush();
        }
        thread::sleep(Duration::from_millis(500));
    }
    println!();
    Ok(handle.join()?)
}

fn report(r: &RunReport) {
    match r.status {
        RunStatus::Completed => println!(
            "\"{}\" completed: {} step(s) in {}.",
            r.experiment,
            r.steps_executed,
            format_duration(r.elapsed_seconds as u64)
        ),
        RunStatus::Cancelled => println!("\"{}\" cancelled.", r.experiment),
        _ => println!(
            "\"{}\" aborted: {}. Reconnect required.",
            r.experiment,
            r.fault.map_or_else(|| "unknown fault".to_string(), |e| e.to_string())
        ),
    }
    if let Some(path) = &r.log_path {
        println!("Log saved to {}.", path.display());
    }
    if let Some(e) = r.log_error {
        println!("Log could not be saved: {e}.");
    }
}

/// Parse `NAME:TEMP:SECONDS`.  Temperature and duration use the same
/// entry rules as the experiment editor: digits only, at most three.
fn parse_step(s: &str) -> std::result::Result<Step, String> {
    let mut parts = s.rsplitn(3, ':');
    let (Some(secs), Some(temp), Some(name)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected NAME:TEMP:SECONDS, got {s:?}"));
    };
    if name.is_empty() {
        return Err("step name is empty".to_string());
    }
    for (field, value) in [("temperature", temp), ("duration", secs)] {
        if value.is_empty() || !validate_entry(value) {
            return Err(format!("{field} must be 1-3 digits, got {value:?}"));
        }
    }
    let temp = temp.parse().map_err(|e| format!("temperature: {e}"))?;
    let secs = secs.parse().map_err(|e| format!("duration: {e}"))?;
    Ok(Step::new(name, temp, secs))
}
