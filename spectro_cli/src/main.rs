mod acquire;
mod cli;
mod error_fmt;
mod inspect;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use spectro_config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::acquire::{AcquireOpts, open_session, print_measurement, run_acquire};
use crate::cli::{Cli, Commands, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(err) = color_eyre::install() {
        eprintln!("warning: failed to install error hooks: {err}");
    }

    let mut file_guard = None;
    let code = match run(cli, &mut file_guard) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            if JSON_MODE.get().copied().unwrap_or(false) {
                println!("{}", format_error_json(&err));
            } else {
                eprintln!("{}", humanize(&err));
            }
            exit_code_for_error(&err)
        }
    };
    // Flush the file writer before exit skips destructors.
    drop(file_guard);
    std::process::exit(code);
}

fn run(cli: Cli, file_guard: &mut Option<WorkerGuard>) -> Result<()> {
    let cfg = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    *file_guard = init_tracing(&cli, &cfg)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .wrap_err("installing Ctrl-C handler")?;
    }

    let mut session = open_session(&cfg, shutdown)?;
    tracing::info!(
        model = %session.descriptor().model,
        serial = %session.descriptor().serial_number,
        "connected"
    );

    match cli.cmd {
        Commands::Acquire {
            integration_ms,
            gain_db,
            scans,
            roi,
            mode,
            laser,
            full,
        } => {
            let roi = match roi.as_deref() {
                Some([start, stop]) => Some((*start, *stop)),
                Some(_) => eyre::bail!("--roi takes exactly START and STOP"),
                None => None,
            };
            let opts = AcquireOpts {
                integration_ms,
                gain_db,
                scans,
                roi,
                mode,
                laser,
            };
            let m = run_acquire(&mut session, &opts)?;
            print_measurement(&m, session.descriptor(), cli.json, full);
        }
        Commands::Eeprom => inspect::print_descriptor(session.descriptor(), cli.json),
        Commands::SelfCheck => inspect::run_self_check(&mut session, cli.json)?,
    }
    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading config {}", path.display()))?;
    let cfg = spectro_config::load_toml(&text)
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Console layer on stderr (JSON with `--json`) plus an optional JSON file
/// layer from `[logging]`. RUST_LOG overrides `--log-level`.
fn init_tracing(cli: &Cli, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .wrap_err_with(|| format!("invalid --log-level {:?}", cli.log_level))?;

    let console = if cli.json {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter)
            .boxed()
    };
    let mut layers = vec![console];
    let mut guard = None;

    if let Some(file) = &cfg.logging.file {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
        let appender = match cfg.logging.rotation.as_deref().unwrap_or("never") {
            "daily" => rolling::daily(dir, name),
            "hourly" => rolling::hourly(dir, name),
            _ => rolling::never(dir, name),
        };
        let (writer, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        let level = cfg.logging.level.as_deref().unwrap_or("info");
        let file_filter = EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid logging.level {level:?}"))?;
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .with_filter(file_filter)
                .boxed(),
        );
    }

    Registry::default()
        .with(layers)
        .try_init()
        .wrap_err("initializing tracing")?;
    Ok(guard)
}
