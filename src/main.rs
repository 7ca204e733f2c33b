use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use crossbeam_channel::{unbounded, Receiver};

mod app;
mod channel;
mod config;
mod coordinator;
mod error;
mod injector;
#[cfg(feature = "hooks")]
mod listener;
mod modes;
mod noise;
mod params;
mod timing;

#[cfg(test)]
mod tests;

use channel::ChannelId;
use config::FileConfig;
use coordinator::{ClickerHandle, Command, StatusEvent};
use error::{ClickerError, Result};
use injector::{EnigoSink, InputSink};

const TRIGGER_HELP: &str = "Triggers can be assigned in the window only when built with --features hooks. \
Otherwise set them in the config file, e.g.\n\n  [left]\n  trigger = \"q\"\n\n  [right]\n  trigger = \"MOUSE_MIDDLE\"";

#[derive(Parser, Debug)]
#[command(
    name = "twin_clicker",
    version,
    about = "Two independent click channels, one per mouse button",
    after_help = TRIGGER_HELP
)]
struct Cli {
    /// TOML file with [left], [right] and [timing] tables
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// No window; triggers come from the global listener only
    #[arg(long)]
    headless: bool,

    /// Spin the last few milliseconds before each click
    #[arg(long)]
    precise_timing: bool,

    /// Log every tick
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn run(cli: Cli) -> Result<()> {
    if cli.headless && !cfg!(feature = "hooks") {
        return Err(ClickerError::Headless);
    }

    let config = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let triggers = config.triggers()?;
    let settings = config.shared_settings();

    let (status_tx, status_rx) = unbounded();
    let handle = ClickerHandle::spawn(
        |alive| Box::new(EnigoSink::new(alive)) as Box<dyn InputSink>,
        Box::new(status_tx),
        Box::new(settings.clone()),
        config.timing.waiter(cli.precise_timing),
    )?;
    for (id, trigger) in ChannelId::ALL.into_iter().zip(triggers) {
        if trigger.is_some() {
            handle.send(Command::SetTrigger(id, trigger));
        }
    }

    #[cfg(feature = "hooks")]
    listener::spawn_listener(handle.sender(), cli.headless)?;

    if cli.headless {
        return run_headless(handle, status_rx);
    }
    app::run(handle, status_rx, settings).map_err(|e| ClickerError::Window(e.to_string()))
}

fn run_headless(mut handle: ClickerHandle, events: Receiver<StatusEvent>) -> Result<()> {
    log::info!("running headless, press a channel trigger to toggle it and F12 to quit");
    for event in events.iter() {
        match event {
            StatusEvent::Error { title, message } => log::error!("{title}: {message}"),
            StatusEvent::Warning { title, message } => log::warn!("{title}: {message}"),
            StatusEvent::StatusChanged { status, .. } => log::info!("status: {status}"),
            StatusEvent::TriggerAssigned { channel, label } => {
                log::info!("{channel} trigger: {}", label.as_deref().unwrap_or("none"));
            }
            StatusEvent::Shutdown { emergency } => {
                log::info!("shutting down (emergency: {emergency})");
                break;
            }
            other => log::debug!("{other:?}"),
        }
    }
    handle.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
