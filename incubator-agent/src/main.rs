use anyhow::{Context, Result};
use clap::Parser;
use incubator_agent::{init_logging, init_logging_from_env, Agent, AgentConfig, Collaborators, LoggingMode};
use std::path::PathBuf;

/// Incubator device agent
///
/// Keeps the incubator's shared state in sync with the cloud, the control
/// board, the protocol scheduler and the camera.
#[derive(Parser, Debug)]
#[command(name = "incubator-agent")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging mode; overrides INCUBATOR_LOG_MODE
    #[arg(long, value_enum)]
    log_mode: Option<LoggingMode>,

    /// host:port of the TCP message bridge; overrides cloud.bridge
    #[arg(long)]
    bridge: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.log_mode {
        Some(mode) => init_logging(mode),
        None => init_logging_from_env(),
    }
    .context("Failed to initialize logging")?;

    let mut config = AgentConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bridge) = args.bridge {
        config.cloud.bridge = Some(bridge);
    }

    let collaborators = Collaborators::for_config(&config);
    let agent = Agent::new(config, collaborators).context("Failed to initialize agent")?;

    let shutdown = agent.shutdown_signal();
    ctrlc::set_handler(move || shutdown.trigger()).context("Failed to install Ctrl+C handler")?;

    agent.start().context("Failed to start agent")?;
    agent.wait();
    agent.shutdown();

    Ok(())
}
