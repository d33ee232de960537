use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flag_relay::{config::Config, server::Server};

#[derive(Parser, Debug)]
#[command(name = "flag-relay")]
#[command(about = "Multi-tenant fan-out relay for a feature-flag streaming service")]
#[command(version)]
struct Args {
    /// Path to the INI configuration file
    #[arg(short, long, default_value = "config.ini")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("loading configuration from {:?}", args.config);

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.validate {
        info!("configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let exit_on_error = config.main.exit_on_error;
    let server = Server::new(config);

    info!("starting flag-relay");
    if let Err(err) = server.run().await {
        error!(error = %err, "relay exited with an error");
        if exit_on_error {
            return Ok(ExitCode::FAILURE);
        }
    }

    Ok(ExitCode::SUCCESS)
}
