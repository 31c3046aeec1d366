mod config;
mod telemetry;

use clap::{Parser, Subcommand};
use config::Config;
use shared::metrics_defs::describe;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "adminrouter", version, about = "Admin Router for DC/OS masters")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the proxy and admin listeners
    Run {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration, then exit
    CheckConfig {
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Print every metric the service emits
    ListMetrics,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run { config } => run(config),
        CliCommand::CheckConfig { config } => match load_config(config) {
            Ok(_) => {
                println!("Config is valid");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        },
        CliCommand::ListMetrics => {
            println!("{}", describe(cache::metrics_defs::ALL_METRICS));
            println!("{}", describe(proxy::metrics_defs::ALL_METRICS));
            ExitCode::SUCCESS
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config, config::ConfigError> {
    Config::load(path.as_deref(), |key| std::env::var(key).ok())
}

fn run(path: Option<PathBuf>) -> ExitCode {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    // Sentry has to be set up before the runtime starts its threads.
    let _sentry = telemetry::init(&config.common);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Cannot start the runtime");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting adminrouter");
    match runtime.block_on(proxy::run(config.proxy)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Adminrouter stopped");
            ExitCode::FAILURE
        }
    }
}
