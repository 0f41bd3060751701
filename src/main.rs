/*!
 * Tripwire CLI - serve or exercise the guarded greeting
 */

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tripwire::{
    config::{AppConfig, LogLevel},
    error::{Result, TripwireError, EXIT_SUCCESS},
    logging,
    server::{self, AppState},
};

#[derive(Parser)]
#[command(name = "tripwire")]
#[command(version, about = "Greeting service guarded by a circuit breaker and time limiter", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write JSON logs to this file instead of stdout
    #[arg(long = "log-file", value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to bind (overrides the config file)
        #[arg(short = 'b', long = "bind", value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Run the guarded greeting from the command line
    Greet {
        /// Who to greet
        #[arg(short = 'n', long = "name")]
        name: String,

        /// How many guarded calls to make
        #[arg(short = 't', long = "times", default_value_t = 1)]
        times: u32,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    // CLI flags override the file
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }
    config.verbose |= cli.verbose;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            runtime.block_on(serve(config))
        }
        Commands::Greet { name, times } => runtime.block_on(greet(config, &name, times)),
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .map_err(|e| {
            TripwireError::Server(format!(
                "Failed to bind {}: {}",
                config.server.bind_address, e
            ))
        })?;
    server::run_server(state, listener, server::shutdown_signal()).await
}

async fn greet(config: AppConfig, name: &str, times: u32) -> Result<()> {
    let state = AppState::from_config(&config)?;

    for call in 1..=times {
        let reply = state.guarded_greeting(name).await?;
        println!("[{}] {}", call, reply);
    }

    let metrics = state.greet_breaker().breaker().metrics();
    tracing::info!(
        state = %metrics.state,
        buffered = metrics.buffered_calls,
        failed = metrics.failed_calls,
        rejected = metrics.not_permitted_calls,
        "Greet breaker after {} calls",
        times
    );
    Ok(())
}
