//! Command line runner for the bot framework, with a few built-in
//! example bots.

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use crossbeam_channel::bounded;
use tracing::error;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use mcbot::client::{Client, ConnectOptions};
use mcbot::reconnect::ReconnectPolicy;

mod bots;
mod config;


#[derive(Parser)]
#[command(name = "mcbot", about = "A bot client for legacy blocky-world game servers", version)]
struct Args {
    /// Server host to connect to.
    host: String,
    /// Server port.
    #[arg(default_value_t = 25565)]
    port: u16,
    /// Bot name presented to the server.
    #[arg(short = 'n', long, default_value = "unknown")]
    username: String,
    /// Root log level, RUST_LOG overrides it per module.
    #[arg(short = 'l', long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    /// Which built-in bot to run.
    #[arg(long, value_enum, default_value_t = bots::BotKind::Idle)]
    bot: bots::BotKind,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}


fn main() -> ExitCode {

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // Help and version land here too; only misuse is a failure.
            let misuse = err.use_stderr();
            let _ = err.print();
            return if misuse { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder()
            .with_default_directive(LevelFilter::from(args.log_level).into())
            .from_env_lossy())
        .init();

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    }) {
        error!("failed to install ctrl-c handler: {e}");
        return ExitCode::FAILURE;
    }

    let options = ConnectOptions {
        username: args.username,
        host: args.host,
        port: args.port,
    };

    let mut bot = bots::new_bot(args.bot);
    let mut policy = ReconnectPolicy::default();

    let mut client = match Client::new(&config::client_config()) {
        Ok(client) => client,
        Err(e) => {
            error!("failed to initialize client: {e}");
            return ExitCode::FAILURE;
        }
    };

    match client.run_reconnecting(&mut *bot, &options, &shutdown_rx, &mut policy) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("client failed: {e}");
            ExitCode::FAILURE
        }
    }

}
