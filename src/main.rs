use chronicle::{Client, Config};
use std::env;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Initializes the application and drives the console loop.
///
/// This initializes the logging, loads the configuration and starts the multithreaded tokio
/// runtime. On the very first run a default configuration file is written and the process exits
/// with code 1 so the operator can fill in the account and server before going live.
fn main() -> ExitCode {
    // console logging plus a daily-rotating file copy
    let file_appender = tracing_appender::rolling::daily("logs", "chronicle.log");
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().compact().with_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .init();

    let config_path = env::var("CONFIG_FILE").unwrap_or("config.json".into());
    if !Config::exists(&config_path) {
        if let Err(err) = Config::write_default(&config_path) {
            warn!(cause = err.to_string(), "could not write default config");
        }
        info!(
            path = config_path.as_str(),
            "wrote a default configuration, edit it and start again"
        );
        return ExitCode::from(1);
    }

    let config = match Config::read(&config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(cause = err.to_string(), "could not load configuration");
            return ExitCode::from(1);
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(run(config, &config_path));

    ExitCode::SUCCESS
}

async fn run(config: Config, config_path: &str) {
    let client = Client::new(config, config_path);
    client.start().await;

    info!("console ready, type start / stop / restart / status / say / set / exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !client.on_console_command(&line).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(cause = err.to_string(), "console input failed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                client.on_console_command("exit").await;
                break;
            }
        }
    }

    client.save_config();
}
