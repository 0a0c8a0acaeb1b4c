// SPDX-FileCopyrightText: 2026 Paydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Paydesk — a stateful customer-service webhook responder.
//!
//! Binary entry point: loads configuration, then serves or prints the
//! effective configuration.

use clap::{Parser, Subcommand};

mod serve;

/// Paydesk — a stateful customer-service webhook responder.
#[derive(Parser, Debug)]
#[command(name = "paydesk", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the webhook responder.
    Serve,
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match paydesk_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            paydesk_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    init_tracing(&config.agent.log_level);

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(errors) = paydesk_config::validate_for_serve(&config) {
                paydesk_config::render_errors(&errors);
                std::process::exit(1);
            }
            if let Err(error) = serve::run(config).await {
                tracing::error!(%error, "server exited with error");
                std::process::exit(1);
            }
        }
        Some(Commands::Config) => match toml::to_string_pretty(&redacted(config)) {
            Ok(rendered) => println!("{rendered}"),
            Err(error) => {
                eprintln!("paydesk: failed to render config: {error}");
                std::process::exit(1);
            }
        },
        None => {
            println!("paydesk: use --help for available commands");
        }
    }
}

/// Blanks credentials before printing the effective configuration.
fn redacted(mut config: paydesk_config::PaydeskConfig) -> paydesk_config::PaydeskConfig {
    let blank = |secret: &mut Option<String>| {
        if secret.is_some() {
            *secret = Some("[redacted]".to_string());
        }
    };
    blank(&mut config.line.channel_secret);
    blank(&mut config.line.channel_token);
    blank(&mut config.answer.api_key);
    blank(&mut config.gateway.admin_token);
    config
}

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
