//! chatgate - Streaming chat gateway for OpenAI-compatible LLM providers
//!
//! Accepts chat requests over HTTP, rotates provider API keys, and streams
//! the reply back as NDJSON frames with heartbeats and an inactivity timeout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use chatgate::config::{Config, KeySource};
use chatgate::providers::ProviderRegistry;
use chatgate::proxy::run_server;

#[derive(Parser)]
#[command(name = "chatgate")]
#[command(about = "Streaming chat gateway for OpenAI-compatible LLM providers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers, endpoints and models
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

/// Handle for swapping the log filter once the config is loaded.
type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// `RUST_LOG` if set, otherwise `level` for this crate and the HTTP trace layer.
fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("chatgate={0},tower_http={0}", level).into())
}

fn build_subscriber<W>(
    default_level: &str,
    writer: W,
) -> (impl tracing::Subscriber + Send + Sync + 'static, FilterHandle)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(log_filter(default_level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer));
    (subscriber, handle)
}

/// Install the global subscriber before the config is read so that
/// config-time warnings are not lost.
fn init_tracing(default_level: &str) -> FilterHandle {
    let (subscriber, handle) = build_subscriber(default_level, std::io::stdout);
    subscriber.init();
    handle
}

/// Apply the `[logging] level` from the loaded config.
fn apply_log_level(handle: &FilterHandle, level: &str) {
    if let Err(e) = handle.reload(log_filter(level)) {
        tracing::warn!(level = %level, error = %e, "Failed to apply configured log level");
    }
}

fn load(path: &str) -> anyhow::Result<(Config, Vec<(String, KeySource)>)> {
    Config::from_file_with_env(path).with_context(|| format!("Failed to load config '{}'", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let filter = init_tracing("info");
            let (mut loaded, key_sources) = load(&config)?;
            apply_log_level(&filter, &loaded.logging.level);
            tracing::info!(config = %config, "Loaded configuration");

            for (provider, source) in &key_sources {
                tracing::info!(provider = %provider, source = %source, "Resolved API keys");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            run_server(loaded).await
        }

        Commands::Check { config } => {
            init_tracing("warn");
            let (loaded, key_sources) = load(&config)?;

            println!("Configuration OK: {}", config);
            println!("  listen: {}", loaded.server.listen);
            println!(
                "  heartbeat: {}s, inactivity timeout: {}s",
                loaded.gateway.heartbeat_interval_secs, loaded.gateway.inactivity_timeout_secs
            );

            let mut missing = Vec::new();
            for (provider, source) in &key_sources {
                let count = loaded
                    .providers
                    .iter()
                    .find(|p| &p.name == provider)
                    .map(|p| p.api_keys.len())
                    .unwrap_or(0);
                println!("  {}: {} key(s) via {}", provider, count, source);
                if count == 0 {
                    missing.push(provider.clone());
                }
            }

            if !missing.is_empty() {
                anyhow::bail!("No credentials for provider(s): {}", missing.join(", "));
            }
            Ok(())
        }

        Commands::Providers { config } => {
            init_tracing("warn");
            let (loaded, _) = load(&config)?;
            let registry = ProviderRegistry::from_config(&loaded, reqwest::Client::new());

            for provider in &loaded.providers {
                let kind = provider
                    .resolved_kind()
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let endpoint = provider.endpoint().unwrap_or_default();
                println!("{} ({}) -> {}", provider.name, kind, endpoint);

                match registry.get(&provider.name) {
                    Ok(adapter) => {
                        for model in adapter.available_models() {
                            let reasoning = match &model.reasoning {
                                Some(r) if r.required => " [reasoning: required]",
                                Some(_) => " [reasoning: optional]",
                                None => "",
                            };
                            println!("  - {} ({}){}", model.id, model.name, reasoning);
                        }
                    }
                    Err(_) => println!("  (disabled: no credentials)"),
                }
            }
            Ok(())
        }
    }
}
