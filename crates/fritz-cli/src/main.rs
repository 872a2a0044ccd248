use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use fritz_core::{
    default_specs, exposition, load_specs, spawn_directory_loader, ActionInvoker, CollectorConfig,
    DirectoryCell, DirectoryLoader, GatewayCollector, HomeCollector, HomeSource, ServiceDirectory,
    UpnpClient, DEFAULT_UPNP_PORT,
};
use secrecy::SecretString;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod server;
#[cfg(test)]
mod server_tests;

#[derive(Debug, Parser)]
#[command(name = "fritzbox-exporter")]
#[command(about = "Prometheus exporter for FRITZ!Box gateways (UPnP and home automation)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, default_value = ":9133")]
    listen_address: String,

    #[arg(long, default_value = "fritz.box")]
    gateway_address: String,

    #[arg(long, default_value_t = DEFAULT_UPNP_PORT, value_parser = clap::value_parser!(u16).range(1..=65534))]
    gateway_port: u16,

    /// Enables home-automation metrics.
    #[arg(long, env = "FRITZBOX_PASSWORD", hide_env_values = true)]
    gateway_password: Option<String>,

    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[arg(long, default_value_t = 60)]
    service_retry_secs: u64,

    #[arg(long, value_enum, default_value = "auto")]
    home_source: HomeSourceArg,

    /// JSON metric table replacing the built-in one.
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve /metrics (default).
    Serve,
    /// Run one collection pass and print it.
    Once {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print every service and the result of every get-only action.
    Tree,
    /// Print the decoded home-automation records.
    Home,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HomeSourceArg {
    Auto,
    Api,
    Scrape,
}

impl From<HomeSourceArg> for HomeSource {
    fn from(arg: HomeSourceArg) -> Self {
        match arg {
            HomeSourceArg::Auto => HomeSource::Auto,
            HomeSourceArg::Api => HomeSource::Api,
            HomeSourceArg::Scrape => HomeSource::Scrape,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    if cli.gateway_address.trim().is_empty() {
        bail!("gateway address must not be empty");
    }

    let config = CollectorConfig {
        gateway: cli.gateway_address.trim().to_string(),
        upnp_port: cli.gateway_port,
        request_timeout: Duration::from_millis(cli.timeout_ms),
        service_retry_interval: Duration::from_secs(cli.service_retry_secs),
        home_source: cli.home_source.into(),
        ..CollectorConfig::default()
    };

    let specs = match &cli.metrics_file {
        Some(path) => load_specs(path)
            .with_context(|| format!("cannot load metric table {}", path.display()))?,
        None => default_specs(),
    };

    let client = Arc::new(UpnpClient::from_config(&config)?);
    let home = match cli.gateway_password.filter(|p| !p.is_empty()) {
        Some(password) => Some(Arc::new(HomeCollector::new(
            config.http_client()?,
            &config,
            SecretString::from(password),
        )?)),
        None => None,
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let addr = server::resolve_listen_address(&cli.listen_address).await?;
            let cell = DirectoryCell::new();
            let _loader =
                spawn_directory_loader(Arc::clone(&client), cell.clone(), config.service_retry_interval);

            let gateway = GatewayCollector::new(config.gateway.clone(), specs, cell, client)?;
            if home.is_none() {
                info!("no gateway password set, home-automation metrics disabled");
            }
            server::serve(
                addr,
                server::AppState {
                    gateway: Arc::new(gateway),
                    home,
                },
            )
            .await?;
        }
        Command::Once { format } => {
            let cell = DirectoryCell::new();
            cell.publish(client.load_directory().await?);
            let gateway = GatewayCollector::new(config.gateway.clone(), specs, cell, client)?;

            let mut samples = gateway.collect().await;
            if let Some(home) = &home {
                samples.extend(home.collect().await);
            }

            match format {
                OutputFormat::Text => print!("{}", exposition::encode(&samples)?),
                OutputFormat::Json => {
                    let out = serde_json::json!({
                        "ts": Utc::now().to_rfc3339(),
                        "gateway": config.gateway,
                        "samples": samples,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Command::Tree => {
            let directory = client.load_directory().await?;
            print_tree(client.as_ref(), &directory).await;
        }
        Command::Home => {
            let Some(home) = home else {
                bail!("home-automation data needs --gateway-password or FRITZBOX_PASSWORD");
            };
            let data = home.fetch().await?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
    }

    Ok(())
}

async fn print_tree<I: ActionInvoker>(invoker: &I, directory: &ServiceDirectory) {
    for service in directory.services() {
        println!("{}: {}", service.device_name, service.service_type);

        for action in service.actions.values().filter(|a| a.is_get_only()) {
            let result = match invoker.call(service, action).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(service = %service.service_type, action = %action.name, error = %err, "call failed");
                    continue;
                }
            };

            println!("  {}", action.name);
            for arg in action.out_arguments() {
                match result.get(&arg.state_variable) {
                    Some(value) => println!("    {}: {value}", arg.state_variable),
                    None => println!("    {}: -", arg.state_variable),
                }
            }
        }
    }
}
