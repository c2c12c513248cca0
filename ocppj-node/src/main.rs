//! OCPP-J Node - CLI running either side of OCPP-J 1.6
//!
//! # Usage
//!
//! ```bash
//! # Central system listening for charge points on ws://0.0.0.0:9000/ocpp/{id}
//! ocppj-node central-system --listen 0.0.0.0:9000
//!
//! # Ask every charge point for its configuration when it connects
//! ocppj-node central-system --listen 0.0.0.0:9000 --query-config
//!
//! # Charge point EK3-001 connecting to it
//! ocppj-node charge-point --url ws://localhost:9000/ocpp --id EK3-001
//!
//! # Verbose frame logging
//! RUST_LOG=ocppj_core=debug ocppj-node charge-point --id EK3-001
//! ```

mod handlers;

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ocppj_core::ocpp::{
    features, BootNotificationRequest, GetConfigurationRequest, HeartbeatRequest, RegistrationStatus,
};
use ocppj_core::rpc::{WsClient, WsServer};
use ocppj_core::{CallFailure, CentralSystem, ChargePoint, EngineConfig, SendError, WsConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// OCPP-J 1.6 central system or charge point
#[derive(Parser, Debug)]
#[command(name = "ocppj-node", author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Seconds to wait for the response to an outgoing call
    #[arg(long, global = true, default_value = "30")]
    call_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept charge point connections
    CentralSystem {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:9000")]
        listen: SocketAddr,

        /// Heartbeat interval handed out in BootNotification, in seconds
        #[arg(long, default_value = "300")]
        heartbeat_interval: i32,

        /// Send GetConfiguration to each charge point once it connects
        #[arg(long)]
        query_config: bool,
    },

    /// Connect to a central system as one charge point
    ChargePoint {
        /// Central system WebSocket URL (without the charge point id)
        #[arg(long, default_value = "ws://localhost:9000/ocpp")]
        url: String,

        /// Charge point identity
        #[arg(long, default_value = "EK3-001")]
        id: String,

        /// Vendor name
        #[arg(long, default_value = "Elektrokombinacija")]
        vendor: String,

        /// Model name
        #[arg(long, default_value = "EK3-OCPP")]
        model: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let config = EngineConfig::default().with_call_timeout(Duration::from_secs(cli.call_timeout));

    match cli.command {
        Commands::CentralSystem {
            listen,
            heartbeat_interval,
            query_config,
        } => run_central_system(config, listen, heartbeat_interval, query_config).await,
        Commands::ChargePoint { url, id, vendor, model } => {
            run_charge_point(config, url, id, vendor, model).await
        }
    }
}

async fn run_central_system(
    config: EngineConfig,
    listen: SocketAddr,
    heartbeat_interval: i32,
    query_config: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    print_banner(
        "Central System",
        &[("Listen", listen.to_string()), ("Heartbeat", format!("{}s", heartbeat_interval))],
    );

    let central = CentralSystem::new(config);
    central.set_handlers(handlers::central_system(heartbeat_interval));
    central.on_disconnect(|id| info!("Charge point {} went away", id));

    if query_config {
        let (connected_tx, mut connected_rx) = mpsc::unbounded_channel::<String>();
        central.on_connect(move |id| {
            let _ = connected_tx.send(id.to_string());
        });

        let querier = central.clone();
        tokio::spawn(async move {
            while let Some(id) = connected_rx.recv().await {
                let request = GetConfigurationRequest::new(["HeartbeatInterval", "ConnectionTimeOut", "NoSuchKey"]);
                let target = id.clone();
                let sent = querier.send_with::<features::GetConfiguration, _>(&id, request, move |outcome| {
                    match outcome {
                        Ok(conf) => {
                            for entry in &conf.configuration_key {
                                info!("[{}] {} = {:?}", target, entry.key, entry.value);
                            }
                            if !conf.unknown_key.is_empty() {
                                info!("[{}] unknown keys: {:?}", target, conf.unknown_key);
                            }
                        }
                        Err(e) => warn!("[{}] GetConfiguration failed: {}", target, e),
                    }
                });
                if let Err(e) = sent {
                    warn!("[{}] could not send GetConfiguration: {}", id, e);
                }
            }
        });
    }

    WsServer::new(central, WsConfig::default()).listen(listen).await?;
    Ok(())
}

async fn run_charge_point(
    config: EngineConfig,
    url: String,
    id: String,
    vendor: String,
    model: String,
) -> Result<(), Box<dyn std::error::Error>> {
    print_banner(
        "Charge Point",
        &[("Identity", id.clone()), ("URL", url.clone()), ("Vendor", format!("{} {}", vendor, model))],
    );

    let charge_point = ChargePoint::new(id, config);
    charge_point.set_handlers(handlers::charge_point(handlers::ConfigurationTable::with_defaults()));

    let (connected_tx, connected_rx) = mpsc::unbounded_channel();
    charge_point.on_connect(move |_| {
        let _ = connected_tx.send(());
    });
    tokio::spawn(session(charge_point.clone(), connected_rx, BootNotificationRequest::new(vendor, model)));

    WsClient::new(charge_point, url, WsConfig::default()).run().await;
    Ok(())
}

/// Boot on every (re)connect, then heartbeat at the interval the central system asks for
async fn session(
    charge_point: ChargePoint,
    mut connected: mpsc::UnboundedReceiver<()>,
    boot: BootNotificationRequest,
) {
    let mut interval: Option<Duration> = None;

    loop {
        tokio::select! {
            signal = connected.recv() => {
                if signal.is_none() {
                    break;
                }
                interval = boot_notification(&charge_point, boot.clone()).await;
            }

            _ = tokio::time::sleep(interval.unwrap_or_default()), if interval.is_some() => {
                match charge_point.send::<features::Heartbeat>(HeartbeatRequest {}) {
                    Ok(pending) => match pending.await {
                        Ok(conf) => debug!("Heartbeat acknowledged at {}", conf.current_time),
                        Err(CallFailure::ConnectionClosed) => interval = None,
                        Err(e) => warn!("Heartbeat failed: {}", e),
                    },
                    Err(SendError::UnknownConnection(_)) | Err(SendError::ConnectionClosed) => interval = None,
                    Err(e) => warn!("Heartbeat not sent: {}", e),
                }
            }
        }
    }
}

async fn boot_notification(charge_point: &ChargePoint, request: BootNotificationRequest) -> Option<Duration> {
    let pending = match charge_point.send::<features::BootNotification>(request) {
        Ok(pending) => pending,
        Err(e) => {
            warn!("BootNotification not sent: {}", e);
            return None;
        }
    };

    match pending.await {
        Ok(conf) => {
            info!("BootNotification {:?}, heartbeat every {}s", conf.status, conf.interval);
            match conf.status {
                RegistrationStatus::Accepted => Some(Duration::from_secs(conf.interval.max(1) as u64)),
                RegistrationStatus::Pending | RegistrationStatus::Rejected => None,
            }
        }
        Err(e) => {
            warn!("BootNotification failed: {}", e);
            None
        }
    }
}

fn print_banner(role: &str, rows: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║  OCPP-J 1.6 Node - {:<42} ║", role);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (label, value) in rows {
        println!("║  {:<9} {:<49} ║", format!("{}:", label), truncate(value, 49));
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ws://localhost:9000/ocpp/EK3-001", 10), "ws://lo...");
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["ocppj-node", "charge-point", "--id", "CP-7"]);
        match cli.command {
            Commands::ChargePoint { id, url, .. } => {
                assert_eq!(id, "CP-7");
                assert_eq!(url, "ws://localhost:9000/ocpp");
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::parse_from(["ocppj-node", "central-system", "--query-config", "--log-level", "debug"]);
        assert_eq!(cli.log_level, "debug");
        assert!(matches!(cli.command, Commands::CentralSystem { query_config: true, .. }));
    }
}
