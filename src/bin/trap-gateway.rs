//! Gateway process: radio link in, MQTT out.
//!
//! Everything runs on one current-thread runtime; see
//! [`trap_relay::gateway::service`] for the loop.

use std::process::ExitCode;
use std::time::Instant;

use tracing_subscriber::EnvFilter;
use trap_relay::config::GatewayConfig;
use trap_relay::gateway::bridge::GatewayBridge;
use trap_relay::gateway::mq::MqttBroker;
use trap_relay::gateway::radio::RadioLink;
use trap_relay::gateway::service;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "gateway stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;
    tracing::info!(?config, "starting trap gateway");

    let broker = MqttBroker::from_config(&config)?;
    let link = RadioLink::bind(config.radio_bind).await?;
    let mut bridge = GatewayBridge::new(broker, config.bridge.clone(), Instant::now());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for the shutdown signal");
        }
    };
    service::serve(&link, &mut bridge, config.bridge.liveness_interval, shutdown).await;
    Ok(())
}
