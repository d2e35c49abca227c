use std::sync::Arc;

use clap::Parser;
use log::{error, info};

use gesture_relay::prelude::*;
use gesture_relay::serial::supervise;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match RelayConfig::from_args(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: RelayConfig) -> Result<()> {
    let hub = Arc::new(BroadcastHub::new(config.format));
    let power = PowerController::new(Arc::new(config.display_power()), config.off_delay);
    let relay = Relay::new(Arc::clone(&hub), power.clone());

    let listener = HubServer::bind(&config.listen).await?;
    let server = Arc::new(HubServer::new(hub, config.send_timeout));
    let server_task = tokio::spawn(server.serve(listener));

    let opener = SerialOpener::new(config.port.clone());
    let retry = config.retry.clone();
    let serial_task = tokio::spawn(async move {
        let err = supervise(&opener, &retry, |line| {
            relay.handle_line(line);
        })
        .await;
        // display clients stay connected without the sensor
        error!("Serial link lost for good: {err}");
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    serial_task.abort();
    server_task.abort();
    power.shutdown();
    Ok(())
}
