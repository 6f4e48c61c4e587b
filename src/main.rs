use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use modbus_mqtt_bridge::cli::Cli;
use modbus_mqtt_bridge::config::Config;
use modbus_mqtt_bridge::mqtt::Mqtt;
use modbus_mqtt_bridge::registry::Registry;
use modbus_mqtt_bridge::signals::{self, ShutdownFlag};
use modbus_mqtt_bridge::wakeup::Wakeup;
use modbus_mqtt_bridge::{pollfile, scheduler};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _logging_guard = match modbus_mqtt_bridge::logging::init(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), modbus_mqtt_bridge::error::Error> {
    info!("starting modbus-mqtt bridge");

    let shutdown = ShutdownFlag::new();
    let flush_requested = signals::install(shutdown.clone());

    let mqtt = Arc::new(Mqtt::connect(&config.mqtt).await?);
    let wakeup = Wakeup::new();
    let mut registry = Registry::new(mqtt.clone(), config.modbus.max_re_time, wakeup.clone());

    if let Some(path) = &config.modbus.poll_list {
        let text = std::fs::read_to_string(path).map_err(|e| {
            modbus_mqtt_bridge::error::Error::FatalStartup(format!(
                "cannot read poll list {}: {e}",
                path.display()
            ))
        })?;
        for entry in pollfile::parse(&text) {
            if let Err(e) = registry
                .add_poll(&entry.host.to_string(), entry.port, entry.poll)
                .await
            {
                tracing::warn!(error = %e, "failed to add poll from poll-list file");
            }
        }
    }

    while !shutdown.is_set() {
        let sleep_for = scheduler::tick(&registry).await;

        if flush_requested.swap(false, Ordering::AcqRel) {
            info!("flushing log buffers on SIGUSR1");
        }

        wakeup.sleep(sleep_for).await;
    }

    info!("shutting down");
    registry.shutdown().await;
    Ok(())
}
