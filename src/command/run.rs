use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinError;

use crate::constants::defaults;
use crate::interfaces::{kvpath, mqtt};
use crate::knot::{Integration, KvPersister, MqttPublisher};
use crate::settings::Settings;

pub async fn run() -> Result<()> {
    let settings = Settings::from_env()?;
    let store = KvPersister::open(kvpath::sqlite_store())?;

    let (client, eventloop) = mqtt::client_conn(
        &settings.mqtt_host,
        settings.mqtt_port,
        mqtt::get_rand_client_id(Some(defaults::MQTT_CLIENT_PREFIX)),
    );
    let publisher = Arc::new(MqttPublisher::new(client.clone()));

    let integration = Integration::start(settings.integration(), Box::new(store), publisher)?;
    let shutdown = integration.shutdown_token();

    let subscriber = tokio::spawn(mqtt::run_subscriber(
        client.clone(),
        eventloop,
        integration.events(),
        shutdown.clone(),
    ));
    let registry_publisher = tokio::spawn(mqtt::publish_registry(
        client,
        integration.snapshots(),
        shutdown.clone(),
    ));

    log::info!("KNoT gateway running");
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            log::info!("Interrupted; shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    let res = integration.close().await;
    let (subscriber, registry_publisher) = tokio::join!(subscriber, registry_publisher);
    joined_cleanly("MQTT subscriber", subscriber);
    joined_cleanly("Registry publisher", registry_publisher);
    res?;

    log::info!("KNoT gateway stopped");
    Ok(())
}

fn joined_cleanly(task: &str, res: Result<(), JoinError>) -> bool {
    match res {
        Ok(()) => true,
        Err(e) => {
            log::error!("{task} task did not finish cleanly: {e}");
            false
        }
    }
}
