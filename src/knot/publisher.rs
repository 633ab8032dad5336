use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use thiserror::Error;

use crate::constants::topics;

use super::entities::{Config, Data, Device};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    MqttClient(#[from] rumqttc::ClientError),
    #[error("could not encode payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outbound side of the KNoT handshake. `token` is the user token the gateway runs with.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_device_register(&self, token: &str, device: &Device)
        -> Result<(), PublishError>;
    async fn publish_device_auth(&self, token: &str, device: &Device) -> Result<(), PublishError>;
    async fn publish_device_update_config(
        &self,
        token: &str,
        device: &Device,
    ) -> Result<(), PublishError>;
    async fn publish_device_data(
        &self,
        token: &str,
        device: &Device,
        data: &[Data],
    ) -> Result<(), PublishError>;
}

#[derive(Serialize)]
struct RegisterPayload<'a> {
    authorization: &'a str,
    id: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct AuthPayload<'a> {
    authorization: &'a str,
    id: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct ConfigPayload<'a> {
    authorization: &'a str,
    id: &'a str,
    config: &'a [Config],
}

#[derive(Serialize)]
struct DataPayload<'a> {
    authorization: &'a str,
    id: &'a str,
    data: &'a [Data],
}

/// Publishes requests as JSON on the KNoT routing keys
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub fn new(client: AsyncClient) -> Self {
        MqttPublisher { client }
    }

    async fn send(&self, topic: &str, payload: &impl Serialize) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(payload)?;
        log::debug!("Publishing {} bytes to {}", payload.len(), topic);
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish_device_register(
        &self,
        token: &str,
        device: &Device,
    ) -> Result<(), PublishError> {
        let payload = RegisterPayload {
            authorization: token,
            id: &device.id,
            name: &device.name,
        };
        self.send(topics::DEVICE_REGISTER, &payload).await
    }

    async fn publish_device_auth(&self, token: &str, device: &Device) -> Result<(), PublishError> {
        let payload = AuthPayload {
            authorization: token,
            id: &device.id,
            token: &device.token,
        };
        self.send(topics::DEVICE_AUTH, &payload).await
    }

    async fn publish_device_update_config(
        &self,
        token: &str,
        device: &Device,
    ) -> Result<(), PublishError> {
        let payload = ConfigPayload {
            authorization: token,
            id: &device.id,
            config: &device.config,
        };
        self.send(topics::DEVICE_CONFIG_SENT, &payload).await
    }

    async fn publish_device_data(
        &self,
        token: &str,
        device: &Device,
        data: &[Data],
    ) -> Result<(), PublishError> {
        let payload = DataPayload {
            authorization: token,
            id: &device.id,
            data,
        };
        self.send(topics::DATA_SENT, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_shapes() {
        let data = [Data {
            sensor_id: 1,
            value: Some(json!(21.5)),
            timestamp: None,
        }];
        let encoded = serde_json::to_value(DataPayload {
            authorization: "user",
            id: "0a1b2c3d4e5f6789",
            data: &data,
        })
        .unwrap();
        assert_eq!(
            encoded,
            json!({
                "authorization": "user",
                "id": "0a1b2c3d4e5f6789",
                "data": [{"sensorId": 1, "value": 21.5, "timestamp": null}]
            })
        );

        let encoded = serde_json::to_value(AuthPayload {
            authorization: "user",
            id: "0a1b2c3d4e5f6789",
            token: "abc",
        })
        .unwrap();
        assert_eq!(encoded["token"], "abc");
    }
}
