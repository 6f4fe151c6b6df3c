//! MQTT broker client.

use std::fmt::{self, Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use opentelemetry::global::get_text_map_propagator;
use paho_mqtt::async_client::AsyncClient as MqttClient;
use paho_mqtt::{
    ConnectOptions, ConnectOptionsBuilder, MessageBuilder as MqttMessageBuilder, Properties as MqttProps, Property,
    PropertyCode,
};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::GatewayConfig;

use super::bridge::{Broker, Publish};

/// The broker connection that event and liveness publishes go through.
pub struct MqttBroker {
    client: MqttClient,
    connect_options: ConnectOptions,
    gateway_id: String,
}

impl MqttBroker {
    pub fn new<T: AsRef<str>>(server_uri: &str, gateway_id: T, keepalive: Duration) -> Result<MqttBroker, Error> {
        let client = MqttClient::new(
            paho_mqtt::CreateOptionsBuilder::new()
                .server_uri(server_uri)
                .client_id(gateway_id.as_ref())
                .mqtt_version(paho_mqtt::MQTT_VERSION_5)
                .finalize(),
        )?;

        let connect_options = ConnectOptionsBuilder::new_v5()
            .keep_alive_interval(keepalive)
            .connect_timeout(keepalive)
            .clean_start(true)
            .finalize();

        Ok(MqttBroker {
            client,
            connect_options,
            gateway_id: gateway_id.as_ref().to_string(),
        })
    }

    /// Create the broker client from the gateway configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<MqttBroker, Error> {
        MqttBroker::new(&config.mqtt_server_uri, &config.gateway_id, config.keepalive)
    }
}

impl Broker for MqttBroker {
    type Error = Error;
    type Connect = Pin<Box<dyn Future<Output = Result<(), Error>>>>;

    /// Start connecting to the MQTT broker.
    ///
    /// The bridge calls this before any publish and again after a loss.
    #[tracing::instrument(skip(self))]
    fn connect(&mut self) -> Self::Connect {
        tracing::info!("connect to the MQTT broker");

        let token = self.client.connect(self.connect_options.clone());
        Box::pin(async move {
            match token.await {
                Ok(connection_info) => {
                    tracing::info!(info = ?connection_info, "connected to the MQTT broker");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(error = ?e, "failed to connect to the MQTT broker");
                    Err(e.into())
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Publish a JSON payload to its topic.
    #[tracing::instrument(err, skip(publish), fields(topic = %publish.topic))]
    async fn publish(&mut self, publish: Publish) -> Result<(), Error> {
        let event_id = uuid::Uuid::now_v7();
        let event_id_str = event_id.to_string();

        let event_emitted_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);

        tracing::debug!(event_id_str, event_emitted_at, "putting properties");

        let mut message_properties = MqttProps::new();
        message_properties.push(Property::new_string(PropertyCode::ContentType, "application/json")?)?;
        message_properties.push(Property::new_string_pair(PropertyCode::UserProperty, "event_id", &event_id_str)?)?;
        message_properties.push(Property::new_string_pair(PropertyCode::UserProperty, "gateway_id", &self.gateway_id)?)?;
        message_properties.push(Property::new_string_pair(PropertyCode::UserProperty, "emitted_at", &event_emitted_at)?)?;

        // tracing information
        let ctx = tracing::Span::current().context();
        get_text_map_propagator(|propagator| {
            propagator.inject_context(&ctx, &mut MqttCarrierInjector(&mut message_properties))
        });

        let message = MqttMessageBuilder::new()
            .topic(publish.topic)
            .payload(publish.payload)
            .qos(0)
            .properties(message_properties)
            .finalize();

        self.client.publish(message).await?;

        tracing::debug!("published to the MQTT broker");
        Ok(())
    }
}

impl Debug for MqttBroker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqttBroker")
            .field("gateway_id", &self.gateway_id)
            .finish()
    }
}

pub struct MqttCarrierInjector<'a>(pub &'a mut MqttProps);

impl<'a> opentelemetry::propagation::Injector for MqttCarrierInjector<'a> {
    fn set(&mut self, key: &str, value: String) {
        if let Err(e) = self.0.push_string_pair(PropertyCode::UserProperty, key, &value) {
            tracing::warn!(key, error = %e, "cannot inject trace context");
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("mqtt: {0}")]
    Mqtt(#[from] paho_mqtt::Error),
}
