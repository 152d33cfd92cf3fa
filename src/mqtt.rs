use crate::prelude::*;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use serde::Serialize;
use std::collections::BTreeMap;

const PUBLISH_ATTEMPTS: u32 = 3;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

#[derive(Serialize)]
struct RecordPayload<'a> {
    device: &'a str,
    time: String,
    buffered: &'static str,
    values: BTreeMap<&'a str, Value>,
}

impl Message {
    /// Grott-compatible JSON document for one record.
    pub fn for_record(record: &Record, topic: &str, retain: bool) -> Result<Message> {
        let mut values = BTreeMap::new();
        values.insert("datalogserial", Value::Text(record.datalogger_serial.clone()));
        values.insert("pvserial", Value::Text(record.inverter_serial.clone()));
        for (name, value) in &record.data {
            values.insert(name.as_str(), value.clone());
        }

        let payload = RecordPayload {
            device: record.device(),
            time: record.date.format("%Y-%m-%dT%H:%M:%S").to_string(),
            buffered: if record.is_buffered() { "yes" } else { "no" },
            values,
        };

        Ok(Message {
            topic: topic.to_owned(),
            retain,
            payload: serde_json::to_string(&payload)?,
        })
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("growatt-bridge", c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        Ok(())
    }

    // drives the connection; we subscribe to nothing so incoming is just acks
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_mqtt.subscribe();

        loop {
            tokio::select! {
                msg = shutdown.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        _ => continue,
                    }
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => info!("mqtt connected"),
                        Err(e) => {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                        _ => {} // keepalives etc
                    }
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await {
                Ok(Shutdown) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Ok(Message(message)) => self.publish(&client, message).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("mqtt sender lagged, {} messages dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("Channel closed"),
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    async fn publish(&self, client: &AsyncClient, message: Message) {
        debug!("publishing: {} = {}", message.topic, message.payload);

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match client
                .publish(&message.topic, QoS::AtLeastOnce, message.retain, message.payload.as_bytes())
                .await
            {
                Ok(_) => return,
                Err(err) => {
                    error!(
                        "MQTT publish failed: {:?} - retrying in 10s (attempt {}/{})",
                        err, attempt, PUBLISH_ATTEMPTS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                }
            }
        }

        error!("giving up publishing to {}", message.topic);
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().topic())
    }
}

#[async_trait]
impl RecordSink for Mqtt {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn handle(&self, record: &Record) -> Result<()> {
        let mqtt = self.config.mqtt();
        let message = Message::for_record(record, mqtt.topic(), mqtt.retain())?;

        if self
            .channels
            .to_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(to_mqtt) failed - channel closed?");
        }

        Ok(())
    }
}
