mod common;
use common::*;

use async_trait::async_trait;
use growatt_bridge::mqtt::Message as MqttMessage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[derive(Default)]
struct CollectSink {
    records: Mutex<Vec<Record>>,
}

impl CollectSink {
    fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordSink for CollectSink {
    fn name(&self) -> &str {
        "collect"
    }

    async fn handle(&self, record: &Record) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl RecordSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _record: &Record) -> Result<()> {
        bail!("sink unavailable")
    }
}

fn config(yaml: &str) -> ConfigWrapper {
    ConfigWrapper::from_config(Config::from_yaml(yaml).unwrap())
}

// a broadcast send before anyone subscribes is lost
async fn wait_for_coordinator(channels: &Channels) {
    while channels.from_proxy.receiver_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_records(sink: &CollectSink, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while sink.records().len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn frames_reach_every_sink() -> Result<()> {
    common_setup();

    let channels = Channels::new();
    let collect = Arc::new(CollectSink::default());

    let mut coordinator = Coordinator::new(channels.clone());
    coordinator.add_sink(Arc::new(FailingSink));
    coordinator.add_sink(collect.clone());
    let stats = coordinator.stats.clone();

    let proxy = Proxy::new(
        config("growatt:\n  enabled: false\n"),
        Arc::new(Factory::layouts()),
        channels.clone(),
        stats.clone(),
    );

    let c = coordinator.clone();
    let handle = tokio::spawn(async move { c.start().await });
    wait_for_coordinator(&channels).await;

    assert!(matches!(
        proxy.handle_frame(&Factory::scrambled_frame(), "default"),
        Ok(Outcome::Record(_))
    ));
    assert_eq!(
        proxy.handle_frame(&Factory::ack(0x0006, 0x0104), "default"),
        Ok(Outcome::Ack)
    );
    assert!(proxy
        .handle_frame(&Factory::invalid_crc_frame(), "default")
        .is_err());

    coordinator.stop();
    handle.await??;

    // the failing sink ahead of it didn't stop delivery
    let records = collect.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].datalogger_serial, "XGD6CLC86C");

    let stats = stats.lock().unwrap();
    assert_eq!(stats.frames_received, 3);
    assert_eq!(stats.records_decoded, 1);
    assert_eq!(stats.acks_received, 1);
    assert_eq!(stats.invalid_frames, 1);
    assert_eq!(stats.sink_publishes, 1);
    assert_eq!(stats.sink_errors, 1);

    Ok(())
}

#[tokio::test]
async fn datalog_writer_as_sink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("logs/records.jsonl");
    let writer = DatalogWriter::new(path.to_str().unwrap())?;

    let mut coordinator = Coordinator::new(Channels::new());
    coordinator.add_sink(Arc::new(writer.clone()));

    let record = Message::read(&Factory::scrambled_frame(), &Factory::layouts(), "default")
        .unwrap()
        .record()
        .unwrap();
    coordinator.dispatch(&record).await;

    assert_eq!(writer.records_written(), 1);
    let contents = std::fs::read_to_string(&path)?;
    let json: serde_json::Value = serde_json::from_str(contents.trim())?;
    assert_eq!(json["datalogserial"], "XGD6CLC86C");
    assert_eq!(json["message_type"], "0120");
    assert_eq!(json["values"]["act_power_l1"], -1845);

    Ok(())
}

#[test]
fn mqtt_message_shape() {
    let record = Message::read(&Factory::scrambled_frame(), &Factory::layouts(), "default")
        .unwrap()
        .record()
        .unwrap();

    let message = MqttMessage::for_record(&record, "energy/growatt", false).unwrap();
    assert_eq!(message.topic, "energy/growatt");
    assert!(!message.retain);

    let json: serde_json::Value = serde_json::from_str(&message.payload).unwrap();
    // smart meters are keyed by their datalogger
    assert_eq!(json["device"], "XGD6CLC86C");
    assert_eq!(json["time"], "2024-06-10T08:56:19");
    assert_eq!(json["buffered"], "no");
    assert_eq!(json["values"]["datalogserial"], "XGD6CLC86C");
    assert_eq!(json["values"]["pvserial"], "AFK0BHN01J");
    assert_eq!(json["values"]["voltage_l1"], 2363);
    assert_eq!(json["values"]["act_power_l1"], -1845);
}

#[tokio::test]
async fn mqtt_sink_queues_message() -> Result<()> {
    let channels = Channels::new();
    let mqtt = Mqtt::new(
        config("mqtt:\n  enabled: true\n  host: localhost\n  topic: solar\n  retain: true\n"),
        channels.clone(),
    );
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let frame = Factory::scrambled(0x0005, 0x0150, &Factory::inverter_payload(300));
    let record = Message::read(&frame, &Factory::layouts(), "default")
        .unwrap()
        .record()
        .unwrap();
    mqtt.handle(&record).await?;

    match to_mqtt.recv().await? {
        mqtt::ChannelData::Message(message) => {
            assert_eq!(message.topic, "solar");
            assert!(message.retain);
            let json: serde_json::Value = serde_json::from_str(&message.payload)?;
            assert_eq!(json["device"], "AFK0BHN01J");
            assert_eq!(json["buffered"], "yes");
            assert_eq!(json["values"]["pvpowerin"], 2364);
        }
        other => panic!("unexpected {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn proxy_relays_and_decodes() -> Result<()> {
    common_setup();

    let upstream = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let upstream_port = upstream.local_addr()?.port();
    let listen_port = std::net::TcpListener::bind("127.0.0.1:0")?
        .local_addr()?
        .port();

    let config = config(&format!(
        "listen:\n  host: 127.0.0.1\n  port: {}\ngrowatt:\n  host: 127.0.0.1\n  port: {}\n",
        listen_port, upstream_port
    ));

    let channels = Channels::new();
    let collect = Arc::new(CollectSink::default());
    let mut coordinator = Coordinator::new(channels.clone());
    coordinator.add_sink(collect.clone());

    let c = coordinator.clone();
    tokio::spawn(async move { c.start().await });
    wait_for_coordinator(&channels).await;

    let proxy = Proxy::new(
        config,
        Arc::new(Factory::layouts()),
        channels.clone(),
        coordinator.stats.clone(),
    );
    let listener = proxy.bind().await?;
    let p = proxy.clone();
    tokio::spawn(async move { p.start(listener).await });

    let mut datalogger = tokio::net::TcpStream::connect(("127.0.0.1", listen_port)).await?;
    let frame = Factory::scrambled_frame();
    datalogger.write_all(&frame).await?;

    let (mut server, _) = tokio::time::timeout(Duration::from_secs(5), upstream.accept()).await??;

    // bytes arrive upstream exactly as sent
    let mut relayed = vec![0u8; frame.len()];
    tokio::time::timeout(Duration::from_secs(5), server.read_exact(&mut relayed)).await??;
    assert_eq!(relayed, frame);

    // and the server's reply makes it back
    let ack = Factory::ack(0x0006, 0x0120);
    server.write_all(&ack).await?;
    let mut reply = vec![0u8; ack.len()];
    tokio::time::timeout(Duration::from_secs(5), datalogger.read_exact(&mut reply)).await??;
    assert_eq!(reply, ack);

    wait_for_records(&collect, 1).await;
    assert_eq!(collect.records()[0].inverter_serial, "AFK0BHN01J");

    proxy.stop();
    coordinator.stop();

    Ok(())
}
