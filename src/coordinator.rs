use crate::prelude::*;

use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
pub enum ChannelData {
    Record(Box<Record>),
    Shutdown,
}

#[derive(Default, Debug, Clone)]
pub struct FrameStats {
    pub connections_accepted: u64,
    pub frames_received: u64,
    // outcomes of decoding
    pub records_decoded: u64,
    pub acks_received: u64,
    pub ignored_frames: u64,
    pub undecodable_frames: u64,
    pub invalid_frames: u64,
    pub field_errors: u64,
    // sinks
    pub sink_publishes: u64,
    pub sink_errors: u64,
}

impl FrameStats {
    pub fn count(&mut self, result: &Result<Outcome, FrameError>) {
        self.frames_received += 1;

        match result {
            Ok(Outcome::Record(_)) => self.records_decoded += 1,
            Ok(Outcome::Ack) => self.acks_received += 1,
            Ok(Outcome::Ignored(_)) => self.ignored_frames += 1,
            Ok(Outcome::NoLayout(_)) => self.undecodable_frames += 1,
            Err(FrameError::Field { .. }) => self.field_errors += 1,
            Err(_) => self.invalid_frames += 1,
        }
    }

    pub fn print_summary(&self) {
        info!("Frame Statistics:");
        info!("  Connections accepted: {}", self.connections_accepted);
        info!("  Total frames received: {}", self.frames_received);
        info!("  Outcomes:");
        info!("    Records decoded: {}", self.records_decoded);
        info!("    ACKs: {}", self.acks_received);
        info!("    Ignored types: {}", self.ignored_frames);
        info!("    No matching layout: {}", self.undecodable_frames);
        info!("    Failed validation: {}", self.invalid_frames);
        info!("    Field decode errors: {}", self.field_errors);
        info!("  Sinks:");
        info!("    Records delivered: {}", self.sink_publishes);
        info!("    Errors: {}", self.sink_errors);
    }
}

/// Fans decoded records out from the proxy to every registered sink.
#[derive(Clone)]
pub struct Coordinator {
    channels: Channels,
    sinks: Vec<Arc<dyn RecordSink>>,
    pub stats: Arc<Mutex<FrameStats>>,
}

impl Coordinator {
    pub fn new(channels: Channels) -> Self {
        Self {
            channels,
            sinks: Vec::new(),
            stats: Arc::new(Mutex::new(FrameStats::default())),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn RecordSink>) {
        info!("registering record sink {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.channels.from_proxy.subscribe();

        loop {
            match receiver.recv().await {
                Ok(ChannelData::Record(record)) => self.dispatch(&record).await,
                Ok(ChannelData::Shutdown) => {
                    info!("Coordinator received shutdown signal");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("coordinator lagged, {} records dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => bail!("Channel closed"),
            }
        }

        info!("Coordinator loop exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_proxy.send(ChannelData::Shutdown);
    }

    /// Hands `record` to every sink; one failing sink doesn't stop the rest.
    pub async fn dispatch(&self, record: &Record) {
        for sink in &self.sinks {
            debug!("handing record from {} to sink {}", record.datalogger_serial, sink.name());

            let result = sink.handle(record).await;
            if let Err(e) = &result {
                error!("sink {} failed: {}", sink.name(), e);
            }

            if let Ok(mut stats) = self.stats.lock() {
                match result {
                    Ok(_) => stats.sink_publishes += 1,
                    Err(_) => stats.sink_errors += 1,
                }
            }
        }
    }
}
