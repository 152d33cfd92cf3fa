use crate::growatt::packet::MAX_FRAME_LEN;
use crate::growatt::packet_decoder::PacketDecoder;
use crate::prelude::*;

use {
    bytes::BytesMut,
    net2::TcpStreamExt,
    std::net::SocketAddr,
    std::sync::{Arc, Mutex},
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::{tcp::OwnedReadHalf, tcp::OwnedWriteHalf, TcpListener, TcpStream},
    tokio_util::codec::Decoder,
};

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Shutdown,
}

const READ_CHUNK_SIZE: usize = 4096;
const MAX_BUFFER_SIZE: usize = MAX_FRAME_LEN;
const TCP_KEEPALIVE_SECS: u64 = 60;

/// Sits between dataloggers and the Growatt cloud. Every byte is relayed
/// untouched; a copy of the datalogger side is framed and decoded on the way.
#[derive(Clone)]
pub struct Proxy {
    config: ConfigWrapper,
    layouts: Arc<Layouts>,
    channels: Channels,
    stats: Arc<Mutex<FrameStats>>,
}

impl Proxy {
    pub fn new(
        config: ConfigWrapper,
        layouts: Arc<Layouts>,
        channels: Channels,
        stats: Arc<Mutex<FrameStats>>,
    ) -> Self {
        Self {
            config,
            layouts,
            channels,
            stats,
        }
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let listen = self.config.listen();
        let listener = TcpListener::bind((listen.host(), listen.port()))
            .await
            .map_err(|e| anyhow!("failed to listen on {}:{}: {}", listen.host(), listen.port(), e))?;

        info!("listening for dataloggers on {}:{}", listen.host(), listen.port());
        Ok(listener)
    }

    pub async fn start(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.channels.to_proxy.subscribe();

        loop {
            tokio::select! {
                msg = shutdown.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    info!("datalogger connected from {}", peer);
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.connections_accepted += 1;
                    }

                    let proxy = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = proxy.session(stream, peer).await {
                            warn!("{}: {}", peer, e);
                        }
                        info!("datalogger {} disconnected", peer);
                    });
                }
            }
        }

        info!("Proxy accept loop exiting");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.to_proxy.send(ChannelData::Shutdown);
    }

    async fn session(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let (reader, writer) = stream.into_split();

        if !self.config.growatt().enabled() {
            return self.inbound(peer, reader, None).await;
        }

        // no upstream, drop the datalogger so it retries
        let upstream = self.connect_upstream().await?;
        let (up_reader, up_writer) = upstream.into_split();

        tokio::select! {
            r = self.inbound(peer, reader, Some(up_writer)) => r,
            r = Self::outbound(up_reader, writer) => r,
        }
    }

    async fn connect_upstream(&self) -> Result<TcpStream> {
        let growatt = self.config.growatt();
        let timeout = growatt.connect_timeout();

        let stream = match tokio::time::timeout(
            Duration::from_secs(timeout),
            TcpStream::connect((growatt.host(), growatt.port())),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => bail!("Failed to connect to {}:{}: {}", growatt.host(), growatt.port(), e),
            Err(_) => bail!("Connection timeout after {} seconds", timeout),
        };

        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::new(TCP_KEEPALIVE_SECS, 0))) {
            warn!("Failed to set TCP keepalive: {}", e);
        }
        let stream = TcpStream::from_std(std_stream)?;

        if growatt.use_tcp_nodelay() {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        info!("connected to {}:{}", growatt.host(), growatt.port());
        Ok(stream)
    }

    // datalogger -> growatt, decoding a copy
    async fn inbound(
        &self,
        peer: SocketAddr,
        mut reader: OwnedReadHalf,
        mut upstream: Option<OwnedWriteHalf>,
    ) -> Result<()> {
        let mut shutdown = self.channels.to_proxy.subscribe();
        let mut decoder = PacketDecoder::new();
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let inverter_type = self.config.inverter_type();

        loop {
            tokio::select! {
                msg = shutdown.recv() => {
                    match msg {
                        Ok(ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
                read = reader.read(&mut chunk) => {
                    let len = read?;

                    if len == 0 {
                        while let Some(frame) = decoder.decode_eof(&mut buf)? {
                            let _ = self.handle_frame(&frame, &inverter_type);
                        }
                        break;
                    }

                    // relayed before decoding
                    if let Some(up) = upstream.as_mut() {
                        up.write_all(&chunk[..len]).await?;
                    }

                    for frame in split_frames(peer, &mut decoder, &mut buf, &chunk[..len])? {
                        let _ = self.handle_frame(&frame, &inverter_type);
                    }
                }
            }
        }

        Ok(())
    }

    // growatt -> datalogger, untouched
    async fn outbound(mut reader: OwnedReadHalf, mut writer: OwnedWriteHalf) -> Result<()> {
        let n = tokio::io::copy(&mut reader, &mut writer).await?;
        debug!("upstream closed after {} bytes", n);
        Ok(())
    }

    /// Decodes one frame, counts the outcome and forwards any record to the
    /// coordinator. Failures are logged here and only returned for inspection.
    pub fn handle_frame(&self, frame: &[u8], inverter_type: &str) -> Result<Outcome, FrameError> {
        debug!("RX frame ({} bytes): {:02x?}", frame.len(), frame);

        let result = Message::read(frame, &self.layouts, inverter_type);

        if let Ok(mut stats) = self.stats.lock() {
            stats.count(&result);
        }

        match &result {
            Ok(Outcome::Record(record)) => {
                info!(
                    "record from {} ({:?}, {} values)",
                    record.device(),
                    record.message_type,
                    record.data.len()
                );
                let message = coordinator::ChannelData::Record(record.clone());
                if self.channels.from_proxy.send(message).is_err() {
                    warn!("send(from_proxy) failed - coordinator not running?");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("frame not decoded: {}", e),
        }

        result
    }
}

/// Appends `chunk` to a session buffer and returns every frame it completes.
/// A buffer that already holds a maximum-size frame without completing one
/// is dropped.
fn split_frames(
    peer: SocketAddr,
    decoder: &mut PacketDecoder,
    buf: &mut BytesMut,
    chunk: &[u8],
) -> Result<Vec<BytesMut>> {
    if buf.len() >= MAX_BUFFER_SIZE {
        warn!("{}: {} undecoded bytes buffered, dropping them", peer, buf.len());
        buf.clear();
    }

    buf.extend_from_slice(chunk);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.decode(buf)? {
        frames.push(frame);
    }
    Ok(frames)
}
