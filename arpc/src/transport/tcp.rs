use crate::error::{ArpcError, Result};
use crate::transport::inbox::Inbox;
use crate::transport::{Channel, Transport};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Maximum frame payload accepted by the read loop (4 GiB).
const MAX_FRAME_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Default time to keep dialing lower ranks while they come up.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between connection attempts to a peer that is not listening yet.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// A frame queued for a peer's write loop.
struct OutboundFrame {
    channel: Channel,
    data: Vec<u8>,
    written: oneshot::Sender<Result<()>>,
}

/// Full-mesh transport over plain TCP, one connection per peer pair.
///
/// Each connection carries `[channel: u8][len: u64 LE][payload]` frames.
/// Per peer, one background task owns the write half and one reads frames
/// into the inbox. A send hands its frame to the write loop as soon as it
/// is first polled, so a frame is written whole even if the sender stops
/// waiting. Messages to this rank's own address never touch a socket.
pub struct TcpTransport {
    rank: Rank,
    world_size: u32,
    inbox: Arc<Inbox>,
    writers: HashMap<Rank, mpsc::UnboundedSender<OutboundFrame>>,
    recv_handles: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    /// Join the mesh described by `addrs`, where `addrs[r]` is rank `r`'s
    /// listen address.
    ///
    /// Rank `i` listens on `addrs[i]`, dials every lower rank and accepts
    /// every higher rank. Every rank must call this concurrently.
    pub async fn connect(rank: Rank, addrs: &[SocketAddr]) -> Result<Self> {
        let addr = *addrs.get(rank as usize).ok_or(ArpcError::InvalidRank {
            rank,
            world_size: addrs.len() as u32,
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ArpcError::transport_with_source(format!("tcp bind {addr}"), e))?;
        Self::from_listener(rank, listener, addrs, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Join the mesh with an already-bound listener for this rank.
    pub async fn from_listener(
        rank: Rank,
        listener: TcpListener,
        addrs: &[SocketAddr],
        connect_timeout: Duration,
    ) -> Result<Self> {
        let world_size = addrs.len() as u32;
        if rank >= world_size {
            return Err(ArpcError::InvalidRank { rank, world_size });
        }

        let dial = async {
            let mut streams = Vec::new();
            for peer in 0..rank {
                let stream = dial_peer(rank, peer, addrs[peer as usize], connect_timeout).await?;
                streams.push((peer, stream));
            }
            Ok::<_, ArpcError>(streams)
        };
        let accept = async {
            let mut streams = Vec::new();
            for _ in (rank + 1)..world_size {
                streams.push(accept_peer(rank, world_size, &listener).await?);
            }
            Ok::<_, ArpcError>(streams)
        };
        let (dialed, accepted) = tokio::try_join!(dial, accept)?;

        let inbox = Arc::new(Inbox::new(rank, world_size));
        let mut writers = HashMap::new();
        let mut recv_handles = Vec::new();
        for (peer, stream) in dialed.into_iter().chain(accepted) {
            let (reader, writer) = stream.into_split();
            let (frames_tx, frames_rx) = mpsc::unbounded_channel();
            if writers.insert(peer, frames_tx).is_some() {
                return Err(ArpcError::transport(format!(
                    "rank {peer} connected to rank {rank} twice"
                )));
            }
            // Ends once every sender is dropped and the queue is written out.
            tokio::spawn(write_loop(rank, peer, writer, frames_rx));
            let inbox = Arc::clone(&inbox);
            recv_handles.push(tokio::spawn(recv_loop(rank, peer, reader, inbox)));
        }
        tracing::debug!(rank, world_size, "tcp mesh established");

        Ok(Self {
            rank,
            world_size,
            inbox,
            writers,
            recv_handles,
        })
    }

    /// Build a loopback mesh of `world_size` ranks inside this process.
    pub async fn bootstrap_local(world_size: u32) -> Result<Vec<Arc<TcpTransport>>> {
        let mut listeners = Vec::new();
        let mut addrs = Vec::new();
        for _ in 0..world_size {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .map_err(|e| ArpcError::transport_with_source("tcp bind loopback", e))?;
            addrs.push(
                listener
                    .local_addr()
                    .map_err(|e| ArpcError::transport_with_source("tcp local_addr", e))?,
            );
            listeners.push(listener);
        }

        let addrs = Arc::new(addrs);
        let mut handles = Vec::new();
        for (rank, listener) in listeners.into_iter().enumerate() {
            let addrs = Arc::clone(&addrs);
            handles.push(tokio::spawn(async move {
                TcpTransport::from_listener(rank as Rank, listener, &addrs, DEFAULT_CONNECT_TIMEOUT)
                    .await
            }));
        }

        let mut transports = Vec::new();
        for h in handles {
            let t = h
                .await
                .map_err(|e| ArpcError::transport_with_source("tcp bootstrap task panicked", e))??;
            transports.push(Arc::new(t));
        }
        Ok(transports)
    }

    /// Hand one frame to `dest`'s write loop and wait until it is written.
    async fn write_frame(&self, dest: Rank, channel: Channel, data: &[u8]) -> Result<()> {
        let writer = self
            .writers
            .get(&dest)
            .ok_or(ArpcError::PeerDisconnected { rank: dest })?;
        let (written, outcome) = oneshot::channel();
        writer
            .send(OutboundFrame {
                channel,
                data: data.to_vec(),
                written,
            })
            .map_err(|_| ArpcError::PeerDisconnected { rank: dest })?;
        outcome
            .await
            .map_err(|_| ArpcError::PeerDisconnected { rank: dest })?
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn send<'a>(
        &'a self,
        dest: Rank,
        channel: Channel,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if dest >= self.world_size {
                return Err(ArpcError::InvalidRank {
                    rank: dest,
                    world_size: self.world_size,
                });
            }
            if dest == self.rank {
                return self.inbox.deliver(self.rank, channel, data.to_vec());
            }
            self.write_frame(dest, channel, data).await
        })
    }

    fn recv_any(&self, channel: Channel) -> BoxFuture<'_, Result<(Rank, Vec<u8>)>> {
        Box::pin(self.inbox.recv_any(channel))
    }

    fn recv(&self, src: Rank, channel: Channel) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(self.inbox.recv(src, channel))
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for handle in &self.recv_handles {
            handle.abort();
        }
    }
}

/// Dial `peer`, retrying until it is listening, then announce our rank.
async fn dial_peer(
    rank: Rank,
    peer: Rank,
    addr: SocketAddr,
    connect_timeout: Duration,
) -> Result<TcpStream> {
    let deadline = tokio::time::Instant::now() + connect_timeout;
    let mut stream = loop {
        match TcpStream::connect(addr).await {
            Ok(s) => break s,
            Err(e) if tokio::time::Instant::now() >= deadline => {
                return Err(ArpcError::transport_with_source(
                    format!("tcp connect rank {rank} -> rank {peer} at {addr}"),
                    e,
                ));
            }
            Err(_) => tokio::time::sleep(CONNECT_RETRY).await,
        }
    };
    stream
        .set_nodelay(true)
        .map_err(|e| ArpcError::transport_with_source("tcp set_nodelay", e))?;
    stream
        .write_all(&rank.to_le_bytes())
        .await
        .map_err(|e| ArpcError::transport_with_source("tcp write handshake", e))?;
    tracing::debug!(rank, peer, %addr, "tcp: dialed peer");
    Ok(stream)
}

/// Accept one higher-ranked peer and read its rank announcement.
async fn accept_peer(
    rank: Rank,
    world_size: u32,
    listener: &TcpListener,
) -> Result<(Rank, TcpStream)> {
    let (mut stream, addr) = listener
        .accept()
        .await
        .map_err(|e| ArpcError::transport_with_source("tcp accept", e))?;
    stream
        .set_nodelay(true)
        .map_err(|e| ArpcError::transport_with_source("tcp set_nodelay", e))?;
    let mut rank_buf = [0u8; 4];
    stream
        .read_exact(&mut rank_buf)
        .await
        .map_err(|e| ArpcError::transport_with_source("tcp read handshake", e))?;
    let peer = Rank::from_le_bytes(rank_buf);
    if peer <= rank || peer >= world_size {
        return Err(ArpcError::transport(format!(
            "tcp: bad handshake from rank {peer} at {addr} (rank {rank}, world {world_size})"
        )));
    }
    tracing::debug!(rank, peer, %addr, "tcp: accepted peer");
    Ok((peer, stream))
}

/// Background loop: write queued frames to `peer` in order.
async fn write_loop(
    rank: Rank,
    peer: Rank,
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let outcome = write_one(&mut writer, frame.channel, &frame.data).await;
        if let Err(e) = &outcome {
            tracing::warn!(rank, peer, "tcp: write failed: {e}");
        }
        // The sender may have stopped waiting.
        let _ = frame.written.send(outcome);
    }
    tracing::debug!(rank, peer, "tcp write loop ended");
}

async fn write_one(writer: &mut OwnedWriteHalf, channel: Channel, data: &[u8]) -> Result<()> {
    let mut prefix = [0u8; 9];
    prefix[0] = channel as u8;
    prefix[1..9].copy_from_slice(&(data.len() as u64).to_le_bytes());
    writer
        .write_all(&prefix)
        .await
        .map_err(|e| ArpcError::transport_with_source("tcp write prefix", e))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| ArpcError::transport_with_source("tcp write payload", e))?;
    writer
        .flush()
        .await
        .map_err(|e| ArpcError::transport_with_source("tcp flush", e))
}

/// Background loop: read frames from `peer` and route them into the inbox.
/// When the connection ends, `peer`'s lanes are closed.
async fn recv_loop(rank: Rank, peer: Rank, reader: OwnedReadHalf, inbox: Arc<Inbox>) {
    read_frames(rank, peer, reader, &inbox).await;
    inbox.disconnect(peer);
}

async fn read_frames(rank: Rank, peer: Rank, mut reader: OwnedReadHalf, inbox: &Inbox) {
    let mut prefix = [0u8; 9];
    loop {
        if let Err(e) = reader.read_exact(&mut prefix).await {
            tracing::debug!(rank, peer, "tcp recv loop ended: {e}");
            return;
        }
        let Some(channel) = Channel::from_u8(prefix[0]) else {
            tracing::warn!(
                rank,
                peer,
                "tcp: unknown channel 0x{:02x}, closing connection",
                prefix[0]
            );
            return;
        };
        let mut len_buf = [0u8; 8];
        len_buf.copy_from_slice(&prefix[1..9]);
        let len = u64::from_le_bytes(len_buf);
        if len > MAX_FRAME_SIZE {
            tracing::warn!(rank, peer, len, "tcp: frame too large, closing connection");
            return;
        }

        let mut payload = vec![0u8; len as usize];
        if let Err(e) = reader.read_exact(&mut payload).await {
            tracing::debug!(rank, peer, "tcp recv loop ended reading payload: {e}");
            return;
        }
        if let Err(e) = inbox.deliver(peer, channel, payload) {
            tracing::warn!(rank, peer, "tcp: dropping frame: {e}");
        }
    }
}
