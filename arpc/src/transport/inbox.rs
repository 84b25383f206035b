use crate::error::{ArpcError, Result};
use crate::transport::Channel;
use crate::types::Rank;
use std::sync::PoisonError;
use tokio::sync::{Mutex, mpsc};

/// One FIFO lane. The sender half lives inside the lane until [`Lane::close`]
/// drops it; receivers then drain what is queued and see `None`.
struct Lane<T> {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<T>>>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T> Lane<T> {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: Mutex::new(rx),
        }
    }

    /// Queue `item`. Returns `false` once the lane is closed.
    fn send(&self, item: T) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| tx.send(item).is_ok())
    }

    fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    async fn recv(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

/// Receive-side demultiplexer shared by every transport.
///
/// Headers from all sources share one lane; payload and barrier traffic get
/// one lane per source so a receiver can name the sender it expects.
/// Lanes are unbounded: delivery never waits on a consumer, which keeps
/// socket read loops from stalling while workers are busy sending.
/// A source's lanes close when its connection goes away.
pub(crate) struct Inbox {
    rank: Rank,
    headers: Lane<(Rank, Vec<u8>)>,
    payload: Vec<Lane<Vec<u8>>>,
    barrier: Vec<Lane<Vec<u8>>>,
}

impl Inbox {
    pub(crate) fn new(rank: Rank, world_size: u32) -> Self {
        Self {
            rank,
            headers: Lane::new(),
            payload: (0..world_size).map(|_| Lane::new()).collect(),
            barrier: (0..world_size).map(|_| Lane::new()).collect(),
        }
    }

    fn world_size(&self) -> u32 {
        self.payload.len() as u32
    }

    fn source_lane(&self, src: Rank, channel: Channel) -> Result<&Lane<Vec<u8>>> {
        let lanes = match channel {
            Channel::Payload => &self.payload,
            Channel::Barrier => &self.barrier,
            Channel::Header => {
                return Err(ArpcError::transport(format!(
                    "channel {channel:?} is received from any source"
                )));
            }
        };
        lanes.get(src as usize).ok_or(ArpcError::InvalidRank {
            rank: src,
            world_size: self.world_size(),
        })
    }

    /// Queue a message that arrived from `src`.
    pub(crate) fn deliver(&self, src: Rank, channel: Channel, data: Vec<u8>) -> Result<()> {
        if src >= self.world_size() {
            return Err(ArpcError::InvalidRank {
                rank: src,
                world_size: self.world_size(),
            });
        }
        let sent = if channel.is_any_source() {
            self.headers.send((src, data))
        } else {
            self.source_lane(src, channel)?.send(data)
        };
        if !sent {
            tracing::warn!(
                rank = self.rank,
                src,
                ?channel,
                "inbox: lane closed, dropping message"
            );
        }
        Ok(())
    }

    /// Close `src`'s payload and barrier lanes. Messages already queued are
    /// still received; after that, receives from `src` fail with
    /// [`ArpcError::PeerDisconnected`].
    pub(crate) fn disconnect(&self, src: Rank) {
        let lanes = self.payload.get(src as usize).zip(self.barrier.get(src as usize));
        let Some((payload, barrier)) = lanes else {
            return;
        };
        payload.close();
        barrier.close();
        tracing::debug!(rank = self.rank, src, "inbox: source disconnected");
    }

    pub(crate) async fn recv_any(&self, channel: Channel) -> Result<(Rank, Vec<u8>)> {
        if !channel.is_any_source() {
            return Err(ArpcError::transport(format!(
                "channel {channel:?} must be received from a named source"
            )));
        }
        self.headers
            .recv()
            .await
            .ok_or_else(|| ArpcError::transport("header lane closed"))
    }

    pub(crate) async fn recv(&self, src: Rank, channel: Channel) -> Result<Vec<u8>> {
        self.source_lane(src, channel)?
            .recv()
            .await
            .ok_or(ArpcError::PeerDisconnected { rank: src })
    }
}
