use crate::error::{ArpcError, Result};
use crate::transport::inbox::Inbox;
use crate::transport::{Channel, Transport};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// In-process transport: every rank of the world lives in this process and
/// messages move through channels.
///
/// Used for tests and for running an SPMD program as tasks of one process.
///
/// ```
/// use arpc::transport::{Channel, MemoryTransport, Transport};
///
/// # async fn example() -> arpc::Result<()> {
/// let world = MemoryTransport::mesh(2);
/// world[0].send(1, Channel::Payload, b"hi").await?;
/// assert_eq!(world[1].recv(0, Channel::Payload).await?, b"hi");
/// # Ok(())
/// # }
/// ```
pub struct MemoryTransport {
    rank: Rank,
    inboxes: Arc<Vec<Inbox>>,
    sent: AtomicU64,
}

impl MemoryTransport {
    /// Create a fully connected world of `world_size` ranks.
    pub fn mesh(world_size: u32) -> Vec<Arc<MemoryTransport>> {
        let inboxes: Arc<Vec<Inbox>> =
            Arc::new((0..world_size).map(|r| Inbox::new(r, world_size)).collect());
        (0..world_size)
            .map(|rank| {
                Arc::new(MemoryTransport {
                    rank,
                    inboxes: Arc::clone(&inboxes),
                    sent: AtomicU64::new(0),
                })
            })
            .collect()
    }

    /// Number of messages this rank has sent, on every channel.
    pub fn messages_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn inbox(&self, rank: Rank) -> Result<&Inbox> {
        self.inboxes.get(rank as usize).ok_or(ArpcError::InvalidRank {
            rank,
            world_size: self.inboxes.len() as u32,
        })
    }
}

impl Transport for MemoryTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.inboxes.len() as u32
    }

    fn send<'a>(
        &'a self,
        dest: Rank,
        channel: Channel,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inbox(dest)?.deliver(self.rank, channel, data.to_vec())?;
            self.sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn recv_any(&self, channel: Channel) -> BoxFuture<'_, Result<(Rank, Vec<u8>)>> {
        Box::pin(async move { self.inbox(self.rank)?.recv_any(channel).await })
    }

    fn recv(&self, src: Rank, channel: Channel) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move { self.inbox(self.rank)?.recv(src, channel).await })
    }
}
