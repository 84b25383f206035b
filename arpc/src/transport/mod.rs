mod inbox;
pub mod memory;
pub mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

use crate::error::Result;
use crate::types::Rank;
use futures::future::BoxFuture;

/// Reserved message channels.
///
/// Every channel preserves send order between a fixed (sender, receiver)
/// pair; there is no ordering across channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Fixed-size message headers. Received from any source via
    /// [`Transport::recv_any`].
    Header = 1,
    /// Opaque payloads, one per header. Received per source.
    Payload = 2,
    /// Barrier arrivals and acknowledgements. Received per source.
    Barrier = 3,
}

impl Channel {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Channel::Header),
            2 => Some(Channel::Payload),
            3 => Some(Channel::Barrier),
            _ => None,
        }
    }

    /// Whether messages on this channel are received without naming a source.
    pub const fn is_any_source(self) -> bool {
        matches!(self, Channel::Header)
    }
}

/// Point-to-point message transport between the ranks of a fixed world.
///
/// Receive futures must be cancel-safe: dropping one before it completes
/// must not lose a message. The dispatch engine relies on this to wake up
/// periodically and re-check for shutdown.
pub trait Transport: Send + Sync + 'static {
    /// This process's rank.
    fn rank(&self) -> Rank;

    /// Number of ranks in the world.
    fn world_size(&self) -> u32;

    /// Send one message to `dest` on `channel`. `dest` may be this rank.
    ///
    /// Completes once the message has been handed to the network. Once the
    /// returned future has been polled, the message is sent whole or not at
    /// all, even if the future is dropped early.
    fn send<'a>(
        &'a self,
        dest: Rank,
        channel: Channel,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<()>>;

    /// Wait for the next message on an any-source channel, returning the
    /// sender's rank alongside the bytes.
    fn recv_any(&self, channel: Channel) -> BoxFuture<'_, Result<(Rank, Vec<u8>)>>;

    /// Wait for the next message from `src` on a per-source channel.
    fn recv(&self, src: Rank, channel: Channel) -> BoxFuture<'_, Result<Vec<u8>>>;
}
