use crate::error::{ArpcError, Result};
use crate::transport::{Channel, Transport};
use crate::types::Rank;
use std::time::Duration;

/// Threshold: use two-phase barrier for small worlds, dissemination for larger.
const DISSEMINATION_THRESHOLD: u32 = 5;

const KIND_ARRIVE: u8 = 1;
const KIND_ACK: u8 = 2;

/// Barrier wire message: `[kind: u8][epoch: u64 LE]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BarrierMessage {
    kind: u8,
    epoch: u64,
}

impl BarrierMessage {
    const SIZE: usize = 9;

    fn encode(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.kind;
        buf[1..].copy_from_slice(&self.epoch.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::SIZE {
            return None;
        }
        let mut epoch = [0u8; 8];
        epoch.copy_from_slice(&buf[1..]);
        Some(Self {
            kind: buf[0],
            epoch: u64::from_le_bytes(epoch),
        })
    }
}

/// Barrier: blocks until all ranks reach this point.
///
/// Every rank must pass the same `epoch`. Dispatches on world size:
/// - `two_phase_barrier` for world_size <= 4 (lower constant overhead)
/// - `dissemination_barrier` for world_size >= 5 (O(log N) rounds, no coordinator)
pub async fn barrier(transport: &dyn Transport, epoch: u64, timeout: Duration) -> Result<()> {
    let world = transport.world_size();
    if world <= 1 {
        return Ok(());
    }

    tracing::trace!(rank = transport.rank(), epoch, "barrier: enter");
    if world < DISSEMINATION_THRESHOLD {
        two_phase_barrier(transport, epoch, timeout).await
    } else {
        dissemination_barrier(transport, epoch, timeout).await
    }
}

async fn send_to(transport: &dyn Transport, dest: Rank, msg: BarrierMessage) -> Result<()> {
    transport
        .send(dest, Channel::Barrier, &msg.encode())
        .await
        .map_err(|e| ArpcError::BarrierFailed {
            rank: dest,
            reason: e.to_string(),
        })
}

async fn expect_from(
    transport: &dyn Transport,
    src: Rank,
    expected: BarrierMessage,
    timeout: Duration,
) -> Result<()> {
    let bytes = tokio::time::timeout(timeout, transport.recv(src, Channel::Barrier))
        .await
        .map_err(|_| ArpcError::BarrierFailed {
            rank: src,
            reason: format!(
                "timed out waiting for epoch {} after {}ms",
                expected.epoch,
                timeout.as_millis()
            ),
        })?
        .map_err(|e| ArpcError::BarrierFailed {
            rank: src,
            reason: e.to_string(),
        })?;

    match BarrierMessage::decode(&bytes) {
        Some(msg) if msg == expected => Ok(()),
        other => Err(ArpcError::BarrierFailed {
            rank: src,
            reason: format!("expected {expected:?}, got {other:?}"),
        }),
    }
}

/// Two-phase barrier: all ranks send to rank 0, rank 0 broadcasts ack.
async fn two_phase_barrier(
    transport: &dyn Transport,
    epoch: u64,
    timeout: Duration,
) -> Result<()> {
    let arrive = BarrierMessage {
        kind: KIND_ARRIVE,
        epoch,
    };
    let ack = BarrierMessage {
        kind: KIND_ACK,
        epoch,
    };
    let world = transport.world_size();

    if transport.rank() == 0 {
        for r in 1..world {
            expect_from(transport, r, arrive, timeout).await?;
        }
        for r in 1..world {
            send_to(transport, r, ack).await?;
        }
    } else {
        send_to(transport, 0, arrive).await?;
        expect_from(transport, 0, ack, timeout).await?;
    }
    Ok(())
}

/// Dissemination barrier: in round r, rank i sends to `(i + 2^r) % N` and
/// receives from `(i - 2^r + N) % N`.
async fn dissemination_barrier(
    transport: &dyn Transport,
    epoch: u64,
    timeout: Duration,
) -> Result<()> {
    let rank = transport.rank();
    let world = transport.world_size();
    let msg = BarrierMessage {
        kind: KIND_ARRIVE,
        epoch,
    };

    let num_rounds = u32::BITS - (world - 1).leading_zeros();
    for round in 0..num_rounds {
        let distance = 1u32 << round;
        let dest = (rank + distance) % world;
        let src = (rank + world - distance) % world;

        let (sent, received) = tokio::join!(
            send_to(transport, dest, msg),
            expect_from(transport, src, msg, timeout)
        );
        sent?;
        received?;
    }
    Ok(())
}
