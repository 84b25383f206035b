//! Dispatch engine: one poller task discovering inbound headers and a pool
//! of worker tasks that receive the matching payloads and either serve a
//! request or complete a pending call.
//!
//! Header and payload of one logical message travel on separate channels.
//! Pairing holds because:
//! - outbound pairs to one destination are emitted back-to-back by that
//!   destination's emitter task, independent of the caller ([`Outbox`]);
//! - the poller stamps each header with its position in the sender's header
//!   stream, and workers receive payloads from a sender strictly in that
//!   order ([`PayloadTurnstile`]);
//! - the ready-queue is FIFO, so the oldest header of every sender is always
//!   held by a worker that can make progress.

use crate::codec::{decode, encode};
use crate::config::ArpcConfig;
use crate::error::{ArpcError, Result};
use crate::protocol::{MessageHeader, MessageKind};
use crate::rpc::correlation::CorrelationTable;
use crate::rpc::registry::CallableRegistry;
use crate::transport::{Channel, Transport};
use crate::types::Rank;
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;

/// A header/payload pair queued for one destination.
struct OutboundPair {
    header: MessageHeader,
    payload: Arc<[u8]>,
    sent: oneshot::Sender<Result<()>>,
}

/// Outbound side: one emitter task per destination sends queued pairs in
/// order, header then payload. A pair is queued without awaiting, so it is
/// emitted whole even when the caller stops waiting for it.
pub(crate) struct Outbox {
    emitters: Vec<mpsc::UnboundedSender<OutboundPair>>,
}

impl Outbox {
    /// Spawn the emitter tasks. They exit once the outbox is dropped and
    /// their queues are drained.
    pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
        let emitters = (0..transport.world_size())
            .map(|dest| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(emit_pairs(Arc::clone(&transport), dest, rx));
                tx
            })
            .collect();
        Self { emitters }
    }

    fn enqueue(
        &self,
        dest: Rank,
        header: &MessageHeader,
        payload: Arc<[u8]>,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        let emitter = self
            .emitters
            .get(dest as usize)
            .ok_or(ArpcError::InvalidRank {
                rank: dest,
                world_size: self.emitters.len() as u32,
            })?;
        let (sent, outcome) = oneshot::channel();
        emitter
            .send(OutboundPair {
                header: *header,
                payload,
                sent,
            })
            .map_err(|_| ArpcError::transport(format!("outbox emitter for rank {dest} stopped")))?;
        Ok(outcome)
    }

    /// Send `header` followed by `payload` to `dest` with nothing in between.
    pub(crate) async fn send_pair(
        &self,
        dest: Rank,
        header: &MessageHeader,
        payload: &[u8],
    ) -> Result<()> {
        let outcome = self.enqueue(dest, header, Arc::from(payload))?;
        await_emitted(dest, outcome).await
    }

    /// Send the same pair to every rank in `dests`. Every pair is queued
    /// before the first is awaited; the first failure is returned after all
    /// of them settle.
    pub(crate) async fn multicast(
        &self,
        dests: &[Rank],
        header: &MessageHeader,
        payload: &[u8],
    ) -> Result<()> {
        let payload: Arc<[u8]> = Arc::from(payload);
        let queued: Vec<_> = dests
            .iter()
            .map(|&dest| (dest, self.enqueue(dest, header, Arc::clone(&payload))))
            .collect();
        let outcomes = join_all(queued.into_iter().map(|(dest, queued)| async move {
            await_emitted(dest, queued?).await
        }))
        .await;
        outcomes.into_iter().collect()
    }
}

async fn await_emitted(dest: Rank, outcome: oneshot::Receiver<Result<()>>) -> Result<()> {
    outcome
        .await
        .map_err(|_| ArpcError::transport(format!("outbox emitter for rank {dest} stopped")))?
}

/// Emitter loop for one destination.
async fn emit_pairs(
    transport: Arc<dyn Transport>,
    dest: Rank,
    mut pairs: mpsc::UnboundedReceiver<OutboundPair>,
) {
    while let Some(pair) = pairs.recv().await {
        let outcome = emit(&*transport, dest, &pair).await;
        if let Err(e) = &outcome {
            tracing::warn!(
                rank = transport.rank(),
                dest,
                correlation = pair.header.correlation,
                "outbox: pair emission failed: {e}"
            );
        }
        // The caller may have stopped waiting.
        let _ = pair.sent.send(outcome);
    }
}

async fn emit(transport: &dyn Transport, dest: Rank, pair: &OutboundPair) -> Result<()> {
    transport
        .send(dest, Channel::Header, &pair.header.encode())
        .await?;
    transport.send(dest, Channel::Payload, &pair.payload).await
}

/// A header waiting for a worker.
#[derive(Debug, Clone, Copy)]
struct Envelope {
    src: Rank,
    /// Position of this header in `src`'s header stream.
    seq: u64,
    header: MessageHeader,
}

struct ReadyQueue {
    items: Mutex<VecDeque<Envelope>>,
    available: Notify,
}

impl ReadyQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
        }
    }

    fn push(&self, envelope: Envelope) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(envelope);
        self.available.notify_one();
    }

    fn try_pop(&self) -> Option<Envelope> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Pop the oldest envelope, waiting at most `wait` for one to arrive.
    async fn pop(&self, wait: Duration) -> Option<Envelope> {
        if let Some(envelope) = self.try_pop() {
            return Some(envelope);
        }
        let _ = tokio::time::timeout(wait, self.available.notified()).await;
        self.try_pop()
    }
}

/// Admits payload receives from each sender in header order.
struct PayloadTurnstile {
    next: Mutex<Vec<u64>>,
    advanced: Notify,
}

impl PayloadTurnstile {
    fn new(world_size: u32) -> Self {
        Self {
            next: Mutex::new(vec![0; world_size as usize]),
            advanced: Notify::new(),
        }
    }

    fn is_turn(&self, src: Rank, seq: u64) -> bool {
        self.next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(src as usize)
            .is_some_and(|&next| next == seq)
    }

    /// Wait at most `wait` for `seq` to become `src`'s next payload.
    async fn wait_turn(&self, src: Rank, seq: u64, wait: Duration) -> bool {
        let notified = self.advanced.notified();
        tokio::pin!(notified);
        // Register before checking so an advance in between is not missed.
        notified.as_mut().enable();
        if self.is_turn(src, seq) {
            return true;
        }
        let _ = tokio::time::timeout(wait, notified).await;
        self.is_turn(src, seq)
    }

    fn advance(&self, src: Rank) {
        if let Some(next) = self
            .next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(src as usize)
        {
            *next += 1;
        }
        self.advanced.notify_waiters();
    }
}

/// State shared by the poller and every worker.
struct Dispatch {
    rank: Rank,
    transport: Arc<dyn Transport>,
    registry: Arc<CallableRegistry>,
    table: Arc<CorrelationTable>,
    outbox: Arc<Outbox>,
    config: ArpcConfig,
    queue: ReadyQueue,
    turnstile: PayloadTurnstile,
    shutdown: AtomicBool,
}

impl Dispatch {
    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    async fn poll_headers(self: Arc<Self>) -> Result<()> {
        let rank = self.rank;
        let mut next_seq = vec![0u64; self.transport.world_size() as usize];
        tracing::debug!(rank, "poller started");

        while !self.is_shutting_down() {
            let received = tokio::time::timeout(
                self.config.probe_interval,
                self.transport.recv_any(Channel::Header),
            )
            .await;
            let (src, bytes) = match received {
                Err(_) => continue,
                Ok(Ok(message)) => message,
                Ok(Err(e)) => {
                    tracing::error!(rank, "poller: header receive failed: {e}");
                    return Err(e);
                }
            };

            let header = match MessageHeader::decode(&bytes) {
                Ok(header) => header,
                Err(e) => {
                    tracing::error!(rank, src, "poller: {e}, stopping");
                    return Err(e);
                }
            };
            let Some(counter) = next_seq.get_mut(src as usize) else {
                return Err(ArpcError::InvalidRank {
                    rank: src,
                    world_size: self.transport.world_size(),
                });
            };
            let seq = *counter;
            *counter += 1;

            tracing::trace!(
                rank,
                src,
                fn_id = header.function_id,
                correlation = header.correlation,
                kind = ?header.kind,
                "poller: header queued"
            );
            self.queue.push(Envelope { src, seq, header });
        }

        tracing::debug!(rank, "poller stopped");
        Ok(())
    }

    async fn work(self: Arc<Self>, worker: usize) -> Result<()> {
        let rank = self.rank;
        tracing::debug!(rank, worker, "worker started");

        while !self.is_shutting_down() {
            let Some(envelope) = self.queue.pop(self.config.queue_wait).await else {
                continue;
            };
            let src = envelope.src;
            let payload = match self.receive_payload(&envelope).await {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    tracing::debug!(rank, worker, src, "worker: abandoning message at shutdown");
                    break;
                }
                Err(e @ ArpcError::PeerDisconnected { .. }) => {
                    tracing::error!(
                        rank,
                        worker,
                        src,
                        correlation = envelope.header.correlation,
                        "worker: dropping message: {e}"
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!(rank, worker, src, "worker: payload receive failed: {e}");
                    return Err(e);
                }
            };
            self.handle(envelope, payload).await;
        }

        tracing::debug!(rank, worker, "worker stopped");
        Ok(())
    }

    /// Receive the payload paired with `envelope`, or `None` on shutdown.
    async fn receive_payload(&self, envelope: &Envelope) -> Result<Option<Vec<u8>>> {
        let wait = self.config.probe_interval;
        while !self
            .turnstile
            .wait_turn(envelope.src, envelope.seq, wait)
            .await
        {
            if self.is_shutting_down() {
                return Ok(None);
            }
        }

        let received = loop {
            let recv = self.transport.recv(envelope.src, Channel::Payload);
            match tokio::time::timeout(wait, recv).await {
                Ok(received) => break received,
                Err(_) if self.is_shutting_down() => return Ok(None),
                Err(_) => {}
            }
        };
        // The turn is used up even by a failed receive.
        self.turnstile.advance(envelope.src);
        received.map(Some)
    }

    async fn handle(&self, envelope: Envelope, payload: Vec<u8>) {
        let Envelope { src, header, .. } = envelope;
        let correlation = header.correlation;
        match header.kind {
            MessageKind::Request => self.serve(src, header, &payload).await,
            MessageKind::Answer => match self.table.deliver(correlation, &payload) {
                Ok(true) => self.table.retire(correlation),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(rank = self.rank, src, correlation, "dropping answer: {e}");
                }
            },
            MessageKind::Exception => {
                let reason = decode::<String>(&payload)
                    .unwrap_or_else(|e| format!("unreadable failure report: {e}"));
                tracing::debug!(rank = self.rank, src, correlation, %reason, "remote call failed");
                match self
                    .table
                    .fail(correlation, ArpcError::RemoteFailure { rank: src, reason })
                {
                    Ok(true) => self.table.retire(correlation),
                    Ok(false) => {}
                    Err(e) => tracing::error!(
                        rank = self.rank,
                        src,
                        correlation,
                        "dropping failure report: {e}"
                    ),
                }
            }
        }
    }

    async fn serve(&self, src: Rank, header: MessageHeader, args: &[u8]) {
        let rank = self.rank;
        let fn_id = header.function_id;
        let correlation = header.correlation;

        let served = self
            .registry
            .resolve(fn_id)
            .and_then(|entry| entry.invoke(args));
        let (reply, payload) = match served {
            Ok(result) => (header.answer(), result),
            Err(e) => {
                tracing::error!(rank, src, fn_id, correlation, "serving failed: {e}");
                if !self.config.report_failures {
                    return;
                }
                match encode(&e.to_string()) {
                    Ok(report) => (header.exception(), report),
                    Err(e) => {
                        tracing::error!(rank, src, fn_id, correlation, "failure report: {e}");
                        return;
                    }
                }
            }
        };

        if let Err(e) = self.outbox.send_pair(src, &reply, &payload).await {
            tracing::warn!(rank, src, fn_id, correlation, "reply send failed: {e}");
            return;
        }
        tracing::trace!(rank, src, fn_id, correlation, kind = ?reply.kind, "request served");
    }
}

/// Running poller and workers. Dropping it aborts every task.
pub(crate) struct Engine {
    dispatch: Arc<Dispatch>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl Engine {
    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        registry: Arc<CallableRegistry>,
        table: Arc<CorrelationTable>,
        outbox: Arc<Outbox>,
        config: ArpcConfig,
    ) -> Self {
        let world_size = transport.world_size();
        let workers = config.workers.max(1);
        let dispatch = Arc::new(Dispatch {
            rank: transport.rank(),
            transport,
            registry,
            table,
            outbox,
            config,
            queue: ReadyQueue::new(),
            turnstile: PayloadTurnstile::new(world_size),
            shutdown: AtomicBool::new(false),
        });

        let mut tasks = Vec::with_capacity(workers + 1);
        tasks.push(tokio::spawn(Arc::clone(&dispatch).poll_headers()));
        for worker in 0..workers {
            tasks.push(tokio::spawn(Arc::clone(&dispatch).work(worker)));
        }
        Self { dispatch, tasks }
    }

    /// Signal shutdown, wait for every task and return the first error.
    pub(crate) async fn stop(mut self) -> Result<()> {
        self.dispatch.shutdown.store(true, Ordering::Release);
        let mut first_err = None;
        for task in std::mem::take(&mut self.tasks) {
            let outcome = task.await.unwrap_or_else(|e| {
                Err(ArpcError::transport(format!("engine task panicked: {e}")))
            });
            if let Err(e) = outcome {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
