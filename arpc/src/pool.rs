use crate::codec::{Decode, Encode};
use crate::collective::barrier;
use crate::config::ArpcConfig;
use crate::error::{ArpcError, Result};
use crate::protocol::MessageHeader;
use crate::rpc::correlation::CorrelationTable;
use crate::rpc::engine::{Engine, Outbox};
use crate::rpc::function::RemoteFunction;
use crate::rpc::handler::{GatherHandler, SingleHandler};
use crate::rpc::registry::{CallableRegistry, Invoker, invoke_guarded};
use crate::rpc::response::Response;
use crate::transport::Transport;
use crate::types::{FunctionId, Rank};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// State shared between the pool handle and the functions bound to it.
pub(crate) struct PoolInner {
    transport: Arc<dyn Transport>,
    registry: Arc<CallableRegistry>,
    table: Arc<CorrelationTable>,
    outbox: Arc<Outbox>,
    barrier_epoch: AtomicU64,
    closing: AtomicBool,
    config: ArpcConfig,
}

impl PoolInner {
    fn rank(&self) -> Rank {
        self.transport.rank()
    }

    fn check_open(&self) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(ArpcError::ShutDown);
        }
        Ok(())
    }

    fn check_rank(&self, rank: Rank) -> Result<()> {
        let world_size = self.transport.world_size();
        if rank >= world_size {
            return Err(ArpcError::InvalidRank { rank, world_size });
        }
        Ok(())
    }

    async fn barrier(&self) -> Result<()> {
        let epoch = self.barrier_epoch.fetch_add(1, Ordering::Relaxed);
        barrier(&*self.transport, epoch, self.config.barrier_timeout).await
    }

    pub(crate) async fn invoke<Args, R>(
        &self,
        fn_id: FunctionId,
        invoker: &Invoker,
        rank: Rank,
        args: Args,
    ) -> Result<Response<R>>
    where
        Args: Encode,
        R: Decode + Send + 'static,
    {
        self.check_open()?;
        self.check_rank(rank)?;
        let payload = args.encode()?;

        if rank == self.rank() {
            // Same codec path as a remote call, without the network.
            let result =
                invoke_guarded(fn_id, invoker, &payload).and_then(|bytes| R::decode(&bytes));
            return Ok(Response::ready(result));
        }

        let (handler, response) = SingleHandler::<R>::new(self.rank());
        let correlation = self.table.register(Arc::new(handler));
        let header = MessageHeader::request(fn_id, correlation);
        // On failure the slot stays: the peer may still answer it.
        self.outbox.send_pair(rank, &header, &payload).await?;
        tracing::trace!(rank = self.rank(), dest = rank, fn_id, correlation, "call issued");
        Ok(response)
    }

    pub(crate) async fn invoke_multi<Args, R>(
        &self,
        fn_id: FunctionId,
        ranks: &[Rank],
        args: Args,
    ) -> Result<Response<Vec<R>>>
    where
        Args: Encode,
        R: Decode + Send + 'static,
    {
        self.check_open()?;
        for &rank in ranks {
            self.check_rank(rank)?;
        }
        if ranks.is_empty() {
            return Ok(Response::ready(Ok(Vec::new())));
        }
        let payload = args.encode()?;

        let (handler, response) = GatherHandler::<R>::new(self.rank(), ranks.len());
        let correlation = self.table.register(Arc::new(handler));
        let header = MessageHeader::request(fn_id, correlation);
        self.outbox.multicast(ranks, &header, &payload).await?;
        tracing::trace!(
            rank = self.rank(),
            targets = ranks.len(),
            fn_id,
            correlation,
            "multicast issued"
        );
        Ok(response)
    }
}

/// Per-process RPC endpoint: registers functions and invokes them on any
/// rank of the transport's world.
///
/// Every rank must create its pool, register its functions in the same
/// order, and shut the pool down together; each of these steps ends in a
/// barrier.
pub struct ExecutionPool {
    inner: Arc<PoolInner>,
    engine: Option<Engine>,
}

impl ExecutionPool {
    /// Synchronize with every rank, then start the poller and workers.
    pub async fn start(transport: Arc<dyn Transport>, config: ArpcConfig) -> Result<Self> {
        let inner = Arc::new(PoolInner {
            registry: Arc::new(CallableRegistry::new()),
            table: Arc::new(CorrelationTable::new(transport.rank())),
            outbox: Arc::new(Outbox::new(Arc::clone(&transport))),
            transport,
            barrier_epoch: AtomicU64::new(0),
            closing: AtomicBool::new(false),
            config,
        });
        inner.barrier().await?;

        let engine = Engine::start(
            Arc::clone(&inner.transport),
            Arc::clone(&inner.registry),
            Arc::clone(&inner.table),
            Arc::clone(&inner.outbox),
            inner.config.clone(),
        );
        tracing::debug!(
            rank = inner.rank(),
            world_size = inner.transport.world_size(),
            workers = inner.config.workers,
            "execution pool started"
        );
        Ok(Self {
            inner,
            engine: Some(engine),
        })
    }

    pub fn rank(&self) -> Rank {
        self.inner.rank()
    }

    pub fn world_size(&self) -> u32 {
        self.inner.transport.world_size()
    }

    pub fn config(&self) -> &ArpcConfig {
        &self.inner.config
    }

    /// Whether `rank` is this process. Calls to it take the local fast path.
    pub fn is_local(&self, rank: Rank) -> bool {
        rank == self.rank()
    }

    /// Outbound calls still waiting for their answers.
    pub fn pending_calls(&self) -> usize {
        self.inner.table.live()
    }

    /// Correlation slots allocated, including retired interior placeholders.
    pub fn slot_count(&self) -> usize {
        self.inner.table.slot_count()
    }

    /// Register `function` and bind it to this pool, then barrier.
    pub async fn register_function<Args, R>(
        &self,
        function: &RemoteFunction<Args, R>,
    ) -> Result<FunctionId> {
        self.inner.check_open()?;
        if let Some(fn_id) = function.id() {
            return Err(ArpcError::DuplicateRegistration {
                key: function.key(),
                fn_id,
            });
        }
        let fn_id = self
            .inner
            .registry
            .register(function.key(), Arc::clone(function.invoker()))?;
        function.bind(fn_id, &self.inner)?;
        self.inner.barrier().await?;
        tracing::debug!(rank = self.rank(), fn_id, "function registered");
        Ok(fn_id)
    }

    /// Call `function` on `rank`.
    ///
    /// Completes once the request is sent; the returned response resolves
    /// when the answer arrives. For the local rank it is already resolved.
    pub async fn invoke<Args, R>(
        &self,
        rank: Rank,
        function: &RemoteFunction<Args, R>,
        args: Args,
    ) -> Result<Response<R>>
    where
        Args: Encode,
        R: Decode + Send + 'static,
    {
        let fn_id = function.id_in(&self.inner)?;
        self.inner
            .invoke(fn_id, function.invoker(), rank, args)
            .await
    }

    /// Call `function` on every rank in `ranks`. The result holds one value
    /// per target in arrival order; an empty `ranks` resolves immediately.
    ///
    /// The local rank, if listed, is reached through the transport like any
    /// other target.
    pub async fn invoke_multi<Args, R>(
        &self,
        ranks: &[Rank],
        function: &RemoteFunction<Args, R>,
        args: Args,
    ) -> Result<Response<Vec<R>>>
    where
        Args: Encode,
        R: Decode + Send + 'static,
    {
        let fn_id = function.id_in(&self.inner)?;
        self.inner.invoke_multi(fn_id, ranks, args).await
    }

    /// Stop accepting calls, barrier with every rank, then stop the engine.
    ///
    /// Returns the first error that stopped the poller or a worker. Calls
    /// still in flight are abandoned.
    pub async fn shutdown(mut self) -> Result<()> {
        self.inner.closing.store(true, Ordering::Release);
        let synced = self.inner.barrier().await;
        let stopped = match self.engine.take() {
            Some(engine) => engine.stop().await,
            None => Ok(()),
        };
        tracing::debug!(
            rank = self.rank(),
            pending = self.pending_calls(),
            "execution pool shut down"
        );
        synced.and(stopped)
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        self.inner.closing.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for ExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .field("pending_calls", &self.pending_calls())
            .finish()
    }
}
