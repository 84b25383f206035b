use crate::codec::{Decode, Encode};
use crate::error::{ArpcError, Result};
use crate::pool::PoolInner;
use crate::rpc::registry::{InvokeError, Invoker};
use crate::rpc::response::Response;
use crate::types::{CallableKey, FunctionId, Rank};
use std::convert::Infallible;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

struct Binding {
    fn_id: FunctionId,
    pool: Weak<PoolInner>,
}

/// A function that can be called on any rank once registered with an
/// [`ExecutionPool`](crate::ExecutionPool).
///
/// `Args` is the argument tuple, `R` the result. Both travel through the
/// crate codec, including on the local fast path.
///
/// ```no_run
/// use arpc::RemoteFunction;
///
/// let add = RemoteFunction::new(|(a, b): (i32, i32)| a + b);
/// assert!(!add.is_bound());
/// ```
pub struct RemoteFunction<Args, R> {
    key: CallableKey,
    invoker: Invoker,
    binding: OnceLock<Binding>,
    _marker: PhantomData<fn(Args) -> R>,
}

impl<Args, R> RemoteFunction<Args, R>
where
    Args: Encode + Decode + 'static,
    R: Encode + Decode + Send + 'static,
{
    /// Wrap an infallible function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Args) -> R + Send + Sync + 'static,
    {
        Self::try_new(move |args| Ok::<R, Infallible>(f(args)))
    }

    /// Wrap a fallible function. An `Err` is reported as `InvokeFailure`
    /// carrying the error's display text.
    pub fn try_new<F, E>(f: F) -> Self
    where
        F: Fn(Args) -> std::result::Result<R, E> + Send + Sync + 'static,
        E: Display,
    {
        let invoker: Invoker = Arc::new(move |bytes: &[u8]| {
            let args = Args::decode(bytes).map_err(InvokeError::Codec)?;
            let result = f(args).map_err(|e| InvokeError::Raised(e.to_string()))?;
            result.encode().map_err(InvokeError::Codec)
        });
        Self {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            invoker,
            binding: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// Call on `rank` through the pool this function is registered with.
    pub async fn call(&self, rank: Rank, args: Args) -> Result<Response<R>> {
        let (fn_id, pool) = self.bound_pool()?;
        pool.invoke(fn_id, &self.invoker, rank, args).await
    }

    /// Call on every rank in `ranks`, gathering the results.
    pub async fn call_multi(&self, ranks: &[Rank], args: Args) -> Result<Response<Vec<R>>> {
        let (fn_id, pool) = self.bound_pool()?;
        pool.invoke_multi::<Args, R>(fn_id, ranks, args).await
    }
}

impl<Args, R> RemoteFunction<Args, R> {
    pub(crate) fn key(&self) -> CallableKey {
        self.key
    }

    pub(crate) fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    /// The id assigned at registration, if registered.
    pub fn id(&self) -> Option<FunctionId> {
        self.binding.get().map(|b| b.fn_id)
    }

    /// Whether this function is registered with a pool that is still alive.
    pub fn is_bound(&self) -> bool {
        self.binding
            .get()
            .is_some_and(|b| b.pool.strong_count() > 0)
    }

    /// Record the registration. Fails if already bound to any pool.
    pub(crate) fn bind(&self, fn_id: FunctionId, pool: &Arc<PoolInner>) -> Result<()> {
        self.binding
            .set(Binding {
                fn_id,
                pool: Arc::downgrade(pool),
            })
            .map_err(|_| ArpcError::DuplicateRegistration {
                key: self.key,
                fn_id: self.id().unwrap_or(fn_id),
            })
    }

    fn bound_pool(&self) -> Result<(FunctionId, Arc<PoolInner>)> {
        let binding = self.binding.get().ok_or(ArpcError::Unassociated)?;
        let pool = binding.pool.upgrade().ok_or(ArpcError::Unassociated)?;
        Ok((binding.fn_id, pool))
    }

    /// The function id, provided this function is registered with `pool`.
    pub(crate) fn id_in(&self, pool: &Arc<PoolInner>) -> Result<FunctionId> {
        match self.binding.get() {
            Some(b) if std::ptr::eq(b.pool.as_ptr(), Arc::as_ptr(pool)) => Ok(b.fn_id),
            _ => Err(ArpcError::Unassociated),
        }
    }
}

impl<Args, R> std::fmt::Debug for RemoteFunction<Args, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFunction")
            .field("key", &self.key)
            .field("fn_id", &self.id())
            .finish()
    }
}
