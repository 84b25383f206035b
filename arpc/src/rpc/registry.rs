use crate::error::{ArpcError, Result};
use crate::types::{CallableKey, FIRST_FUNCTION_ID, FunctionId};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

/// Why a type-erased invocation did not produce a result.
#[derive(Debug)]
pub enum InvokeError {
    /// Argument decode or result encode failed.
    Codec(ArpcError),
    /// The function itself returned an error.
    Raised(String),
}

/// Type alias for type-erased invokers.
///
/// Receives the encoded argument tuple and returns the encoded result.
pub type Invoker = Arc<dyn Fn(&[u8]) -> std::result::Result<Vec<u8>, InvokeError> + Send + Sync>;

/// A registered function: its agreed id plus the invoker behind it.
pub struct CallableEntry {
    id: FunctionId,
    key: CallableKey,
    invoker: Invoker,
}

impl CallableEntry {
    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn key(&self) -> CallableKey {
        self.key
    }

    /// Run the function on an encoded argument buffer.
    pub fn invoke(&self, args: &[u8]) -> Result<Vec<u8>> {
        invoke_guarded(self.id, &self.invoker, args)
    }
}

impl std::fmt::Debug for CallableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallableEntry")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Call `invoker`, turning returned errors and panics into `InvokeFailure`.
pub(crate) fn invoke_guarded(
    fn_id: FunctionId,
    invoker: &Invoker,
    args: &[u8],
) -> Result<Vec<u8>> {
    match catch_unwind(AssertUnwindSafe(|| invoker(args))) {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(InvokeError::Codec(e))) => Err(e),
        Ok(Err(InvokeError::Raised(reason))) => Err(ArpcError::InvokeFailure { fn_id, reason }),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(ArpcError::InvokeFailure {
                fn_id,
                reason: format!("panicked: {msg}"),
            })
        }
    }
}

struct RegistryMaps {
    by_id: HashMap<FunctionId, Arc<CallableEntry>>,
    by_key: HashMap<CallableKey, FunctionId>,
    next_id: FunctionId,
}

/// Registry mapping function ids to their invokers.
///
/// Ids are handed out monotonically from [`FIRST_FUNCTION_ID`], so ranks that
/// register the same functions in the same order agree on every id.
pub struct CallableRegistry {
    maps: Mutex<RegistryMaps>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self {
            maps: Mutex::new(RegistryMaps {
                by_id: HashMap::new(),
                by_key: HashMap::new(),
                next_id: FIRST_FUNCTION_ID,
            }),
        }
    }

    /// Register an invoker under `key` and return its function id.
    ///
    /// Fails with `DuplicateRegistration` if `key` is already registered.
    pub fn register(&self, key: CallableKey, invoker: Invoker) -> Result<FunctionId> {
        let mut maps = self.maps.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&fn_id) = maps.by_key.get(&key) {
            return Err(ArpcError::DuplicateRegistration { key, fn_id });
        }
        let id = maps.next_id;
        maps.next_id += 1;
        maps.by_key.insert(key, id);
        maps.by_id.insert(id, Arc::new(CallableEntry { id, key, invoker }));
        Ok(id)
    }

    /// Look up an entry. The returned handle is invoked outside the lock.
    pub fn resolve(&self, fn_id: FunctionId) -> Result<Arc<CallableEntry>> {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&fn_id)
            .cloned()
            .ok_or(ArpcError::UnknownFunction { fn_id })
    }

    #[cfg(test)]
    fn id_of(&self, key: CallableKey) -> Option<FunctionId> {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .get(&key)
            .copied()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.maps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CallableRegistry {
    fn default() -> Self {
        Self::new()
    }
}
