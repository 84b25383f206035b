use crate::error::{ArpcError, Result};
use crate::rpc::handler::ResponseHandler;
use crate::types::{CorrelationId, Rank};
use std::sync::{Arc, Mutex, PoisonError};

/// Table of in-flight outbound calls, indexed by correlation id.
///
/// A new call takes the slot past the current tail, so its id is the table
/// length at registration. Retiring a slot leaves an empty placeholder;
/// storage is reclaimed only for the trailing run of retired slots. Interior
/// placeholders stay allocated until every slot after them is retired too,
/// and ids are only reused once reclaimed.
pub struct CorrelationTable {
    rank: Rank,
    slots: Mutex<Vec<Option<Arc<dyn ResponseHandler>>>>,
}

impl CorrelationTable {
    /// Empty table for the calls issued by `rank`.
    pub fn new(rank: Rank) -> Self {
        Self {
            rank,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Store `handler` and return the id its answers must carry.
    pub fn register(&self, handler: Arc<dyn ResponseHandler>) -> CorrelationId {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.push(Some(handler));
        (slots.len() - 1) as CorrelationId
    }

    fn live_handler(&self, id: CorrelationId) -> Result<Arc<dyn ResponseHandler>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        usize::try_from(id)
            .ok()
            .and_then(|idx| slots.get(idx))
            .and_then(|slot| slot.clone())
            .ok_or(ArpcError::UnknownCorrelation { correlation: id })
    }

    /// Hand an answer payload to the handler in slot `id`.
    ///
    /// Returns whether the handler completed; the caller must then
    /// [`retire`](Self::retire) the slot exactly once. The handler runs
    /// outside the table lock.
    pub fn deliver(&self, id: CorrelationId, payload: &[u8]) -> Result<bool> {
        Ok(self.live_handler(id)?.deliver(payload))
    }

    /// Hand a failure to the handler in slot `id`. Same contract as `deliver`.
    pub fn fail(&self, id: CorrelationId, error: ArpcError) -> Result<bool> {
        Ok(self.live_handler(id)?.fail(error))
    }

    /// Release slot `id`.
    pub fn retire(&self, id: CorrelationId) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match usize::try_from(id).ok().filter(|&idx| idx < slots.len()) {
            Some(idx) => slots[idx] = None,
            None => {
                tracing::warn!(
                    rank = self.rank,
                    correlation = id,
                    "retire of unallocated correlation slot"
                );
                return;
            }
        }
        while matches!(slots.last(), Some(None)) {
            slots.pop();
        }
    }

    /// Slots holding a handler.
    pub fn live(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// Allocated slots, including retired interior placeholders.
    pub fn slot_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
