use crate::codec::Decode;
use crate::error::{ArpcError, Result};
use crate::rpc::response::Response;
use crate::types::Rank;
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Consumer of the answers to one outbound call.
///
/// Both methods return `true` once the handler has everything it waits for;
/// the caller then retires the handler's correlation slot.
pub trait ResponseHandler: Send + Sync {
    /// Consume one answer payload.
    fn deliver(&self, payload: &[u8]) -> bool;

    /// Consume one failure reported in place of an answer.
    fn fail(&self, error: ArpcError) -> bool;
}

/// Handler for a call to exactly one rank. `rank` is the calling rank.
pub struct SingleHandler<R> {
    rank: Rank,
    tx: Mutex<Option<oneshot::Sender<Result<R>>>>,
}

impl<R: Decode + Send + 'static> SingleHandler<R> {
    pub fn new(rank: Rank) -> (Self, Response<R>) {
        let (tx, response) = Response::channel();
        (
            Self {
                rank,
                tx: Mutex::new(Some(tx)),
            },
            response,
        )
    }

    fn resolve(&self, result: Result<R>) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        match tx {
            // The caller may have dropped its response; that is not an error.
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::warn!(rank = self.rank, "single handler resolved twice, ignoring"),
        }
        true
    }
}

impl<R: Decode + Send + 'static> ResponseHandler for SingleHandler<R> {
    fn deliver(&self, payload: &[u8]) -> bool {
        self.resolve(R::decode(payload))
    }

    fn fail(&self, error: ArpcError) -> bool {
        self.resolve(Err(error))
    }
}

struct GatherState<R> {
    remaining: usize,
    results: Vec<R>,
    error: Option<ArpcError>,
    tx: Option<oneshot::Sender<Result<Vec<R>>>>,
}

/// Handler for a multicast: collects one answer per target rank.
///
/// Results are kept in arrival order, which has no relation to the order
/// of the target list. The response resolves once every target answered,
/// to the first error seen if any contribution failed.
pub struct GatherHandler<R> {
    rank: Rank,
    state: Mutex<GatherState<R>>,
}

impl<R: Decode + Send + 'static> GatherHandler<R> {
    /// Expect `expected` contributions for a multicast issued by `rank`.
    pub fn new(rank: Rank, expected: usize) -> (Self, Response<Vec<R>>) {
        let (tx, response) = Response::channel();
        let handler = Self {
            rank,
            state: Mutex::new(GatherState {
                remaining: expected,
                results: Vec::with_capacity(expected),
                error: None,
                tx: Some(tx),
            }),
        };
        if expected == 0 {
            handler.finish(&mut handler.state.lock().unwrap_or_else(PoisonError::into_inner));
        }
        (handler, response)
    }

    #[cfg(test)]
    fn remaining(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
    }

    fn finish(&self, state: &mut GatherState<R>) {
        if let Some(tx) = state.tx.take() {
            let result = match state.error.take() {
                Some(e) => Err(e),
                None => Ok(std::mem::take(&mut state.results)),
            };
            let _ = tx.send(result);
        }
    }

    /// Apply one contribution. Decoding happens before the lock is taken.
    fn contribute(&self, contribution: Result<R>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.remaining == 0 {
            tracing::warn!(
                rank = self.rank,
                "gather handler received more answers than expected, ignoring"
            );
            return true;
        }
        match contribution {
            Ok(value) => state.results.push(value),
            Err(e) => {
                state.error.get_or_insert(e);
            }
        }
        state.remaining -= 1;
        if state.remaining == 0 {
            self.finish(&mut state);
            return true;
        }
        false
    }
}

impl<R: Decode + Send + 'static> ResponseHandler for GatherHandler<R> {
    fn deliver(&self, payload: &[u8]) -> bool {
        self.contribute(R::decode(payload))
    }

    fn fail(&self, error: ArpcError) -> bool {
        self.contribute(Err(error))
    }
}
