use crate::error::{ArpcError, Result};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

enum State<T> {
    Ready(Option<Result<T>>),
    Pending(oneshot::Receiver<Result<T>>),
}

/// Handle to the eventual result of a call.
///
/// Awaiting it yields the decoded result. Calls served on the local rank
/// and empty multicasts produce a response that is already resolved.
/// A call the remote side never answers stays pending forever; dropping
/// the response does not release its correlation slot.
#[must_use = "a response does nothing unless awaited"]
pub struct Response<T> {
    state: State<T>,
}

impl<T> Response<T> {
    pub(crate) fn ready(result: Result<T>) -> Self {
        Self {
            state: State::Ready(Some(result)),
        }
    }

    pub(crate) fn channel() -> (oneshot::Sender<Result<T>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                state: State::Pending(rx),
            },
        )
    }

    /// Whether the result is available without waiting.
    pub fn is_ready(&mut self) -> bool {
        let resolved = match &mut self.state {
            State::Ready(slot) => return slot.is_some(),
            State::Pending(rx) => match rx.try_recv() {
                Ok(result) => result,
                Err(oneshot::error::TryRecvError::Empty) => return false,
                Err(oneshot::error::TryRecvError::Closed) => Err(ArpcError::Abandoned),
            },
        };
        self.state = State::Ready(Some(resolved));
        true
    }
}

// The result is only ever moved out, never pinned.
impl<T> Unpin for Response<T> {}

impl<T> Future for Response<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Ready(slot) => Poll::Ready(slot.take().unwrap_or(Err(ArpcError::Abandoned))),
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(Err(ArpcError::Abandoned))),
        }
    }
}

impl<T> std::fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Ready(Some(_)) => "ready",
            State::Ready(None) => "consumed",
            State::Pending(_) => "pending",
        };
        f.debug_struct("Response").field("state", &state).finish()
    }
}
