//! Per-request result channel
//!
//! Each admitted request owns a [`ResultSender`]; settling consumes it, so a
//! request is resolved or rejected at most once. The caller side is a
//! [`RequestHandle`], a cloneable future so deduplicated submissions can
//! share one outcome.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use uuid::Uuid;

use super::error::SchedulerError;

/// Final outcome delivered to callers
pub type Outcome<T> = Result<T, SchedulerError>;

/// Sending half, owned by the queued request
pub struct ResultSender<T> {
    tx: oneshot::Sender<Outcome<T>>,
}

impl<T> ResultSender<T> {
    /// Deliver the outcome; a caller that stopped waiting is not an error
    pub fn settle(self, outcome: Outcome<T>) {
        let _ = self.tx.send(outcome);
    }
}

/// Awaitable result of a submitted request
///
/// Resolves to `Err(SchedulerError::Shutdown)` if the request is dropped
/// without being settled (for example when the scheduler itself is dropped).
#[derive(Clone)]
pub struct RequestHandle<T: Clone> {
    id: Uuid,
    outcome: Shared<BoxFuture<'static, Outcome<T>>>,
}

impl<T> RequestHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a connected sender/handle pair
    pub(crate) fn channel(id: Uuid) -> (ResultSender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let outcome = async move { rx.await.unwrap_or(Err(SchedulerError::Shutdown)) }
            .boxed()
            .shared();
        (ResultSender { tx }, Self { id, outcome })
    }

    /// ID of the request this handle observes
    ///
    /// Deduplicated submissions share the ID of the original request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Outcome if the request has already been settled
    pub fn peek(&self) -> Option<&Outcome<T>> {
        self.outcome.peek()
    }
}

impl<T: Clone> std::fmt::Debug for RequestHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle").field("id", &self.id).finish()
    }
}

impl<T: Clone> Future for RequestHandle<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.outcome).poll(cx)
    }
}
