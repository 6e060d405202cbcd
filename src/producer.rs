//! The public face of every per-entity operation: a cold, cancelable
//! stream of values or a single terminal failure.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{future, stream, Stream, StreamExt};

use crate::error::{DiscoveryError, Result};

/// A lazily started asynchronous producer.
///
/// Nothing happens until the producer is first polled; dropping it cancels
/// any platform work it (alone) was keeping alive. Subscribers observe
/// exactly one of: value events followed by completion, or value events
/// followed by a single terminal failure — never both.
pub struct Producer<T> {
    inner: Pin<Box<dyn Stream<Item = Result<T>> + Send>>,
}

impl<T> Producer<T> {
    /// Wrap an arbitrary stream of results.
    pub fn from_stream(stream: impl Stream<Item = Result<T>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// An already-completed producer yielding one value.
    pub fn ready(value: T) -> Self
    where
        T: Send + 'static,
    {
        Self::from_stream(stream::once(future::ready(Ok(value))))
    }

    /// An already-failed producer.
    pub fn failed(err: DiscoveryError) -> Self
    where
        T: Send + 'static,
    {
        Self::from_stream(stream::once(future::ready(Err(err))))
    }

    /// Producer yielding only the first element of this one.
    pub fn first(self) -> Self
    where
        T: Send + 'static,
    {
        Self::from_stream(self.take(1))
    }
}

impl<T> Stream for Producer<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> std::fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Producer")
    }
}
