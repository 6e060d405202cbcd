//! Pipeline composition: latest-wins flat-mapping and the latest-of-all
//! join used to chain browse, resolve, and metadata lookup.

use futures_util::{Stream, StreamExt};

use crate::entity::{EntitySet, NetworkEntity};
use crate::error::Result;
use crate::producer::Producer;

/// Latest-wins flat-map.
///
/// Each upstream value replaces the current inner stream with a fresh one
/// built by `make`; dropping the previous inner stream cancels whatever
/// platform work only it was keeping alive, so stale results from an older
/// upstream emission can never reach the consumer. Upstream or inner
/// failure is terminal. After upstream completes, the final inner stream is
/// drained to completion.
pub(crate) fn switch_map<S, A, F, U, T>(upstream: S, mut make: F) -> impl Stream<Item = Result<T>>
where
    S: Stream<Item = Result<A>> + Send + 'static,
    F: FnMut(A) -> U + Send + 'static,
    U: Stream<Item = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut inner: Option<std::pin::Pin<Box<U>>> = None;
        let mut upstream_done = false;
        loop {
            if upstream_done && inner.is_none() {
                return;
            }
            tokio::select! {
                // Prefer upstream so a pending newer emission replaces the
                // inner stream before more of its items are drawn.
                biased;
                up = upstream.next(), if !upstream_done => match up {
                    Some(Ok(value)) => inner = Some(Box::pin(make(value))),
                    Some(Err(err)) => {
                        yield Err(err);
                        return;
                    }
                    None => upstream_done = true,
                },
                item = async { inner.as_mut().expect("guarded by is_some").next().await },
                    if inner.is_some() =>
                {
                    match item {
                        Some(Ok(value)) => yield Ok(value),
                        Some(Err(err)) => {
                            yield Err(err);
                            return;
                        }
                        None => inner = None,
                    }
                }
            }
        }
    }
}

/// Latest-of-all join over per-entity producers.
///
/// Emits an [`EntitySet`] of the latest value from every source once each
/// has emitted at least once, then re-emits on any member's update. A
/// member failure is terminal. An empty input emits one empty set so a
/// composed pipeline still reports "nothing discovered".
pub(crate) fn combine_latest(
    sources: Vec<Producer<NetworkEntity>>,
) -> impl Stream<Item = Result<EntitySet>> {
    async_stream::stream! {
        if sources.is_empty() {
            yield Ok(EntitySet::new());
            return;
        }
        let total = sources.len();
        let mut latest: Vec<Option<NetworkEntity>> = (0..total).map(|_| None).collect();
        let mut filled = 0usize;
        let indexed = sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| source.map(move |item| (index, item)).boxed());
        let mut merged = futures_util::stream::select_all(indexed);
        while let Some((index, item)) = merged.next().await {
            match item {
                Err(err) => {
                    yield Err(err);
                    return;
                }
                Ok(entity) => {
                    if latest[index].replace(entity).is_none() {
                        filled += 1;
                    }
                    if filled == total {
                        yield Ok(latest.iter().flatten().cloned().collect());
                    }
                }
            }
        }
    }
}
