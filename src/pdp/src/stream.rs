//! Reactive stream combinators
//!
//! Evaluation results are push-based streams of [`Val`] snapshots. Dropping a
//! stream drops every upstream subscription it owns, so cancelling a consumer
//! transitively cancels all operand and attribute streams.

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::value::Val;

/// Stream of value snapshots
pub type ValStream = BoxStream<'static, Val>;

/// Stream of exactly one value
pub fn just(value: Val) -> ValStream {
    stream::once(future::ready(value)).boxed()
}

/// Stream of exactly one error value
pub fn error(message: impl Into<String>) -> ValStream {
    just(Val::error(message))
}

/// Combine the latest values of all `streams`.
///
/// Nothing is emitted until every stream produced at least one value. After
/// that, every emission of any stream yields a new combination. With no input
/// streams, `combiner` is called once with an empty slice.
pub fn combine_latest<T, R, F>(streams: Vec<BoxStream<'static, T>>, combiner: F) -> BoxStream<'static, R>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(&[T]) -> R + Send + 'static,
{
    let count = streams.len();
    if count == 0 {
        return stream::once(future::ready(combiner(&[]))).boxed();
    }

    let indexed = streams
        .into_iter()
        .enumerate()
        .map(|(index, s)| s.map(move |item| (index, item)).boxed());

    let state: (Vec<Option<T>>, usize) = (vec![None; count], 0);

    stream::select_all(indexed)
        .scan(state, move |(latest, warm), (index, item)| {
            if latest[index].is_none() {
                *warm += 1;
            }
            latest[index] = Some(item);
            let combined = if *warm == count {
                let values: Vec<T> = latest.iter().flatten().cloned().collect();
                Some(combiner(&values))
            } else {
                None
            };
            future::ready(Some(combined))
        })
        .filter_map(future::ready)
        .boxed()
}

/// Switch to the stream produced for the latest upstream item.
///
/// When `source` emits, the previous inner stream is dropped (cancelled) and
/// the one returned by `f` takes its place.
pub fn switch_map<T, U, F>(source: BoxStream<'static, T>, f: F) -> BoxStream<'static, U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> BoxStream<'static, U> + Send + Unpin + 'static,
{
    SwitchMap {
        outer: Some(source),
        inner: None,
        f,
    }
    .boxed()
}

/// Emit the first value of `source`, then drop the subscription.
pub fn first_value<T: Send + 'static>(mut source: BoxStream<'static, T>) -> BoxStream<'static, T> {
    stream::once(async move { source.next().await })
        .filter_map(future::ready)
        .boxed()
}

struct SwitchMap<T, U, F> {
    outer: Option<BoxStream<'static, T>>,
    inner: Option<BoxStream<'static, U>>,
    f: F,
}

impl<T, U, F> Stream for SwitchMap<T, U, F>
where
    F: FnMut(T) -> BoxStream<'static, U> + Unpin,
{
    type Item = U;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<U>> {
        let this = self.get_mut();
        loop {
            if let Some(inner) = this.inner.as_mut() {
                match inner.poll_next_unpin(cx) {
                    Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                    Poll::Ready(None) => this.inner = None,
                    Poll::Pending => {}
                }
            }

            if let Some(outer) = this.outer.as_mut() {
                match outer.poll_next_unpin(cx) {
                    Poll::Ready(Some(item)) => {
                        // previous inner stream is dropped here
                        this.inner = Some((this.f)(item));
                        continue;
                    }
                    Poll::Ready(None) => this.outer = None,
                    Poll::Pending => {}
                }
            }

            return if this.outer.is_none() && this.inner.is_none() {
                Poll::Ready(None)
            } else {
                Poll::Pending
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::FutureExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_combine_latest_waits_for_all_operands() {
        let (tx_a, rx_a) = mpsc::unbounded::<i32>();
        let (tx_b, rx_b) = mpsc::unbounded::<i32>();

        let mut combined = combine_latest(vec![rx_a.boxed(), rx_b.boxed()], |v: &[i32]| v.to_vec());

        tx_a.unbounded_send(1).unwrap();
        // only one operand is warm: nothing may be emitted yet
        assert!(combined.next().now_or_never().is_none());

        tx_b.unbounded_send(10).unwrap();
        assert_eq!(combined.next().await, Some(vec![1, 10]));

        tx_a.unbounded_send(3).unwrap();
        assert_eq!(combined.next().await, Some(vec![3, 10]));

        tx_b.unbounded_send(20).unwrap();
        assert_eq!(combined.next().await, Some(vec![3, 20]));

        drop(tx_a);
        drop(tx_b);
        assert_eq!(combined.next().await, None);
    }

    #[tokio::test]
    async fn test_combine_latest_empty() {
        let combined = combine_latest(Vec::<BoxStream<'static, i32>>::new(), |v: &[i32]| v.len());
        assert_eq!(combined.collect::<Vec<_>>().await, vec![0]);
    }

    #[tokio::test]
    async fn test_switch_map_cancels_previous_inner() {
        let (outer_tx, outer_rx) = mpsc::unbounded::<i32>();
        let (first_tx, first_rx) = mpsc::unbounded::<i32>();
        let (second_tx, second_rx) = mpsc::unbounded::<i32>();
        let mut inners = vec![second_rx.boxed(), first_rx.boxed()];

        let mut switched = switch_map(outer_rx.boxed(), move |_| inners.pop().unwrap());

        outer_tx.unbounded_send(1).unwrap();
        first_tx.unbounded_send(100).unwrap();
        assert_eq!(switched.next().await, Some(100));

        outer_tx.unbounded_send(2).unwrap();
        second_tx.unbounded_send(200).unwrap();
        assert_eq!(switched.next().await, Some(200));

        // first inner has been dropped with the switch
        assert!(first_tx.unbounded_send(101).is_err());
    }

    #[tokio::test]
    async fn test_first_value_unsubscribes() {
        let (tx, rx) = mpsc::unbounded::<Val>();
        tx.unbounded_send(Val::of(json!(1))).unwrap();

        let values: Vec<Val> = first_value(rx.boxed()).collect().await;
        assert_eq!(values, vec![Val::of(json!(1))]);
        assert!(tx.unbounded_send(Val::of(json!(2))).is_err());
    }
}
