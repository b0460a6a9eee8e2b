use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;

/// Run `scan_fn` over `items` with at most `batch_size` in flight.
///
/// Bounded fan-out over an unordered buffer: a slot frees up the moment
/// any probe finishes, so one slow host never stalls the rest of the
/// batch. Cancellation stops consumption; whatever is still in flight is
/// dropped and its results discarded.
pub async fn batch_scan<T, O, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    cancel: CancellationToken,
    scan_fn: F,
) -> Vec<O>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Option<O>>,
{
    stream::iter(items)
        .map(scan_fn)
        .buffer_unordered(batch_size.max(1))
        .take_while(|_| std::future::ready(!cancel.is_cancelled()))
        .filter_map(std::future::ready)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_all_items() {
        let items: Vec<u32> = (0..50).collect();
        let results = batch_scan(items, 8, CancellationToken::new(), |n| async move {
            if n % 2 == 0 { Some(n) } else { None }
        })
        .await;
        assert_eq!(results.len(), 25);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = batch_scan(vec![1, 2, 3], 2, cancel, |n| async move { Some(n) }).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<u32> = (0..40).collect();
        batch_scan(items, 4, CancellationToken::new(), |_n| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Some(())
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 4);
    }
}
