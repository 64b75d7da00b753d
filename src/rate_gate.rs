//! Rate limiting for progress updates
//!
//! [`RateGate`] enforces a minimum interval between two passes. [`throttle`]
//! builds the per-link update stage on top of it: updates that arrive while the
//! gate is closed are coalesced into a single pending slot (newest wins) which
//! is flushed when the gate reopens, while terminal updates bypass the gate and
//! discard whatever is pending. A terminal update is never dropped.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::types::DownloadJob;

/// Items flowing through a [`throttle`] stage
pub trait Coalesce {
    /// Terminal items are delivered immediately and end the stage
    fn is_terminal(&self) -> bool;
}

impl Coalesce for DownloadJob {
    fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Minimum-interval gate
///
/// The gate is open until the first pass, then closed for `interval` after
/// every pass. Uses tokio's clock so it follows paused time in tests.
#[derive(Clone, Debug)]
pub struct RateGate {
    interval: Duration,
    last_pass: Option<Instant>,
}

impl RateGate {
    /// Create an open gate with the given minimum interval
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_pass: None,
        }
    }

    /// Minimum interval between passes
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a pass at `now` respects the interval
    pub fn is_open(&self, now: Instant) -> bool {
        self.last_pass
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Earliest instant the gate is open (now, if it already is)
    pub fn opens_at(&self) -> Instant {
        match self.last_pass {
            Some(last) => last + self.interval,
            None => Instant::now(),
        }
    }

    /// Record a pass at `now`
    pub fn pass(&mut self, now: Instant) {
        self.last_pass = Some(now);
    }
}

/// Forward items from `rx` to `deliver`, spacing non-terminal items by `interval`.
///
/// - A non-terminal item arriving while the gate is open is delivered at once.
/// - Non-terminal items arriving while it is closed replace a single pending
///   slot, delivered when the gate reopens.
/// - A terminal item clears the pending slot, is delivered immediately and
///   ends the stage; later items are never read.
/// - When `rx` closes, a pending item is delivered once the gate reopens.
///
/// `deliver` returns `false` when the downstream is gone, which stops the stage.
pub async fn throttle<T, F, Fut>(mut rx: mpsc::Receiver<T>, interval: Duration, mut deliver: F)
where
    T: Coalesce,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut gate = RateGate::new(interval);
    let mut pending: Option<T> = None;

    loop {
        let flush_at = gate.opens_at();

        tokio::select! {
            received = rx.recv() => match received {
                Some(item) if item.is_terminal() => {
                    if pending.take().is_some() {
                        tracing::trace!("discarding coalesced update in favour of terminal update");
                    }
                    deliver(item).await;
                    return;
                }
                Some(item) => {
                    let now = Instant::now();
                    if pending.is_none() && gate.is_open(now) {
                        gate.pass(now);
                        if !deliver(item).await {
                            return;
                        }
                    } else {
                        pending = Some(item);
                    }
                }
                None => {
                    if let Some(item) = pending.take() {
                        tokio::time::sleep_until(gate.opens_at()).await;
                        deliver(item).await;
                    }
                    return;
                }
            },
            _ = tokio::time::sleep_until(flush_at), if pending.is_some() => {
                if let Some(item) = pending.take() {
                    gate.pass(Instant::now());
                    if !deliver(item).await {
                        return;
                    }
                }
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    #[derive(Debug, Clone, PartialEq)]
    enum Item {
        Progress(u8),
        Done,
    }

    impl Coalesce for Item {
        fn is_terminal(&self) -> bool {
            matches!(self, Item::Done)
        }
    }

    type Delivered = mpsc::UnboundedReceiver<(Duration, Item)>;

    /// Spawn a throttle stage; returns the input sender and a receiver of
    /// (offset from start, item) pairs.
    fn spawn_stage() -> (mpsc::Sender<Item>, Delivered) {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        tokio::spawn(throttle(in_rx, WINDOW, move |item| {
            let out_tx = out_tx.clone();
            async move { out_tx.send((start.elapsed(), item)).is_ok() }
        }));
        (in_tx, out_rx)
    }

    async fn collect(mut out: Delivered) -> Vec<(Duration, Item)> {
        let mut delivered = Vec::new();
        while let Some(entry) = out.recv().await {
            delivered.push(entry);
        }
        delivered
    }

    #[test]
    fn test_gate_is_open_until_first_pass() {
        let gate = RateGate::new(WINDOW);
        assert!(gate.is_open(Instant::now()));
        assert_eq!(gate.interval(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_closes_for_interval_after_pass() {
        let mut gate = RateGate::new(WINDOW);
        let start = Instant::now();
        gate.pass(start);

        assert!(!gate.is_open(start + Duration::from_millis(199)));
        assert!(gate.is_open(start + WINDOW));
        assert_eq!(gate.opens_at(), start + WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_update_is_delivered_immediately() {
        let (tx, out) = spawn_stage();
        tx.send(Item::Progress(10)).await.unwrap();
        drop(tx);

        let delivered = collect(out).await;
        assert_eq!(delivered, vec![(Duration::ZERO, Item::Progress(10))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_forwards_one_intermediate_and_the_terminal() {
        let (tx, out) = spawn_stage();
        tx.send(Item::Progress(10)).await.unwrap();
        tx.send(Item::Progress(20)).await.unwrap();
        tx.send(Item::Progress(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(Item::Done).await.unwrap();
        drop(tx);

        let items: Vec<Item> = collect(out).await.into_iter().map(|(_, i)| i).collect();
        assert_eq!(items, vec![Item::Progress(10), Item::Done]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_inside_window_is_not_delayed() {
        let (tx, out) = spawn_stage();
        tx.send(Item::Progress(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(Item::Done).await.unwrap();
        drop(tx);

        let delivered = collect(out).await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1].1, Item::Done);
        assert!(delivered[1].0 < WINDOW, "terminal waited for the window");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_update_is_flushed_when_window_ends() {
        let (tx, out) = spawn_stage();
        tx.send(Item::Progress(10)).await.unwrap();
        tx.send(Item::Progress(20)).await.unwrap();
        tx.send(Item::Progress(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(Item::Done).await.unwrap();
        drop(tx);

        let delivered = collect(out).await;
        let items: Vec<&Item> = delivered.iter().map(|(_, i)| i).collect();
        assert_eq!(
            items,
            vec![&Item::Progress(10), &Item::Progress(30), &Item::Done]
        );
        assert_eq!(delivered[1].0, WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_terminal_updates_are_spaced_by_window() {
        let (tx, out) = spawn_stage();
        tokio::spawn(async move {
            for percent in 0..40u8 {
                tx.send(Item::Progress(percent)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(30)).await;
            }
            tx.send(Item::Done).await.unwrap();
        });

        let delivered = collect(out).await;
        let progress: Vec<Duration> = delivered
            .iter()
            .filter(|(_, item)| !item.is_terminal())
            .map(|(at, _)| *at)
            .collect();
        assert!(progress.len() > 1);
        for pair in progress.windows(2) {
            assert!(pair[1] - pair[0] >= WINDOW, "gap {:?}", pair[1] - pair[0]);
        }
        assert_eq!(delivered.last().unwrap().1, Item::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_updates_keep_arrival_order() {
        let (tx, out) = spawn_stage();
        tokio::spawn(async move {
            for percent in 0..20u8 {
                tx.send(Item::Progress(percent * 5)).await.unwrap();
                tokio::time::sleep(Duration::from_millis(70)).await;
            }
            tx.send(Item::Done).await.unwrap();
        });

        let percents: Vec<u8> = collect(out)
            .await
            .into_iter()
            .filter_map(|(_, item)| match item {
                Item::Progress(p) => Some(p),
                Item::Done => None,
            })
            .collect();
        let mut sorted = percents.clone();
        sorted.sort_unstable();
        assert_eq!(percents, sorted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_after_terminal_are_ignored() {
        let (tx, out) = spawn_stage();
        tx.send(Item::Done).await.unwrap();
        // The stage may already have exited and dropped its receiver
        let _ = tx.send(Item::Progress(99)).await;
        drop(tx);

        let items: Vec<Item> = collect(out).await.into_iter().map(|(_, i)| i).collect();
        assert_eq!(items, vec![Item::Done]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_update_is_flushed_after_close_respecting_window() {
        let (tx, out) = spawn_stage();
        tx.send(Item::Progress(10)).await.unwrap();
        tx.send(Item::Progress(20)).await.unwrap();
        drop(tx);

        let delivered = collect(out).await;
        assert_eq!(
            delivered,
            vec![
                (Duration::ZERO, Item::Progress(10)),
                (WINDOW, Item::Progress(20))
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_stops_when_downstream_is_gone() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let handle = tokio::spawn(throttle(in_rx, WINDOW, |_item: Item| async { false }));

        in_tx.send(Item::Progress(1)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stage should stop")
            .unwrap();
    }
}
