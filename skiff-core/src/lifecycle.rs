//! Connection stop signalling and keepalive timers
//!
//! A connection ends through exactly one [`StopSignal::trigger`] call, no
//! matter how many of the read loop, the pong watchdog, an explicit close or
//! a shutdown race to end it. Losers of the race are no-ops.

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Why a connection stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The peer closed the stream or sent a close frame or packet
    PeerClosed,
    /// Reading failed
    ReadError(String),
    /// No pong arrived within the heartbeat timeout
    PongTimeout,
    /// Closed locally
    Closed,
    /// The owning client or server is shutting down
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::PeerClosed => f.write_str("peer closed"),
            StopReason::ReadError(e) => write!(f, "read error: {e}"),
            StopReason::PongTimeout => f.write_str("pong timeout"),
            StopReason::Closed => f.write_str("closed"),
            StopReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// One-shot stop signal shared by everything attached to a connection
#[derive(Debug, Default)]
pub struct StopSignal {
    token: CancellationToken,
    reason: OnceLock<StopReason>,
}

impl StopSignal {
    /// Create an untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the connection. Returns `true` only for the call that won.
    pub fn trigger(&self, reason: StopReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Whether the signal has fired
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The winning reason, once triggered
    pub fn reason(&self) -> Option<&StopReason> {
        self.reason.get()
    }

    /// Resolves once the signal fires
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Token cancelled when the signal fires
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Resets the pong watchdog
#[derive(Debug, Clone, Default)]
pub struct Keepalive {
    reset: Arc<Notify>,
}

impl Keepalive {
    /// Create a keepalive handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Record liveness from the peer, restarting the watchdog countdown
    pub fn touch(&self) {
        self.reset.notify_one();
    }
}

/// Run `beat` every `interval` until `stop` fires.
///
/// Returns `None` when `interval` is zero, which disables the heartbeat.
/// The first beat happens one full interval after start.
pub fn spawn_heartbeat<F, Fut>(
    interval: Duration,
    stop: CancellationToken,
    beat: F,
) -> Option<JoinHandle<()>>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    if interval.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // a beat stuck on a full socket must not outlive the stop
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = beat() => {}
            }
        }
    }))
}

/// Trigger `signal` with [`StopReason::PongTimeout`] if `timeout` passes
/// without a [`Keepalive::touch`].
///
/// Returns `None` when `timeout` is zero, which disables the watchdog.
pub fn spawn_watchdog(
    timeout: Duration,
    keepalive: &Keepalive,
    signal: Arc<StopSignal>,
) -> Option<JoinHandle<()>> {
    if timeout.is_zero() {
        return None;
    }

    let reset = Arc::clone(&keepalive.reset);
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = signal.stopped() => break,
                _ = reset.notified() => continue,
                _ = time::sleep(timeout) => {
                    if signal.trigger(StopReason::PongTimeout) {
                        tracing::debug!(?timeout, "pong watchdog fired");
                    }
                    break;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_trigger_only_once() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());
        assert!(signal.trigger(StopReason::PongTimeout));
        assert!(!signal.trigger(StopReason::PeerClosed));
        assert!(!signal.trigger(StopReason::Closed));
        assert!(signal.is_stopped());
        assert_eq!(signal.reason(), Some(&StopReason::PongTimeout));
    }

    #[tokio::test]
    async fn test_concurrent_triggers_have_one_winner() {
        let signal = Arc::new(StopSignal::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let signal = Arc::clone(&signal);
                let wins = Arc::clone(&wins);
                tokio::spawn(async move {
                    let reason = if i % 2 == 0 {
                        StopReason::PongTimeout
                    } else {
                        StopReason::PeerClosed
                    };
                    if signal.trigger(reason) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        signal.stopped().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_ticks_until_stopped() {
        let stop = CancellationToken::new();
        let beats = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&beats);
        let handle = spawn_heartbeat(Duration::from_secs(1), stop.clone(), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(beats.load(Ordering::SeqCst), 3);

        stop.cancel();
        handle.await.unwrap();
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(beats.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_durations_disable_timers() {
        let signal = Arc::new(StopSignal::new());
        assert!(spawn_heartbeat(Duration::ZERO, CancellationToken::new(), || async {}).is_none());
        assert!(spawn_watchdog(Duration::ZERO, &Keepalive::new(), signal).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fires_without_pong() {
        let signal = Arc::new(StopSignal::new());
        let keepalive = Keepalive::new();
        let handle =
            spawn_watchdog(Duration::from_secs(2), &keepalive, Arc::clone(&signal)).unwrap();

        handle.await.unwrap();
        assert_eq!(signal.reason(), Some(&StopReason::PongTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_reset_by_touch() {
        let signal = Arc::new(StopSignal::new());
        let keepalive = Keepalive::new();
        let handle =
            spawn_watchdog(Duration::from_secs(2), &keepalive, Arc::clone(&signal)).unwrap();

        for _ in 0..5 {
            time::sleep(Duration::from_millis(1500)).await;
            keepalive.touch();
        }
        assert!(!signal.is_stopped());

        signal.trigger(StopReason::Closed);
        handle.await.unwrap();
        assert_eq!(signal.reason(), Some(&StopReason::Closed));
    }
}
