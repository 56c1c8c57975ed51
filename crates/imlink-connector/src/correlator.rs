//! Single-slot response correlation.
//!
//! A caller installs a collector with [`ResponseCollector::create_collector`]
//! and awaits the returned [`PendingExchange`]. The reply arrives on a
//! session's read loop and is handed over with [`ResponseCollector::complete`].
//! A timer task resolves the exchange with a timeout failure if no reply
//! shows up in time.
//!
//! Slot states: EMPTY -> PENDING -> EMPTY. Whoever takes the pending entry
//! out of the slot (reply or timer) is the only one that resolves it.
//!
//! The slot is a `std::sync::Mutex`: no critical section spans an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use imlink_core::{ImError, ImResult};

struct Pending<T> {
    generation: u64,
    deadline: Instant,
    tx: oneshot::Sender<ImResult<T>>,
    timer: JoinHandle<()>,
}

type Slot<T> = Mutex<Option<Pending<T>>>;

/// Deadline used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// One correlation channel holding at most one in-flight exchange.
pub struct ResponseCollector<T> {
    channel: String,
    timeout_message: String,
    slot: Arc<Slot<T>>,
    next_generation: AtomicU64,
}

impl<T: Send + 'static> ResponseCollector<T> {
    /// `timeout_message` is what a timed-out exchange resolves with.
    pub fn new(channel: impl Into<String>, timeout_message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            timeout_message: timeout_message.into(),
            slot: Arc::new(Mutex::new(None)),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Install a new collector if the slot is free.
    ///
    /// A live collector in the slot fails with [`ImError::ExchangeInProgress`].
    /// A collector whose deadline already passed (its timer has not run yet)
    /// is resolved with its timeout failure and replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_collector(&self, timeout: Duration) -> ImResult<PendingExchange<T>> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        if let Some(current) = slot.as_ref() {
            if current.deadline > now {
                return Err(ImError::ExchangeInProgress(format!(
                    "still waiting for a response on {}",
                    self.channel
                )));
            }
        }
        if let Some(stale) = slot.take() {
            debug!(channel = %self.channel, generation = stale.generation, "reclaiming expired collector");
            stale.timer.abort();
            let _ = stale.tx.send(Err(ImError::Timeout(self.timeout_message.clone())));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let timer = tokio::spawn(expire(
            Arc::downgrade(&self.slot),
            generation,
            timeout,
            self.channel.clone(),
            self.timeout_message.clone(),
        ));

        *slot = Some(Pending {
            generation,
            deadline,
            tx,
            timer,
        });
        debug!(channel = %self.channel, generation, timeout_ms = timeout.as_millis() as u64, "collector installed");

        Ok(PendingExchange { generation, rx })
    }

    /// Hand a reply to the pending exchange and clear the slot.
    ///
    /// Returns `false` (after logging) when nothing was pending.
    pub fn complete(&self, reply: T) -> bool
    where
        T: std::fmt::Debug,
    {
        let taken = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        match taken {
            Some(pending) => {
                pending.timer.abort();
                if pending.tx.send(Ok(reply)).is_err() {
                    debug!(channel = %self.channel, generation = pending.generation, "response arrived after caller stopped waiting");
                }
                true
            }
            None => {
                error!(channel = %self.channel, reply = ?reply, "unexpected response received");
                false
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

}

/// Timer side of the complete-or-timeout race.
async fn expire<T>(
    slot: Weak<Slot<T>>,
    generation: u64,
    timeout: Duration,
    channel: String,
    message: String,
) {
    tokio::time::sleep(timeout).await;

    let Some(slot) = slot.upgrade() else {
        return;
    };
    let taken = {
        let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(p) if p.generation == generation => guard.take(),
            _ => None,
        }
    };
    if let Some(pending) = taken {
        warn!(channel = %channel, generation, "timed out waiting for response");
        let _ = pending.tx.send(Err(ImError::Timeout(message)));
    }
}

/// Caller's side of an exchange; resolves exactly once.
///
/// Dropping it does not clear the slot: the exchange stays pending until a
/// reply or the timeout arrives.
#[derive(Debug)]
pub struct PendingExchange<T> {
    generation: u64,
    rx: oneshot::Receiver<ImResult<T>>,
}

impl<T> PendingExchange<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the reply or the timeout failure.
    pub async fn wait(self) -> ImResult<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ImError::Transport(
                "response collector dropped before completion".into(),
            )),
        }
    }
}
