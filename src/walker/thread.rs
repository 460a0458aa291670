//! Walker thread: drives one [`Walker`] in laps on a background task.
//!
//! Each lap walks the whole tree and hands every listing to a
//! [`WalkHandler`]. Between items the loop sleeps `base + min(cost, cap)`,
//! where `cost` is the time the last callback took, so a slow consumer slows
//! the walk down. A fast-lap request drops every delay to zero until the lap
//! it applies to has finished.

use super::{WalkHandler, WalkItem, Walker};
use crate::config::WalkerSettings;
use crate::error::{FsError, WalkerError};
use crate::tree::Url;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static NEXT_WALKER_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Id of the walker whose loop is running on the current task.
    static CURRENT_WALKER: u64;
}

/// Delays used by the lap loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkerTiming {
    pub base_interval: Duration,
    pub callback_cost_cap: Duration,
    pub lap_interval: Duration,
    pub poll_interval: Duration,
    pub fresh_lap_timeout: Duration,
}

impl WalkerTiming {
    /// Delay after one callback.
    pub fn item_delay(&self, fast: bool, callback_cost: Duration) -> Duration {
        if fast {
            Duration::ZERO
        } else {
            self.base_interval + callback_cost.min(self.callback_cost_cap)
        }
    }
}

impl From<&WalkerSettings> for WalkerTiming {
    fn from(settings: &WalkerSettings) -> Self {
        Self {
            base_interval: Duration::from_millis(settings.base_interval_ms),
            callback_cost_cap: Duration::from_millis(settings.callback_cost_cap_ms),
            lap_interval: Duration::from_millis(settings.lap_interval_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            fresh_lap_timeout: Duration::from_millis(settings.fresh_lap_timeout_ms),
        }
    }
}

impl Default for WalkerTiming {
    fn default() -> Self {
        Self::from(&WalkerSettings::default())
    }
}

struct Shared {
    id: u64,
    fast: AtomicBool,
    laps: AtomicU64,
    wake: Notify,
    /// Flips to `true` once the lap loop has exited.
    finished: watch::Sender<bool>,
}

/// Background lap loop over one root
pub struct WalkerThread {
    shared: Arc<Shared>,
    root: Url,
    timing: WalkerTiming,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WalkerThread {
    /// Start walking `root` immediately. Must be called inside a tokio runtime.
    pub fn spawn(
        walker: Walker,
        root: Url,
        timing: WalkerTiming,
        handler: Arc<dyn WalkHandler>,
    ) -> Self {
        let shared = Arc::new(Shared {
            id: NEXT_WALKER_ID.fetch_add(1, Ordering::Relaxed),
            fast: AtomicBool::new(false),
            laps: AtomicU64::new(0),
            wake: Notify::new(),
            finished: watch::channel(false).0,
        });
        let cancel = CancellationToken::new();
        let lap_loop = LapLoop {
            walker,
            root: root.clone(),
            timing,
            handler,
            shared: Arc::clone(&shared),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(CURRENT_WALKER.scope(shared.id, lap_loop.run()));
        info!(root = %root, walker = shared.id, "Walker started");

        Self {
            shared,
            root,
            timing,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Number of laps that ran to completion.
    pub fn laps_completed(&self) -> u64 {
        self.shared.laps.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run the current or next lap with no delays.
    pub fn request_fast_lap(&self) {
        self.shared.fast.store(true, Ordering::SeqCst);
        self.shared.wake.notify_waiters();
    }

    /// [`Self::wait_for_fresh_lap_within`] with the configured timeout.
    pub async fn wait_for_fresh_lap(&self) -> Result<(), WalkerError> {
        self.wait_for_fresh_lap_within(self.timing.fresh_lap_timeout)
            .await
    }

    /// Wait until a whole lap has started and finished after this call.
    ///
    /// The lap in flight when this is called may already have passed the
    /// changed part of the tree, so two completed laps are required.
    pub async fn wait_for_fresh_lap_within(&self, timeout: Duration) -> Result<(), WalkerError> {
        let target = self.laps_completed() + 2;
        let started = Instant::now();
        loop {
            if self.is_stopped() {
                return Err(WalkerError::Stopped);
            }
            self.request_fast_lap();
            if self.laps_completed() >= target {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(WalkerError::Timeout(timeout));
            }
            tokio::time::sleep(self.timing.poll_interval).await;
        }
    }

    /// Stop the loop and wait for it to finish.
    ///
    /// Idempotent. When called from inside this walker's own callback the
    /// loop is cancelled but not awaited; it exits as soon as the callback
    /// returns.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let own_task = CURRENT_WALKER
            .try_with(|id| *id == self.shared.id)
            .unwrap_or(false);
        if own_task {
            debug!(walker = self.shared.id, "Walker shutdown requested from its callback");
            return;
        }
        let task = self.task.lock().take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    warn!(walker = self.shared.id, error = %e, "Walker task ended abnormally");
                }
                info!(root = %self.root, walker = self.shared.id, "Walker stopped");
            }
            // Another caller owns the join handle; wait for the loop to exit.
            None => {
                let mut finished = self.shared.finished.subscribe();
                let _ = finished.wait_for(|done| *done).await;
            }
        }
    }
}

impl Drop for WalkerThread {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct LapLoop {
    walker: Walker,
    root: Url,
    timing: WalkerTiming,
    handler: Arc<dyn WalkHandler>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl Drop for LapLoop {
    fn drop(&mut self) {
        self.shared.finished.send_replace(true);
    }
}

enum LapEnd {
    Finished(usize),
    Aborted(FsError),
}

impl LapLoop {
    async fn run(self) {
        while !self.cancel.is_cancelled() {
            let lap = self.shared.laps.load(Ordering::SeqCst) + 1;
            let fast = self.shared.fast.swap(false, Ordering::SeqCst);
            debug!(root = %self.root, lap, fast, "Walker lap started");

            let end = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                end = self.lap(fast) => end,
            };
            match end {
                LapEnd::Finished(items) => {
                    self.shared.laps.fetch_add(1, Ordering::SeqCst);
                    debug!(root = %self.root, lap, items, "Walker lap finished");
                }
                LapEnd::Aborted(e) => {
                    warn!(root = %self.root, lap, error = %e, "Walker lap aborted");
                }
            }

            // Register before checking the flag so a request in between still wakes us.
            let woken = self.shared.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();
            if self.shared.fast.load(Ordering::SeqCst) {
                continue;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = &mut woken => {}
                _ = tokio::time::sleep(self.timing.lap_interval) => {}
            }
        }
        debug!(root = %self.root, walker = self.shared.id, "Walker loop exited");
    }

    async fn lap(&self, fast: bool) -> LapEnd {
        let mut items = 0;
        let mut steps = self.walker.walk(self.root.clone());
        while let Some(step) = steps.next().await {
            let item = match step {
                Ok(item) => item,
                Err(e) if e.url() == &self.root => return LapEnd::Aborted(e),
                Err(e) => {
                    warn!(url = %e.url(), error = %e, "Failed to list directory");
                    continue;
                }
            };
            items += 1;
            let cost = self.dispatch(item).await;
            let fast = fast || self.shared.fast.load(Ordering::SeqCst);
            let delay = self.timing.item_delay(fast, cost);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        LapEnd::Finished(items)
    }

    /// Run the callback for one item and return how long it took.
    async fn dispatch(&self, item: WalkItem) -> Duration {
        let url = item.url.clone();
        let started = Instant::now();
        match AssertUnwindSafe(self.handler.handle(item))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(url = %url, error = %e, "Walk callback failed"),
            Err(_) => warn!(url = %url, "Walk callback panicked"),
        }
        started.elapsed()
    }
}
