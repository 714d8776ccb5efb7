use super::listener::{GulperEvent, GulperListener, ListenerId};
use crate::core::ChannelKey;
use crate::error::{WaveError, WaveResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static NEXT_GULPER_ID: AtomicU64 = AtomicU64::new(1);

/// Chunking and throttling for a gulper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GulperConfig {
    /// Length of one sub-fetch in seconds
    pub chunk_seconds: f64,

    /// Pause between sub-fetches in milliseconds
    pub delay_ms: u64,
}

impl Default for GulperConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: 1800.0,
            delay_ms: 200,
        }
    }
}

impl GulperConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn validate(&self) -> WaveResult<()> {
        if !self.chunk_seconds.is_finite() || self.chunk_seconds <= 0.0 {
            return Err(WaveError::config(format!(
                "chunk_seconds must be positive, got {}",
                self.chunk_seconds
            )));
        }
        Ok(())
    }
}

/// Source-specific fetch invoked once per sub-range
#[async_trait]
pub trait GulpFetcher: Send + Sync {
    /// Fetch `[t1, t2)`, returning the number of samples obtained
    async fn fetch_chunk(&self, t1: f64, t2: f64) -> WaveResult<usize>;
}

/// Adapts an async closure into a `GulpFetcher`
pub struct FnFetcher<F>(pub F);

#[async_trait]
impl<F, Fut> GulpFetcher for FnFetcher<F>
where
    F: Fn(f64, f64) -> Fut + Send + Sync,
    Fut: Future<Output = WaveResult<usize>> + Send,
{
    async fn fetch_chunk(&self, t1: f64, t2: f64) -> WaveResult<usize> {
        (self.0)(t1, t2).await
    }
}

struct GulperInner {
    listeners: Vec<GulperListener>,

    /// Listeners whose departure killed the gulper; they still get `Stopped`
    stop_recipients: Vec<GulperListener>,

    /// Pending spans; the front one is active and its start is the cursor
    spans: VecDeque<(f64, f64)>,

    /// Earliest start ever requested
    origin: f64,

    /// Latest end ever requested
    horizon: f64,

    killed: bool,
    finished: bool,
}

/// One chunked fetch task for a key
pub struct Gulper {
    id: u64,
    key: ChannelKey,
    config: GulperConfig,
    inner: Mutex<GulperInner>,
    cancel: CancellationToken,
}

impl Gulper {
    pub(crate) fn new(key: ChannelKey, config: GulperConfig, t1: f64, t2: f64) -> Self {
        Self {
            id: NEXT_GULPER_ID.fetch_add(1, Ordering::Relaxed),
            key,
            config,
            inner: Mutex::new(GulperInner {
                listeners: Vec::new(),
                stop_recipients: Vec::new(),
                spans: VecDeque::from([(t1, t2)]),
                origin: t1,
                horizon: t2,
                killed: false,
                finished: false,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn config(&self) -> &GulperConfig {
        &self.config
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Attach a listener; false if the run loop already finished
    pub(crate) fn add_listener(&self, listener: GulperListener) -> bool {
        let mut inner = self.inner.lock();
        if inner.finished || inner.killed {
            return false;
        }
        if !inner.listeners.iter().any(|l| l.id() == listener.id()) {
            inner.listeners.push(listener);
        }
        true
    }

    /// Grow the target so it also covers `[t1, t2)`
    pub(crate) fn extend(&self, t1: f64, t2: f64) {
        let mut inner = self.inner.lock();

        if t2 > inner.horizon {
            let from = inner.horizon.max(t1);
            let horizon = inner.horizon;
            match inner.spans.back_mut() {
                Some(last) if last.1 == horizon && from <= horizon => last.1 = t2,
                _ => inner.spans.push_back((from, t2)),
            }
            inner.horizon = t2;
        }

        if t1 < inner.origin {
            let end = inner.origin.min(t2);
            inner.spans.push_back((t1, end));
            inner.origin = t1;
        }
    }

    /// Remove a listener; kills the gulper when none remain.
    ///
    /// Returns true if the listener was attached.
    pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(pos) = inner.listeners.iter().position(|l| l.id() == id) else {
            return false;
        };

        let removed = inner.listeners.remove(pos);
        if inner.listeners.is_empty() && !inner.finished {
            inner.killed = true;
            inner.stop_recipients.push(removed);
            self.cancel.cancel();
        }
        true
    }

    /// Stop with every listener still attached
    pub(crate) fn kill(&self) {
        let mut inner = self.inner.lock();
        if inner.finished {
            return;
        }
        inner.killed = true;
        self.cancel.cancel();
    }

    pub fn is_killed(&self) -> bool {
        self.inner.lock().killed
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Current cursor, if work remains
    pub fn cursor(&self) -> Option<f64> {
        self.inner.lock().spans.front().map(|s| s.0)
    }

    /// Next sub-range to fetch, or `None` when killed or exhausted
    pub(crate) fn next_chunk(&self) -> Option<(f64, f64)> {
        let mut inner = self.inner.lock();
        if inner.killed {
            return None;
        }
        while let Some(&(cursor, end)) = inner.spans.front() {
            if cursor < end {
                return Some((cursor, (cursor + self.config.chunk_seconds).min(end)));
            }
            inner.spans.pop_front();
        }
        None
    }

    /// Move the cursor past a finished sub-range
    pub(crate) fn advance(&self, to: f64) {
        let mut inner = self.inner.lock();
        if let Some(front) = inner.spans.front_mut() {
            front.0 = front.0.max(to);
            if front.0 >= front.1 {
                inner.spans.pop_front();
            }
        }
    }

    pub(crate) fn has_remaining(&self) -> bool {
        let inner = self.inner.lock();
        !inner.killed && inner.spans.iter().any(|s| s.0 < s.1)
    }

    /// Send an event to every attached listener, detaching those whose receiver is gone
    pub(crate) fn broadcast(&self, event: GulperEvent) {
        let mut inner = self.inner.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|l| l.notify(event.clone()));

        if inner.listeners.len() < before {
            log::debug!(
                "Detached {} listener(s) with closed channels from gulper {}",
                before - inner.listeners.len(),
                self.key
            );
            if inner.listeners.is_empty() && !inner.finished {
                inner.killed = true;
                self.cancel.cancel();
            }
        }
    }

    /// Mark finished unless new work arrived; returns the stop recipients and kill flag
    pub(crate) fn try_finish(&self) -> Option<(bool, Vec<GulperListener>)> {
        let mut inner = self.inner.lock();
        if !inner.killed && inner.spans.iter().any(|s| s.0 < s.1) {
            return None;
        }
        inner.finished = true;
        let mut recipients: Vec<GulperListener> = inner.listeners.clone();
        recipients.append(&mut inner.stop_recipients);
        Some((inner.killed, recipients))
    }
}
