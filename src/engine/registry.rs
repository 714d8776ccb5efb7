use super::gulper::{GulpFetcher, Gulper, GulperConfig};
use super::listener::{GulperEvent, GulperListener, ListenerId};
use crate::core::ChannelKey;
use crate::error::{WaveError, WaveResult};
use crate::observability::{FetchMetrics, MetricsCollector};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

type GulperMap = HashMap<ChannelKey, Arc<Gulper>>;

/// Owns every gulper, at most one per key.
///
/// The map lock only guards lookup and insertion; fetching happens in each
/// gulper's own task, so keys never wait on one another.
pub struct GulperRegistry {
    gulpers: Arc<Mutex<GulperMap>>,
    metrics: Arc<Mutex<MetricsCollector>>,
}

impl GulperRegistry {
    pub fn new() -> Self {
        Self {
            gulpers: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(Mutex::new(MetricsCollector::new())),
        }
    }

    /// Subscribe `listener` to the gulper for `key`, starting one if needed.
    ///
    /// An existing gulper keeps running; the request only widens its target.
    /// Must be called from within a tokio runtime.
    pub fn request_gulper(
        &self,
        key: &ChannelKey,
        listener: GulperListener,
        fetcher: Arc<dyn GulpFetcher>,
        t1: f64,
        t2: f64,
        config: &GulperConfig,
    ) -> WaveResult<()> {
        config.validate()?;
        if t1.is_nan() || t2.is_nan() || t1 >= t2 {
            return Err(WaveError::config(format!("Empty gulp range [{}, {})", t1, t2)));
        }

        let mut gulpers = self.gulpers.lock();

        if let Some(existing) = gulpers.get(key) {
            if existing.add_listener(listener.clone()) {
                existing.extend(t1, t2);
                log::debug!("Joined running gulper {} for [{}, {})", key, t1, t2);
                return Ok(());
            }
        }

        let gulper = Arc::new(Gulper::new(key.clone(), config.clone(), t1, t2));
        gulper.add_listener(listener);
        gulpers.insert(key.clone(), gulper.clone());

        let metrics = self.metrics.lock().fetch_metrics(key.as_str());
        log::info!(
            "Starting gulper {} for [{}, {}) in {} s chunks",
            key,
            t1,
            t2,
            config.chunk_seconds
        );
        spawn_run_loop(gulper, fetcher, self.gulpers.clone(), metrics);
        Ok(())
    }

    /// Unsubscribe a listener; the gulper stops at its next chunk boundary
    /// once nobody is left. Returns false if the listener was not attached.
    pub fn kill_gulper(&self, key: &ChannelKey, listener: ListenerId) -> bool {
        let gulper = self.gulpers.lock().get(key).cloned();
        match gulper {
            Some(g) => g.remove_listener(listener),
            None => false,
        }
    }

    /// Stop the gulper for `key` regardless of its listeners
    pub fn kill_all(&self, key: &ChannelKey) -> bool {
        let gulper = self.gulpers.lock().get(key).cloned();
        match gulper {
            Some(g) => {
                g.kill();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, key: &ChannelKey) -> bool {
        self.gulpers.lock().contains_key(key)
    }

    pub fn active_keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.gulpers.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn listener_count(&self, key: &ChannelKey) -> usize {
        self.gulpers
            .lock()
            .get(key)
            .map(|g| g.listener_count())
            .unwrap_or(0)
    }

    /// Running gulper for `key`, if any
    pub fn gulper(&self, key: &ChannelKey) -> Option<Arc<Gulper>> {
        self.gulpers.lock().get(key).cloned()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.lock().clone()
    }
}

impl Default for GulperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_run_loop(
    gulper: Arc<Gulper>,
    fetcher: Arc<dyn GulpFetcher>,
    gulpers: Arc<Mutex<GulperMap>>,
    metrics: Arc<FetchMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Event order per key: Started, Gulped..., Stopped
        let key = gulper.key().clone();
        gulper.broadcast(GulperEvent::Started { key: key.clone() });

        let (killed, recipients) = loop {
            let Some((start, end)) = gulper.next_chunk() else {
                match retire(&gulpers, &gulper) {
                    Some(done) => break done,
                    None => continue,
                }
            };

            let started = metrics.start_fetch();
            let success = match fetcher.fetch_chunk(start, end).await {
                Ok(samples) => {
                    metrics.record_samples(samples);
                    true
                }
                Err(e) => {
                    log::warn!("Gulp of {} [{}, {}) failed: {}", key, start, end, e);
                    false
                }
            };
            metrics.finish_fetch(started);
            metrics.record_chunk(success);

            gulper.advance(end);
            gulper.broadcast(GulperEvent::Gulped {
                key: key.clone(),
                start,
                end,
                success,
            });

            if gulper.has_remaining() {
                tokio::select! {
                    _ = tokio::time::sleep(gulper.config().delay()) => {}
                    _ = gulper.cancel_token().cancelled() => {}
                }
            }
        };

        for listener in recipients {
            listener.notify(GulperEvent::Stopped {
                key: key.clone(),
                killed,
            });
        }
        log::info!("Gulper {} stopped (killed={})", key, killed);
    })
}

/// Remove a finished gulper from the map, unless a late request extended it
fn retire(
    gulpers: &Mutex<GulperMap>,
    gulper: &Arc<Gulper>,
) -> Option<(bool, Vec<GulperListener>)> {
    let mut map = gulpers.lock();
    let done = gulper.try_finish()?;
    if map
        .get(gulper.key())
        .is_some_and(|current| current.id() == gulper.id())
    {
        map.remove(gulper.key());
    }
    Some(done)
}
