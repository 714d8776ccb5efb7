use super::decoder::PacketDecoder;
use super::info::{parse_stream_list, InfoLevel};
use super::miniseed;
use super::protocol::{self, Connection, Frame};
use super::selector::SelectorSet;
use super::state::SessionState;
use crate::cache::TimeSeriesCache;
use crate::core::{ChannelKey, Scnl};
use crate::error::{WaveError, WaveResult};
use crate::observability::StreamMetrics;
use crate::resilience::ReconnectStrategy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FRAME_QUEUE: usize = 64;
const UPDATE_QUEUE: usize = 1024;

/// Connection settings for a SeedLink server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedLinkConfig {
    pub host: String,
    pub port: u16,

    /// Start time `YYYY,MM,DD,hh,mm,ss`; alone it backfills a live session
    pub begin: Option<String>,

    /// End time; together with `begin` selects a bounded replay
    pub end: Option<String>,

    /// Decoder state is reset after this many decoded packets
    pub housekeeping_packets: u64,

    pub reconnect: ReconnectStrategy,
    pub connect_timeout_ms: u64,

    /// Reconnect when nothing arrives for this long; 0 waits forever
    pub read_timeout_ms: u64,
}

impl Default for SeedLinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 18000,
            begin: None,
            end: None,
            housekeeping_packets: 1000,
            reconnect: ReconnectStrategy::default(),
            connect_timeout_ms: 10_000,
            read_timeout_ms: 120_000,
        }
    }
}

impl SeedLinkConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Key namespace for everything this server delivers
    pub fn namespace(&self) -> String {
        format!("seedlink:{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    /// Session mode implied by `begin`/`end`
    pub fn mode(&self) -> WaveResult<SessionMode> {
        match (&self.begin, &self.end) {
            (None, None) => Ok(SessionMode::Live { begin: None }),
            (Some(begin), None) => Ok(SessionMode::Live {
                begin: Some(protocol::parse_time(begin)?),
            }),
            (Some(begin), Some(end)) => {
                SessionMode::replay(protocol::parse_time(begin)?, protocol::parse_time(end)?)
            }
            (None, Some(_)) => Err(WaveError::config("SeedLink end time given without begin")),
        }
    }

    pub fn validate(&self) -> WaveResult<()> {
        if self.host.trim().is_empty() {
            return Err(WaveError::config("SeedLink host is empty"));
        }
        if self.port == 0 {
            return Err(WaveError::config("SeedLink port is 0"));
        }
        if self.housekeeping_packets == 0 {
            return Err(WaveError::config("housekeeping_packets must be positive"));
        }
        self.mode().map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionMode {
    /// Unbounded; optionally starting from a past time
    Live { begin: Option<f64> },
    /// Bounded window; the session ends once it is delivered
    Replay { begin: f64, end: f64 },
}

impl SessionMode {
    pub fn replay(begin: f64, end: f64) -> WaveResult<Self> {
        if begin.is_nan() || end.is_nan() || begin >= end {
            return Err(WaveError::config(format!("Empty replay window [{}, {})", begin, end)));
        }
        Ok(Self::Replay { begin, end })
    }
}

/// Samples for `key` covering `[start, end)` were added to the cache
#[derive(Debug, Clone, PartialEq)]
pub struct WaveUpdate {
    pub key: ChannelKey,
    pub start: f64,
    pub end: f64,
}

enum Outcome {
    Cancelled,
    Resubscribe,
    Complete,
}

struct Shared {
    config: SeedLinkConfig,
    mode: SessionMode,
    namespace: String,
    cache: Arc<TimeSeriesCache>,

    /// Channel union plus a generation bumped on every change
    selectors: Mutex<(SelectorSet, u64)>,
    changed: Notify,

    state: Mutex<SessionState>,

    /// Data end reached per channel
    cursors: Mutex<HashMap<Scnl, f64>>,

    /// Last sequence number per (station, network)
    sequences: Mutex<HashMap<(String, String), u32>>,

    cancel: CancellationToken,
    metrics: Arc<StreamMetrics>,
    updates: broadcast::Sender<WaveUpdate>,
}

fn transition(state: &Mutex<SessionState>, next: SessionState) {
    let mut current = state.lock();
    if *current == next {
        return;
    }
    if !current.can_transition_to(&next) {
        log::warn!("Unexpected session transition {} -> {}", current.name(), next.name());
    }
    *current = next;
}

/// Live or replay SeedLink session feeding a `TimeSeriesCache`.
///
/// The subscription is the union of all added channels. Changing it while
/// streaming drops the connection and resubscribes; live sessions also
/// reconnect after transport failures, resuming each station from its last
/// sequence number.
pub struct SeedLinkClient {
    shared: Arc<Shared>,
    task: Option<JoinHandle<WaveResult<()>>>,
}

impl SeedLinkClient {
    /// Mode follows the config's `begin`/`end`
    pub fn new(config: SeedLinkConfig, cache: Arc<TimeSeriesCache>) -> WaveResult<Self> {
        config.validate()?;
        let mode = config.mode()?;
        Ok(Self::with_mode(config, mode, cache))
    }

    /// Bounded replay of `[begin, end)` regardless of the config's times
    pub fn replay(
        config: SeedLinkConfig,
        cache: Arc<TimeSeriesCache>,
        begin: f64,
        end: f64,
    ) -> WaveResult<Self> {
        config.validate()?;
        let mode = SessionMode::replay(begin, end)?;
        Ok(Self::with_mode(config, mode, cache))
    }

    fn with_mode(config: SeedLinkConfig, mode: SessionMode, cache: Arc<TimeSeriesCache>) -> Self {
        let namespace = config.namespace();
        let (updates, _) = broadcast::channel(UPDATE_QUEUE);
        Self {
            shared: Arc::new(Shared {
                metrics: Arc::new(StreamMetrics::new(namespace.clone())),
                config,
                mode,
                namespace,
                cache,
                selectors: Mutex::new((SelectorSet::new(), 0)),
                changed: Notify::new(),
                state: Mutex::new(SessionState::Disconnected),
                cursors: Mutex::new(HashMap::new()),
                sequences: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                updates,
            }),
            task: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.shared.namespace
    }

    pub fn mode(&self) -> SessionMode {
        self.shared.mode
    }

    pub fn config(&self) -> &SeedLinkConfig {
        &self.shared.config
    }

    pub fn channel_key(&self, scnl: &Scnl) -> ChannelKey {
        ChannelKey::new(&self.shared.namespace, scnl)
    }

    /// Add a channel to the subscription; true if it was new
    pub fn add_channel(&self, scnl: &Scnl) -> bool {
        self.update_selectors(|set| set.add(scnl))
    }

    /// Remove a channel from the subscription; true if it was present
    pub fn remove_channel(&self, scnl: &Scnl) -> bool {
        self.update_selectors(|set| set.remove(scnl))
    }

    fn update_selectors(&self, change: impl FnOnce(&mut SelectorSet) -> bool) -> bool {
        let changed = {
            let mut guard = self.shared.selectors.lock();
            let changed = change(&mut guard.0);
            if changed {
                guard.1 += 1;
            }
            changed
        };
        if changed {
            self.shared.changed.notify_one();
        }
        changed
    }

    pub fn channels(&self) -> Vec<Scnl> {
        self.shared.selectors.lock().0.channels()
    }

    /// Current selector string, `STA_NET:LOCCHA ...,STA_NET:...`
    pub fn selector(&self) -> String {
        self.shared.selectors.lock().0.to_string()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.lock().clone()
    }

    /// Latest data end received for a channel
    pub fn cursor(&self, scnl: &Scnl) -> Option<f64> {
        self.shared.cursors.lock().get(scnl).copied()
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.shared.metrics.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WaveUpdate> {
        self.shared.updates.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawn the session task. A client runs at most one session.
    pub fn start(&mut self) -> WaveResult<()> {
        if self.task.is_some() || self.shared.cancel.is_cancelled() {
            return Err(WaveError::config("SeedLink session already started"));
        }
        log::info!(
            "Starting {} SeedLink session to {}",
            match self.shared.mode {
                SessionMode::Live { .. } => "live",
                SessionMode::Replay { .. } => "replay",
            },
            self.shared.config.address()
        );
        self.task = Some(tokio::spawn(run_session(self.shared.clone())));
        Ok(())
    }

    /// Cancel the session and wait for it to wind down
    pub async fn stop(&mut self) -> WaveResult<()> {
        self.shared.cancel.cancel();
        self.join().await
    }

    /// Wait for the session to end on its own (replay completion or fatal error)
    pub async fn wait(&mut self) -> WaveResult<()> {
        self.join().await
    }

    async fn join(&mut self) -> WaveResult<()> {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(WaveError::Cancelled),
                Err(e) => Err(WaveError::transport(format!("Session task failed: {}", e))),
            },
            None => Ok(()),
        }
    }

    /// One-shot `INFO` exchange on a separate connection.
    ///
    /// Drives this client's state when no session is running.
    pub async fn request_info(&self, level: InfoLevel) -> WaveResult<String> {
        if self.task.is_some() {
            let scratch = Mutex::new(SessionState::Disconnected);
            info_exchange(&self.shared.config, level, &scratch).await
        } else {
            info_exchange(&self.shared.config, level, &self.shared.state).await
        }
    }

    /// Data streams offered by the server
    pub async fn list_streams(&self) -> WaveResult<Vec<Scnl>> {
        let xml = self.request_info(InfoLevel::Streams).await?;
        parse_stream_list(&xml)
    }
}

impl Drop for SeedLinkClient {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn snapshot(&self) -> (SelectorSet, u64) {
        self.selectors.lock().clone()
    }

    fn generation(&self) -> u64 {
        self.selectors.lock().1
    }

    /// `DATA`/`TIME` command that starts one station's stream
    fn start_command(&self, station: &str, network: &str, channels: &BTreeSet<Scnl>) -> WaveResult<String> {
        match self.mode {
            SessionMode::Replay { begin, end } => {
                let cursors = self.cursors.lock();
                let resume = channels
                    .iter()
                    .map(|c| cursors.get(c).copied())
                    .try_fold(f64::INFINITY, |acc, c| c.map(|c| acc.min(c)))
                    .filter(|t| t.is_finite())
                    .unwrap_or(begin)
                    .max(begin);
                Ok(format!(
                    "TIME {} {}",
                    protocol::format_time(resume)?,
                    protocol::format_time(end)?
                ))
            }
            SessionMode::Live { begin } => {
                let key = (station.to_string(), network.to_string());
                if let Some(seq) = self.sequences.lock().get(&key) {
                    return Ok(format!("DATA {:06X}", (seq + 1) & 0xFF_FFFF));
                }
                match begin {
                    Some(begin) => Ok(format!("TIME {}", protocol::format_time(begin)?)),
                    None => Ok("DATA".to_string()),
                }
            }
        }
    }

    fn replay_reached_end(&self, selectors: &SelectorSet) -> bool {
        let SessionMode::Replay { end, .. } = self.mode else {
            return false;
        };
        let cursors = self.cursors.lock();
        let channels = selectors.channels();
        !channels.is_empty()
            && channels
                .iter()
                .all(|c| cursors.get(c).is_some_and(|&t| t >= end))
    }

    fn handle_packet(&self, sequence: u32, record: &[u8], decoder: &mut PacketDecoder) {
        let decoded = match decoder.decode(record) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.metrics.record_decode_error();
                log::warn!("Dropped packet {:06X}: {}", sequence, e);
                return;
            }
        };

        let header = &decoded.header;
        self.sequences
            .lock()
            .insert((header.station.clone(), header.network.clone()), sequence);

        let wave = match decoded.to_wave() {
            Ok(Some(wave)) => wave,
            Ok(None) => {
                self.metrics.record_packet(0);
                return;
            }
            Err(e) => {
                self.metrics.record_decode_error();
                log::warn!("Dropped packet {:06X}: {}", sequence, e);
                return;
            }
        };

        let scnl = header.scnl();
        let key = ChannelKey::new(&self.namespace, &scnl);
        let (start, end, samples) = (wave.start_time, wave.data_end(), wave.len());
        self.cache.put(&key, wave);

        {
            let mut cursors = self.cursors.lock();
            let cursor = cursors.entry(scnl).or_insert(end);
            *cursor = cursor.max(end);
        }
        self.metrics.record_packet(samples);
        // No subscribers is fine
        let _ = self.updates.send(WaveUpdate { key, start, end });
    }
}

async fn connect(config: &SeedLinkConfig) -> WaveResult<Connection> {
    let address = config.address();
    let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(&address))
        .await
        .map_err(|_| WaveError::transport(format!("Timed out connecting to {}", address)))?
        .map_err(|e| WaveError::transport(format!("Cannot connect to {}: {}", address, e)))?;
    Ok(Connection::new(stream))
}

async fn run_session(shared: Arc<Shared>) -> WaveResult<()> {
    let mut decoder = PacketDecoder::new();
    let mut attempt = 0usize;

    let result = loop {
        if shared.cancel.is_cancelled() {
            break Ok(());
        }

        let (selectors, generation) = shared.snapshot();
        if selectors.is_empty() {
            tokio::select! {
                _ = shared.changed.notified() => continue,
                _ = shared.cancel.cancelled() => break Ok(()),
            }
        }

        let outcome = run_connection(&shared, &selectors, generation, &mut decoder, &mut attempt).await;
        transition(&shared.state, SessionState::Disconnected);

        let error = match outcome {
            Ok(Outcome::Cancelled) => break Ok(()),
            Ok(Outcome::Complete) => {
                log::info!("Replay from {} complete", shared.config.address());
                break Ok(());
            }
            Ok(Outcome::Resubscribe) => {
                shared.metrics.record_reconnect();
                log::info!("Subscription changed, reconnecting to {}", shared.config.address());
                continue;
            }
            Err(e) => e,
        };

        if !error.is_transient() {
            log::error!("SeedLink session to {} failed: {}", shared.config.address(), error);
            break Err(error);
        }

        attempt += 1;
        let Some(delay) = shared.config.reconnect.delay_for(attempt) else {
            log::error!(
                "Giving up on {} after {} attempt(s): {}",
                shared.config.address(),
                attempt,
                error
            );
            break Err(error);
        };

        log::warn!(
            "Disconnected from {}: {}; reconnecting in {:?}",
            shared.config.address(),
            error,
            delay
        );
        shared.metrics.record_reconnect();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.cancel.cancelled() => break Ok(()),
        }
    };

    transition(&shared.state, SessionState::Disconnected);
    result
}

async fn handshake(shared: &Shared, selectors: &SelectorSet) -> WaveResult<Connection> {
    transition(&shared.state, SessionState::Connecting);
    let mut conn = connect(&shared.config).await?;
    let server = conn.hello().await?;
    log::info!("Connected to {} ({})", shared.config.address(), server);

    for (station, network, channels) in selectors.stations() {
        conn.command(&format!("STATION {} {}", station, network)).await?;
        for scnl in channels {
            conn.command(&format!("SELECT {}", SelectorSet::select_arg(scnl)))
                .await?;
        }
        conn.command(&shared.start_command(station, network, channels)?)
            .await?;
    }
    transition(&shared.state, SessionState::Subscribed);
    conn.send("END").await?;
    Ok(conn)
}

async fn next_frame(
    frames: &mut mpsc::Receiver<WaveResult<Frame>>,
    timeout: Option<Duration>,
) -> WaveResult<Frame> {
    let recv = async {
        match frames.recv().await {
            Some(frame) => frame,
            None => Err(WaveError::transport("Connection reader stopped")),
        }
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, recv)
            .await
            .map_err(|_| WaveError::transport(format!("No data for {:?}", limit)))?,
        None => recv.await,
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_connection(
    shared: &Shared,
    selectors: &SelectorSet,
    generation: u64,
    decoder: &mut PacketDecoder,
    attempt: &mut usize,
) -> WaveResult<Outcome> {
    let conn = tokio::select! {
        _ = shared.cancel.cancelled() => return Ok(Outcome::Cancelled),
        conn = tokio::time::timeout(shared.config.connect_timeout(), handshake(shared, selectors)) => {
            conn.map_err(|_| WaveError::transport("SeedLink handshake timed out"))??
        }
    };

    transition(&shared.state, SessionState::Streaming { packets: 0 });
    *attempt = 0;

    // Frames are read on their own task so a wakeup never interrupts a partial read
    let (mut reader, _writer) = conn.into_parts();
    let (tx, mut frames) = mpsc::channel(FRAME_QUEUE);
    let _reader = AbortOnDrop(tokio::spawn(async move {
        loop {
            let frame = protocol::read_frame(&mut reader).await;
            let last = !matches!(frame, Ok(Frame::Data { .. }) | Ok(Frame::Info { .. }));
            if tx.send(frame).await.is_err() || last {
                break;
            }
        }
    }));

    let read_timeout = shared.config.read_timeout();
    let mut packets = 0u64;
    loop {
        let frame = tokio::select! {
            _ = shared.cancel.cancelled() => return Ok(Outcome::Cancelled),
            _ = shared.changed.notified() => {
                if shared.generation() != generation {
                    return Ok(Outcome::Resubscribe);
                }
                continue;
            }
            frame = next_frame(&mut frames, read_timeout) => frame?,
        };

        match frame {
            Frame::Data { sequence, record } => {
                shared.handle_packet(sequence, &record, decoder);
                packets += 1;
                transition(&shared.state, SessionState::Streaming { packets });

                if decoder.records_processed() >= shared.config.housekeeping_packets {
                    log::debug!(
                        "Housekeeping: resetting decoder after {} records ({} streams tracked)",
                        decoder.records_processed(),
                        decoder.tracked_streams()
                    );
                    decoder.reset();
                }
            }
            Frame::Info { .. } => log::debug!("Ignoring unsolicited INFO packet"),
            Frame::End => {
                return match shared.mode {
                    SessionMode::Replay { .. } => Ok(Outcome::Complete),
                    SessionMode::Live { .. } => Err(WaveError::transport("Server ended the live stream")),
                };
            }
            Frame::Error(msg) => return Err(WaveError::Protocol(msg)),
        }

        if shared.replay_reached_end(selectors) {
            return Ok(Outcome::Complete);
        }
    }
}

async fn info_exchange(
    config: &SeedLinkConfig,
    level: InfoLevel,
    state: &Mutex<SessionState>,
) -> WaveResult<String> {
    transition(state, SessionState::Connecting);

    let exchange = async {
        let mut conn = connect(config).await?;
        conn.hello().await?;
        transition(state, SessionState::Subscribed);

        conn.send(&format!("INFO {}", level.as_str())).await?;
        transition(state, SessionState::InfoRequest);

        let mut text = String::new();
        loop {
            let frame = match config.read_timeout() {
                Some(limit) => tokio::time::timeout(limit, conn.read_frame())
                    .await
                    .map_err(|_| WaveError::transport("INFO response timed out"))??,
                None => conn.read_frame().await?,
            };
            match frame {
                Frame::Info { last, record } => {
                    let decoded = miniseed::decode_record(&record)?;
                    if let Some(part) = decoded.text() {
                        text.push_str(part);
                    }
                    if last {
                        break;
                    }
                }
                Frame::Data { .. } => continue,
                Frame::End => break,
                Frame::Error(msg) => return Err(WaveError::Protocol(msg)),
            }
        }

        // Best effort; the connection is dropped either way
        let _ = conn.send("BYE").await;
        Ok(text)
    };

    let result = exchange.await;
    transition(state, SessionState::Disconnected);
    result
}
