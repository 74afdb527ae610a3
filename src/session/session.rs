//! Per-connection stream orchestrator
//!
//! A session owns one instance of every pipeline stage and runs three
//! background tasks:
//!
//! - the connection task: dials (with backoff) or serves an accepted socket,
//!   and handles everything that arrives on it;
//! - the drain task: moves full chunks from the ingest buffer through the
//!   compression engine and packetizer onto the wire;
//! - the adaptation task: expires acknowledgements, purges the reorder
//!   window, keeps clocks in sync and retunes chunk size and compression.
//!
//! Each stage sits behind its own lock, held only for the duration of one
//! synchronous operation. Only transport I/O awaits.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::adapt::AdaptationPolicy;
use super::events::SessionEvent;
use super::state::SessionState;
use crate::audio::{AudioFrame, BufferStats, FrameBuffer, QualityAnalyzer, QualityMetrics, SharedFrameBuffer, SAMPLE_WIDTH};
use crate::codec::{CompressionAlgorithm, CompressionEngine, EngineStats, NetworkConditions};
use crate::config::AppConfig;
use crate::error::{AudioError, Result, SessionError};
use crate::network::{
    AckTracker, ClockSynchronizer, Connector, FrameSink, FrameStream, NetworkMonitor, NetworkStats,
    PacketMeta, Packetizer, ReorderStats, ReorderWindow, SyncState, Transport, WireMessage,
};
use crate::protocol::{now_us, us_to_secs, AudioPacket, ControlMessage};

/// Fallback wake-up for the drain task when no frame notification arrives
const DRAIN_TICK: Duration = Duration::from_millis(50);

const EVENT_CAPACITY: usize = 256;

/// How a session ended
pub type SessionOutcome = std::result::Result<(), SessionError>;

/// An ordered, decompressed chunk handed to the consumer
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    pub sequence: u64,
    pub frame: AudioFrame,
    pub quality: QualityMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Dials out and reconnects on failure
    Outbound,
    /// Serves a socket accepted by the server
    Inbound,
}

enum Origin {
    Dial(Arc<dyn Connector>),
    Attached(Mutex<Option<Transport>>),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionCounters {
    pub frames_pushed: u64,
    pub frames_skipped: u64,
    pub chunks_sent: u64,
    pub send_failures: u64,
    pub chunks_decoded: u64,
    pub consumer_drops: u64,
    pub integrity_failures: u64,
    pub invalid_packets: u64,
    pub invalid_control: u64,
}

struct Control {
    state: SessionState,
    chunk_size: usize,
    algorithm: CompressionAlgorithm,
    reconnect_attempts: u32,
    last_capture_us: u64,
    last_quality: Option<QualityMetrics>,
    counters: SessionCounters,
}

/// Serializable view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub direction: Direction,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub chunk_size: usize,
    pub algorithm: CompressionAlgorithm,
    pub reconnect_attempts: u32,
    pub last_quality: Option<QualityMetrics>,
    pub counters: SessionCounters,
    pub buffer: BufferStats,
    pub network: NetworkStats,
    pub reorder: ReorderStats,
    pub sync: SyncState,
    pub compression: EngineStats,
}

pub struct StreamSession {
    id: Uuid,
    direction: Direction,
    config: AppConfig,
    origin: Origin,
    started_at: DateTime<Utc>,

    buffer: SharedFrameBuffer,
    overflow_rx: Receiver<AudioError>,
    analyzer: QualityAnalyzer,
    engine: CompressionEngine,
    policy: AdaptationPolicy,
    packetizer: Mutex<Packetizer>,
    reorder: Mutex<ReorderWindow>,
    monitor: Mutex<NetworkMonitor>,
    clock: Mutex<ClockSynchronizer>,
    acks: Mutex<AckTracker>,
    control: Mutex<Control>,

    /// Held across the whole compress/packetize/send step so sequence
    /// numbers reach the wire in order
    outbound: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    connection: Mutex<Option<CancellationToken>>,
    consumer: Option<Sender<DecodedChunk>>,

    wake: Notify,
    cancel: CancellationToken,
    /// Set by the first `stop()` call
    stopping: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
    outcome: watch::Sender<Option<SessionOutcome>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamSession {
    /// Session that dials through `connector` and reconnects on loss
    pub fn outbound(config: AppConfig, connector: Arc<dyn Connector>) -> Self {
        Self::new(config, Direction::Outbound, Origin::Dial(connector))
    }

    /// Session over an already accepted connection. Losing it stops the session.
    pub fn inbound(config: AppConfig, transport: Transport) -> Self {
        Self::new(config, Direction::Inbound, Origin::Attached(Mutex::new(Some(transport))))
    }

    fn new(config: AppConfig, direction: Direction, origin: Origin) -> Self {
        let (overflow_tx, overflow_rx) = crossbeam_channel::bounded(64);
        let buffer = Arc::new(FrameBuffer::new(config.buffer.capacity_bytes).with_overflow_notifier(overflow_tx));
        let policy = AdaptationPolicy::new(config.adaptation.clone(), config.stream.channels);
        let engine = CompressionEngine::new(config.compression.clone());
        let algorithm = engine.select(&NetworkConditions::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (outcome, _) = watch::channel(None);
        let mut monitor = NetworkMonitor::new(config.monitor.clone());
        monitor.set_loss_tracking(config.network.send_acks);

        Self {
            id: Uuid::new_v4(),
            direction,
            origin,
            started_at: Utc::now(),
            buffer,
            overflow_rx,
            analyzer: QualityAnalyzer::new(),
            packetizer: Mutex::new(Packetizer::new()),
            reorder: Mutex::new(ReorderWindow::new(&config.reorder)),
            monitor: Mutex::new(monitor),
            clock: Mutex::new(ClockSynchronizer::new(&config.sync)),
            acks: Mutex::new(AckTracker::new(config.network.ack_timeout())),
            control: Mutex::new(Control {
                state: SessionState::Idle,
                chunk_size: policy.initial_chunk_size(),
                algorithm,
                reconnect_attempts: 0,
                last_capture_us: 0,
                last_quality: None,
                counters: SessionCounters::default(),
            }),
            engine,
            policy,
            outbound: tokio::sync::Mutex::new(None),
            connection: Mutex::new(None),
            consumer: None,
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            stopping: AtomicBool::new(false),
            events,
            outcome,
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Deliver decoded chunks to `tx`. A full queue drops the chunk.
    pub fn with_consumer(mut self, tx: Sender<DecodedChunk>) -> Self {
        self.consumer = Some(tx);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> SessionState {
        self.control.lock().state
    }

    pub fn chunk_size(&self) -> usize {
        self.control.lock().chunk_size
    }

    pub fn engine(&self) -> &CompressionEngine {
        &self.engine
    }

    pub fn buffer(&self) -> &SharedFrameBuffer {
        &self.buffer
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Move to `to`. Stopped is terminal.
    fn set_state(&self, to: SessionState) {
        let from = {
            let mut control = self.control.lock();
            if control.state == to || control.state.is_stopped() {
                return;
            }
            let from = control.state;
            control.state = to;
            from
        };
        tracing::debug!("Session {} {} -> {}", self.id, from, to);
        self.emit(SessionEvent::StateChanged { from, to });
    }

    /// Switch between Active and Degraded; no-op in any other state
    fn set_health(&self, degraded: bool) {
        let to = if degraded {
            SessionState::Degraded
        } else {
            SessionState::Active
        };
        let from = {
            let mut control = self.control.lock();
            if !control.state.is_streaming() || control.state == to {
                return;
            }
            let from = control.state;
            control.state = to;
            from
        };
        if degraded {
            tracing::warn!("Session {} degraded", self.id);
        } else {
            tracing::info!("Session {} recovered", self.id);
        }
        self.emit(SessionEvent::StateChanged { from, to });
    }

    /// Spawn the background tasks. Must be called inside a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> std::result::Result<(), SessionError> {
        {
            let mut control = self.control.lock();
            match control.state {
                SessionState::Idle => control.state = SessionState::Active,
                SessionState::Stopped => return Err(SessionError::Stopped),
                _ => return Err(SessionError::AlreadyStarted),
            }
        }
        self.emit(SessionEvent::StateChanged {
            from: SessionState::Idle,
            to: SessionState::Active,
        });
        tracing::info!("Starting {:?} session {}", self.direction, self.id);

        let mut tasks = Vec::with_capacity(3);
        match &self.origin {
            Origin::Dial(connector) => {
                let session = Arc::clone(self);
                let connector = Arc::clone(connector);
                tasks.push(tokio::spawn(async move { session.supervise(connector).await }));
            }
            Origin::Attached(slot) => {
                let (sink, stream) = slot.lock().take().ok_or(SessionError::NotConnected)?;
                let session = Arc::clone(self);
                tasks.push(tokio::spawn(async move { session.serve(sink, stream).await }));
            }
        }

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move { session.drain_loop().await }));
        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move { session.adapt_loop().await }));

        self.tasks.lock().extend(tasks);
        Ok(())
    }

    /// Hand a frame to the pipeline. Never blocks beyond the buffer write.
    ///
    /// Returns whether the frame's bytes were buffered in full; `false` for a
    /// skipped silent frame or a frame larger than the buffer.
    pub fn push_frame(&self, frame: AudioFrame) -> Result<bool> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Stopped.into());
        }

        let stream = &self.config.stream;
        if frame.channels() != stream.channels || frame.sample_rate() != stream.sample_rate {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} Hz / {} ch frame on a {} Hz / {} ch stream",
                frame.sample_rate(),
                frame.channels(),
                stream.sample_rate,
                stream.channels
            ))
            .into());
        }

        let quality = self.analyzer.analyze(&frame);
        let skip = stream.skip_silent_frames && quality.is_silent(stream.silence_threshold);
        {
            let mut control = self.control.lock();
            control.counters.frames_pushed += 1;
            control.last_quality = Some(quality);
            if skip {
                control.counters.frames_skipped += 1;
            } else {
                control.last_capture_us = frame.timestamp();
            }
        }
        if skip {
            tracing::trace!("Skipping silent frame at {}us", frame.timestamp());
            return Ok(false);
        }

        let retained = self.buffer.write(&frame.to_pcm_bytes());
        while let Ok(AudioError::BufferOverflow { evicted }) = self.overflow_rx.try_recv() {
            tracing::warn!("Session {} ingest overflow, {} bytes dropped", self.id, evicted);
            self.emit(SessionEvent::BufferOverflow { evicted });
        }

        self.wake.notify_one();
        Ok(retained)
    }

    // ---- connection handling ----

    async fn supervise(self: Arc<Self>, connector: Arc<dyn Connector>) {
        let stable_after = self.config.reconnect.stable_after();
        // Consecutive dials that failed or lost the connection before it proved stable
        let mut failures: u32 = 0;

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = connector.connect() => result,
            };

            match connected {
                Ok((sink, stream)) => {
                    let token = self.on_connected(sink).await;
                    let connected_at = tokio::time::Instant::now();
                    let reason = self.receive_loop(stream, &token).await;
                    self.on_disconnected(&reason).await;
                    if self.cancel.is_cancelled() {
                        return;
                    }

                    let uptime = connected_at.elapsed();
                    if uptime >= stable_after {
                        failures = 0;
                    } else {
                        tracing::warn!(
                            "Session {} connection dropped after {:?}, counting as a failed attempt",
                            self.id,
                            uptime
                        );
                    }
                    failures += 1;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        "Session {} connection attempt {}/{} failed: {}",
                        self.id,
                        failures,
                        self.config.reconnect.max_attempts,
                        e
                    );
                }
            }

            if !self.back_off(failures).await {
                return;
            }
        }
    }

    /// Wait out the backoff after `failures` consecutive failures.
    /// Returns false once attempts are exhausted or the session is stopped.
    async fn back_off(&self, failures: u32) -> bool {
        let max_attempts = self.config.reconnect.max_attempts;
        self.control.lock().reconnect_attempts = failures;

        if failures >= max_attempts {
            tracing::error!(
                "Session {} giving up after {} connection attempts",
                self.id,
                failures
            );
            self.emit(SessionEvent::Exhausted { attempts: failures });
            self.finish(Err(SessionError::Exhausted { attempts: failures }));
            return false;
        }

        let delay = self.config.reconnect.backoff(failures);
        self.set_state(SessionState::Reconnecting {
            attempt: failures + 1,
        });
        self.emit(SessionEvent::ReconnectAttempt {
            attempt: failures + 1,
            delay_secs: delay.as_secs(),
        });

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn serve(self: Arc<Self>, sink: Box<dyn FrameSink>, stream: Box<dyn FrameStream>) {
        let token = self.on_connected(sink).await;
        let reason = self.receive_loop(stream, &token).await;
        self.on_disconnected(&reason).await;
        self.finish(Ok(()));
    }

    /// Install a fresh connection: new logical stream on both sides
    async fn on_connected(&self, sink: Box<dyn FrameSink>) -> CancellationToken {
        let token = self.cancel.child_token();
        let mut outbound = self.outbound.lock().await;

        self.packetizer.lock().reset();
        self.reorder.lock().reset();
        let orphaned = self.acks.lock().clear();
        {
            let mut monitor = self.monitor.lock();
            monitor.record_lost(orphaned);
            monitor.set_in_flight(0);
        }
        self.control.lock().reconnect_attempts = 0;
        *self.connection.lock() = Some(token.clone());
        *outbound = Some(sink);

        if self.direction == Direction::Outbound {
            let hello = ControlMessage::Hello {
                stream_id: self.id,
                sample_rate: self.config.stream.sample_rate,
                channels: self.config.stream.channels,
            };
            self.send_control_locked(&mut outbound, &hello).await;
        }
        drop(outbound);

        tracing::info!("Session {} connected", self.id);
        self.set_state(SessionState::Active);
        self.emit(SessionEvent::Connected { stream_id: self.id });
        self.wake.notify_one();
        token
    }

    async fn on_disconnected(&self, reason: &str) {
        if let Some(token) = self.connection.lock().take() {
            token.cancel();
        }
        let sink = self.outbound.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.close().await;
        }

        if !self.cancel.is_cancelled() {
            tracing::warn!("Session {} lost its connection: {}", self.id, reason);
            self.emit(SessionEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Ask the connection task to tear down the current connection
    fn drop_connection(&self) {
        if let Some(token) = self.connection.lock().as_ref() {
            token.cancel();
        }
    }

    /// Runs until the connection closes or is cancelled; returns why
    async fn receive_loop(&self, mut stream: Box<dyn FrameStream>, token: &CancellationToken) -> String {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return "connection cancelled".to_string(),
                next = stream.recv() => next,
            };

            match next {
                Ok(Some(WireMessage::Binary(frame))) => self.handle_packet(&frame).await,
                Ok(Some(WireMessage::Text(text))) => self.handle_control(&text).await,
                Ok(None) => return "closed by peer".to_string(),
                Err(e) => return e.to_string(),
            }
        }
    }

    async fn handle_packet(&self, frame: &[u8]) {
        let network = &self.config.network;
        let packet = match AudioPacket::decode_limited(frame, network.max_packet_size, network.max_chunk_bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("Session {} dropping invalid packet: {}", self.id, e);
                self.control.lock().counters.invalid_packets += 1;
                return;
            }
        };

        let received_at_us = now_us();
        let sent_local = self.clock.lock().adjust(us_to_secs(packet.sent_at_us));
        let latency_ms = ((us_to_secs(received_at_us) - sent_local) * 1000.0).max(0.0);
        self.monitor.lock().record_received(frame.len(), latency_ms);
        self.clock
            .lock()
            .record_arrival(packet.sequence, us_to_secs(received_at_us));
        tracing::trace!("Packet {} arrived, {:.1} ms", packet.sequence, latency_ms);

        if self.config.network.send_acks {
            let ack = ControlMessage::Ack {
                sequence: packet.sequence,
                sent_at_us: packet.sent_at_us,
                received_at_us,
            };
            self.send_control(&ack).await;
        }

        let released = self.reorder.lock().accept(packet);
        self.deliver(released);
    }

    /// Decompress released packets and hand them to the consumer in order
    fn deliver(&self, packets: Vec<AudioPacket>) {
        for packet in packets {
            let sequence = packet.sequence;
            let data = match self
                .engine
                .decompress_parts(packet.algorithm, &packet.payload, packet.original_len)
            {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("Session {} dropping packet {}: {}", self.id, sequence, e);
                    self.control.lock().counters.integrity_failures += 1;
                    self.emit(SessionEvent::IntegrityFailure { sequence });
                    continue;
                }
            };

            let frame = match AudioFrame::from_pcm_bytes(&data, packet.sample_rate, packet.channels, packet.captured_at_us) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Session {} packet {} is not PCM: {}", self.id, sequence, e);
                    self.control.lock().counters.invalid_packets += 1;
                    continue;
                }
            };

            let quality = self.analyzer.analyze(&frame);
            {
                let mut control = self.control.lock();
                control.counters.chunks_decoded += 1;
                control.last_quality = Some(quality);
            }

            let Some(consumer) = &self.consumer else {
                continue;
            };
            match consumer.try_send(DecodedChunk {
                sequence,
                frame,
                quality,
            }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("Consumer queue full, dropping chunk {}", sequence);
                    self.control.lock().counters.consumer_drops += 1;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.control.lock().counters.consumer_drops += 1;
                }
            }
        }
    }

    async fn handle_control(&self, text: &str) {
        let msg = match ControlMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Session {} ignoring control message: {}", self.id, e);
                self.control.lock().counters.invalid_control += 1;
                return;
            }
        };

        match msg {
            ControlMessage::Hello {
                stream_id,
                sample_rate,
                channels,
            } => {
                tracing::info!(
                    "Session {} peer stream {} ({} Hz, {} ch)",
                    self.id,
                    stream_id,
                    sample_rate,
                    channels
                );
                self.reorder.lock().reset();
            }
            ControlMessage::Ack { sequence, .. } => {
                let now = Instant::now();
                let (round_trip, in_flight) = {
                    let mut acks = self.acks.lock();
                    (acks.acknowledge(sequence, now), acks.in_flight())
                };
                if let Some(rtt) = round_trip {
                    let mut monitor = self.monitor.lock();
                    monitor.record_ack(rtt.as_secs_f64() * 1000.0);
                    monitor.set_in_flight(in_flight);
                }
            }
            ControlMessage::SyncRequest { client_time_us } => {
                let response = ControlMessage::SyncResponse {
                    client_time_us,
                    server_time_us: now_us(),
                };
                self.send_control(&response).await;
            }
            ControlMessage::SyncResponse {
                client_time_us,
                server_time_us,
            } => {
                let offset = self.clock.lock().sync_round_trip(
                    us_to_secs(client_time_us),
                    us_to_secs(server_time_us),
                    us_to_secs(now_us()),
                );
                tracing::debug!("Session {} clock offset {:.6}s", self.id, offset);
            }
        }
    }

    async fn send_control(&self, msg: &ControlMessage) -> bool {
        let mut outbound = self.outbound.lock().await;
        self.send_control_locked(&mut outbound, msg).await
    }

    async fn send_control_locked(&self, outbound: &mut Option<Box<dyn FrameSink>>, msg: &ControlMessage) -> bool {
        let Some(sink) = outbound.as_mut() else {
            return false;
        };
        let wire = match WireMessage::control(msg) {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!("Cannot encode control message: {}", e);
                return false;
            }
        };
        match sink.send(wire).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Session {} control send failed: {}", self.id, e);
                self.drop_connection();
                false
            }
        }
    }

    // ---- send path ----

    async fn drain_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(DRAIN_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tick.tick() => {}
            }
            self.drain_ready().await;
        }
    }

    /// Send every full chunk currently buffered
    async fn drain_ready(&self) {
        let mut outbound = self.outbound.lock().await;
        if outbound.is_none() {
            return;
        }

        loop {
            let chunk_size = self.control.lock().chunk_size;
            let Some(chunk) = self.buffer.read_exact(chunk_size) else {
                break;
            };
            if !self.send_chunk_locked(&mut outbound, chunk).await {
                break;
            }
        }
    }

    /// Send everything buffered, including a final partial chunk
    async fn flush(&self) {
        let mut outbound = self.outbound.lock().await;
        if outbound.is_none() {
            let dropped = self.buffer.available();
            if dropped > 0 {
                tracing::debug!("Session {} not connected, discarding {} buffered bytes", self.id, dropped);
            }
            return;
        }

        loop {
            let chunk_size = self.control.lock().chunk_size;
            let Some(chunk) = self.buffer.read_exact(chunk_size) else {
                break;
            };
            if !self.send_chunk_locked(&mut outbound, chunk).await {
                return;
            }
        }

        let rest = self.buffer.available();
        let frame_bytes = SAMPLE_WIDTH * self.config.stream.channels.max(1) as usize;
        let whole = rest - rest % frame_bytes;
        if whole > 0 {
            let chunk = self.buffer.read(whole);
            self.send_chunk_locked(&mut outbound, chunk).await;
        }
    }

    async fn send_chunk_locked(&self, outbound: &mut Option<Box<dyn FrameSink>>, chunk: Vec<u8>) -> bool {
        let Some(sink) = outbound.as_mut() else {
            return false;
        };

        let conditions = self.monitor.lock().conditions(self.engine.cpu_load_percent());
        let algorithm = self.engine.select(&conditions);
        self.note_algorithm(algorithm);
        let result = self.engine.compress_with(&chunk, algorithm);

        let meta = PacketMeta {
            captured_at_us: self.control.lock().last_capture_us,
            sample_rate: self.config.stream.sample_rate,
            channels: self.config.stream.channels,
        };
        let packet = self.packetizer.lock().packetize(result, &meta);
        let sequence = packet.sequence;

        let frame = match packet.encode(self.config.network.max_packet_size) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Session {} cannot frame packet {}: {}", self.id, sequence, e);
                self.control.lock().counters.send_failures += 1;
                return false;
            }
        };
        let len = frame.len();

        match sink.send(WireMessage::Binary(frame)).await {
            Ok(()) => {
                self.monitor.lock().record_sent(len);
                if self.config.network.send_acks {
                    let in_flight = {
                        let mut acks = self.acks.lock();
                        acks.track(sequence, Instant::now());
                        acks.in_flight()
                    };
                    self.monitor.lock().set_in_flight(in_flight);
                }
                self.control.lock().counters.chunks_sent += 1;
                tracing::trace!("Sent packet {} ({} bytes, {})", sequence, len, algorithm);
                true
            }
            Err(e) => {
                tracing::warn!("Session {} send of packet {} failed: {}", self.id, sequence, e);
                self.control.lock().counters.send_failures += 1;
                self.drop_connection();
                false
            }
        }
    }

    fn note_algorithm(&self, algorithm: CompressionAlgorithm) {
        let previous = {
            let mut control = self.control.lock();
            std::mem::replace(&mut control.algorithm, algorithm)
        };
        if previous != algorithm {
            tracing::debug!("Session {} compression {} -> {}", self.id, previous, algorithm);
            self.emit(SessionEvent::AlgorithmChanged {
                from: previous,
                to: algorithm,
            });
        }
    }

    // ---- adaptation ----

    async fn adapt_loop(self: Arc<Self>) {
        let period = self.config.adaptation.interval();
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => self.adapt_once().await,
            }
        }
    }

    /// One housekeeping and adaptation pass
    pub async fn adapt_once(&self) {
        let now = Instant::now();

        let (lost, in_flight) = {
            let mut acks = self.acks.lock();
            (acks.expire(now), acks.in_flight())
        };
        {
            let mut monitor = self.monitor.lock();
            monitor.record_lost(lost);
            monitor.set_in_flight(in_flight);
        }

        let released = self.reorder.lock().purge_expired(now);
        self.deliver(released);

        let needs_sync = self.clock.lock().needs_sync();
        if needs_sync {
            self.send_control(&ControlMessage::SyncRequest {
                client_time_us: now_us(),
            })
            .await;
        }

        let (stats, should_adapt) = {
            let monitor = self.monitor.lock();
            let stats = monitor.stats();
            let should_adapt = monitor.should_adapt_with(&stats);
            (stats, should_adapt)
        };
        let (state, chunk_size) = {
            let control = self.control.lock();
            (control.state, control.chunk_size)
        };
        if !state.is_streaming() {
            return;
        }

        let decision = self.policy.evaluate(&stats, should_adapt, chunk_size);
        if decision.chunk_size != chunk_size {
            self.control.lock().chunk_size = decision.chunk_size;
            tracing::info!(
                "Session {} chunk size {} -> {} (loss {:.1}%, latency {:.0} ms, quality {:.2})",
                self.id,
                chunk_size,
                decision.chunk_size,
                stats.loss_rate * 100.0,
                stats.average_latency_ms,
                stats.quality_score
            );
            self.emit(SessionEvent::ChunkSizeChanged {
                from: chunk_size,
                to: decision.chunk_size,
            });
        }
        if should_adapt {
            let conditions = NetworkConditions {
                bandwidth_mbps: stats.bandwidth_mbps,
                latency_ms: stats.average_latency_ms,
                cpu_percent: self.engine.cpu_load_percent(),
            };
            self.note_algorithm(self.engine.select(&conditions));
        }
        self.set_health(decision.degraded);
    }

    // ---- shutdown ----

    fn finish(&self, outcome: SessionOutcome) {
        self.set_state(SessionState::Stopped);
        self.cancel.cancel();
        self.outcome.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(outcome);
                true
            } else {
                false
            }
        });
    }

    /// Flush buffered audio, close the transport and stop all tasks.
    /// Idempotent; interrupts a pending backoff wait.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) || self.cancel.is_cancelled() {
            return;
        }
        tracing::info!("Stopping session {}", self.id);

        self.flush().await;
        if let Some(token) = self.connection.lock().take() {
            token.cancel();
        }
        let sink = self.outbound.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = sink.close().await;
        }

        self.finish(Ok(()));
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    /// Resolves once the session has stopped, with why it stopped
    pub async fn wait(&self) -> SessionOutcome {
        let mut rx = self.outcome.subscribe();
        let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(SessionError::Stopped))
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (state, chunk_size, algorithm, reconnect_attempts, last_quality, counters) = {
            let control = self.control.lock();
            (
                control.state,
                control.chunk_size,
                control.algorithm,
                control.reconnect_attempts,
                control.last_quality,
                control.counters.clone(),
            )
        };

        SessionSnapshot {
            id: self.id,
            direction: self.direction,
            state,
            started_at: self.started_at,
            chunk_size,
            algorithm,
            reconnect_attempts,
            last_quality,
            counters,
            buffer: self.buffer.stats(),
            network: self.monitor.lock().stats(),
            reorder: self.reorder.lock().stats(),
            sync: self.clock.lock().snapshot(),
            compression: self.engine.stats(),
        }
    }
}
