//! WebSocket Game Server
//!
//! Accepts WebSocket connections, runs one reader task and one writer task
//! per connection, and drives the fixed-period simulation loop that
//! publishes a world snapshot to every connection each tick.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::{Sink, SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::game::state::{Player, PlayerId};
use crate::game::tick::delta_seconds;
use crate::network::broadcast::Publisher;
use crate::network::connection::{CloseReason, Connection, ConnectionError, PeerLink};
use crate::network::protocol::{decode_input, Frame, MAX_MESSAGE_BYTES};
use crate::network::registry::Registry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Only path the WebSocket upgrade is accepted on.
    pub ws_path: String,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Simulation tick period.
    pub tick_period: Duration,
    /// Player speed per axis, world units per second.
    pub player_speed: f64,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub outbound_queue: usize,
    /// Longest a single socket write may take before the connection is closed.
    pub send_timeout: Duration,
    /// Longest the WebSocket upgrade may take after the TCP accept.
    pub handshake_timeout: Duration,
    /// How often the server pings each peer.
    pub ping_interval: Duration,
    /// A peer that sends nothing (not even a pong) for this long is closed.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/play".to_string(),
            max_connections: 1000,
            tick_period: Duration::from_millis(crate::TICK_PERIOD_MS),
            player_speed: 100.0,
            outbound_queue: 8,
            send_timeout: Duration::from_millis(1000),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(45),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load config from `PETRI_*` environment variables, falling back to
    /// defaults for anything missing or invalid.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parse_var(&lookup, "PETRI_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(path) = lookup("PETRI_WS_PATH") {
            if path.starts_with('/') {
                config.ws_path = path;
            } else {
                warn!(value = %path, "PETRI_WS_PATH must start with '/', using default");
            }
        }

        if let Some(max) = parse_var::<usize>(&lookup, "PETRI_MAX_CONNECTIONS") {
            if max > 0 {
                config.max_connections = max;
            } else {
                warn!("PETRI_MAX_CONNECTIONS must be > 0, using default");
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PETRI_TICK_MS") {
            if ms > 0 {
                config.tick_period = Duration::from_millis(ms);
            } else {
                warn!("PETRI_TICK_MS must be > 0, using default");
            }
        }

        if let Some(speed) = parse_var::<f64>(&lookup, "PETRI_PLAYER_SPEED") {
            if speed.is_finite() && speed >= 0.0 {
                config.player_speed = speed;
            } else {
                warn!("PETRI_PLAYER_SPEED must be finite and >= 0, using default");
            }
        }

        if let Some(queue) = parse_var::<usize>(&lookup, "PETRI_OUTBOUND_QUEUE") {
            if queue > 0 {
                config.outbound_queue = queue;
            } else {
                warn!("PETRI_OUTBOUND_QUEUE must be > 0, using default");
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PETRI_SEND_TIMEOUT_MS") {
            if ms > 0 {
                config.send_timeout = Duration::from_millis(ms);
            } else {
                warn!("PETRI_SEND_TIMEOUT_MS must be > 0, using default");
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PETRI_HANDSHAKE_TIMEOUT_MS") {
            if ms > 0 {
                config.handshake_timeout = Duration::from_millis(ms);
            } else {
                warn!("PETRI_HANDSHAKE_TIMEOUT_MS must be > 0, using default");
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PETRI_PING_INTERVAL_MS") {
            if ms > 0 {
                config.ping_interval = Duration::from_millis(ms);
            } else {
                warn!("PETRI_PING_INTERVAL_MS must be > 0, using default");
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "PETRI_IDLE_TIMEOUT_MS") {
            if ms > 0 {
                config.idle_timeout = Duration::from_millis(ms);
            } else {
                warn!("PETRI_IDLE_TIMEOUT_MS must be > 0, using default");
            }
        }

        if config.idle_timeout <= config.ping_interval {
            warn!(
                idle_ms = config.idle_timeout.as_millis() as u64,
                ping_ms = config.ping_interval.as_millis() as u64,
                "idle timeout not longer than ping interval, live peers may be dropped"
            );
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "invalid value, using default");
            None
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Counts a live connection for as long as it is held.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| Self(active.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Transport limits for accepted sockets.
fn transport_config() -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_MESSAGE_BYTES);
    ws_config.max_frame_size = Some(MAX_MESSAGE_BYTES);
    ws_config
}

/// Resolves once shutdown has been requested (or the server is gone).
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        let stopping = *rx.borrow_and_update();
        if stopping || rx.changed().await.is_err() {
            return;
        }
    }
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Connected players.
    registry: Arc<Registry>,
    /// Snapshot fan-out.
    publisher: Arc<Publisher>,
    /// Color source for new players.
    rng: Arc<Mutex<StdRng>>,
    /// Live connection count.
    active: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: watch::Sender<bool>,
}

impl GameServer {
    /// Create a new game server with an entropy-seeded color source.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Create a game server with a specific color source.
    pub fn with_rng(config: ServerConfig, rng: StdRng) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            registry: Arc::new(Registry::new()),
            publisher: Arc::new(Publisher::new()),
            rng: Arc::new(Mutex::new(rng)),
            active: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The player registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The snapshot publisher.
    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run on an already-bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            path = %self.config.ws_path,
            tick_ms = self.config.tick_period.as_millis() as u64,
            "game server listening"
        );

        let simulation = tokio::spawn(Self::run_simulation_loop(
            self.registry.clone(),
            self.publisher.clone(),
            self.config.tick_period,
            self.shutdown_tx.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            match ConnectionSlot::acquire(&self.active, self.config.max_connections) {
                                Some(slot) => {
                                    debug!(addr = %addr, "new connection");
                                    self.handle_connection(stream, addr, slot);
                                }
                                None => {
                                    warn!(addr = %addr, "connection limit reached, rejecting");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = shutdown_signalled(&mut shutdown_rx) => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        if let Err(e) = simulation.await {
            error!(error = %e, "simulation loop task failed");
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, slot: ConnectionSlot) {
        let registry = self.registry.clone();
        let publisher = self.publisher.clone();
        let rng = self.rng.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;

            let expected_path = config.ws_path.clone();
            let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                if req.uri().path() == expected_path {
                    Ok(resp)
                } else {
                    let mut rejection = ErrorResponse::new(Some("not found".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    Err(rejection)
                }
            };

            let handshake = accept_hdr_async_with_config(stream, check_path, Some(transport_config()));
            let ws_stream = match timeout(config.handshake_timeout, handshake).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    debug!(addr = %addr, error = %e, "WebSocket handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(addr = %addr, "WebSocket handshake timed out");
                    return;
                }
            };

            let id = PlayerId::generate();
            let mut connection = Connection::new(id, addr);
            let (link, outbound_rx) = PeerLink::channel(id, config.outbound_queue);

            let player = {
                let mut rng = rng.lock().await;
                Player::spawn(id, &mut *rng)
            };
            let welcome = registry.register(player, link.clone()).await;
            connection.open();

            if let Err(e) = publisher.publish(&welcome, std::slice::from_ref(&link)) {
                error!(player = %id, error = %e, "failed to encode welcome snapshot");
            }
            // From here the registry holds the only sender; unregistering ends the writer.
            drop(link);

            let (ws_sender, mut ws_receiver) = ws_stream.split();
            let mut writer = tokio::spawn(Self::run_writer(
                ws_sender,
                outbound_rx,
                config.send_timeout,
                config.ping_interval,
            ));

            let mut last_seen = Instant::now();
            let mut idle_check = interval(config.ping_interval);
            idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let reason = loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let message = match msg {
                            Some(Ok(message)) => message,
                            Some(Err(e)) => break CloseReason::Transport(ConnectionError::Read(e)),
                            None => break CloseReason::PeerClosed,
                        };
                        last_seen = Instant::now();

                        match message {
                            Message::Text(text) => {
                                Self::handle_text(&registry, &connection, &text, config.player_speed).await;
                            }
                            Message::Binary(_) => {
                                debug!(player = %id, "binary frame discarded");
                            }
                            Message::Close(_) => break CloseReason::PeerClosed,
                            _ => {}
                        }
                    }
                    _ = idle_check.tick() => {
                        let silent = last_seen.elapsed();
                        if silent >= config.idle_timeout {
                            break CloseReason::Transport(ConnectionError::Idle(silent));
                        }
                    }
                    result = &mut writer => {
                        break match result {
                            Ok(Err(e)) => CloseReason::Transport(e),
                            Ok(Ok(())) => CloseReason::PeerClosed,
                            Err(e) => {
                                error!(player = %id, error = %e, "writer task failed");
                                CloseReason::PeerClosed
                            }
                        };
                    }
                    _ = shutdown_signalled(&mut shutdown_rx) => {
                        break CloseReason::Shutdown;
                    }
                }
            };

            connection.close(&registry, &reason).await;

            // Unregistering dropped the last sender: let the writer flush and
            // send its close frame, but never wait longer than one send.
            if !writer.is_finished() && timeout(config.send_timeout, &mut writer).await.is_err() {
                writer.abort();
            }
        });
    }

    /// Drain a connection's outbound queue into its socket, pinging the
    /// peer every `ping_interval`.
    ///
    /// Ends cleanly once every sender is gone; any failed or slow write ends
    /// it with an error.
    async fn run_writer<S>(
        mut ws_sender: S,
        mut outbound_rx: mpsc::Receiver<Frame>,
        send_timeout: Duration,
        ping_interval: Duration,
    ) -> Result<(), ConnectionError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let mut ping = interval(ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            let message = tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => Message::Text(frame.to_string()),
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Vec::new()),
            };

            match timeout(send_timeout, ws_sender.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(ConnectionError::Write(e)),
                Err(_) => return Err(ConnectionError::WriteTimeout(send_timeout)),
            }
        }

        let _ = ws_sender.close().await;
        Ok(())
    }

    /// Decode and apply one text frame.
    async fn handle_text(registry: &Registry, connection: &Connection, text: &str, speed: f64) {
        if !connection.is_open() {
            return;
        }
        let id = connection.id();

        let input = match decode_input(text) {
            Ok(input) => input,
            Err(e) => {
                debug!(player = %id, error = %e, "discarding malformed message");
                return;
            }
        };

        if input.is_keepalive() {
            trace!(player = %id, "keepalive");
            return;
        }

        match registry.apply_input(&id, &input, speed).await {
            Ok(outcome) => {
                if outcome.renamed {
                    info!(player = %id, nickname = ?input.nickname, "nickname set");
                }
                if outcome.split {
                    debug!(player = %id, "split");
                }
            }
            Err(e) => {
                debug!(error = %e, "input ignored");
            }
        }
    }

    /// Fixed-period simulation loop.
    ///
    /// A tick that overruns its period is followed immediately by the next
    /// one; missed ticks are never fired in a burst.
    async fn run_simulation_loop(
        registry: Arc<Registry>,
        publisher: Arc<Publisher>,
        period: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let dt = delta_seconds(period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first interval tick completes immediately
        ticker.tick().await;
        info!(period_ms = period.as_millis() as u64, "simulation loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_signalled(&mut shutdown_rx) => break,
            }

            let started = Instant::now();
            let output = registry.advance(dt).await;
            let tick = output.snapshot.tick;

            for (id, e) in &output.result.contained {
                warn!(tick, player = %id, error = %e, "integration failed, player stopped");
            }

            match publisher.publish(&output.snapshot, &output.recipients) {
                Ok(report) if report.dropped() > 0 => {
                    debug!(
                        tick,
                        delivered = report.delivered,
                        lagging = report.queue_full.len(),
                        closed = report.closed.len(),
                        stale = report.stale.len(),
                        "snapshot not delivered to every peer"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(tick, error = %e, "failed to encode snapshot");
                }
            }

            let elapsed = started.elapsed();
            if elapsed > period {
                warn!(tick, elapsed_ms = elapsed.as_millis() as u64, "tick overran its period");
            }
        }

        info!("simulation loop stopped");
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Get registered player count.
    pub async fn player_count(&self) -> usize {
        self.registry.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::core::vec2::Vec2;
    use crate::game::input::{Controls, PlayerInput};
    use crate::network::protocol::decode_snapshot;
    use futures_util::sink;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.tick_period, Duration::from_millis(50));
        assert_eq!(config.ws_path, "/play");
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PETRI_BIND_ADDR", "127.0.0.1:9001"),
            ("PETRI_WS_PATH", "/ws"),
            ("PETRI_TICK_MS", "25"),
            ("PETRI_PLAYER_SPEED", "250.5"),
            ("PETRI_OUTBOUND_QUEUE", "16"),
            ("PETRI_HANDSHAKE_TIMEOUT_MS", "750"),
            ("PETRI_PING_INTERVAL_MS", "5000"),
            ("PETRI_IDLE_TIMEOUT_MS", "20000"),
        ]));

        assert_eq!(config.bind_addr, "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.tick_period, Duration::from_millis(25));
        assert_eq!(config.player_speed, 250.5);
        assert_eq!(config.outbound_queue, 16);
        assert_eq!(config.handshake_timeout, Duration::from_millis(750));
        assert_eq!(config.ping_interval, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PETRI_BIND_ADDR", "nowhere"),
            ("PETRI_WS_PATH", "play"),
            ("PETRI_TICK_MS", "0"),
            ("PETRI_PLAYER_SPEED", "NaN"),
            ("PETRI_MAX_CONNECTIONS", "-3"),
            ("PETRI_HANDSHAKE_TIMEOUT_MS", "0"),
            ("PETRI_IDLE_TIMEOUT_MS", "soon"),
        ]));
        let default = ServerConfig::default();

        assert_eq!(config.bind_addr, default.bind_addr);
        assert_eq!(config.ws_path, default.ws_path);
        assert_eq!(config.tick_period, default.tick_period);
        assert_eq!(config.player_speed, default.player_speed);
        assert_eq!(config.max_connections, default.max_connections);
        assert_eq!(config.handshake_timeout, default.handshake_timeout);
        assert_eq!(config.idle_timeout, default.idle_timeout);
    }

    #[test]
    fn test_transport_rejects_large_messages() {
        let ws_config = transport_config();
        assert_eq!(ws_config.max_message_size, Some(MAX_MESSAGE_BYTES));
        assert_eq!(ws_config.max_frame_size, Some(MAX_MESSAGE_BYTES));
    }

    #[test]
    fn test_connection_slots() {
        let active = Arc::new(AtomicUsize::new(0));

        let first = ConnectionSlot::acquire(&active, 2).unwrap();
        let _second = ConnectionSlot::acquire(&active, 2).unwrap();
        assert!(ConnectionSlot::acquire(&active, 2).is_none());
        assert_eq!(active.load(Ordering::Acquire), 2);

        drop(first);
        assert_eq!(active.load(Ordering::Acquire), 1);
        assert!(ConnectionSlot::acquire(&active, 2).is_some());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = GameServer::with_rng(ServerConfig::default(), StdRng::seed_from_u64(1));
        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.player_count().await, 0);
        server.shutdown();
        // Should not panic
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_loop_ticks_and_publishes() {
        let registry = Arc::new(Registry::new());
        let publisher = Arc::new(Publisher::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let id = PlayerId::from_bytes([1; 16]);
        let (link, mut rx) = PeerLink::channel(id, 16);
        registry.register(Player::new(id, 0), link).await;
        registry
            .apply_input(
                &id,
                &PlayerInput::new(None, Some(Controls { right: true, ..Controls::default() })),
                100.0,
            )
            .await
            .unwrap();

        let period = Duration::from_millis(50);
        let handle = tokio::spawn(GameServer::run_simulation_loop(
            registry.clone(),
            publisher.clone(),
            period,
            shutdown_rx,
        ));

        for expected_tick in 1..=3u64 {
            let frame = rx.recv().await.unwrap();
            let snapshot = decode_snapshot(&frame).unwrap();
            assert_eq!(snapshot.tick, expected_tick);

            let state = snapshot.player(&id).unwrap();
            assert_eq!(state.x, 5.0 * expected_tick as f64);
            assert_eq!(state.y, 0.0);
        }

        shutdown_tx.send_replace(true);
        handle.await.unwrap();

        assert!(publisher.stats().frames >= 3);
        let player = registry.player(&id).await.unwrap();
        assert_eq!(player.velocity, Vec2::new(100.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_loop_survives_bad_player_and_dead_peer() {
        let registry = Arc::new(Registry::new());
        let publisher = Arc::new(Publisher::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bad = PlayerId::from_bytes([1; 16]);
        let (bad_link, bad_rx) = PeerLink::channel(bad, 4);
        let mut bad_player = Player::new(bad, 0);
        bad_player.velocity = Vec2::new(f64::NAN, 0.0);
        registry.register(bad_player, bad_link).await;
        drop(bad_rx);

        let good = PlayerId::from_bytes([2; 16]);
        let (good_link, mut good_rx) = PeerLink::channel(good, 16);
        registry.register(Player::new(good, 0), good_link).await;

        let handle = tokio::spawn(GameServer::run_simulation_loop(
            registry.clone(),
            publisher.clone(),
            Duration::from_millis(50),
            shutdown_rx,
        ));

        for expected_tick in 1..=2u64 {
            let snapshot = decode_snapshot(&good_rx.recv().await.unwrap()).unwrap();
            assert_eq!(snapshot.tick, expected_tick);
            assert_eq!(snapshot.players.len(), 2);
        }

        shutdown_tx.send_replace(true);
        handle.await.unwrap();

        // The failing peer is still registered; only its own close path removes it
        assert!(registry.contains(&bad).await);
        assert_eq!(registry.player(&bad).await.unwrap().velocity, Vec2::ZERO);
    }

    fn queued(frames: &[&str]) -> (PeerLink, mpsc::Receiver<Frame>) {
        let (link, rx) = PeerLink::channel(PlayerId::from_bytes([1; 16]), 8);
        for (tick, frame) in frames.iter().enumerate() {
            link.offer(tick as u64, Frame::from(*frame)).unwrap();
        }
        (link, rx)
    }

    #[tokio::test]
    async fn test_writer_stops_on_write_error() {
        let failing = sink::unfold((), |(), _message: Message| async {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        });
        let (_link, rx) = queued(&["frame"]);

        let result = GameServer::run_writer(
            Box::pin(failing),
            rx,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await;

        assert!(matches!(result, Err(ConnectionError::Write(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_stops_on_stalled_write() {
        let stalled = sink::unfold((), |(), _message: Message| async {
            std::future::pending::<Result<(), tungstenite::Error>>().await
        });
        let (_link, rx) = queued(&["frame"]);

        let result = GameServer::run_writer(
            Box::pin(stalled),
            rx,
            Duration::from_millis(50),
            Duration::from_secs(60),
        )
        .await;

        assert!(matches!(result, Err(ConnectionError::WriteTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_pings_and_forwards_frames() {
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = sent.clone();
        let recording = sink::unfold((), move |(), message: Message| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(message);
                Ok::<_, tungstenite::Error>(())
            }
        });
        let (link, rx) = queued(&["a", "b"]);

        let writer = tokio::spawn(GameServer::run_writer(
            Box::pin(recording),
            rx,
            Duration::from_secs(1),
            Duration::from_millis(100),
        ));

        tokio::time::sleep(Duration::from_millis(250)).await;
        drop(link);
        writer.await.unwrap().unwrap();

        let sent = sent.lock().unwrap();
        let texts: Vec<_> = sent
            .iter()
            .filter_map(|m| match m {
                Message::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();
        let pings = sent.iter().filter(|m| matches!(m, Message::Ping(_))).count();

        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(pings, 2);
    }
}
