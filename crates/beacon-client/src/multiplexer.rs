//! Subscription multiplexer.
//!
//! Many logical subscriptions share one physical connection. The first
//! attach opens it and the last detach closes it for good. A single task
//! owns the connection, the subscription table and the monitor; handles
//! talk to it over a command channel.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::metrics::{
    HEARTBEAT_PINGS_SENT_TOTAL, HEARTBEAT_TICK_FAILURES_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL,
};
use beacon_core::{
    Clock, CloseReason, Identifiers, LatencyRecorder, NegativeLatencyPolicy, NegotiatedProtocol,
    ProtocolSet, SubscriptionId, SystemClock, TelemetrySink, TracingTelemetry,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::monitor::{ClientMonitor, FrameOutcome, TickAction};
use crate::transport::ClientTransport;
use crate::visibility::Visibility;

const COMMAND_QUEUE: usize = 64;
const FRAME_BROADCAST: usize = 256;

/// Client settings.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Tags offered in the handshake, most preferred first.
    pub protocols: ProtocolSet,
    /// Tick period; the server is stale after twice this.
    pub beat_interval: Duration,
    /// Handling of negative latency samples.
    pub negative_latency: NegativeLatencyPolicy,
    /// Identifiers attached to latency samples.
    pub identifiers: Identifiers,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocols: ProtocolSet::default(),
            beat_interval: Duration::from_secs(3),
            negative_latency: NegativeLatencyPolicy::Emit,
            identifiers: Identifiers::new(),
        }
    }
}

/// Snapshot of the multiplexer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiplexerStatus {
    /// Attached subscriptions.
    pub subscriptions: usize,
    /// Whether a physical connection is open.
    pub connected: bool,
    /// Negotiated protocol, when connected with a supported tag.
    pub protocol: Option<NegotiatedProtocol>,
    /// Last visibility seen.
    pub visibility: Visibility,
}

enum Command {
    Attach {
        identifier: String,
        reply: oneshot::Sender<Result<SubscriptionId, ClientError>>,
    },
    Detach {
        id: SubscriptionId,
        reply: oneshot::Sender<Result<usize, ClientError>>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Status {
        reply: oneshot::Sender<MultiplexerStatus>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Builder for the multiplexer task.
pub struct SubscriptionMultiplexer {
    config: ClientConfig,
    transport: Arc<dyn ClientTransport>,
    visibility: Option<watch::Receiver<Visibility>>,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionMultiplexer {
    /// Multiplexer over `transport`, always in the foreground, logging latency.
    pub fn new(config: ClientConfig, transport: Arc<dyn ClientTransport>) -> Self {
        Self {
            config,
            transport,
            visibility: None,
            telemetry: Arc::new(TracingTelemetry),
            clock: Arc::new(SystemClock),
        }
    }

    /// Pause heartbeats while `signal` reads `Background`.
    #[must_use]
    pub fn with_visibility(mut self, signal: watch::Receiver<Visibility>) -> Self {
        self.visibility = Some(signal);
        self
    }

    /// Send latency samples to `sink`.
    #[must_use]
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Stamp pings and measure latency with `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the task. Nothing connects until the first attach.
    pub fn spawn(self) -> MultiplexerHandle {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let (frames, _) = broadcast::channel(FRAME_BROADCAST);
        let (visibility, visibility_open) = match self.visibility {
            Some(rx) => (rx, true),
            None => (watch::channel(Visibility::Foreground).1, false),
        };
        let actor = Actor {
            latency: LatencyRecorder::new(self.telemetry, self.clock, self.config.negative_latency),
            config: self.config,
            transport: self.transport,
            commands: rx,
            visibility,
            visibility_open,
            subscriptions: BTreeMap::new(),
            session: None,
            frames: frames.clone(),
        };
        let _task = tokio::spawn(actor.run());
        MultiplexerHandle { tx, frames }
    }
}

/// Cloneable handle to a running multiplexer.
#[derive(Clone, Debug)]
pub struct MultiplexerHandle {
    tx: mpsc::Sender<Command>,
    frames: broadcast::Sender<String>,
}

impl MultiplexerHandle {
    /// Add a subscription, opening the connection if none is open.
    pub async fn attach(&self, identifier: impl Into<String>) -> Result<SubscriptionId, ClientError> {
        let identifier = identifier.into();
        self.request(|reply| Command::Attach { identifier, reply })
            .await?
    }

    /// Remove a subscription. Returns how many remain; at zero the
    /// connection has been closed without reconnect.
    pub async fn detach(&self, id: &SubscriptionId) -> Result<usize, ClientError> {
        let id = id.clone();
        self.request(|reply| Command::Detach { id, reply }).await?
    }

    /// Open a new connection after the previous one was lost, replaying
    /// every attached subscription. No-op when connected or idle.
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Reconnect { reply }).await?
    }

    /// Current state.
    pub async fn status(&self) -> Result<MultiplexerStatus, ClientError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Application frames received from the server.
    pub fn frames(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    /// Close the connection and stop the task.
    pub async fn shutdown(&self) {
        let _ = self.request(|done| Command::Shutdown { done }).await;
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }
}

struct Session {
    monitor: ClientMonitor,
    inbound: mpsc::Receiver<String>,
    ticker: Interval,
}

struct Actor {
    config: ClientConfig,
    transport: Arc<dyn ClientTransport>,
    commands: mpsc::Receiver<Command>,
    visibility: watch::Receiver<Visibility>,
    visibility_open: bool,
    latency: LatencyRecorder,
    subscriptions: BTreeMap<SubscriptionId, String>,
    session: Option<Session>,
    frames: broadcast::Sender<String>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let foreground = *self.visibility.borrow() == Visibility::Foreground;
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.stop().await;
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        self.stop().await;
                        return;
                    }
                },
                changed = self.visibility.changed(), if self.visibility_open => {
                    if changed.is_err() {
                        self.visibility_open = false;
                    } else {
                        self.on_visibility();
                    }
                }
                event = next_event(&mut self.session, foreground) => match event {
                    SessionEvent::Frame(Some(text)) => self.on_frame(text).await,
                    SessionEvent::Frame(None) => {
                        warn!(subscriptions = self.subscriptions.len(), "connection lost");
                        self.session = None;
                    }
                    SessionEvent::Tick => self.on_tick().await,
                },
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Attach { identifier, reply } => {
                let _ = reply.send(self.attach(identifier).await);
            }
            Command::Detach { id, reply } => {
                let _ = reply.send(self.detach(&id).await);
            }
            Command::Reconnect { reply } => {
                let result = if self.session.is_none() && !self.subscriptions.is_empty() {
                    self.open().await
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown { .. } => {}
        }
    }

    async fn attach(&mut self, identifier: String) -> Result<SubscriptionId, ClientError> {
        if self.session.is_none() {
            self.open().await?;
        }
        let sent = match subscription_frame("subscribe", &identifier) {
            Ok(frame) => self.transport.send(frame).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            if self.subscriptions.is_empty() {
                self.close(CloseReason::Unsubscribed, false).await;
            }
            return Err(err);
        }
        let id = SubscriptionId::new();
        let _ = self.subscriptions.insert(id.clone(), identifier);
        debug!(sub_id = %id, count = self.subscriptions.len(), "attached");
        Ok(id)
    }

    async fn detach(&mut self, id: &SubscriptionId) -> Result<usize, ClientError> {
        let identifier = self
            .subscriptions
            .remove(id)
            .ok_or_else(|| ClientError::UnknownSubscription(id.clone()))?;
        let remaining = self.subscriptions.len();
        debug!(sub_id = %id, count = remaining, "detached");

        if self.session.is_some() {
            match subscription_frame("unsubscribe", &identifier) {
                Ok(frame) => {
                    if let Err(err) = self.transport.send(frame).await {
                        warn!(error = %err, "unsubscribe not sent");
                    }
                }
                Err(err) => warn!(error = %err, "unsubscribe not encoded"),
            }
            if remaining == 0 {
                self.close(CloseReason::Unsubscribed, false).await;
            }
        }
        Ok(remaining)
    }

    async fn open(&mut self) -> Result<(), ClientError> {
        let offered: Vec<String> = self
            .config
            .protocols
            .tags()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let opened = self.transport.open(&offered).await?;

        let protocol = opened.selected_protocol.as_deref().and_then(|tag| {
            self.config
                .protocols
                .strategy_for(tag)
                .map(|strategy| NegotiatedProtocol {
                    tag: tag.to_owned(),
                    strategy,
                })
        });
        match &protocol {
            Some(protocol) => info!(
                protocol = %protocol.tag,
                strategy = %protocol.strategy,
                "connection open"
            ),
            None => warn!(
                selected = ?opened.selected_protocol,
                "server selected an unsupported subprotocol, its frames will be ignored"
            ),
        }

        let now = Instant::now();
        let beat = self.config.beat_interval;
        let mut ticker = time::interval_at(now + beat, beat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.session = Some(Session {
            monitor: ClientMonitor::new(
                protocol,
                self.config.identifiers.clone(),
                beat,
                self.latency.clone(),
                now,
            ),
            inbound: opened.inbound,
            ticker,
        });

        for identifier in self.subscriptions.values() {
            self.transport
                .send(subscription_frame("subscribe", identifier)?)
                .await?;
        }
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason, allow_reconnect: bool) {
        if self.session.take().is_none() {
            return;
        }
        if let Err(err) = self.transport.close(reason, allow_reconnect).await {
            debug!(error = %err, "transport close failed");
        }
        info!(%reason, allow_reconnect, "connection closed");
    }

    async fn stop(&mut self) {
        self.subscriptions.clear();
        self.close(CloseReason::Unsubscribed, false).await;
    }

    fn status(&self) -> MultiplexerStatus {
        MultiplexerStatus {
            subscriptions: self.subscriptions.len(),
            connected: self.session.is_some(),
            protocol: self
                .session
                .as_ref()
                .and_then(|s| s.monitor.protocol().cloned()),
            visibility: *self.visibility.borrow(),
        }
    }

    fn on_visibility(&mut self) {
        let visibility = *self.visibility.borrow_and_update();
        info!(%visibility, "visibility changed");
        if visibility == Visibility::Foreground {
            if let Some(session) = &mut self.session {
                session.monitor.resume();
                session.ticker.reset_immediately();
            }
        }
    }

    async fn on_frame(&mut self, text: String) {
        let Some(session) = &mut self.session else {
            return;
        };
        match session.monitor.on_frame(&text, Instant::now()) {
            Ok(FrameOutcome::Reply(pong)) => {
                if let Err(err) = self.transport.send(pong).await {
                    warn!(error = %err, "pong not sent");
                }
            }
            Ok(FrameOutcome::Latency(sample)) => {
                debug!(latency = ?sample.map(|s| s.value), "pong received");
            }
            Ok(FrameOutcome::Application) => {
                let _ = self.frames.send(text);
            }
            Ok(FrameOutcome::Ignored) => {}
            Err(err) => warn!(error = %err, "inbound frame dropped"),
        }
    }

    async fn on_tick(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        match session.monitor.on_tick(Instant::now()) {
            Ok(TickAction::Idle) => {}
            Ok(TickAction::Ping(ping)) => match self.transport.send(ping).await {
                Ok(()) => {
                    metrics::counter!(HEARTBEAT_PINGS_SENT_TOTAL, "role" => "client").increment(1);
                }
                Err(err) => {
                    warn!(error = %err, "ping not sent");
                    metrics::counter!(HEARTBEAT_TICK_FAILURES_TOTAL).increment(1);
                }
            },
            Ok(TickAction::Close(reason)) => {
                warn!(%reason, "server is silent, closing");
                metrics::counter!(HEARTBEAT_TIMEOUTS_TOTAL, "role" => "client").increment(1);
                self.close(reason, reason.allows_reconnect()).await;
            }
            Err(err) => {
                warn!(error = %err, "heartbeat tick failed");
                metrics::counter!(HEARTBEAT_TICK_FAILURES_TOTAL).increment(1);
            }
        }
    }
}

enum SessionEvent {
    Frame(Option<String>),
    Tick,
}

async fn next_event(session: &mut Option<Session>, foreground: bool) -> SessionEvent {
    let Some(session) = session else {
        return std::future::pending().await;
    };
    tokio::select! {
        biased;
        frame = session.inbound.recv() => SessionEvent::Frame(frame),
        _ = session.ticker.tick(), if foreground => SessionEvent::Tick,
    }
}

fn subscription_frame(command: &str, identifier: &str) -> Result<String, ClientError> {
    Ok(serde_json::to_string(&serde_json::json!({
        "command": command,
        "identifier": identifier,
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use assert_matches::assert_matches;
    use beacon_core::{ManualClock, MemoryTelemetry, StrategyKind};
    use parking_lot::Mutex;

    use crate::transport::OpenedTransport;
    use crate::visibility::visibility_channel;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Open(Vec<String>),
        Send(String),
        Close {
            reason: CloseReason,
            allow_reconnect: bool,
        },
    }

    #[derive(Default)]
    struct MockTransport {
        selected: Option<String>,
        failing_sends: bool,
        events: Mutex<Vec<Event>>,
        inbound: Mutex<Option<mpsc::Sender<String>>>,
    }

    impl MockTransport {
        fn selecting(tag: &str) -> Arc<Self> {
            Arc::new(Self {
                selected: Some(tag.to_owned()),
                ..Self::default()
            })
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn opens(&self) -> usize {
            self.events()
                .iter()
                .filter(|e| matches!(e, Event::Open(_)))
                .count()
        }

        fn closes(&self) -> Vec<Event> {
            self.events()
                .into_iter()
                .filter(|e| matches!(e, Event::Close { .. }))
                .collect()
        }

        fn sent(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    Event::Send(text) => Some(text),
                    _ => None,
                })
                .collect()
        }

        fn pings(&self) -> usize {
            self.sent()
                .iter()
                .filter(|t| t.contains(r#""type":"ping""#))
                .count()
        }

        async fn push(&self, frame: &str) {
            let tx = self.inbound.lock().clone().expect("transport not open");
            tx.send(frame.to_owned()).await.unwrap();
        }
    }

    #[async_trait]
    impl ClientTransport for MockTransport {
        async fn open(&self, offered: &[String]) -> Result<OpenedTransport, ClientError> {
            self.events.lock().push(Event::Open(offered.to_vec()));
            let (tx, rx) = mpsc::channel(64);
            *self.inbound.lock() = Some(tx);
            Ok(OpenedTransport {
                selected_protocol: self.selected.clone(),
                inbound: rx,
            })
        }

        async fn send(&self, frame: String) -> Result<(), ClientError> {
            if self.failing_sends {
                return Err(ClientError::NotConnected);
            }
            self.events.lock().push(Event::Send(frame));
            Ok(())
        }

        async fn close(&self, reason: CloseReason, allow_reconnect: bool) -> Result<(), ClientError> {
            self.events.lock().push(Event::Close {
                reason,
                allow_reconnect,
            });
            *self.inbound.lock() = None;
            Ok(())
        }
    }

    fn config(beat: Duration) -> ClientConfig {
        ClientConfig {
            beat_interval: beat,
            ..ClientConfig::default()
        }
    }

    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn last_detach_closes_without_reconnect() {
        let transport = MockTransport::selecting("beacon-v1.2-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(3)), transport.clone())
            .spawn();

        let a = handle.attach("Events:a").await.unwrap();
        let b = handle.attach("Events:b").await.unwrap();
        let c = handle.attach("Events:c").await.unwrap();
        assert_eq!(transport.opens(), 1);
        assert_eq!(transport.sent().len(), 3);
        assert_eq!(
            transport.sent()[0],
            r#"{"command":"subscribe","identifier":"Events:a"}"#
        );

        assert_eq!(handle.detach(&a).await.unwrap(), 2);
        assert_eq!(handle.detach(&b).await.unwrap(), 1);
        assert!(transport.closes().is_empty());
        assert!(handle.status().await.unwrap().connected);

        assert_eq!(handle.detach(&c).await.unwrap(), 0);
        assert_eq!(
            transport.closes(),
            vec![Event::Close {
                reason: CloseReason::Unsubscribed,
                allow_reconnect: false
            }]
        );
        let status = handle.status().await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.subscriptions, 0);

        let _d = handle.attach("Events:d").await.unwrap();
        assert_eq!(transport.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_subscribe_closes_connection() {
        let transport = Arc::new(MockTransport {
            selected: Some("beacon-v1.2-json".into()),
            failing_sends: true,
            ..MockTransport::default()
        });
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(3)), transport.clone())
            .spawn();

        assert_matches!(
            handle.attach("Events").await,
            Err(ClientError::NotConnected)
        );
        let status = handle.status().await.unwrap();
        assert_eq!(status.subscriptions, 0);
        assert!(!status.connected);
        assert_eq!(
            transport.closes(),
            vec![Event::Close {
                reason: CloseReason::Unsubscribed,
                allow_reconnect: false
            }]
        );

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.pings(), 0);
        assert_eq!(transport.closes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_offers_tags_in_preference_order() {
        let transport = MockTransport::selecting("beacon-v1.1-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(3)), transport.clone())
            .spawn();
        let _id = handle.attach("Events").await.unwrap();

        assert_eq!(
            transport.events()[0],
            Event::Open(vec![
                "beacon-v1.2-json".into(),
                "beacon-v1.1-json".into(),
                "beacon-v1-json".into(),
                "beacon-unsupported".into(),
            ])
        );
        let status = handle.status().await.unwrap();
        assert_eq!(status.protocol.unwrap().strategy, StrategyKind::Pong);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_subscription_is_an_error() {
        let transport = MockTransport::selecting("beacon-v1.2-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(3)), transport).spawn();
        assert_matches!(
            handle.detach(&SubscriptionId::new()).await,
            Err(ClientError::UnknownSubscription(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn background_pauses_and_foreground_resumes() {
        let transport = MockTransport::selecting("beacon-v1.2-json");
        let (visibility, signal) = visibility_channel();
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(1)), transport.clone())
            .with_visibility(signal)
            .spawn();
        let _id = handle.attach("Events").await.unwrap();

        visibility.send(Visibility::Background).unwrap();
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.pings(), 0);
        assert!(transport.closes().is_empty());
        let status = handle.status().await.unwrap();
        assert!(status.connected);
        assert_eq!(status.visibility, Visibility::Background);

        visibility.send(Visibility::Foreground).unwrap();
        settle().await;
        assert_eq!(transport.pings(), 1);
        assert_eq!(transport.opens(), 1);
        assert!(transport.closes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_closed_with_timeout() {
        let transport = MockTransport::selecting("beacon-v1.1-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(1)), transport.clone())
            .spawn();
        let _id = handle.attach("Events").await.unwrap();

        time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(transport.pings(), 2);
        assert_eq!(
            transport.closes(),
            vec![Event::Close {
                reason: CloseReason::HeartbeatTimeout,
                allow_reconnect: true
            }]
        );
        let status = handle.status().await.unwrap();
        assert!(!status.connected);
        assert_eq!(status.subscriptions, 1);

        handle.reconnect().await.unwrap();
        assert_eq!(transport.opens(), 2);
        assert_eq!(
            transport.sent().last().unwrap(),
            r#"{"command":"subscribe","identifier":"Events"}"#
        );
    }

    #[tokio::test(start_paused = true)]
    async fn server_ping_answered_and_traffic_keeps_alive() {
        let transport = MockTransport::selecting("beacon-v1.2-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(1)), transport.clone())
            .spawn();
        let _id = handle.attach("Events").await.unwrap();

        for _ in 0..5 {
            transport
                .push(r#"{"type":"ping","message":1700000000.5}"#)
                .await;
            time::sleep(Duration::from_millis(900)).await;
        }
        assert!(transport.closes().is_empty());
        let pongs = transport
            .sent()
            .iter()
            .filter(|t| *t == r#"{"type":"pong","message":1700000000.5}"#)
            .count();
        assert_eq!(pongs, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_latency_reaches_telemetry() {
        let transport = MockTransport::selecting("beacon-v1.2-json");
        let telemetry = Arc::new(MemoryTelemetry::new());
        let clock = Arc::new(ManualClock::new(1000.0));
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(1)), transport.clone())
            .with_telemetry(telemetry.clone())
            .with_clock(clock.clone())
            .spawn();
        let _id = handle.attach("Events").await.unwrap();

        time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(transport.pings(), 1);

        clock.set(1000.05);
        transport.push(r#"{"type":"pong","message":1000.0}"#).await;
        settle().await;
        let samples = telemetry.samples();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].value - 0.05).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_selection_ignores_frames() {
        let transport = MockTransport::selecting("proto-v9-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(1)), transport.clone())
            .spawn();
        let _id = handle.attach("Events").await.unwrap();

        transport.push(r#"{"type":"ping","message":1}"#).await;
        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.sent().len(), 1);
        assert!(transport.closes().is_empty());
        assert_eq!(handle.status().await.unwrap().protocol, None);
    }

    #[tokio::test(start_paused = true)]
    async fn application_frames_are_broadcast() {
        let transport = MockTransport::selecting("beacon-v1.2-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(3)), transport.clone())
            .spawn();
        let mut frames = handle.frames();
        let _id = handle.attach("Events").await.unwrap();

        transport.push(r#"{"type":"welcome"}"#).await;
        assert_eq!(frames.recv().await.unwrap(), r#"{"type":"welcome"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_and_stops() {
        let transport = MockTransport::selecting("beacon-v1.2-json");
        let handle = SubscriptionMultiplexer::new(config(Duration::from_secs(3)), transport.clone())
            .spawn();
        let _id = handle.attach("Events").await.unwrap();

        handle.shutdown().await;
        assert_eq!(transport.closes().len(), 1);
        assert_matches!(handle.status().await, Err(ClientError::Stopped));
    }
}
