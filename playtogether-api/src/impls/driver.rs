//! Session driver
//!
//! One task owns the [`SessionCore`], the quality controller and the table of
//! connected endpoints. It multiplexes socket events with the health-probe and
//! quality ticks, so no core state is ever shared between tasks. Sockets talk
//! to it through a [`SessionHandle`].

use chrono::Utc;
use parking_lot::RwLock;
use playtogether_core::config::Config;
use playtogether_core::metrics::{CONNECTED_ENDPOINTS, DROPPED_MESSAGES};
use playtogether_core::models::{AggregateStats, ApprovalState, PeerId, ProfileSelection, StatsRecord};
use playtogether_core::protocol::{ClientMessage, ServerMessage};
use playtogether_core::service::{
    EndpointRole, Envelope, InputBridge, Outbox, Recipient, SessionCore, SessionSnapshot,
};
use playtogether_quality::{
    ControllerConfig, QualityController, StatsAggregator, StatsReader, TickReport,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::RelayedEngine;

/// What a socket task reports to the driver.
#[derive(Debug)]
pub enum DriverEvent {
    Connected {
        peer_id: PeerId,
        role: EndpointRole,
        sender: mpsc::Sender<ServerMessage>,
    },
    Frame {
        peer_id: PeerId,
        message: ClientMessage,
    },
    Disconnected {
        peer_id: PeerId,
    },
}

/// Read-only view published for the dashboard endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub session: SessionSnapshot,
    pub stats: AggregateStats,
    pub connected_endpoints: usize,
}

/// Cloneable handle the transport uses to reach the driver.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<DriverEvent>,
    dashboard: Arc<RwLock<DashboardView>>,
}

impl SessionHandle {
    /// Returns `false` once the driver has stopped.
    pub fn send(&self, event: DriverEvent) -> bool {
        self.events.send(event).is_ok()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    #[must_use]
    pub fn dashboard(&self) -> DashboardView {
        self.dashboard.read().clone()
    }
}

struct Endpoint {
    role: EndpointRole,
    sender: mpsc::Sender<ServerMessage>,
}

pub struct SessionDriver {
    core: SessionCore,
    quality: QualityController,
    aggregator: StatsAggregator,
    engine: RelayedEngine,
    endpoints: HashMap<PeerId, Endpoint>,
    events: mpsc::UnboundedReceiver<DriverEvent>,
    commands: mpsc::UnboundedReceiver<Envelope>,
    dashboard: Arc<RwLock<DashboardView>>,
    probe_interval: Duration,
}

impl SessionDriver {
    #[must_use]
    pub fn new(config: &Config, bridge: Arc<dyn InputBridge>) -> (Self, SessionHandle) {
        let quality = QualityController::new(ControllerConfig::from(&config.quality));
        let core = SessionCore::new(&config.relay, bridge).with_initial_encoding(quality.initial_encoding());
        let (engine, commands) = RelayedEngine::new(quality.config().max_report_age);
        let (events_tx, events) = mpsc::unbounded_channel();
        let dashboard = Arc::new(RwLock::new(DashboardView::default()));

        let driver = Self {
            core,
            quality,
            aggregator: StatsAggregator::new(),
            engine,
            endpoints: HashMap::new(),
            events,
            commands,
            dashboard: dashboard.clone(),
            probe_interval: Duration::from_millis(config.health.probe_interval_ms),
        };
        let handle = SessionHandle {
            events: events_tx,
            dashboard,
        };
        (driver, handle)
    }

    /// Run until shutdown is signalled or every handle is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut probes = interval_at(Instant::now() + self.probe_interval, self.probe_interval);
        probes.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let tick = self.quality.config().tick_interval;
        let mut quality = interval_at(Instant::now() + tick, tick);
        quality.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.update_gauge();

        info!(
            probe_interval_ms = self.probe_interval.as_millis(),
            tick_interval_ms = tick.as_millis(),
            "Session driver started"
        );

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    self.on_event(event).await;
                }
                Some(envelope) = self.commands.recv() => {
                    self.deliver(Outbox::from(envelope));
                }
                _ = probes.tick() => {
                    let outbox = self.core.probe(Utc::now());
                    self.deliver(outbox);
                }
                _ = quality.tick() => {
                    self.quality_tick().await;
                }
                _ = shutdown.changed() => {
                    info!("Session driver shutting down");
                    break;
                }
            }
            self.publish_dashboard();
        }

        CONNECTED_ENDPOINTS.set(0);
        info!("Session driver stopped");
    }

    async fn on_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Connected { peer_id, role, sender } => {
                info!(peer_id = %peer_id, ?role, "Endpoint connected");
                self.endpoints.insert(peer_id.clone(), Endpoint { role, sender });
                self.update_gauge();
                let outbox = self.core.connect(&peer_id);
                self.deliver(outbox);
            }
            DriverEvent::Frame { peer_id, message } => {
                let Some(role) = self.endpoints.get(&peer_id).map(|e| e.role) else {
                    debug!(peer_id = %peer_id, "Frame from unknown endpoint");
                    return;
                };
                self.on_frame(peer_id, role, message).await;
            }
            DriverEvent::Disconnected { peer_id } => {
                if self.endpoints.remove(&peer_id).is_none() {
                    return;
                }
                info!(peer_id = %peer_id, "Endpoint disconnected");
                self.update_gauge();
                if self.core.registry().is_broadcaster(&peer_id) {
                    self.engine.clear();
                } else {
                    self.engine.forget(&peer_id);
                }
                let outbox = self.core.disconnect(&peer_id);
                self.deliver(outbox);
            }
        }
    }

    async fn on_frame(&mut self, from: PeerId, role: EndpointRole, message: ClientMessage) {
        match message {
            ClientMessage::QualitySelect { peer_id, profile_id } => {
                self.select_quality(&from, peer_id, profile_id).await;
            }
            ClientMessage::StatsReport { peer_id, reports } => self.ingest_stats(&from, peer_id, reports),
            ClientMessage::DisconnectPeer { peer_id } => {
                let outbox = self.core.handle(
                    &from,
                    role,
                    ClientMessage::DisconnectPeer {
                        peer_id: peer_id.clone(),
                    },
                    Utc::now(),
                );
                // Purged by the core; the socket may stay open, its reports may not.
                if self.core.registry().get(&peer_id).is_none() {
                    self.engine.forget(&peer_id);
                }
                self.deliver(outbox);
            }
            message => {
                let outbox = self.core.handle(&from, role, message, Utc::now());
                self.deliver(outbox);
            }
        }
    }

    async fn select_quality(&mut self, from: &PeerId, target: PeerId, profile_id: String) {
        if *from != target && !self.core.registry().is_broadcaster(from) {
            self.reject(from, "peers may only select their own quality");
            return;
        }
        let selection: ProfileSelection = match profile_id.parse() {
            Ok(selection) => selection,
            Err(e) => {
                self.reject(from, &e.to_string());
                return;
            }
        };

        let result = self
            .quality
            .select_profile(self.core.registry_mut(), &target, selection, &self.engine)
            .await;
        match result {
            Ok(()) => {
                let mut outbox = Outbox::new();
                let changed = ServerMessage::QualityChanged {
                    peer_id: target.clone(),
                    profile_id,
                };
                if !self.core.registry().is_broadcaster(from) {
                    outbox.to_broadcaster(changed.clone());
                }
                outbox.to_peer(from, changed);
                self.deliver(outbox);
            }
            Err(e) => {
                warn!(peer_id = %target, error = %e, "Quality selection failed");
                self.reject(from, &e.to_string());
            }
        }
    }

    fn ingest_stats(&mut self, from: &PeerId, peer_id: PeerId, reports: Vec<StatsRecord>) {
        if !self.core.registry().is_broadcaster(from) {
            self.reject(from, "only the broadcaster reports statistics");
            return;
        }
        if self.core.registry().get(&peer_id).is_none() {
            debug!(peer_id = %peer_id, "Statistics for unknown peer ignored");
            return;
        }
        self.engine.ingest(peer_id, reports);
    }

    /// Read every active peer, refresh the dashboard counters and step the controller.
    async fn quality_tick(&mut self) {
        let active = self
            .core
            .registry()
            .peer_ids_where(|record| record.approval == ApprovalState::Active);

        let mut reads = Vec::with_capacity(active.len());
        for peer_id in active {
            let read = self.engine.read_stats(&peer_id).await;
            reads.push((peer_id, read));
        }

        let active_since = self.core.registry().broadcaster().map(|b| b.active_since);
        let stats = self.aggregator.aggregate(&reads, active_since, Utc::now());
        let samples = StatsAggregator::samples(&reads);

        let report = self
            .quality
            .tick(self.core.registry_mut(), &samples, &self.engine)
            .await;
        if report != TickReport::default() {
            debug!(?report, "Quality tick");
        }

        if self.core.registry().broadcaster_id().is_some() {
            let mut outbox = Outbox::new();
            outbox.to_broadcaster(ServerMessage::StatsSummary(stats));
            self.deliver(outbox);
        }
    }

    fn reject(&self, to: &PeerId, message: &str) {
        DROPPED_MESSAGES.with_label_values(&["rejected"]).inc();
        self.send_to(to, ServerMessage::error(message));
    }

    fn deliver(&self, outbox: Outbox) {
        for Envelope { to, message } in outbox {
            match to {
                Recipient::Peer(peer_id) => self.send_to(&peer_id, message),
                Recipient::Broadcaster => match self.core.registry().broadcaster_id() {
                    Some(broadcaster) => self.send_to(broadcaster, message),
                    None => {
                        debug!(kind = message.kind(), "No broadcaster to deliver to");
                        DROPPED_MESSAGES.with_label_values(&["no_broadcaster"]).inc();
                    }
                },
                Recipient::All => {
                    for peer_id in self.endpoints.keys() {
                        self.send_to(peer_id, message.clone());
                    }
                }
                Recipient::AllExcept(excluded) => {
                    for peer_id in self.endpoints.keys().filter(|id| **id != excluded) {
                        self.send_to(peer_id, message.clone());
                    }
                }
            }
        }
    }

    fn send_to(&self, peer_id: &PeerId, message: ServerMessage) {
        let Some(endpoint) = self.endpoints.get(peer_id) else {
            debug!(peer_id = %peer_id, "Recipient not connected");
            DROPPED_MESSAGES.with_label_values(&["not_connected"]).inc();
            return;
        };
        // Slow consumers lose frames rather than stall the loop.
        if let Err(e) = endpoint.sender.try_send(message) {
            warn!(peer_id = %peer_id, error = %e, "Outbound frame dropped");
            DROPPED_MESSAGES.with_label_values(&["slow_consumer"]).inc();
        }
    }

    fn update_gauge(&self) {
        CONNECTED_ENDPOINTS.set(i64::try_from(self.endpoints.len()).unwrap_or(i64::MAX));
    }

    fn publish_dashboard(&self) {
        let view = DashboardView {
            session: self.core.registry().snapshot(),
            stats: self.aggregator.latest(),
            connected_endpoints: self.endpoints.len(),
        };
        *self.dashboard.write() = view;
    }
}

/// Start a driver on the current runtime.
pub fn spawn(
    config: &Config,
    bridge: Arc<dyn InputBridge>,
    shutdown: watch::Receiver<bool>,
) -> (SessionHandle, JoinHandle<()>) {
    let (driver, handle) = SessionDriver::new(config, bridge);
    let task = tokio::spawn(driver.run(shutdown));
    (handle, task)
}
