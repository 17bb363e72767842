//! Broker session and background transport worker
//!
//! [`MqttHandler`] lives on the UI side. It owns the immutable connection
//! options, starts at most one [`TransportWorker`] thread at a time and drains
//! the events that thread produces.
//!
//! # Threading
//!
//! ```text
//!  UI task                               mqtt-transport thread
//!  ───────                               ─────────────────────
//!  connect() ── spawn ─────────────────► TransportWorker<Running>::run()
//!                                          │ connection.iter() (blocking)
//!  poll_event() ◄── LinkEvent (FIFO) ──────┤ transitions, inbound messages
//!  publish_confirmed() ◄─ DeliveryReport ──┤ PubAck / connection lost
//!  disconnect() ── shutdown flag + cancel ►│ ends backoff wait, exits
//! ```
//!
//! The worker owns the [`ReconnectPolicy`]; the handler only mirrors the last
//! state it has drained, so UI code never reads state written by another
//! thread except through the event channel.

use super::config::{ConnectionConfig, TlsMode};
use super::error::{FailureCause, MqttError, PublishError};
use super::message_manager::MQTTMessage;
use super::publisher::CommandTransport;
use super::reconnect::{DisconnectReason, LinkState, ReconnectPolicy, Transition};
use rumqttc::tokio_rustls::rustls::{
    self,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    pki_types::{CertificateDer, ServerName, UnixTime},
    DigitallySignedStruct, SignatureScheme,
};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, Outgoing, Packet, QoS,
    TlsConfiguration, Transport,
};
use statum::{machine, state};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

const REQUEST_CAPACITY: usize = 64;

/// Everything the worker hands to the UI side
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Transition(Transition),
    Message(MQTTMessage),
}

/// Delivery outcome for the publish currently waiting on the UI side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReport {
    Acked(u16),
    Lost,
}

pub struct MqttHandler {
    config: ConnectionConfig,
    options: MqttOptions,
    client: Option<Client>,
    worker: Option<JoinHandle<()>>,
    cancel: Option<std_mpsc::Sender<()>>,
    shutdown: Arc<AtomicBool>,
    deliveries: Option<std_mpsc::Receiver<DeliveryReport>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    link_state: LinkState,
}

impl MqttHandler {
    /// Validates the configuration and prepares session options. No network I/O.
    pub fn initialize(config: ConnectionConfig) -> Result<Self, MqttError> {
        config.validate()?;
        let options = build_options(&config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            "MQTT session prepared for {} as {} (tls: {:?})",
            config.broker_addr(),
            config.client_id,
            config.tls
        );

        Ok(Self {
            config,
            options,
            client: None,
            worker: None,
            cancel: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            deliveries: None,
            events_tx,
            events_rx,
            link_state: LinkState::Idle,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn is_worker_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Starts the transport worker. A second start while a worker thread is
    /// still alive is rejected, not queued.
    pub fn connect(&mut self) -> Result<(), MqttError> {
        if self.is_worker_alive() {
            warn!("Start request ignored: a connection attempt is already running");
            return Err(MqttError::AlreadyConnecting);
        }
        if let Some(finished) = self.worker.take() {
            if finished.join().is_err() {
                error!("Previous transport worker panicked");
            }
        }

        let (client, connection) = Client::new(self.options.clone(), REQUEST_CAPACITY);
        let (cancel_tx, cancel_rx) = std_mpsc::channel();
        let (delivery_tx, delivery_rx) = std_mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let policy = ReconnectPolicy::new(self.config.max_attempts, self.config.backoff);

        let worker = TransportWorker::create(
            client.clone(),
            connection,
            vec![
                self.config.topics.sensor.clone(),
                self.config.topics.threshold_response.clone(),
            ],
            policy,
            self.events_tx.clone(),
            delivery_tx,
            cancel_rx,
            shutdown.clone(),
        )
        .start()?;

        let handle = std::thread::Builder::new()
            .name("mqtt-transport".to_string())
            .spawn(move || worker.run())
            .map_err(|e| MqttError::Worker(e.to_string()))?;

        info!("Transport worker spawned for {}", self.config.broker_addr());
        self.client = Some(client);
        self.worker = Some(handle);
        self.cancel = Some(cancel_tx);
        self.shutdown = shutdown;
        self.deliveries = Some(delivery_rx);
        Ok(())
    }

    /// Clean shutdown. Safe to call repeatedly or without a running worker;
    /// a pending retry timer never fires afterwards.
    pub fn disconnect(&mut self) {
        if !self.is_worker_alive() {
            debug!("Disconnect requested without an active transport worker");
            return;
        }
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("Disconnect already requested");
            return;
        }

        info!("Disconnecting from {}", self.config.broker_addr());
        if let Some(cancel) = &self.cancel {
            // receiver gone means the worker already left its backoff wait
            let _ = cancel.send(());
        }
        if let Some(client) = &self.client {
            if let Err(e) = client.try_disconnect() {
                debug!("Disconnect request not queued: {}", e);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn inject(&self, event: LinkEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Next marshalled worker event, if any. Updates the mirrored link state.
    pub fn poll_event(&mut self) -> Option<LinkEvent> {
        let event = self.events_rx.try_recv().ok()?;
        if let LinkEvent::Transition(t) = &event {
            self.link_state = t.to;
        }
        Some(event)
    }
}

impl CommandTransport for MqttHandler {
    fn is_connected(&self) -> bool {
        self.link_state == LinkState::Connected
    }

    fn publish_confirmed(
        &self,
        topic: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<(), PublishError> {
        let (Some(client), Some(deliveries)) = (&self.client, &self.deliveries) else {
            return Err(PublishError::NotInitialized);
        };

        // reports left over from an earlier timed-out publish or a drop
        while deliveries.try_recv().is_ok() {}

        client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| PublishError::Rejected(e.to_string()))?;

        // bounded wait on the caller's thread; the UI tick resumes afterwards
        match deliveries.recv_timeout(timeout) {
            Ok(DeliveryReport::Acked(pkid)) => {
                debug!("Publish to {} acknowledged (pkid {})", topic, pkid);
                Ok(())
            }
            Ok(DeliveryReport::Lost) | Err(RecvTimeoutError::Disconnected) => {
                Err(PublishError::ConnectionLost)
            }
            Err(RecvTimeoutError::Timeout) => Err(PublishError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

impl Drop for MqttHandler {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn build_options(config: &ConnectionConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.trim(), config.port);
    options
        .set_keep_alive(config.keep_alive)
        .set_clean_session(true);
    if !config.username.is_empty() {
        options.set_credentials(config.username.clone(), config.password.clone());
    }

    let transport = match config.tls {
        TlsMode::Verify => Transport::tls_with_default_config(),
        TlsMode::SkipVerify => {
            warn!(
                "TLS certificate and hostname verification DISABLED for {}; lab use only",
                config.broker_addr()
            );
            Transport::tls_with_config(insecure_tls_config())
        }
    };
    options.set_transport(transport);
    options
}

fn insecure_tls_config() -> TlsConfiguration {
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    TlsConfiguration::Rustls(Arc::new(config))
}

/// Accepts every certificate and hostname. Only reachable through `TlsMode::SkipVerify`.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Configured,
    Running,
}

/// Drives the blocking rumqttc event loop on its own thread
#[machine]
pub struct TransportWorker<S: WorkerState> {
    client: Client,
    connection: Connection,
    subscriptions: Vec<String>,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<LinkEvent>,
    deliveries: std_mpsc::Sender<DeliveryReport>,
    cancel: std_mpsc::Receiver<()>,
    shutdown: Arc<AtomicBool>,
}

impl<S: WorkerState> TransportWorker<S> {
    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Link event dropped: UI side is gone");
        }
    }

    // the UI side writes the user-facing line when it drains the event
    fn emit_transition(&self, transition: Transition) {
        debug!("Worker: {}", transition);
        self.emit(LinkEvent::Transition(transition));
    }
}

impl TransportWorker<Configured> {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        client: Client,
        connection: Connection,
        subscriptions: Vec<String>,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<LinkEvent>,
        deliveries: std_mpsc::Sender<DeliveryReport>,
        cancel: std_mpsc::Receiver<()>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self::new(
            client,
            connection,
            subscriptions,
            policy,
            events,
            deliveries,
            cancel,
            shutdown,
        )
    }

    /// Moves the policy from `Idle` to `Connecting`
    pub fn start(mut self) -> Result<TransportWorker<Running>, MqttError> {
        let transition = self.policy.start()?;
        self.emit_transition(transition);
        Ok(self.transition())
    }
}

impl TransportWorker<Running> {
    pub fn run(mut self) {
        info!("Transport worker running");

        loop {
            let Some(notification) = self.connection.iter().next() else {
                debug!("Request channel closed");
                self.finish_clean();
                break;
            };

            if self.shutdown.load(Ordering::SeqCst) {
                self.finish_clean();
                break;
            }

            let keep_going = match notification {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => self.on_connack(ack.code),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.emit(LinkEvent::Message(MQTTMessage::from_topic(
                        publish.topic,
                        publish.payload.to_vec(),
                    )));
                    true
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    let _ = self.deliveries.send(DeliveryReport::Acked(ack.pkid));
                    true
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.finish_clean();
                    false
                }
                Ok(other) => {
                    trace!("MQTT event: {:?}", other);
                    true
                }
                Err(e) => {
                    let (cause, code) = FailureCause::classify(&e);
                    debug!("Transport error: {}", e);
                    self.on_failure(cause, code)
                }
            };

            if !keep_going {
                break;
            }
        }

        info!("Transport worker stopped in state {}", self.policy.state());
    }

    fn on_connack(&mut self, code: ConnectReturnCode) -> bool {
        if code != ConnectReturnCode::Success {
            let (cause, code) = FailureCause::from_return_code(code);
            return self.on_failure(cause, code);
        }

        for topic in &self.subscriptions {
            match self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => warn!("Subscription to {} not queued: {}", topic, e),
            }
        }
        let transition = self.policy.on_connected();
        self.emit_transition(transition);
        true
    }

    /// Returns whether the event loop should be polled again
    fn on_failure(&mut self, cause: FailureCause, code: Option<u8>) -> bool {
        let _ = self.deliveries.send(DeliveryReport::Lost);

        if self.shutdown.load(Ordering::SeqCst) {
            self.finish_clean();
            return false;
        }

        let transition = if self.policy.is_connected() {
            self.policy.on_disconnected(DisconnectReason::Abnormal(cause))
        } else {
            self.policy.on_connect_failed(cause, code)
        };
        let next = transition.to;
        self.emit_transition(transition);

        match next {
            LinkState::RetryWait => self.wait_backoff(),
            _ => false,
        }
    }

    fn wait_backoff(&mut self) -> bool {
        match self.cancel.recv_timeout(self.policy.backoff()) {
            Err(RecvTimeoutError::Timeout) => match self.policy.on_backoff_elapsed() {
                Some(transition) => {
                    self.emit_transition(transition);
                    true
                }
                None => false,
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Pending retry cancelled");
                self.finish_clean();
                false
            }
        }
    }

    fn finish_clean(&mut self) {
        let transition = if self.policy.is_connected() {
            self.policy.mark_shutdown();
            Some(self.policy.on_disconnected(DisconnectReason::Clean))
        } else {
            self.policy.request_shutdown()
        };
        if let Some(transition) = transition {
            self.emit_transition(transition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::config::test_config;
    use std::time::Instant;

    fn drain_until_idle(handler: &mut MqttHandler, within: Duration) -> Vec<Transition> {
        let deadline = Instant::now() + within;
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            while let Some(event) = handler.poll_event() {
                if let LinkEvent::Transition(t) = event {
                    seen.push(t);
                }
            }
            if seen.last().is_some_and(|t| t.to == LinkState::Idle) && !handler.is_worker_alive()
            {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        seen
    }

    struct WorkerRig {
        worker: TransportWorker<Running>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        deliveries: std_mpsc::Receiver<DeliveryReport>,
        cancel: std_mpsc::Sender<()>,
    }

    impl WorkerRig {
        /// A running worker whose event loop is never polled, so no network I/O happens
        fn new(max_attempts: u32, backoff: Duration) -> Self {
            let options = MqttOptions::new("aquamon-worker-test", "127.0.0.1", 1);
            let (client, connection) = Client::new(options, REQUEST_CAPACITY);
            let (events_tx, events) = mpsc::unbounded_channel();
            let (delivery_tx, deliveries) = std_mpsc::channel();
            let (cancel, cancel_rx) = std_mpsc::channel();

            let worker = TransportWorker::create(
                client,
                connection,
                vec!["esp32/sensor".to_string()],
                ReconnectPolicy::new(max_attempts, backoff),
                events_tx,
                delivery_tx,
                cancel_rx,
                Arc::new(AtomicBool::new(false)),
            )
            .start()
            .unwrap();

            Self {
                worker,
                events,
                deliveries,
                cancel,
            }
        }

        fn transitions(&mut self) -> Vec<Transition> {
            let mut seen = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                if let LinkEvent::Transition(t) = event {
                    seen.push(t);
                }
            }
            seen
        }
    }

    #[test]
    fn clean_stop_of_a_live_session_reports_connected_to_idle() {
        let mut rig = WorkerRig::new(3, Duration::from_secs(5));
        assert!(rig.worker.on_connack(ConnectReturnCode::Success));
        assert_eq!(
            rig.transitions().last().map(|t| t.to),
            Some(LinkState::Connected)
        );

        rig.worker.shutdown.store(true, Ordering::SeqCst);
        rig.worker.finish_clean();

        let seen = rig.transitions();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from, LinkState::Connected);
        assert_eq!(seen[0].to, LinkState::Idle);
        assert_eq!(seen[0].code, Some(0));
        assert!(!seen[0].is_failure());
        assert_eq!(rig.worker.policy.state(), LinkState::Idle);
    }

    #[test]
    fn drop_while_shutting_down_does_not_retry() {
        let mut rig = WorkerRig::new(3, Duration::from_millis(20));
        rig.worker.on_connack(ConnectReturnCode::Success);
        rig.transitions();

        rig.worker.shutdown.store(true, Ordering::SeqCst);
        assert!(!rig.worker.on_failure(FailureCause::NetworkError, None));

        let seen = rig.transitions();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from, LinkState::Connected);
        assert_eq!(seen[0].to, LinkState::Idle);
        assert_eq!(rig.deliveries.try_recv(), Ok(DeliveryReport::Lost));
    }

    #[test]
    fn drop_after_success_gets_the_full_budget() {
        let mut rig = WorkerRig::new(1, Duration::from_millis(20));
        // a refused handshake with one attempt allowed is terminal
        assert!(!rig.worker.on_connack(ConnectReturnCode::NotAuthorized));
        assert_eq!(
            rig.transitions().last().map(|t| t.to),
            Some(LinkState::FailedPermanent)
        );

        let mut rig = WorkerRig::new(1, Duration::from_millis(20));
        rig.worker.on_connack(ConnectReturnCode::Success);
        rig.transitions();

        // drop: waits out the backoff and reconnects instead of giving up
        assert!(rig.worker.on_failure(FailureCause::NetworkError, None));
        let seen = rig.transitions();
        let path: Vec<_> = seen.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (LinkState::Connected, LinkState::RetryWait),
                (LinkState::RetryWait, LinkState::Connecting),
            ]
        );
        assert_eq!(seen[0].code, Some(7));

        // the reconnect attempt is the one unit of budget
        assert!(!rig.worker.on_failure(FailureCause::ConnectionRefused, None));
        assert_eq!(
            rig.transitions().last().map(|t| t.to),
            Some(LinkState::FailedPermanent)
        );
    }

    #[test]
    fn cancel_during_backoff_ends_idle() {
        let mut rig = WorkerRig::new(3, Duration::from_secs(30));
        rig.worker.on_connack(ConnectReturnCode::Success);
        rig.transitions();

        rig.cancel.send(()).unwrap();
        assert!(!rig.worker.on_failure(FailureCause::NetworkTimeout, None));

        let path: Vec<_> = rig.transitions().iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (LinkState::Connected, LinkState::RetryWait),
                (LinkState::RetryWait, LinkState::Idle),
            ]
        );
    }

    #[test]
    fn initialize_rejects_bad_config() {
        let mut cfg = test_config();
        cfg.host = String::new();
        assert!(matches!(
            MqttHandler::initialize(cfg),
            Err(MqttError::Configuration(_))
        ));
    }

    #[test]
    fn disconnect_without_worker_is_a_noop() {
        let mut handler = MqttHandler::initialize(test_config()).unwrap();
        handler.disconnect();
        handler.disconnect();
        assert!(handler.poll_event().is_none());
        assert_eq!(handler.link_state(), LinkState::Idle);
    }

    #[test]
    fn publish_before_connect_is_not_initialized() {
        let handler = MqttHandler::initialize(test_config()).unwrap();
        assert!(!handler.is_connected());
        assert_eq!(
            handler.publish_confirmed("esp32/switch", b"yes", Duration::from_millis(10)),
            Err(PublishError::NotInitialized)
        );
    }

    #[test]
    fn second_start_is_rejected_and_disconnect_is_idempotent() {
        // nothing listens on port 1, so the worker fails and parks in its 5s backoff
        let mut handler = MqttHandler::initialize(test_config()).unwrap();
        handler.connect().unwrap();
        assert!(matches!(handler.connect(), Err(MqttError::AlreadyConnecting)));

        handler.disconnect();
        handler.disconnect();

        let seen = drain_until_idle(&mut handler, Duration::from_secs(15));
        assert_eq!(seen.first().map(|t| t.to), Some(LinkState::Connecting));
        assert_eq!(seen.last().map(|t| t.to), Some(LinkState::Idle));
        assert_eq!(handler.link_state(), LinkState::Idle);

        // nothing more after the clean stop
        std::thread::sleep(Duration::from_millis(100));
        assert!(handler.poll_event().is_none());
        assert!(!handler.is_worker_alive());
    }
}
