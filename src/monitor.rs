//! UI-side hub for the water-quality link
//!
//! Owns everything the presentation layer reads: the log ring, the latest
//! merged reading, the reading history and the observer registry. It is
//! driven from the UI task only; [`WaterMonitor::tick`] drains the transport
//! events in arrival order and applies them one by one.

use crate::history::{RecordStore, SensorHistory, SensorRecord};
use crate::mqtt::config::{ConnectionConfig, Topics};
use crate::mqtt::error::MqttError;
use crate::mqtt::event_log::{EventLog, LogLevel, LogSink};
use crate::mqtt::message_manager::{MQTTMessage, SensorReading, SwitchCommand, ThresholdCommand};
use crate::mqtt::mqtt_handler::{LinkEvent, MqttHandler};
use crate::mqtt::publisher::{CommandPublisher, CommandTransport};
use crate::mqtt::reconnect::{LinkState, Transition};
use crate::mqtt::router::MessageRouter;
use crate::observers::{Observer, ObserverRegistry, SubscriptionHandle};
use tracing::debug;

/// Appends to the ring and fans the entry out to log observers
struct LogTap<'a> {
    log: &'a mut EventLog,
    observers: &'a mut ObserverRegistry,
}

impl LogSink for LogTap<'_> {
    fn append(&mut self, level: LogLevel, text: String) {
        let entry = self.log.push(level, text);
        self.observers.dispatch_log(entry);
    }
}

pub struct WaterMonitor {
    handler: Option<MqttHandler>,
    topics: Topics,
    router: MessageRouter,
    publisher: CommandPublisher,
    log: EventLog,
    observers: ObserverRegistry,
    latest: SensorReading,
    history: SensorHistory,
    store: Box<dyn RecordStore>,
}

impl WaterMonitor {
    /// A configuration error is logged once and leaves the monitor without a
    /// transport; the process keeps running.
    pub fn new(config: ConnectionConfig, log_capacity: usize, store: Box<dyn RecordStore>) -> Self {
        let topics = config.topics.clone();
        let router = MessageRouter::new(topics.sensor.clone());
        let publisher = CommandPublisher::new(config.ack_timeout);
        let mut log = EventLog::with_capacity(log_capacity);

        let handler = match MqttHandler::initialize(config) {
            Ok(handler) => Some(handler),
            Err(e) => {
                log.error(format!("MQTT initialization failed: {}", e));
                None
            }
        };

        Self {
            handler,
            topics,
            router,
            publisher,
            log,
            observers: ObserverRegistry::default(),
            latest: SensorReading::default(),
            history: SensorHistory::default(),
            store,
        }
    }

    fn tap(&mut self) -> LogTap<'_> {
        LogTap {
            log: &mut self.log,
            observers: &mut self.observers,
        }
    }

    /// Starts the link in the background; never blocks on the network
    pub fn start(&mut self) -> bool {
        let Some(handler) = self.handler.as_mut() else {
            self.tap()
                .error("Cannot connect: MQTT client not initialized".to_string());
            return false;
        };
        match handler.connect() {
            Ok(()) => true,
            Err(MqttError::AlreadyConnecting) => {
                self.tap()
                    .warn("Connection attempt already in progress".to_string());
                false
            }
            Err(e) => {
                self.tap().error(format!("Cannot connect: {}", e));
                false
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(handler) = self.handler.as_mut() {
            handler.disconnect();
        }
    }

    /// Applies all pending transport events in arrival order
    pub fn tick(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.handler.as_mut().and_then(|h| h.poll_event()) {
            handled += 1;
            match event {
                LinkEvent::Transition(transition) => self.on_transition(transition),
                LinkEvent::Message(message) => self.on_message(message),
            }
        }
        if handled > 0 {
            debug!("Applied {} link events", handled);
        }
        handled
    }

    fn on_transition(&mut self, transition: Transition) {
        let level = if transition.is_failure() {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        self.tap().append(level, transition.to_string());
        if transition.to == LinkState::Connected {
            self.tap()
                .info("MQTT connected, receiving sensor data".to_string());
        }
        self.observers.dispatch_state(&transition);
    }

    fn on_message(&mut self, message: MQTTMessage) {
        let mut tap = LogTap {
            log: &mut self.log,
            observers: &mut self.observers,
        };
        let Some(reading) = self.router.route(&message, &mut tap) else {
            return;
        };

        if !reading.is_empty() {
            self.latest.merge(&reading);
            let record = SensorRecord::from_reading(&self.latest, message.timestamp);
            self.history.record(record);
            self.store.insert(record);
        }
        self.observers.dispatch_reading(&reading);
    }

    /// Publishes with delivery confirmation; `false` on any failure
    pub fn publish(&mut self, topic: &str, payload: &str) -> bool {
        let transport = self.handler.as_ref().map(|h| h as &dyn CommandTransport);
        let mut tap = LogTap {
            log: &mut self.log,
            observers: &mut self.observers,
        };
        self.publisher.publish(transport, topic, payload, &mut tap)
    }

    pub fn send_switch(&mut self, command: SwitchCommand) -> bool {
        let topic = self.topics.switch.clone();
        self.publish(&topic, command.payload())
    }

    pub fn send_thresholds(&mut self, max: &str, min: &str) -> bool {
        let payload = match ThresholdCommand::from_input(max, min).and_then(|c| c.to_payload()) {
            Ok(payload) => payload,
            Err(e) => {
                self.tap().error(format!("Invalid thresholds: {}", e));
                return false;
            }
        };

        let topic = self.topics.threshold.clone();
        if !self.publish(&topic, &payload) {
            return false;
        }
        self.tap().info(format!(
            "Thresholds sent: max {} | min {}",
            max.trim(),
            min.trim()
        ));
        true
    }

    pub fn subscribe(&mut self, observer: Observer) -> SubscriptionHandle {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        self.observers.unsubscribe(handle)
    }

    pub fn link_state(&self) -> LinkState {
        self.handler
            .as_ref()
            .map(|h| h.link_state())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.handler.as_ref().is_some_and(|h| h.is_connected())
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn latest(&self) -> &SensorReading {
        &self.latest
    }

    pub fn history(&self) -> &SensorHistory {
        &self.history
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn RecordStore {
        self.store.as_mut()
    }
}
