//! Presentation-side subscriptions
//!
//! Consumers register for one kind of update and get a handle back. All
//! dispatch happens on the UI task after the transport events are drained, so
//! consumers need not be `Send`.

use crate::mqtt::event_log::LogEntry;
use crate::mqtt::message_manager::SensorReading;
use crate::mqtt::reconnect::Transition;
use tracing::debug;

pub trait SensorConsumer {
    fn on_reading(&mut self, reading: &SensorReading);
}

pub trait LogConsumer {
    fn on_log(&mut self, entry: &LogEntry);
}

pub trait StateConsumer {
    fn on_state(&mut self, transition: &Transition);
}

impl<F: FnMut(&SensorReading)> SensorConsumer for F {
    fn on_reading(&mut self, reading: &SensorReading) {
        self(reading)
    }
}

impl<F: FnMut(&LogEntry)> LogConsumer for F {
    fn on_log(&mut self, entry: &LogEntry) {
        self(entry)
    }
}

impl<F: FnMut(&Transition)> StateConsumer for F {
    fn on_state(&mut self, transition: &Transition) {
        self(transition)
    }
}

pub enum Observer {
    Sensor(Box<dyn SensorConsumer>),
    Log(Box<dyn LogConsumer>),
    State(Box<dyn StateConsumer>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

#[derive(Default)]
pub struct ObserverRegistry {
    next_id: u64,
    observers: Vec<(SubscriptionHandle, Observer)>,
}

impl ObserverRegistry {
    pub fn subscribe(&mut self, observer: Observer) -> SubscriptionHandle {
        self.next_id += 1;
        let handle = SubscriptionHandle(self.next_id);
        self.observers.push((handle, observer));
        debug!("Observer {:?} registered", handle);
        handle
    }

    /// Returns false for unknown or already removed handles
    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(h, _)| *h != handle);
        before != self.observers.len()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn dispatch_reading(&mut self, reading: &SensorReading) {
        for (_, observer) in self.observers.iter_mut() {
            if let Observer::Sensor(consumer) = observer {
                consumer.on_reading(reading);
            }
        }
    }

    pub fn dispatch_log(&mut self, entry: &LogEntry) {
        for (_, observer) in self.observers.iter_mut() {
            if let Observer::Log(consumer) = observer {
                consumer.on_log(entry);
            }
        }
    }

    pub fn dispatch_state(&mut self, transition: &Transition) {
        for (_, observer) in self.observers.iter_mut() {
            if let Observer::State(consumer) = observer {
                consumer.on_state(transition);
            }
        }
    }
}
