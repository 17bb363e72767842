//! # MQTT Link Module
//!
//! Connects the monitor to the water-quality device through an MQTT broker
//! over TLS, keeps that link alive, and turns traffic into log lines, sensor
//! readings and command acknowledgments.
//!
//! ## Why This Module Exists
//!
//! The device publishes dissolved oxygen, pH and temperature readings and
//! accepts switch and threshold commands. Everything else in the application
//! only reads the results, so all connection handling is concentrated here:
//! - One background thread per session drives the blocking event loop
//! - A single reconnection state machine decides when to retry and when to stop
//! - Inbound messages are routed and decoded without ever failing the link
//! - Outbound commands fail closed unless the broker confirms delivery
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Immutable connection settings and TLS policy
//! ├── error.rs            - Error types and failure classification
//! ├── event_log.rs        - Bounded log ring shown to the user
//! ├── message_manager.rs  - Raw messages, sensor readings, command payloads
//! ├── mqtt_handler.rs     - Broker session and background transport worker
//! ├── publisher.rs        - Confirmed command publishing
//! ├── reconnect.rs        - Connection lifecycle state machine
//! └── router.rs           - Inbound topic dispatch
//! ```
//!
//! ## Topics
//!
//! | Topic                      | Direction | Payload                                |
//! |----------------------------|-----------|----------------------------------------|
//! | `esp32/sensor`             | inbound   | JSON `{do, ph, temp}`, any subset      |
//! | `esp32/threshold_response` | inbound   | logged only                            |
//! | `esp32/switch`             | outbound  | `yes` / `no`                           |
//! | `esp32/threshold`          | outbound  | JSON `{max_do, min_do, timestamp}`     |

pub mod config;
pub mod error;
pub mod event_log;
pub mod message_manager;
pub mod mqtt_handler;
pub mod publisher;
pub mod reconnect;
pub mod router;
