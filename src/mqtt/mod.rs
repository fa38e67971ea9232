//! # MQTT Link Session
//!
//! Connection lifecycle to the broker and the publishing capability handed
//! to the drive pipeline.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker parameters and defaults
//! ├── message_manager.rs  - Record of the last published command
//! └── mqtt_handler.rs     - Connection state machine and event loop task
//! ```
//!
//! ## States
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Disconnected
//!                      │                             │
//!                      ▼                             ▼
//!                   Failed ──► Connecting      Reconnecting ──► Connected
//! ```
//!
//! The link never queues motion commands while down. `publish` on a
//! disconnected link is rejected and the drive pipeline drops the command.
//! The state is reported on a watch channel for status display only; the
//! pipeline itself just observes `is_connected`.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
