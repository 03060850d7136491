//! MQTT to Prometheus bridge for LuxPower inverter dongles.
//!
//! This crate subscribes to a dongle's `<dongle>/inputbank1` topic, applies
//! the readings to a fixed set of labeled instruments and exposes them via an
//! HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   MQTT broker   │────>│   Dispatcher    │────>│    Registry     │
//! │ (<dongle>/bank) │     │ (decode/coerce) │     │  (instruments)  │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────v────────┐
//!                                                 │   HTTP Server   │
//!                                                 │   (/metrics)    │
//!                                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! lux2prom --config lux2prom.json5
//! MQTT_HOST=broker DONGLE=BA12345678 lux2prom
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options and
//! [`catalog::Catalog`] for the metric catalog format.

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod instrument;
pub mod mapping;
pub mod registry;
pub mod subscriber;

pub use catalog::{Catalog, CatalogError, MetricDefinition, MetricKind};
pub use config::{ConfigError, ExporterConfig};
pub use dispatcher::{DispatchReport, DispatchStats, Dispatcher, SharedDispatcher};
pub use http::HttpServer;
pub use instrument::Instrument;
pub use registry::{Registry, SharedRegistry};
pub use subscriber::TelemetrySubscriber;
