//! Payload dispatcher: turns inbound messages into registry updates.

use std::fmt::Write;
use std::sync::Arc;

use lux_common::{CoercionError, PayloadError, coerce_numeric, decode_readings};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::mapping::{SELF_METRICS, SELF_METRICS_PREFIX};
use crate::registry::{SharedRegistry, format_value};

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// `(metric id, value)` for every update that was applied.
    pub sent: Vec<(String, f64)>,
    /// Fields with no matching catalog entry.
    pub ignored: usize,
    /// Fields whose value could not be applied.
    pub failed: Vec<CoercionError>,
}

impl DispatchReport {
    /// The applied updates as a JSON list of single-entry objects.
    pub fn sent_json(&self) -> String {
        let entries: Vec<serde_json::Value> = self
            .sent
            .iter()
            .map(|(id, value)| {
                // JSON has no NaN or infinities
                let value = serde_json::Number::from_f64(*value)
                    .map(serde_json::Value::Number)
                    .unwrap_or_else(|| serde_json::Value::String(format_value(*value)));
                let mut entry = serde_json::Map::new();
                entry.insert(id.clone(), value);
                serde_json::Value::Object(entry)
            })
            .collect();
        serde_json::to_string(&entries).unwrap_or_default()
    }
}

/// Dispatcher statistics.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Total messages handed to the dispatcher.
    pub messages_received: u64,
    /// Messages dropped because the body was not JSON.
    pub messages_malformed: u64,
    /// Messages dropped because the readings object was missing.
    pub messages_invalid: u64,
    /// Updates applied to instruments.
    pub fields_sent: u64,
    /// Fields with no matching catalog entry.
    pub fields_ignored: u64,
    /// Fields whose value was rejected.
    pub fields_failed: u64,
}

/// Applies inbound messages to the registry.
pub struct Dispatcher {
    registry: SharedRegistry,
    stats: RwLock<DispatchStats>,
}

/// Shared dispatcher handle.
pub type SharedDispatcher = Arc<Dispatcher>;

impl Dispatcher {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            stats: RwLock::new(DispatchStats::default()),
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Process one message body to completion.
    ///
    /// A malformed body or a missing readings object drops the message. A bad
    /// field value only drops that field.
    pub fn dispatch(&self, body: &[u8]) -> Result<DispatchReport, PayloadError> {
        self.stats.write().messages_received += 1;

        let readings = match decode_readings(body) {
            Ok(readings) => readings,
            Err(e) => {
                let mut stats = self.stats.write();
                match &e {
                    PayloadError::Decode(_) => {
                        stats.messages_malformed += 1;
                        warn!(
                            error = %e,
                            body = %String::from_utf8_lossy(body),
                            "Dropping malformed message"
                        );
                    }
                    PayloadError::Structure(_) => {
                        stats.messages_invalid += 1;
                        warn!(error = %e, "Dropping message without readings");
                    }
                }
                return Err(e);
            }
        };

        let mut report = DispatchReport::default();

        for (field, raw) in &readings {
            let Some(metric) = self.registry.lookup(field) else {
                report.ignored += 1;
                continue;
            };

            let applied = coerce_numeric(field, raw).and_then(|value| {
                metric.apply(value)?;
                Ok(value)
            });

            match applied {
                Ok(value) => {
                    debug!(metric = %metric.name, value, "Applied reading");
                    report.sent.push((metric.definition.key(), value));
                }
                Err(e) => {
                    warn!(field = %field, reason = %e.reason, "{}", e);
                    report.failed.push(e);
                }
            }
        }

        {
            let mut stats = self.stats.write();
            stats.fields_sent += report.sent.len() as u64;
            stats.fields_ignored += report.ignored as u64;
            stats.fields_failed += report.failed.len() as u64;
        }

        info!(
            count = report.sent.len(),
            ignored = report.ignored,
            failed = report.failed.len(),
            sent = %report.sent_json(),
            "Sent metrics"
        );

        Ok(report)
    }

    /// Get dispatcher statistics.
    pub fn stats(&self) -> DispatchStats {
        self.stats.read().clone()
    }

    /// Render dispatcher statistics as exporter self-metrics.
    pub fn render_stats(&self) -> String {
        let stats = self.stats();
        let mut output = String::new();

        let values = [
            stats.messages_received,
            stats.messages_malformed,
            stats.messages_invalid,
            stats.fields_sent,
            stats.fields_ignored,
            stats.fields_failed,
            self.registry.len() as u64,
        ];

        for ((suffix, kind), value) in SELF_METRICS.iter().zip(values) {
            let name = format!("{}_{}", SELF_METRICS_PREFIX, suffix);
            writeln!(output, "# TYPE {} {}", name, kind).ok();
            writeln!(output, "{} {}", name, format_value(value as f64)).ok();
        }

        output
    }
}
