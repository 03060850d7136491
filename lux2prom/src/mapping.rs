//! Mapping from catalog definitions to Prometheus metric names.

use crate::catalog::{MetricDefinition, MetricKind};

/// Prefix of the exporter's own metrics.
pub const SELF_METRICS_PREFIX: &str = "lux2prom";

/// Exporter self-metrics as `(suffix, TYPE)`.
pub const SELF_METRICS: [(&str, &str); 7] = [
    ("messages_received_total", "counter"),
    ("messages_malformed_total", "counter"),
    ("messages_invalid_total", "counter"),
    ("fields_sent_total", "counter"),
    ("fields_ignored_total", "counter"),
    ("fields_failed_total", "counter"),
    ("registered_metrics", "gauge"),
];

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// This function:
/// - Replaces invalid characters with underscores
/// - Ensures the name starts with a letter or underscore
/// - Collapses multiple underscores into one
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;
    let mut chars = name.chars().peekable();

    // A leading digit is kept behind an underscore
    if let Some(&first) = chars.peek()
        && first.is_ascii_digit()
    {
        result.push('_');
        last_was_underscore = true;
    }

    for c in chars {
        let is_valid_char = c.is_ascii_alphanumeric() || c == '_' || c == ':';

        if is_valid_char {
            if c == '_' {
                if !last_was_underscore {
                    result.push(c);
                    last_was_underscore = true;
                }
            } else {
                result.push(c);
                last_was_underscore = false;
            }
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

/// Build the exposed metric name for a definition.
///
/// Format: `{namespace}_{lowercased id}[_{unit}]`. The unit is not appended
/// twice when the id already ends with it.
pub fn build_metric_name(namespace: &str, definition: &MetricDefinition) -> String {
    let mut name = sanitize_metric_name(&definition.key());

    if let Some(unit) = definition.unit.as_deref() {
        let unit = sanitize_metric_name(&unit.to_lowercase());
        let unit = unit.trim_start_matches('_');
        if !name.ends_with(&format!("_{}", unit)) {
            name.push('_');
            name.push_str(unit);
        }
    }

    if namespace.is_empty() {
        name
    } else {
        // The namespace already provides a valid first character
        format!("{}_{}", namespace, name.trim_start_matches('_'))
    }
}

/// Name of the sample line for a metric of the given kind.
///
/// Counters are exposed with a `_total` suffix.
pub fn sample_name(name: &str, kind: MetricKind) -> String {
    match kind {
        MetricKind::Counter if !name.ends_with("_total") => format!("{}_total", name),
        _ => name.to_string(),
    }
}

/// Every name a metric occupies on the scrape page: its family name and the
/// names of all its sample lines.
pub fn exposed_names(name: &str, kind: MetricKind) -> Vec<String> {
    let family = sample_name(name, kind);
    match kind {
        MetricKind::Gauge | MetricKind::Counter => vec![family],
        MetricKind::Histogram => vec![
            format!("{}_bucket", family),
            format!("{}_sum", family),
            format!("{}_count", family),
            family,
        ],
        MetricKind::Summary => vec![
            format!("{}_sum", family),
            format!("{}_count", family),
            family,
        ],
    }
}

/// Full names of the exporter self-metrics.
pub fn self_metric_names() -> impl Iterator<Item = String> {
    SELF_METRICS
        .iter()
        .map(|(suffix, _)| format!("{}_{}", SELF_METRICS_PREFIX, suffix))
}
