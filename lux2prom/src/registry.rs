//! Metric registry: one labeled instrument per catalog entry.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use lux_common::CoercionError;
use tracing::debug;

use crate::catalog::{Catalog, CatalogError, MetricDefinition, MetricKind};
use crate::instrument::Instrument;
use crate::mapping::{
    SELF_METRICS_PREFIX, build_metric_name, exposed_names, sample_name, self_metric_names,
};

/// Label carrying the dongle identifier.
pub const DONGLE_LABEL: &str = "dongle";

/// An instrument together with the definition it was built from.
#[derive(Debug)]
pub struct RegisteredMetric {
    /// The catalog entry.
    pub definition: MetricDefinition,
    /// The full Prometheus metric name.
    pub name: String,
    /// The live instrument.
    pub instrument: Instrument,
}

impl RegisteredMetric {
    pub fn kind(&self) -> MetricKind {
        self.instrument.kind()
    }

    /// Apply a reading to the instrument.
    pub fn apply(&self, value: f64) -> Result<(), CoercionError> {
        self.instrument
            .apply(value)
            .map_err(|reason| CoercionError::new(&self.definition.id, reason))
    }
}

/// Registry of instruments keyed by lower-cased metric id.
///
/// The set of metrics is fixed at construction; only instrument values change.
#[derive(Debug)]
pub struct Registry {
    dongle: String,
    metrics: HashMap<String, RegisteredMetric>,
}

/// Shared registry handle.
pub type SharedRegistry = Arc<Registry>;

impl Registry {
    /// Build one instrument per catalog entry, labeled with `dongle`.
    ///
    /// Fails if two entries, or an entry and an exporter self-metric, would
    /// be exposed under the same name. Nothing is registered in that case.
    pub fn build(
        catalog: &Catalog,
        namespace: &str,
        dongle: impl Into<String>,
    ) -> Result<Self, CatalogError> {
        let mut taken: HashMap<String, String> = self_metric_names()
            .map(|name| (name, SELF_METRICS_PREFIX.to_string()))
            .collect();

        let mut named = Vec::with_capacity(catalog.len());
        for definition in catalog.iter() {
            let name = build_metric_name(namespace, definition);

            for exposed in exposed_names(&name, definition.kind) {
                if let Some(existing) = taken.get(&exposed) {
                    return Err(CatalogError::DuplicateName {
                        id: definition.id.clone(),
                        name: exposed,
                        existing: existing.clone(),
                    });
                }
                taken.insert(exposed, definition.id.clone());
            }

            named.push((definition, name));
        }

        let dongle = dongle.into();
        let mut metrics = HashMap::with_capacity(named.len());

        for (definition, name) in named {
            let instrument = Instrument::new(definition.kind, definition.buckets.as_deref());

            debug!(
                id = %definition.id,
                name = %name,
                kind = definition.kind.as_str(),
                "Registered metric"
            );

            metrics.insert(
                definition.key(),
                RegisteredMetric {
                    definition: definition.clone(),
                    name,
                    instrument,
                },
            );
        }

        Ok(Self { dongle, metrics })
    }

    /// Validate raw definitions and build the registry.
    ///
    /// Fails on duplicate or invalid definitions before any instrument is
    /// created.
    pub fn from_definitions(
        definitions: Vec<MetricDefinition>,
        namespace: &str,
        dongle: impl Into<String>,
    ) -> Result<Self, CatalogError> {
        let catalog = Catalog::new(definitions)?;
        Self::build(&catalog, namespace, dongle)
    }

    /// Case-insensitive lookup by payload field name.
    pub fn lookup(&self, name: &str) -> Option<&RegisteredMetric> {
        self.metrics.get(&name.to_lowercase())
    }

    pub fn dongle(&self) -> &str {
        &self.dongle
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Render metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        let mut output = String::with_capacity(self.metrics.len() * 128);
        let labels = format_labels(&[(DONGLE_LABEL, self.dongle.as_str())]);

        // Sort by metric name for consistent output
        let mut metrics: Vec<&RegisteredMetric> = self.metrics.values().collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));

        for metric in metrics {
            let kind = metric.kind();
            let name = sample_name(&metric.name, kind);

            if let Some(help) = &metric.definition.help {
                writeln!(output, "# HELP {} {}", name, escape_help(help)).ok();
            }
            writeln!(output, "# TYPE {} {}", name, kind.as_str()).ok();

            match &metric.instrument {
                Instrument::Gauge(_) | Instrument::Counter(_) => {
                    if let Some(value) = metric.instrument.value() {
                        writeln!(output, "{}{} {}", name, labels, format_value(value)).ok();
                    }
                }
                Instrument::Histogram(histogram) => {
                    let snapshot = histogram.snapshot();
                    for (bound, count) in &snapshot.buckets {
                        let le = format_value(*bound);
                        let bucket_labels = format_labels(&[
                            (DONGLE_LABEL, self.dongle.as_str()),
                            ("le", le.as_str()),
                        ]);
                        writeln!(output, "{}_bucket{} {}", name, bucket_labels, count).ok();
                    }
                    writeln!(output, "{}_sum{} {}", name, labels, format_value(snapshot.sum))
                        .ok();
                    writeln!(output, "{}_count{} {}", name, labels, snapshot.count).ok();
                }
                Instrument::Summary(summary) => {
                    let (sum, count) = summary.snapshot();
                    writeln!(output, "{}_sum{} {}", name, labels, format_value(sum)).ok();
                    writeln!(output, "{}_count{} {}", name, labels, count).ok();
                }
            }
        }

        output
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape HELP text (backslash and newline only).
fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
pub(crate) fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_catalog() -> Catalog {
        Catalog::new(vec![
            MetricDefinition::new("Temp", MetricKind::Gauge).with_unit("celsius"),
            MetricDefinition::new("e_pv_all", MetricKind::Counter)
                .with_unit("kwh")
                .with_help("Lifetime PV energy"),
            MetricDefinition::new("p_pv", MetricKind::Histogram).with_buckets(vec![100.0, 1000.0]),
            MetricDefinition::new("v_bat", MetricKind::Summary).with_unit("volts"),
        ])
        .unwrap()
    }

    #[test]
    fn test_build_registers_every_definition() {
        let catalog = make_catalog();
        let registry = Registry::build(&catalog, "lux", "BA12345678").unwrap();

        assert_eq!(registry.len(), catalog.len());
        for definition in catalog.iter() {
            let metric = registry.lookup(&definition.key()).unwrap();
            assert_eq!(metric.kind(), definition.kind);
            assert_eq!(&metric.definition, definition);
        }
    }

    #[test]
    fn test_from_definitions_rejects_duplicates() {
        let result = Registry::from_definitions(
            vec![
                MetricDefinition::new("Temp", MetricKind::Gauge),
                MetricDefinition::new("TEMP", MetricKind::Gauge),
            ],
            "lux",
            "d1",
        );
        assert!(matches!(result, Err(CatalogError::Duplicate { .. })));
    }

    #[test]
    fn test_build_rejects_unit_suffix_clash() {
        let result = Registry::from_definitions(
            vec![
                MetricDefinition::new("p_pv_watts", MetricKind::Gauge),
                MetricDefinition::new("p_pv", MetricKind::Gauge).with_unit("watts"),
            ],
            "lux",
            "d1",
        );

        match result {
            Err(CatalogError::DuplicateName { id, name, existing }) => {
                assert_eq!(id, "p_pv");
                assert_eq!(name, "lux_p_pv_watts");
                assert_eq!(existing, "p_pv_watts");
            }
            other => panic!("expected name clash, got {:?}", other),
        }
    }

    #[test]
    fn test_build_rejects_sanitized_clash() {
        let result = Registry::from_definitions(
            vec![
                MetricDefinition::new("e__pv", MetricKind::Gauge),
                MetricDefinition::new("e_pv", MetricKind::Gauge),
            ],
            "lux",
            "d1",
        );
        assert!(matches!(result, Err(CatalogError::DuplicateName { .. })));
    }

    #[test]
    fn test_build_rejects_series_clash_across_kinds() {
        // The summary's `_sum` line collides with the gauge family
        let result = Registry::from_definitions(
            vec![
                MetricDefinition::new("v", MetricKind::Summary),
                MetricDefinition::new("v_sum", MetricKind::Gauge),
            ],
            "lux",
            "d1",
        );
        assert!(matches!(result, Err(CatalogError::DuplicateName { .. })));

        // Counter `e` is exposed as `lux_e_total`
        let result = Registry::from_definitions(
            vec![
                MetricDefinition::new("e", MetricKind::Counter),
                MetricDefinition::new("e_total", MetricKind::Gauge),
            ],
            "lux",
            "d1",
        );
        assert!(matches!(result, Err(CatalogError::DuplicateName { .. })));
    }

    #[test]
    fn test_build_rejects_self_metric_clash() {
        let result = Registry::from_definitions(
            vec![MetricDefinition::new("fields_sent", MetricKind::Counter)],
            "lux2prom",
            "d1",
        );

        match result {
            Err(CatalogError::DuplicateName { existing, .. }) => {
                assert_eq!(existing, "lux2prom");
            }
            other => panic!("expected name clash, got {:?}", other),
        }
    }

    #[test]
    fn test_render_has_one_family_per_name() {
        let registry = Registry::build(&Catalog::builtin().unwrap(), "lux", "d1").unwrap();
        let output = registry.render();

        let mut families: Vec<&str> = output
            .lines()
            .filter_map(|l| l.strip_prefix("# TYPE "))
            .filter_map(|l| l.split(' ').next())
            .collect();
        let total = families.len();
        families.sort();
        families.dedup();
        assert_eq!(families.len(), total);
        assert_eq!(total, registry.len());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = Registry::build(&make_catalog(), "lux", "d1").unwrap();

        assert!(registry.lookup("temp").is_some());
        assert!(registry.lookup("TEMP").is_some());
        assert!(registry.lookup("Temp").is_some());
        assert!(registry.lookup("unknown").is_none());
    }

    #[test]
    fn test_metric_names() {
        let registry = Registry::build(&make_catalog(), "lux", "d1").unwrap();

        assert_eq!(registry.lookup("temp").unwrap().name, "lux_temp_celsius");
        assert_eq!(registry.lookup("e_pv_all").unwrap().name, "lux_e_pv_all_kwh");
        assert_eq!(registry.lookup("p_pv").unwrap().name, "lux_p_pv");
    }

    #[test]
    fn test_apply_counter_negative_is_coercion_error() {
        let registry = Registry::build(&make_catalog(), "lux", "d1").unwrap();
        let counter = registry.lookup("e_pv_all").unwrap();

        counter.apply(3.0).unwrap();
        let err = counter.apply(-1.0).unwrap_err();
        assert_eq!(err.field, "e_pv_all");
        assert_eq!(counter.instrument.value(), Some(3.0));
    }

    #[test]
    fn test_render_gauge_and_counter() {
        let registry = Registry::build(&make_catalog(), "lux", "BA12345678").unwrap();
        registry.lookup("temp").unwrap().apply(21.5).unwrap();
        registry.lookup("e_pv_all").unwrap().apply(12.0).unwrap();

        let output = registry.render();
        assert!(output.contains("# TYPE lux_temp_celsius gauge"));
        assert!(output.contains("lux_temp_celsius{dongle=\"BA12345678\"} 21.5"));
        assert!(output.contains("# HELP lux_e_pv_all_kwh_total Lifetime PV energy"));
        assert!(output.contains("# TYPE lux_e_pv_all_kwh_total counter"));
        assert!(output.contains("lux_e_pv_all_kwh_total{dongle=\"BA12345678\"} 12"));
    }

    #[test]
    fn test_render_histogram_and_summary() {
        let registry = Registry::build(&make_catalog(), "lux", "d1").unwrap();
        registry.lookup("p_pv").unwrap().apply(500.0).unwrap();
        registry.lookup("v_bat").unwrap().apply(52.5).unwrap();

        let output = registry.render();
        assert!(output.contains("# TYPE lux_p_pv histogram"));
        assert!(output.contains("lux_p_pv_bucket{dongle=\"d1\",le=\"100\"} 0"));
        assert!(output.contains("lux_p_pv_bucket{dongle=\"d1\",le=\"1000\"} 1"));
        assert!(output.contains("lux_p_pv_bucket{dongle=\"d1\",le=\"+Inf\"} 1"));
        assert!(output.contains("lux_p_pv_sum{dongle=\"d1\"} 500"));
        assert!(output.contains("lux_p_pv_count{dongle=\"d1\"} 1"));
        assert!(output.contains("# TYPE lux_v_bat_volts summary"));
        assert!(output.contains("lux_v_bat_volts_sum{dongle=\"d1\"} 52.5"));
        assert!(output.contains("lux_v_bat_volts_count{dongle=\"d1\"} 1"));
    }

    #[test]
    fn test_render_is_sorted() {
        let registry = Registry::build(&make_catalog(), "lux", "d1").unwrap();
        let output = registry.render();

        let types: Vec<&str> = output
            .lines()
            .filter(|l| l.starts_with("# TYPE"))
            .collect();
        let mut sorted = types.clone();
        sorted.sort();
        assert_eq!(types, sorted);
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(3.25), "3.25");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
