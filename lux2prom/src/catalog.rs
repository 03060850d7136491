//! Metric catalog: the static list of metrics the bridge knows how to expose.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Catalog shipped with the binary, used when no catalog file is configured.
const DEFAULT_CATALOG: &str = include_str!("../catalog.json5");

/// Catalog errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] json5::Error),
    #[error("Duplicate metric id '{id}' (ids are case-insensitive)")]
    Duplicate { id: String },
    #[error("Metric '{id}' is exposed as '{name}', which is already taken by '{existing}'")]
    DuplicateName {
        id: String,
        name: String,
        existing: String,
    },
    #[error("Invalid metric definition: {0}")]
    Invalid(String),
}

/// Kind of instrument backing a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
    Summary,
}

impl MetricKind {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Payload field name. Matched case-insensitively.
    pub id: String,

    #[serde(rename = "type")]
    pub kind: MetricKind,

    /// Unit suffix appended to the exposed name (e.g. "volts").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// HELP text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,

    /// Histogram bucket upper bounds. Only valid for histograms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,
}

impl MetricDefinition {
    pub fn new(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
            unit: None,
            help: None,
            buckets: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Registry key for this definition.
    pub fn key(&self) -> String {
        self.id.to_lowercase()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.id.trim().is_empty() {
            return Err(CatalogError::Invalid("metric id must not be empty".to_string()));
        }

        if let Some(buckets) = &self.buckets {
            if self.kind != MetricKind::Histogram {
                return Err(CatalogError::Invalid(format!(
                    "'{}': buckets are only allowed on histograms",
                    self.id
                )));
            }
            if buckets.is_empty() {
                return Err(CatalogError::Invalid(format!(
                    "'{}': buckets must not be empty",
                    self.id
                )));
            }
            if buckets.iter().any(|b| b.is_nan())
                || buckets.windows(2).any(|w| w[0] >= w[1])
            {
                return Err(CatalogError::Invalid(format!(
                    "'{}': buckets must be strictly increasing",
                    self.id
                )));
            }
        }

        Ok(())
    }
}

/// Ordered, validated list of metric definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    definitions: Vec<MetricDefinition>,
}

impl Catalog {
    /// Create a catalog, rejecting duplicate (case-insensitive) or invalid entries.
    pub fn new(definitions: Vec<MetricDefinition>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::with_capacity(definitions.len());

        for definition in &definitions {
            definition.validate()?;
            if !seen.insert(definition.key()) {
                return Err(CatalogError::Duplicate {
                    id: definition.id.clone(),
                });
            }
        }

        Ok(Self { definitions })
    }

    /// Parse a catalog from a JSON5 array.
    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let definitions: Vec<MetricDefinition> = json5::from_str(content)?;
        Self::new(definitions)
    }

    /// Load a catalog from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// The catalog embedded in the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::parse(DEFAULT_CATALOG)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
