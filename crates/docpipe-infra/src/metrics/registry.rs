//! Metric registration and Prometheus text exposition

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use super::instruments::{Counter, Histogram, UpDownCounter};

/// Errors raised while creating instruments
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("Invalid metric name: {0}")]
    InvalidName(String),

    #[error("Metric {name} already registered as a {existing}")]
    KindMismatch { name: String, existing: &'static str },
}

/// Factory for metric instruments.
///
/// Requesting an existing name with the same kind returns the already
/// registered instrument.
pub trait Meter: Send + Sync {
    fn counter(&self, name: &str, help: &str) -> Result<Arc<Counter>, MetricsError>;

    fn histogram(
        &self,
        name: &str,
        help: &str,
        buckets: Vec<f64>,
    ) -> Result<Arc<Histogram>, MetricsError>;

    fn up_down_counter(&self, name: &str, help: &str) -> Result<Arc<UpDownCounter>, MetricsError>;
}

/// Configuration for metrics
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Application name prefix for metrics
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: "docpipe".to_string(),
        }
    }
}

impl MetricsConfig {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }
}

enum Instrument {
    Counter(Arc<Counter>),
    Histogram(Arc<Histogram>),
    UpDown(Arc<UpDownCounter>),
}

impl Instrument {
    fn kind(&self) -> &'static str {
        match self {
            Instrument::Counter(_) => "counter",
            Instrument::Histogram(_) => "histogram",
            Instrument::UpDown(_) => "gauge",
        }
    }
}

struct Entry {
    help: String,
    instrument: Instrument,
}

/// Process-local metrics registry
pub struct MetricsRegistry {
    config: MetricsConfig,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl MetricsRegistry {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Look up a registered counter by unprefixed name
    pub fn find_counter(&self, name: &str) -> Option<Arc<Counter>> {
        match self.entries.read().get(name).map(|e| &e.instrument) {
            Some(Instrument::Counter(c)) => Some(Arc::clone(c)),
            _ => None,
        }
    }

    fn get_or_insert<T>(
        &self,
        name: &str,
        help: &str,
        extract: impl Fn(&Instrument) -> Option<Arc<T>>,
        create: impl FnOnce() -> Instrument,
    ) -> Result<Arc<T>, MetricsError> {
        validate_name(name)?;

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(name) {
            return extract(&entry.instrument).ok_or_else(|| MetricsError::KindMismatch {
                name: name.to_string(),
                existing: entry.instrument.kind(),
            });
        }

        let instrument = create();
        let handle = extract(&instrument).ok_or_else(|| MetricsError::KindMismatch {
            name: name.to_string(),
            existing: instrument.kind(),
        })?;
        entries.insert(
            name.to_string(),
            Entry {
                help: help.to_string(),
                instrument,
            },
        );
        Ok(handle)
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let mut output = String::new();
        let prefix = &self.config.prefix;

        for (name, entry) in self.entries.read().iter() {
            let full = format!("{}_{}", prefix, name);
            let _ = writeln!(output, "# HELP {} {}", full, entry.help);
            let _ = writeln!(output, "# TYPE {} {}", full, entry.instrument.kind());

            match &entry.instrument {
                Instrument::Counter(counter) => {
                    let units = counter.units();
                    if units.is_empty() {
                        let _ = writeln!(output, "{} {}", full, counter.get());
                    } else {
                        for (unit, value) in units {
                            let _ = writeln!(output, "{}{{unit=\"{}\"}} {}", full, unit, value);
                        }
                    }
                }
                Instrument::UpDown(gauge) => {
                    let _ = writeln!(output, "{} {}", full, gauge.get());
                }
                Instrument::Histogram(histogram) => {
                    let mut cumulative = 0u64;
                    for (bound, count) in histogram.get_buckets() {
                        cumulative += count;
                        let _ = writeln!(output, "{}_bucket{{le=\"{}\"}} {}", full, bound, cumulative);
                    }
                    let _ = writeln!(
                        output,
                        "{}_bucket{{le=\"+Inf\"}} {}",
                        full,
                        histogram.get_count()
                    );
                    let _ = writeln!(output, "{}_sum {}", full, histogram.get_sum());
                    let _ = writeln!(output, "{}_count {}", full, histogram.get_count());
                }
            }
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl Meter for MetricsRegistry {
    fn counter(&self, name: &str, help: &str) -> Result<Arc<Counter>, MetricsError> {
        self.get_or_insert(
            name,
            help,
            |i| match i {
                Instrument::Counter(c) => Some(Arc::clone(c)),
                _ => None,
            },
            || Instrument::Counter(Arc::new(Counter::new())),
        )
    }

    fn histogram(
        &self,
        name: &str,
        help: &str,
        buckets: Vec<f64>,
    ) -> Result<Arc<Histogram>, MetricsError> {
        self.get_or_insert(
            name,
            help,
            |i| match i {
                Instrument::Histogram(h) => Some(Arc::clone(h)),
                _ => None,
            },
            || Instrument::Histogram(Arc::new(Histogram::new(buckets))),
        )
    }

    fn up_down_counter(&self, name: &str, help: &str) -> Result<Arc<UpDownCounter>, MetricsError> {
        self.get_or_insert(
            name,
            help,
            |i| match i {
                Instrument::UpDown(g) => Some(Arc::clone(g)),
                _ => None,
            },
            || Instrument::UpDown(Arc::new(UpDownCounter::new())),
        )
    }
}

fn validate_name(name: &str) -> Result<(), MetricsError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(MetricsError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_kind_is_shared() {
        let registry = MetricsRegistry::default();
        let a = registry.counter("collector_cycles_total", "cycles").unwrap();
        let b = registry.counter("collector_cycles_total", "cycles").unwrap();

        a.inc();
        assert_eq!(b.get(), 1);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let registry = MetricsRegistry::default();
        registry.counter("processor_active_workers", "x").unwrap();

        let err = registry
            .up_down_counter("processor_active_workers", "x")
            .unwrap_err();
        assert_eq!(
            err,
            MetricsError::KindMismatch {
                name: "processor_active_workers".to_string(),
                existing: "counter",
            }
        );
    }

    #[test]
    fn test_invalid_names() {
        let registry = MetricsRegistry::default();
        assert!(registry.counter("", "x").is_err());
        assert!(registry.counter("9lives", "x").is_err());
        assert!(registry.counter("has-dash", "x").is_err());
        assert!(registry.counter("ok_name_2", "x").is_ok());
    }

    #[test]
    fn test_render_metrics() {
        let registry = MetricsRegistry::new(MetricsConfig::new("test"));
        registry.counter("cycles_total", "Cycles run").unwrap().inc();
        registry
            .counter("errors_total", "Errors")
            .unwrap()
            .inc_for("ds-1");
        registry.up_down_counter("active_workers", "Workers").unwrap().add(3);
        registry
            .histogram("cycle_duration_seconds", "Duration", vec![1.0])
            .unwrap()
            .observe(0.5);

        let output = registry.render();

        assert!(output.contains("# TYPE test_cycles_total counter"));
        assert!(output.contains("test_cycles_total 1"));
        assert!(output.contains("test_errors_total{unit=\"ds-1\"} 1"));
        assert!(output.contains("test_active_workers 3"));
        assert!(output.contains("test_cycle_duration_seconds_bucket{le=\"1\"} 1"));
        assert!(output.contains("test_cycle_duration_seconds_count 1"));
    }

    #[test]
    fn test_find_counter() {
        let registry = MetricsRegistry::default();
        registry.counter("a_total", "a").unwrap().inc_by(4);

        assert_eq!(registry.find_counter("a_total").unwrap().get(), 4);
        assert!(registry.find_counter("missing").is_none());
    }
}
