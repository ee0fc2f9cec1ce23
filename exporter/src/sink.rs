//! Metric sink backed by an explicit prometheus registry.
//!
//! All metric families are created once at load time from the configured
//! metric definitions; no process-wide singleton registry is used. Family
//! handles are internally thread-safe, and the family maps are immutable
//! after construction, so concurrent query tasks can apply samples without
//! extra coordination.

use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use common::errors::{AppError, AppResult};
use common::models::{MetricDefinition, MetricKind, MetricSample};

/// Uniform set/increment/observe contract for named metrics.
pub trait MetricSink: Send + Sync {
    /// Latest value replaces the previous one for the label combination.
    fn upsert_gauge(&self, name: &str, labels: &[(String, String)], value: f64) -> AppResult<()>;

    /// Sets a counter to an absolute cumulative reading. The source query
    /// supplies totals, not deltas; a lower reading means the source
    /// counter was reset.
    fn set_counter(&self, name: &str, labels: &[(String, String)], value: f64) -> AppResult<()>;

    /// Records one observation.
    fn observe_histogram(
        &self,
        name: &str,
        labels: &[(String, String)],
        value: f64,
    ) -> AppResult<()>;

    /// Kind the metric name was registered with, if any.
    fn kind_of(&self, name: &str) -> Option<MetricKind>;

    /// Applies a mapped sample, dispatching on the kind resolved at
    /// registration time.
    fn apply(&self, sample: &MetricSample) -> AppResult<()> {
        match self.kind_of(&sample.metric) {
            Some(MetricKind::Gauge) => {
                self.upsert_gauge(&sample.metric, &sample.labels, sample.value)
            }
            Some(MetricKind::Counter) => {
                self.set_counter(&sample.metric, &sample.labels, sample.value)
            }
            Some(MetricKind::Histogram) => {
                self.observe_histogram(&sample.metric, &sample.labels, sample.value)
            }
            None => Err(AppError::MetricRegistry(format!(
                "metric '{}' is not registered",
                sample.metric
            ))),
        }
    }
}

#[derive(Debug)]
struct Registered {
    kind: MetricKind,
    help: String,
    labels: Vec<String>,
}

/// Prometheus-backed sink owned by the exporter; lifecycle tied to it.
#[derive(Debug)]
pub struct PrometheusSink {
    registry: Registry,
    registered: HashMap<String, Registered>,
    gauges: HashMap<String, GaugeVec>,
    counters: HashMap<String, CounterVec>,
    histograms: HashMap<String, HistogramVec>,
    // Serializes the read-compare-add in set_counter
    counter_lock: Mutex<()>,
}

impl PrometheusSink {
    /// Builds the sink and registers every metric family up front.
    ///
    /// Registration is idempotent for an identical definition; the same
    /// name with a different kind, help text or label set is a
    /// configuration error.
    pub fn new(metric_defs: &[&MetricDefinition]) -> AppResult<Self> {
        let mut sink = Self {
            registry: Registry::new(),
            registered: HashMap::new(),
            gauges: HashMap::new(),
            counters: HashMap::new(),
            histograms: HashMap::new(),
            counter_lock: Mutex::new(()),
        };
        for def in metric_defs {
            sink.register(def)?;
        }
        Ok(sink)
    }

    fn register(&mut self, def: &MetricDefinition) -> AppResult<()> {
        if let Some(existing) = self.registered.get(&def.name) {
            if existing.kind == def.kind
                && existing.help == def.help
                && existing.labels == def.labels
            {
                return Ok(()); // idempotent re-registration
            }
            return Err(AppError::Configuration(format!(
                "metric '{}' already registered as {}",
                def.name, existing.kind
            )));
        }

        let label_refs: Vec<&str> = def.labels.iter().map(String::as_str).collect();
        let registry_err =
            |e: prometheus::Error| AppError::MetricRegistry(format!("{}: {}", def.name, e));

        match def.kind {
            MetricKind::Gauge => {
                let family = GaugeVec::new(Opts::new(&def.name, &def.help), &label_refs)
                    .map_err(registry_err)?;
                self.registry
                    .register(Box::new(family.clone()))
                    .map_err(registry_err)?;
                self.gauges.insert(def.name.clone(), family);
            }
            MetricKind::Counter => {
                let family = CounterVec::new(Opts::new(&def.name, &def.help), &label_refs)
                    .map_err(registry_err)?;
                self.registry
                    .register(Box::new(family.clone()))
                    .map_err(registry_err)?;
                self.counters.insert(def.name.clone(), family);
            }
            MetricKind::Histogram => {
                let family =
                    HistogramVec::new(HistogramOpts::new(&def.name, &def.help), &label_refs)
                        .map_err(registry_err)?;
                self.registry
                    .register(Box::new(family.clone()))
                    .map_err(registry_err)?;
                self.histograms.insert(def.name.clone(), family);
            }
        }

        self.registered.insert(
            def.name.clone(),
            Registered {
                kind: def.kind,
                help: def.help.clone(),
                labels: def.labels.clone(),
            },
        );
        Ok(())
    }

    /// Orders sample label values to match the family's declared label
    /// names.
    fn label_values<'a>(
        registered: &Registered,
        labels: &'a [(String, String)],
    ) -> Vec<&'a str> {
        registered
            .labels
            .iter()
            .map(|name| {
                labels
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.as_str())
                    .unwrap_or("")
            })
            .collect()
    }

    fn lookup(&self, name: &str) -> AppResult<&Registered> {
        self.registered
            .get(name)
            .ok_or_else(|| AppError::MetricRegistry(format!("metric '{}' is not registered", name)))
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> AppResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| AppError::MetricRegistry(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| AppError::MetricRegistry(e.to_string()))
    }
}

impl MetricSink for PrometheusSink {
    fn upsert_gauge(&self, name: &str, labels: &[(String, String)], value: f64) -> AppResult<()> {
        let registered = self.lookup(name)?;
        let family = self
            .gauges
            .get(name)
            .ok_or_else(|| AppError::MetricRegistry(format!("'{}' is not a gauge", name)))?;
        family
            .get_metric_with_label_values(&Self::label_values(registered, labels))
            .map_err(|e| AppError::MetricRegistry(e.to_string()))?
            .set(value);
        Ok(())
    }

    fn set_counter(&self, name: &str, labels: &[(String, String)], value: f64) -> AppResult<()> {
        let registered = self.lookup(name)?;
        let family = self
            .counters
            .get(name)
            .ok_or_else(|| AppError::MetricRegistry(format!("'{}' is not a counter", name)))?;
        let counter = family
            .get_metric_with_label_values(&Self::label_values(registered, labels))
            .map_err(|e| AppError::MetricRegistry(e.to_string()))?;

        // Absolute reading: advance by the delta, or start over after a
        // source-side counter reset.
        let _guard = self.counter_lock.lock().unwrap();
        let current = counter.get();
        if value >= current {
            counter.inc_by(value - current);
        } else {
            counter.reset();
            counter.inc_by(value);
        }
        Ok(())
    }

    fn observe_histogram(
        &self,
        name: &str,
        labels: &[(String, String)],
        value: f64,
    ) -> AppResult<()> {
        let registered = self.lookup(name)?;
        let family = self
            .histograms
            .get(name)
            .ok_or_else(|| AppError::MetricRegistry(format!("'{}' is not a histogram", name)))?;
        family
            .get_metric_with_label_values(&Self::label_values(registered, labels))
            .map_err(|e| AppError::MetricRegistry(e.to_string()))?
            .observe(value);
        Ok(())
    }

    fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.registered.get(name).map(|r| r.kind)
    }
}

#[cfg(test)]
pub mod testing {
    //! Recording sink used by the scheduling and composition tests.

    use super::*;
    use std::sync::Mutex;

    /// Records every applied sample instead of exposing it.
    #[derive(Default)]
    pub struct RecordingSink {
        pub applied: Mutex<Vec<MetricSample>>,
        pub kinds: HashMap<String, MetricKind>,
    }

    impl RecordingSink {
        pub fn with_kinds(kinds: &[(&str, MetricKind)]) -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                kinds: kinds
                    .iter()
                    .map(|(name, kind)| (name.to_string(), *kind))
                    .collect(),
            }
        }

        pub fn applied_samples(&self) -> Vec<MetricSample> {
            self.applied.lock().unwrap().clone()
        }

        fn record(&self, name: &str, labels: &[(String, String)], value: f64) -> AppResult<()> {
            self.applied.lock().unwrap().push(MetricSample {
                metric: name.to_string(),
                labels: labels.to_vec(),
                value,
            });
            Ok(())
        }
    }

    impl MetricSink for RecordingSink {
        fn upsert_gauge(
            &self,
            name: &str,
            labels: &[(String, String)],
            value: f64,
        ) -> AppResult<()> {
            self.record(name, labels, value)
        }

        fn set_counter(
            &self,
            name: &str,
            labels: &[(String, String)],
            value: f64,
        ) -> AppResult<()> {
            self.record(name, labels, value)
        }

        fn observe_histogram(
            &self,
            name: &str,
            labels: &[(String, String)],
            value: f64,
        ) -> AppResult<()> {
            self.record(name, labels, value)
        }

        fn kind_of(&self, name: &str) -> Option<MetricKind> {
            self.kinds.get(name).copied()
        }
    }
}
