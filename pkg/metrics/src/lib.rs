use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub mod pool;

pub use pool::PoolRecorder;

/// A lightweight, thread-safe metrics registry that renders in Prometheus text exposition format.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Counter>>,
    gauges: RwLock<BTreeMap<String, Gauge>>,
    families: RwLock<BTreeMap<String, GaugeFamily>>,
}

/// Monotonically increasing counter.
pub struct Counter {
    value: AtomicU64,
    help: String,
}

/// Value that can go up or down.
pub struct Gauge {
    value: AtomicI64,
    help: String,
}

/// Gauge with label dimensions. Series are keyed by their label pairs in
/// registration order.
pub struct GaugeFamily {
    help: String,
    label_names: Vec<String>,
    series: BTreeMap<Vec<String>, f64>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            families: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a counter. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str) {
        let mut counters = self.counters.write();
        counters.entry(name.to_string()).or_insert_with(|| Counter {
            value: AtomicU64::new(0),
            help: help.to_string(),
        });
    }

    /// Register a gauge. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        let mut gauges = self.gauges.write();
        gauges.entry(name.to_string()).or_insert_with(|| Gauge {
            value: AtomicI64::new(0),
            help: help.to_string(),
        });
    }

    /// Register a labelled gauge family. If it already exists, this is a no-op.
    pub fn register_gauge_family(&self, name: &str, help: &str, label_names: &[&str]) {
        let mut families = self.families.write();
        families
            .entry(name.to_string())
            .or_insert_with(|| GaugeFamily {
                help: help.to_string(),
                label_names: label_names.iter().map(|s| s.to_string()).collect(),
                series: BTreeMap::new(),
            });
    }

    /// Increment a counter by 1.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Increment a counter by a given amount.
    pub fn counter_add(&self, name: &str, val: u64) {
        let counters = self.counters.read();
        if let Some(c) = counters.get(name) {
            c.value.fetch_add(val, Ordering::Relaxed);
        }
    }

    pub fn counter_get(&self, name: &str) -> Option<u64> {
        self.counters
            .read()
            .get(name)
            .map(|c| c.value.load(Ordering::Relaxed))
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, val: i64) {
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(name) {
            g.value.store(val, Ordering::Relaxed);
        }
    }

    /// Set one series of a gauge family. `label_values` must line up with the
    /// family's label names; mismatches are ignored.
    pub fn family_set(&self, name: &str, label_values: &[&str], val: f64) {
        let mut families = self.families.write();
        if let Some(f) = families.get_mut(name)
            && f.label_names.len() == label_values.len()
        {
            let key = label_values.iter().map(|s| s.to_string()).collect();
            f.series.insert(key, val);
        }
    }

    pub fn family_get(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let families = self.families.read();
        let f = families.get(name)?;
        let key: Vec<String> = label_values.iter().map(|s| s.to_string()).collect();
        f.series.get(&key).copied()
    }

    /// Drop every series, across all families, whose labels include all of
    /// `matchers`. Families lacking one of the matcher labels are untouched.
    pub fn family_delete_matching(&self, matchers: &[(&str, &str)]) {
        let mut families = self.families.write();
        for f in families.values_mut() {
            let positions: Option<Vec<(usize, &str)>> = matchers
                .iter()
                .map(|(label, value)| {
                    f.label_names
                        .iter()
                        .position(|n| n == *label)
                        .map(|i| (i, *value))
                })
                .collect();
            let Some(positions) = positions else {
                continue;
            };
            f.series
                .retain(|key, _| !positions.iter().all(|(i, v)| key[*i] == *v));
        }
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        for (name, counter) in self.counters.read().iter() {
            let _ = writeln!(output, "# HELP {} {}", name, counter.help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, counter.value.load(Ordering::Relaxed));
        }

        for (name, gauge) in self.gauges.read().iter() {
            let _ = writeln!(output, "# HELP {} {}", name, gauge.help);
            let _ = writeln!(output, "# TYPE {} gauge", name);
            let _ = writeln!(output, "{} {}", name, gauge.value.load(Ordering::Relaxed));
        }

        for (name, family) in self.families.read().iter() {
            let _ = writeln!(output, "# HELP {} {}", name, family.help);
            let _ = writeln!(output, "# TYPE {} gauge", name);
            for (values, val) in &family.series {
                let labels: Vec<String> = family
                    .label_names
                    .iter()
                    .zip(values)
                    .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
                    .collect();
                let _ = writeln!(output, "{}{{{}}} {}", name, labels.join(","), val);
            }
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_counters_and_gauges() {
        let r = MetricsRegistry::new();
        r.register_counter("reconciles_total", "Reconcile passes");
        r.register_gauge("pools", "Pools");
        r.counter_inc("reconciles_total");
        r.counter_add("reconciles_total", 2);
        r.counter_inc("unregistered");
        r.gauge_set("pools", 4);

        let out = r.render();
        assert!(out.contains("# TYPE reconciles_total counter\nreconciles_total 3\n"));
        assert!(out.contains("# TYPE pools gauge\npools 4\n"));
        assert!(!out.contains("unregistered"));
        assert_eq!(r.counter_get("reconciles_total"), Some(3));
    }

    #[test]
    fn families_render_labels_and_escape() {
        let r = MetricsRegistry::new();
        r.register_gauge_family("usage", "Usage", &["pool", "resource"]);
        r.family_set("usage", &["a", "cpu"], 1.5);
        r.family_set("usage", &["a\"b", "cpu"], 2.0);
        r.family_set("usage", &["only-one"], 9.0);

        let out = r.render();
        assert!(out.contains("usage{pool=\"a\",resource=\"cpu\"} 1.5\n"));
        assert!(out.contains("usage{pool=\"a\\\"b\",resource=\"cpu\"} 2\n"));
        assert!(!out.contains("only-one"));
    }

    #[test]
    fn delete_matching_is_partial() {
        let r = MetricsRegistry::new();
        r.register_gauge_family("usage", "Usage", &["pool", "resource"]);
        r.register_gauge_family("claims", "Claims", &["pool"]);
        r.register_gauge_family("other", "Other", &["resource"]);
        r.family_set("usage", &["a", "cpu"], 1.0);
        r.family_set("usage", &["a", "memory"], 1.0);
        r.family_set("usage", &["b", "cpu"], 1.0);
        r.family_set("claims", &["a"], 3.0);
        r.family_set("other", &["cpu"], 1.0);

        r.family_delete_matching(&[("pool", "a")]);
        assert_eq!(r.family_get("usage", &["a", "cpu"]), None);
        assert_eq!(r.family_get("usage", &["a", "memory"]), None);
        assert_eq!(r.family_get("usage", &["b", "cpu"]), Some(1.0));
        assert_eq!(r.family_get("claims", &["a"]), None);
        assert_eq!(r.family_get("other", &["cpu"]), Some(1.0));
    }
}
