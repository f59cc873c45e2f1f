//! Prometheus metrics sink
//!
//! Turns stream snapshots into labeled samples on a registry owned by the
//! sink. The sink remembers every label set it published per stream, which
//! lets it clear PID series that disappeared and delete all of a stream's
//! series when the stream is deconfigured.

use prometheus::{GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::errors::AppResult;
use crate::models::{PidClass, StreamSnapshot, StreamTarget};

/// Language label value for PIDs without a language descriptor
const NO_LANGUAGE: &str = "none";

/// Label sets currently published for one stream
#[derive(Debug, Default)]
struct PublishedSeries {
    description: String,
    /// (pid, class, codec, language)
    pid_info: BTreeSet<[String; 4]>,
    cc_pids: BTreeSet<String>,
    /// (service_name, provider, service_type)
    service: Option<[String; 3]>,
    dropped_total: u64,
}

pub struct MetricsSink {
    registry: Registry,
    status: GaugeVec,
    bitrate: GaugeVec,
    pid_count: IntGaugeVec,
    pid_info: GaugeVec,
    service_info: GaugeVec,
    cc_errors: IntCounterVec,
    dropped: IntCounterVec,
    published: Mutex<HashMap<String, PublishedSeries>>,
}

impl MetricsSink {
    /// Create the metric families on a fresh registry
    pub fn new() -> AppResult<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> AppResult<Self> {
        let status = GaugeVec::new(
            Opts::new("stream_status", "Stream status (1 = online, 0 = offline)"),
            &["stream", "description"],
        )?;
        let bitrate = GaugeVec::new(
            Opts::new("stream_bitrate_bps", "Stream bitrate in bits per second"),
            &["stream", "description", "type"],
        )?;
        let pid_count = IntGaugeVec::new(
            Opts::new("stream_pid_count", "Number of PIDs per class"),
            &["stream", "description", "class"],
        )?;
        let pid_info = GaugeVec::new(
            Opts::new("stream_pid_info", "Elementary stream information (always 1)"),
            &["stream", "description", "pid", "class", "codec", "language"],
        )?;
        let service_info = GaugeVec::new(
            Opts::new("stream_service_info", "Service information (always 1)"),
            &["stream", "description", "service_name", "provider", "service_type"],
        )?;
        let cc_errors = IntCounterVec::new(
            Opts::new("stream_cc_errors_total", "Continuity counter errors per PID"),
            &["stream", "description", "pid"],
        )?;
        let dropped = IntCounterVec::new(
            Opts::new(
                "stream_snapshots_dropped_total",
                "Snapshots discarded because the consumer fell behind",
            ),
            &["stream", "description"],
        )?;

        registry.register(Box::new(status.clone()))?;
        registry.register(Box::new(bitrate.clone()))?;
        registry.register(Box::new(pid_count.clone()))?;
        registry.register(Box::new(pid_info.clone()))?;
        registry.register(Box::new(service_info.clone()))?;
        registry.register(Box::new(cc_errors.clone()))?;
        registry.register(Box::new(dropped.clone()))?;

        Ok(Self {
            registry,
            status,
            bitrate,
            pid_count,
            pid_info,
            service_info,
            cc_errors,
            dropped,
            published: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition of every registered family
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    fn published(&self) -> MutexGuard<'_, HashMap<String, PublishedSeries>> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish one snapshot, replacing the stream's previous PID series
    pub fn update(&self, snapshot: &StreamSnapshot) {
        let stream = snapshot.address.as_str();
        let description = snapshot.description.as_str();

        let mut published = self.published();
        let series = published.entry(stream.to_string()).or_default();
        series.description = description.to_string();

        self.status
            .with_label_values(&[stream, description])
            .set(if snapshot.online { 1.0 } else { 0.0 });
        self.bitrate
            .with_label_values(&[stream, description, "total"])
            .set(snapshot.bitrate.total_bps as f64);
        self.bitrate
            .with_label_values(&[stream, description, "net"])
            .set(snapshot.bitrate.net_bps as f64);

        for class in PidClass::ALL {
            self.pid_count
                .with_label_values(&[stream, description, class.as_str()])
                .set(snapshot.pid_count(class) as i64);
        }

        for [pid, class, codec, language] in std::mem::take(&mut series.pid_info) {
            let _ = self
                .pid_info
                .remove_label_values(&[stream, description, &pid, &class, &codec, &language]);
        }
        for record in snapshot.pids.values() {
            let labels = [
                record.pid_hex.clone(),
                record.class.as_str().to_string(),
                record.codec.clone(),
                record.language.clone().unwrap_or_else(|| NO_LANGUAGE.to_string()),
            ];
            self.pid_info
                .with_label_values(&[stream, description, &labels[0], &labels[1], &labels[2], &labels[3]])
                .set(1.0);
            series.pid_info.insert(labels);
        }

        if !snapshot.service.name.is_empty() {
            let labels = [
                snapshot.service.name.clone(),
                snapshot.service.provider.clone(),
                snapshot.service.kind.as_str().to_string(),
            ];
            if let Some(previous) = series.service.as_ref().filter(|p| **p != labels) {
                debug!("Service identity of {} changed to {:?}", stream, labels);
                let _ = self.service_info.remove_label_values(&[
                    stream,
                    description,
                    &previous[0],
                    &previous[1],
                    &previous[2],
                ]);
            }
            self.service_info
                .with_label_values(&[stream, description, &labels[0], &labels[1], &labels[2]])
                .set(1.0);
            series.service = Some(labels);
        }

        for record in snapshot.pids.values() {
            self.cc_errors
                .with_label_values(&[stream, description, &record.pid_hex])
                .inc_by(0);
            series.cc_pids.insert(record.pid_hex.clone());
        }
        for (pid, delta) in snapshot.cc_errors.iter().filter(|(_, d)| **d > 0) {
            let pid_hex = snapshot
                .pids
                .get(pid)
                .map_or_else(|| format!("0x{pid:04X}"), |r| r.pid_hex.clone());
            self.cc_errors
                .with_label_values(&[stream, description, &pid_hex])
                .inc_by(*delta);
            series.cc_pids.insert(pid_hex);
        }
    }

    /// Bring the drop counter of a stream up to the supervisor's total
    pub fn record_dropped(&self, target: &StreamTarget, total: u64) {
        let mut published = self.published();
        let series = published.entry(target.address.clone()).or_default();
        series.description = target.description.clone();

        let counter = self
            .dropped
            .with_label_values(&[&target.address, &target.description]);
        if total > series.dropped_total {
            counter.inc_by(total - series.dropped_total);
            series.dropped_total = total;
        }
    }

    /// Delete every series of a stream across all families
    pub fn remove_stream(&self, stream: &str) {
        let Some(series) = self.published().remove(stream) else {
            return;
        };
        let description = series.description.as_str();

        let _ = self.status.remove_label_values(&[stream, description]);
        for kind in ["total", "net"] {
            let _ = self.bitrate.remove_label_values(&[stream, description, kind]);
        }
        for class in PidClass::ALL {
            let _ = self
                .pid_count
                .remove_label_values(&[stream, description, class.as_str()]);
        }
        for [pid, class, codec, language] in &series.pid_info {
            let _ = self
                .pid_info
                .remove_label_values(&[stream, description, pid, class, codec, language]);
        }
        if let Some([name, provider, kind]) = &series.service {
            let _ = self
                .service_info
                .remove_label_values(&[stream, description, name, provider, kind]);
        }
        for pid in &series.cc_pids {
            let _ = self.cc_errors.remove_label_values(&[stream, description, pid]);
        }
        let _ = self.dropped.remove_label_values(&[stream, description]);

        debug!("Removed all series of {}", stream);
    }

    /// Streams with published series
    pub fn stream_count(&self) -> usize {
        self.published().len()
    }
}
