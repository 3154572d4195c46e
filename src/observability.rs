use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub started_at: Option<DateTime<Utc>>,
    pub stages: BTreeMap<String, TimingMetrics>,
    pub modules: BTreeMap<String, TimingMetrics>,
    pub skipped_stages: Vec<String>,
    pub total_duration_ms: f64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct TimingMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Stage,
    Module,
}

/// Collects stage and module timings of a pipeline run.
#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot {
                started_at: Some(Utc::now()),
                ..MetricsSnapshot::default()
            };
        }
    }

    pub fn start_stage(&self, stage_name: &str) -> Timer {
        self.start(Scope::Stage, stage_name)
    }

    pub fn start_module(&self, module_name: &str) -> Timer {
        self.start(Scope::Module, module_name)
    }

    fn start(&self, scope: Scope, name: &str) -> Timer {
        Timer {
            scope,
            name: name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_skip(&self, stage_name: &str) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.skipped_stages.push(stage_name.to_string());
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

/// Records its elapsed time into the collector when dropped.
pub struct Timer {
    scope: Scope,
    name: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl Timer {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1_000.0;
        if let Ok(mut guard) = self.collector.lock() {
            let table = match self.scope {
                Scope::Stage => &mut guard.stages,
                Scope::Module => &mut guard.modules,
            };
            let metrics = table.entry(self.name.clone()).or_default();
            metrics.calls += 1;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            scope = ?self.scope,
            name = self.name.as_str(),
            duration_ms,
            "Duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        stage_count = snapshot.stages.len(),
        skipped = ?snapshot.skipped_stages,
        "Pipeline metrics summary"
    );
    for (stage, metrics) in &snapshot.stages {
        info!(
            stage = stage.as_str(),
            total_ms = metrics.total_duration_ms,
            "Stage metrics"
        );
    }
    for (module, metrics) in &snapshot.modules {
        info!(
            module = module.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Module metrics"
        );
    }
}
