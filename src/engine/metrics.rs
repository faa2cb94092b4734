use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Sliding window for the sample rate (milliseconds)
const SAMPLE_WINDOW_MS: i64 = 5000;

/// Tracks operational counters for the dispatch engine
#[derive(Clone)]
pub struct EngineMetrics {
    claims_won: Arc<AtomicU64>,
    /// Claims that lost the race (routine contention)
    claims_contended: Arc<AtomicU64>,
    transitions: Arc<AtomicU64>,
    samples_applied: Arc<AtomicU64>,
    sample_failures: Arc<AtomicU64>,

    /// Sample timestamps for rate calculation (sliding 5-second window)
    sample_timestamps: Arc<RwLock<VecDeque<i64>>>,

    /// Agents reporting positions (agent_id -> last_sample_timestamp_ms)
    reporting_agents: Arc<RwLock<HashMap<String, i64>>>,

    websocket_connections: Arc<AtomicU64>,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            claims_won: Arc::new(AtomicU64::new(0)),
            claims_contended: Arc::new(AtomicU64::new(0)),
            transitions: Arc::new(AtomicU64::new(0)),
            samples_applied: Arc::new(AtomicU64::new(0)),
            sample_failures: Arc::new(AtomicU64::new(0)),
            sample_timestamps: Arc::new(RwLock::new(VecDeque::new())),
            reporting_agents: Arc::new(RwLock::new(HashMap::new())),
            websocket_connections: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_claim_won(&self) {
        self.claims_won.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim_contended(&self) {
        self.claims_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transition(&self) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an applied position sample for `agent_id`
    pub fn record_sample(&self, agent_id: &str) {
        self.samples_applied.fetch_add(1, Ordering::Relaxed);

        let now = Utc::now().timestamp_millis();

        if let Ok(mut timestamps) = self.sample_timestamps.write() {
            timestamps.push_back(now);
            prune_expired(&mut timestamps, now);
        }

        if let Ok(mut agents) = self.reporting_agents.write() {
            agents.insert(agent_id.to_string(), now);
        }
    }

    pub fn record_sample_failure(&self) {
        self.sample_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Samples per second over the last 5 seconds; drops to zero once sampling stops
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate_at(Utc::now().timestamp_millis())
    }

    fn sample_rate_at(&self, now: i64) -> f64 {
        self.sample_timestamps
            .write()
            .map(|mut timestamps| {
                prune_expired(&mut timestamps, now);
                timestamps.len() as f64 / (SAMPLE_WINDOW_MS as f64 / 1000.0)
            })
            .unwrap_or(0.0)
    }

    /// Agents that reported a sample within `window_seconds`
    pub fn reporting_agent_count(&self, window_seconds: i64) -> usize {
        let threshold = Utc::now().timestamp_millis() - window_seconds * 1000;
        self.reporting_agents
            .read()
            .map(|agents| agents.values().filter(|&&seen| seen > threshold).count())
            .unwrap_or(0)
    }

    pub fn increment_ws_connection(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_ws_connection(&self) {
        self.websocket_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, reporting_window_seconds: i64) -> MetricsSnapshot {
        MetricsSnapshot {
            claims_won: self.claims_won.load(Ordering::Relaxed),
            claims_contended: self.claims_contended.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            samples_applied: self.samples_applied.load(Ordering::Relaxed),
            sample_failures: self.sample_failures.load(Ordering::Relaxed),
            sample_rate: self.sample_rate(),
            reporting_agents: self.reporting_agent_count(reporting_window_seconds),
            websocket_connections: self.websocket_connections.load(Ordering::Relaxed),
            events_published: 0,
        }
    }
}

fn prune_expired(timestamps: &mut VecDeque<i64>, now: i64) {
    while timestamps
        .front()
        .is_some_and(|&oldest| now - oldest > SAMPLE_WINDOW_MS)
    {
        timestamps.pop_front();
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub claims_won: u64,
    pub claims_contended: u64,
    pub transitions: u64,
    pub samples_applied: u64,
    pub sample_failures: u64,
    pub sample_rate: f64,
    pub reporting_agents: usize,
    pub websocket_connections: u64,
    pub events_published: u64,
}
