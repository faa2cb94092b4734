use super::{LocationSource, PositionUpdater, TrackingHandle, TrackingLoop, TrackingSettings};
use crate::engine::metrics::EngineMetrics;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Owns one tracking loop per online agent
pub struct TrackingSupervisor {
    loops: DashMap<String, TrackingHandle>,
    updater: Arc<PositionUpdater>,
    metrics: Arc<EngineMetrics>,
    settings: TrackingSettings,
}

impl TrackingSupervisor {
    pub fn new(
        updater: Arc<PositionUpdater>,
        metrics: Arc<EngineMetrics>,
        settings: TrackingSettings,
    ) -> Self {
        Self {
            loops: DashMap::new(),
            updater,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> TrackingSettings {
        self.settings
    }

    pub fn updater(&self) -> &Arc<PositionUpdater> {
        &self.updater
    }

    /// Start tracking `agent_id`, replacing any loop already running for it
    pub fn start(&self, agent_id: &str, source: Arc<dyn LocationSource>) {
        let handle = TrackingLoop::spawn(
            agent_id.to_string(),
            source,
            Arc::clone(&self.updater),
            Arc::clone(&self.metrics),
            self.settings,
        );

        if let Some(previous) = self.loops.insert(agent_id.to_string(), handle) {
            previous.stop();
            info!(agent_id = %agent_id, "Replaced existing tracking loop");
        }
    }

    /// Stop the agent's loop. Returns false when none was running.
    pub fn stop(&self, agent_id: &str) -> bool {
        match self.loops.remove(agent_id) {
            Some((_, handle)) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every loop and wait for all of them to exit (shutdown)
    pub async fn stop_all(&self) {
        let agent_ids: Vec<String> = self.loops.iter().map(|e| e.key().clone()).collect();

        let mut handles = Vec::with_capacity(agent_ids.len());
        for agent_id in agent_ids {
            if let Some((_, handle)) = self.loops.remove(&agent_id) {
                handle.stop();
                handles.push(handle);
            }
        }

        let count = handles.len();
        for handle in handles {
            handle.join().await;
        }

        info!(stopped = count, "All tracking loops stopped");
    }

    pub fn is_tracking(&self, agent_id: &str) -> bool {
        self.loops
            .get(agent_id)
            .map(|h| !h.is_stopped() && !h.is_finished())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.loops.len()
    }
}
