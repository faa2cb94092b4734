// Periodic position sampling for online agents

mod source;
mod supervisor;

pub use source::{
    DeviceFeed, FallbackLocationSource, FeedLocationSource, FixedLocationSource, LocationError,
    LocationSource,
};
pub use supervisor::TrackingSupervisor;

#[cfg(test)]
mod tests;

use crate::agent::{AgentRegistry, PositionSample};
use crate::config::TrackingConfig;
use crate::engine::metrics::EngineMetrics;
use crate::error::{DispatchResult, EntityKind};
use crate::mission::MissionView;
use crate::notify::{Audience, ChangeEvent, EventKind, Notifier};
use crate::request::RequestStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Sampling cadence for one tracking loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackingSettings {
    pub interval: Duration,
    /// Upper bound on a single sample; exceeding it counts as `Timeout`
    pub sample_timeout: Duration,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            sample_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&TrackingConfig> for TrackingSettings {
    fn from(config: &TrackingConfig) -> Self {
        Self {
            interval: config.interval(),
            sample_timeout: config.sample_timeout(),
        }
    }
}

/// Applies position samples: registry write, mission projection, event.
pub struct PositionUpdater {
    agents: Arc<AgentRegistry>,
    requests: Arc<RequestStore>,
    notifier: Arc<Notifier>,
    metrics: Arc<EngineMetrics>,
}

impl PositionUpdater {
    pub fn new(
        agents: Arc<AgentRegistry>,
        requests: Arc<RequestStore>,
        notifier: Arc<Notifier>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            agents,
            requests,
            notifier,
            metrics,
        }
    }

    /// Store `sample` as the agent's latest position.
    ///
    /// Returns the enriched view of the agent's active mission, if any.
    /// Out-of-order samples are discarded and produce no event.
    pub fn apply(
        &self,
        agent_id: &str,
        sample: PositionSample,
    ) -> DispatchResult<Option<MissionView>> {
        let Some(agent) = self.agents.update_position(agent_id, sample)? else {
            return Ok(None);
        };
        self.metrics.record_sample(agent_id);

        let mission = match self.requests.active_for_agent(agent_id) {
            Some(request) => Some(MissionView::project(
                request,
                agent.position,
                self.requests.speed_kmh(),
            )?),
            None => None,
        };

        let mut audience = Audience::agent(agent_id);
        if let Some(view) = &mission {
            audience = audience.with_requester(&view.request.requester_id);
        }

        self.notifier.publish(ChangeEvent::new(
            EventKind::AgentPositionChanged,
            EntityKind::Agent,
            agent_id,
            audience,
            json!({
                "agent_id": agent_id,
                "position": sample,
                "mission": mission,
            }),
        ));

        Ok(mission)
    }
}

/// Spawns the per-agent sampling task
pub struct TrackingLoop;

impl TrackingLoop {
    /// Start sampling `source` for `agent_id` every `settings.interval`.
    ///
    /// The first sample is taken immediately.
    pub fn spawn(
        agent_id: String,
        source: Arc<dyn LocationSource>,
        updater: Arc<PositionUpdater>,
        metrics: Arc<EngineMetrics>,
        settings: TrackingSettings,
    ) -> TrackingHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let loop_agent = agent_id.clone();

        let task = tokio::spawn(async move {
            Self::run(loop_agent, source, updater, metrics, settings, stop_rx).await;
        });

        TrackingHandle {
            agent_id,
            stop_tx,
            task,
        }
    }

    async fn run(
        agent_id: String,
        source: Arc<dyn LocationSource>,
        updater: Arc<PositionUpdater>,
        metrics: Arc<EngineMetrics>,
        settings: TrackingSettings,
        mut stop: watch::Receiver<bool>,
    ) {
        info!(
            agent_id = %agent_id,
            interval_secs = settings.interval.as_secs(),
            "Tracking started"
        );

        let mut ticker = interval(settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    // A dropped handle stops the loop too
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            // The sample is never aborted by a stop request
            let result = timeout(settings.sample_timeout, source.current_position())
                .await
                .unwrap_or(Err(LocationError::Timeout));

            if *stop.borrow() {
                debug!(agent_id = %agent_id, "Discarding sample taken after stop");
                break;
            }

            match result {
                Ok(sample) => {
                    if let Err(e) = updater.apply(&agent_id, sample) {
                        metrics.record_sample_failure();
                        warn!(agent_id = %agent_id, error = %e, "Position sample rejected");
                    }
                }
                Err(e) => {
                    metrics.record_sample_failure();
                    warn!(agent_id = %agent_id, error = %e, "Position sample failed");
                }
            }
        }

        info!(agent_id = %agent_id, "Tracking stopped");
    }
}

/// Control handle for a running tracking loop
pub struct TrackingHandle {
    agent_id: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrackingHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Prevent future ticks. Idempotent; an in-flight sample finishes and is
    /// discarded.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit
    pub async fn join(self) {
        let TrackingHandle {
            agent_id,
            stop_tx,
            task,
        } = self;

        if let Err(e) = task.await {
            error!(agent_id = %agent_id, error = %e, "Tracking task failed");
        }
        drop(stop_tx);
    }
}
