// Composition root: one instance of every dispatch component

pub mod metrics;


use crate::agent::{Agent, AgentRegistry, PositionSample};
use crate::assignment::{AssignmentService, CandidateList};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult, EntityKind};
use crate::geo::{self, Coordinate, NavigationApp, NominatimGeocoder, NullGeocoder, ReverseGeocoder};
use crate::mission::{Expected, MissionStateMachine, MissionView};
use crate::notify::{
    Audience, ChangeEvent, Dispatcher, EventKind, Notification, NotificationStore, Notifier,
    Subscriber, SubscriptionFilter,
};
use crate::request::{Request, RequestDetails, RequestStatus, RequestStore, RequestWithDistance};
use crate::snapshot::manager::SnapshotManager;
use crate::snapshot::recovery::load_latest_snapshot;
use crate::snapshot::DispatchSnapshot;
use crate::tracking::{
    DeviceFeed, FallbackLocationSource, FixedLocationSource, LocationSource, PositionUpdater,
    TrackingSettings, TrackingSupervisor,
};
use anyhow::{Context, Result};
use dashmap::DashMap;
use self::metrics::{EngineMetrics, MetricsSnapshot};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

/// Accuracy (metres) reported with the configured fallback position
const FALLBACK_ACCURACY_M: f64 = 1000.0;

/// Owns the stores, services and tracking loops for the process lifetime.
///
/// Outer surfaces (HTTP API, WebSocket feed, snapshot manager) hold an
/// `Arc<DispatchEngine>`; nothing here is global.
pub struct DispatchEngine {
    config: DispatchConfig,
    requests: Arc<RequestStore>,
    agents: Arc<AgentRegistry>,
    notifier: Arc<Notifier>,
    metrics: Arc<EngineMetrics>,
    assignment: Arc<AssignmentService>,
    missions: MissionStateMachine,
    tracking: TrackingSupervisor,
    geocoder: Arc<dyn ReverseGeocoder>,
    /// Device readings of online agents, drained by their tracking loops
    feeds: DashMap<String, DeviceFeed>,
    /// Serialises one agent's presence flips with the start/stop of its loop
    presence_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DispatchEngine {
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let requests = Arc::new(RequestStore::with_speed(config.dispatch.average_speed_kmh));
        let agents = Arc::new(AgentRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.notifications.channel_capacity,
            Arc::clone(&agents),
        ));

        let store = NotificationStore::new(&config.notifications.database_path)
            .context("Failed to open notification store")?;
        let notifier = Arc::new(Notifier::new(dispatcher, Some(Arc::new(store))));
        let metrics = Arc::new(EngineMetrics::new());

        let assignment = Arc::new(AssignmentService::new(
            Arc::clone(&requests),
            Arc::clone(&agents),
            Arc::clone(&notifier),
            Arc::clone(&metrics),
            config.dispatch.require_verified_agents,
        ));
        let missions = MissionStateMachine::new(
            Arc::clone(&requests),
            Arc::clone(&agents),
            Arc::clone(&notifier),
            Arc::clone(&metrics),
            config.dispatch.transition_policy,
        );

        let updater = Arc::new(PositionUpdater::new(
            Arc::clone(&agents),
            Arc::clone(&requests),
            Arc::clone(&notifier),
            Arc::clone(&metrics),
        ));
        let tracking = TrackingSupervisor::new(
            updater,
            Arc::clone(&metrics),
            TrackingSettings::from(&config.tracking),
        );

        let geocoder: Arc<dyn ReverseGeocoder> = if config.geocoding.enabled {
            Arc::new(NominatimGeocoder::new(
                &config.geocoding.base_url,
                Duration::from_secs(config.geocoding.timeout_seconds),
            )?)
        } else {
            Arc::new(NullGeocoder)
        };

        info!(
            policy = ?config.dispatch.transition_policy,
            require_verified = config.dispatch.require_verified_agents,
            tracking_interval_s = config.tracking.interval_seconds,
            geocoding = config.geocoding.enabled,
            "Dispatch engine initialized"
        );

        Ok(Self {
            config,
            requests,
            agents,
            notifier,
            metrics,
            assignment,
            missions,
            tracking,
            geocoder,
            feeds: DashMap::new(),
            presence_locks: DashMap::new(),
        })
    }

    /// Swap the address lookup (tests, alternative providers)
    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = geocoder;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn requests(&self) -> &Arc<RequestStore> {
        &self.requests
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.notifier.dispatcher()
    }

    pub fn tracking(&self) -> &TrackingSupervisor {
        &self.tracking
    }

    // --- Requests ---

    /// Create a pending request and announce it to online agents.
    ///
    /// A blank address is filled by reverse geocoding the pickup point.
    pub async fn create_request(
        &self,
        requester_id: &str,
        mut details: RequestDetails,
    ) -> DispatchResult<Request> {
        details.pickup.validate()?;
        if details.address.trim().is_empty() {
            details.address = self.geocoder.reverse_geocode(details.pickup).await;
        }

        let request = self.requests.create(requester_id, details)?;

        self.notifier.publish(ChangeEvent::new(
            EventKind::RequestCreated,
            EntityKind::Request,
            &request.id,
            Audience::online_agents().with_requester(&request.requester_id),
            serde_json::to_value(&request).unwrap_or_default(),
        ));

        Ok(request)
    }

    pub fn get_request(&self, request_id: &str) -> DispatchResult<Request> {
        self.requests.get(request_id)
    }

    pub fn requests_for_requester(&self, requester_id: &str) -> Vec<Request> {
        self.requests.list_for_requester(requester_id)
    }

    /// The agent's missions, optionally narrowed to `statuses`
    pub fn missions_for_agent(
        &self,
        agent_id: &str,
        statuses: &[RequestStatus],
    ) -> DispatchResult<Vec<Request>> {
        self.agents.get(agent_id)?;
        Ok(self.requests.list_for_agent(agent_id, statuses))
    }

    /// Candidate feed for an agent, nearest first.
    ///
    /// Without an explicit origin the agent's latest position is used.
    pub fn pending_for(
        &self,
        agent_id: &str,
        origin: Option<Coordinate>,
        radius_km: Option<f64>,
    ) -> DispatchResult<Vec<RequestWithDistance>> {
        let (origin, radius_km) = self.resolve_origin(agent_id, origin, radius_km)?;
        self.assignment.pending_for(agent_id, origin, radius_km)
    }

    /// Load an agent-side candidate list that can follow live events
    pub fn candidates(
        &self,
        agent_id: &str,
        origin: Option<Coordinate>,
        radius_km: Option<f64>,
    ) -> DispatchResult<CandidateList> {
        let (origin, radius_km) = self.resolve_origin(agent_id, origin, radius_km)?;
        CandidateList::load(Arc::clone(&self.assignment), agent_id, origin, radius_km)
    }

    fn resolve_origin(
        &self,
        agent_id: &str,
        origin: Option<Coordinate>,
        radius_km: Option<f64>,
    ) -> DispatchResult<(Coordinate, f64)> {
        let origin = match origin {
            Some(origin) => origin,
            None => self
                .agents
                .get(agent_id)?
                .position
                .map(|p| p.coordinate())
                .ok_or_else(|| {
                    DispatchError::InvalidRequest(
                        "no origin given and the agent has no known position".to_string(),
                    )
                })?,
        };

        let radius_km = radius_km.unwrap_or(self.config.dispatch.default_radius_km);
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(DispatchError::InvalidRequest(format!(
                "radius must be a non-negative number of km, got {}",
                radius_km
            )));
        }

        Ok((origin, radius_km))
    }

    pub fn claim(&self, request_id: &str, agent_id: &str) -> DispatchResult<Request> {
        self.assignment.claim(request_id, agent_id)
    }

    pub fn decline(&self, request_id: &str, agent_id: &str) -> DispatchResult<()> {
        self.assignment.release(request_id, agent_id)
    }

    pub fn advance(
        &self,
        request_id: &str,
        agent_id: &str,
        expected: Expected,
        next: RequestStatus,
    ) -> DispatchResult<Request> {
        self.missions.advance(request_id, agent_id, expected, next)
    }

    pub fn cancel_by_requester(
        &self,
        request_id: &str,
        requester_id: &str,
    ) -> DispatchResult<Request> {
        self.missions.cancel_by_requester(request_id, requester_id)
    }

    pub fn cancel_external(&self, request_id: &str, reason: &str) -> DispatchResult<Request> {
        self.missions.cancel_external(request_id, reason)
    }

    pub fn rate(
        &self,
        request_id: &str,
        requester_id: &str,
        rating: u8,
    ) -> DispatchResult<Request> {
        self.missions.rate(request_id, requester_id, rating)
    }

    /// Request with the assigned agent's live distance and ETA
    pub fn mission_view(&self, request_id: &str) -> DispatchResult<MissionView> {
        let request = self.requests.get(request_id)?;
        let position = match request.assigned_agent_id.as_deref() {
            Some(agent_id) => self.agents.get(agent_id)?.position,
            None => None,
        };
        MissionView::project(request, position, self.requests.speed_kmh())
    }

    /// Deep link that opens `app` with directions to the pickup point
    pub fn navigation_link(&self, request_id: &str, app: NavigationApp) -> DispatchResult<String> {
        let request = self.requests.get(request_id)?;
        Ok(geo::deep_link(request.pickup, app))
    }

    // --- Agents ---

    pub fn register_agent(
        &self,
        identity_ref: &str,
        vehicle: &str,
        verified: bool,
    ) -> DispatchResult<Agent> {
        if identity_ref.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "identity reference is required".to_string(),
            ));
        }
        Ok(self.agents.register(identity_ref, vehicle, verified))
    }

    pub fn get_agent(&self, agent_id: &str) -> DispatchResult<Agent> {
        self.agents.get(agent_id)
    }

    pub fn list_agents(&self, online_only: bool) -> Vec<Agent> {
        if online_only {
            self.agents.list_online()
        } else {
            self.agents.all()
        }
    }

    /// Flip presence. Going online starts the agent's tracking loop, going
    /// offline stops it. The agent's mission is never touched.
    ///
    /// Concurrent flips for one agent apply in some order, and the loop
    /// always ends up running exactly when the agent is online.
    pub fn set_online(&self, agent_id: &str, online: bool) -> DispatchResult<Agent> {
        self.agents.get(agent_id)?;
        let presence = self
            .presence_locks
            .entry(agent_id.to_string())
            .or_default()
            .clone();
        let _guard = presence.lock().unwrap_or_else(PoisonError::into_inner);

        let (agent, changed) = self.agents.set_online(agent_id, online)?;

        if online {
            if !self.tracking.is_tracking(agent_id) {
                self.start_tracking(agent_id);
            }
        } else {
            self.tracking.stop(agent_id);
            self.feeds.remove(agent_id);
        }

        if changed {
            info!(agent_id = %agent_id, online = online, "Agent presence changed");
            self.notifier.publish(ChangeEvent::new(
                EventKind::AgentOnlineChanged,
                EntityKind::Agent,
                agent_id,
                Audience::agent(agent_id),
                serde_json::to_value(&agent).unwrap_or_default(),
            ));
        }

        Ok(agent)
    }

    fn start_tracking(&self, agent_id: &str) {
        let feed = DeviceFeed::new();
        let primary: Arc<dyn LocationSource> = Arc::new(feed.source());

        let source: Arc<dyn LocationSource> = match self.config.tracking.fallback_position {
            Some(position) => Arc::new(
                FallbackLocationSource::new(
                    primary,
                    Arc::new(FixedLocationSource::new(position, FALLBACK_ACCURACY_M)),
                )
                .with_primary_timeout(self.tracking.settings().sample_timeout / 2),
            ),
            None => primary,
        };

        self.feeds.insert(agent_id.to_string(), feed);
        self.tracking.start(agent_id, source);
    }

    /// Hand a device reading to the agent's tracking loop.
    ///
    /// The loop applies it on its next tick; offline agents have no loop.
    pub fn report_position(&self, agent_id: &str, sample: PositionSample) -> DispatchResult<()> {
        sample.coordinate().validate()?;
        self.agents.get(agent_id)?;

        match self.feeds.get(agent_id) {
            Some(feed) => {
                feed.push(sample);
                Ok(())
            }
            None => Err(DispatchError::AgentUnavailable(agent_id.to_string())),
        }
    }

    // --- Notifications and events ---

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscriber {
        self.notifier.dispatcher().subscribe(filter)
    }

    pub fn notifications(
        &self,
        recipient_id: &str,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        match self.notifier.store() {
            Some(store) => store.list_for_recipient(recipient_id, unread_only),
            None => Ok(Vec::new()),
        }
    }

    /// Returns false when no such notification exists
    pub fn mark_notification_read(&self, notification_id: &str) -> Result<bool> {
        match self.notifier.store() {
            Some(store) => store.mark_read(notification_id),
            None => Ok(false),
        }
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        // An agent counts as reporting if it sampled within two intervals
        let window = (self.config.tracking.interval().as_secs() * 2) as i64;
        let mut snapshot = self.metrics.snapshot(window);
        snapshot.events_published = self.notifier.dispatcher().published_count();
        snapshot
    }

    // --- Persistence and lifecycle ---

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot::capture(&self.requests, &self.agents)
    }

    pub fn snapshot_manager(&self) -> SnapshotManager {
        SnapshotManager::new(
            Arc::clone(&self.requests),
            Arc::clone(&self.agents),
            self.config.snapshot.clone(),
        )
    }

    /// Replace all state with `snapshot`. Running tracking loops are stopped
    /// since every restored agent comes back offline.
    pub fn restore(&self, snapshot: DispatchSnapshot) {
        let tracked: Vec<String> = self.feeds.iter().map(|e| e.key().clone()).collect();
        for agent_id in tracked {
            self.tracking.stop(&agent_id);
        }
        self.feeds.clear();

        snapshot.restore_into(&self.requests, &self.agents);
    }

    /// Restore the newest readable snapshot when recovery is enabled.
    ///
    /// Returns true when state was restored.
    pub fn recover(&self) -> Result<bool> {
        if !self.config.recovery.auto_recover {
            info!("Auto-recovery disabled, starting empty");
            return Ok(false);
        }

        match load_latest_snapshot(&self.config.snapshot.directory)? {
            Some(snapshot) => {
                info!(
                    requests = snapshot.request_count(),
                    agents = snapshot.agent_count(),
                    created_at = %snapshot.created_at,
                    "Restoring dispatch state from snapshot"
                );
                self.restore(snapshot);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop every tracking loop and wait for them to exit
    pub async fn shutdown(&self) {
        let active = self.tracking.active_count();
        // Closed feeds end any sample still waiting on a device
        self.feeds.clear();
        self.tracking.stop_all().await;

        info!(tracking_loops = active, "Dispatch engine stopped");
    }
}
