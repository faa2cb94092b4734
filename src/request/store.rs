use super::{Request, RequestDetails, RequestStatus, RequestWithDistance};
use crate::error::{DispatchError, DispatchResult};
use crate::geo::{self, Coordinate};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Request store owns every Request record.
///
/// Rows live in a sharded concurrent map. Each mutation goes through
/// [`RequestStore::update_if`], which evaluates its precondition and applies
/// the write while holding the row's exclusive shard lock, so a conditional
/// update behaves as a single-row compare-and-swap.
pub struct RequestStore {
    requests: Arc<DashMap<String, Request>>,
    /// Average speed used for ETA annotations
    speed_kmh: f64,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::with_speed(geo::DEFAULT_SPEED_KMH)
    }

    pub fn with_speed(speed_kmh: f64) -> Self {
        Self {
            requests: Arc::new(DashMap::new()),
            speed_kmh,
        }
    }

    /// Create a new pending, unassigned request
    pub fn create(&self, requester_id: &str, details: RequestDetails) -> DispatchResult<Request> {
        if requester_id.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "requester id is required".to_string(),
            ));
        }
        details.pickup.validate()?;
        details.pricing.validate()?;

        let now = Utc::now();
        let request = Request {
            id: Uuid::now_v7().to_string(),
            requester_id: requester_id.to_string(),
            service_kind: details.service_kind,
            pickup: details.pickup,
            address: details.address.trim().to_string(),
            pricing: details.pricing,
            notes: details.notes.filter(|n| !n.trim().is_empty()),
            status: RequestStatus::Pending,
            assigned_agent_id: None,
            created_at: now,
            accepted_at: None,
            completed_at: None,
            cancelled_at: None,
            updated_at: now,
            version: 1,
            rating: None,
        };

        self.requests.insert(request.id.clone(), request.clone());

        info!(
            request_id = %request.id,
            requester_id = %request.requester_id,
            service_kind = ?request.service_kind,
            "Request created"
        );

        Ok(request)
    }

    /// Get request by ID
    pub fn get(&self, id: &str) -> DispatchResult<Request> {
        self.requests
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| DispatchError::request_not_found(id))
    }

    /// All pending requests, nearest first.
    ///
    /// Nothing is filtered out by distance: `radius_km` only sets the
    /// `within_radius` flag so callers can rank or hide far-away work.
    pub fn list_pending_near(
        &self,
        origin: Coordinate,
        radius_km: f64,
    ) -> DispatchResult<Vec<RequestWithDistance>> {
        origin.validate()?;

        let mut pending = Vec::new();
        for entry in self.requests.iter() {
            let request = entry.value();
            if request.status != RequestStatus::Pending {
                continue;
            }
            pending.push(self.annotate(request.clone(), origin, radius_km)?);
        }

        pending.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.request.created_at.cmp(&b.request.created_at))
        });

        Ok(pending)
    }

    /// Attach distance and ETA from `origin` to a request
    pub fn annotate(
        &self,
        request: Request,
        origin: Coordinate,
        radius_km: f64,
    ) -> DispatchResult<RequestWithDistance> {
        let distance_km = geo::distance(origin, request.pickup)?;
        Ok(RequestWithDistance {
            request,
            distance_km,
            eta_minutes: geo::eta_at(distance_km, self.speed_kmh),
            within_radius: distance_km <= radius_km,
        })
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed_kmh
    }

    /// Requests assigned to `agent_id`, optionally restricted to `statuses`
    /// (an empty slice means every status). Newest first.
    pub fn list_for_agent(&self, agent_id: &str, statuses: &[RequestStatus]) -> Vec<Request> {
        let mut found: Vec<Request> = self
            .requests
            .iter()
            .filter(|r| r.is_assigned_to(agent_id))
            .filter(|r| statuses.is_empty() || statuses.contains(&r.status))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    /// Requests created by `requester_id`, newest first
    pub fn list_for_requester(&self, requester_id: &str) -> Vec<Request> {
        let mut found: Vec<Request> = self
            .requests
            .iter()
            .filter(|r| r.requester_id == requester_id)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }

    /// The agent's non-terminal mission, derived from request rows
    pub fn active_for_agent(&self, agent_id: &str) -> Option<Request> {
        self.requests
            .iter()
            .find(|r| r.is_assigned_to(agent_id) && r.status.is_active_mission())
            .map(|r| r.value().clone())
    }

    /// Conditional update (compare-and-swap on a single row).
    ///
    /// `condition` sees the current row and may reject it; `mutate` applies
    /// the change. Both run under the row's exclusive lock, so no other
    /// writer can interleave between the check and the write. Terminal rows
    /// are immutable: once `condition` passes, a terminal row is rejected
    /// with `InvalidTransition`. On success `version` and `updated_at` bump.
    pub fn update_if<C, M>(&self, id: &str, condition: C, mutate: M) -> DispatchResult<Request>
    where
        C: FnOnce(&Request) -> DispatchResult<()>,
        M: FnOnce(&mut Request, DateTime<Utc>),
    {
        let mut row = self
            .requests
            .get_mut(id)
            .ok_or_else(|| DispatchError::request_not_found(id))?;

        condition(row.value())?;

        if row.is_terminal() {
            return Err(DispatchError::InvalidTransition {
                from: row.status,
                to: row.status,
            });
        }

        let now = Utc::now();
        mutate(row.value_mut(), now);
        row.version += 1;
        row.updated_at = now;

        debug!(
            request_id = %id,
            status = %row.status,
            version = row.version,
            "Request updated"
        );

        Ok(row.clone())
    }

    /// One-time rating write on a completed request.
    ///
    /// The only mutation allowed on a terminal row.
    pub fn write_rating(
        &self,
        id: &str,
        requester_id: &str,
        rating: u8,
    ) -> DispatchResult<Request> {
        let mut row = self
            .requests
            .get_mut(id)
            .ok_or_else(|| DispatchError::request_not_found(id))?;

        if row.requester_id != requester_id {
            return Err(DispatchError::NotOwner(requester_id.to_string()));
        }
        if row.status != RequestStatus::Completed {
            return Err(DispatchError::InvalidRequest(format!(
                "only completed requests can be rated (status is {})",
                row.status
            )));
        }
        if row.rating.is_some() {
            return Err(DispatchError::AlreadyRated(id.to_string()));
        }

        row.rating = Some(rating);
        row.version += 1;
        row.updated_at = Utc::now();

        Ok(row.clone())
    }

    /// Snapshot of every stored request
    pub fn all(&self) -> Vec<Request> {
        self.requests.iter().map(|r| r.value().clone()).collect()
    }

    /// Replace all rows (snapshot recovery)
    pub fn restore(&self, requests: Vec<Request>) {
        self.requests.clear();
        for request in requests {
            self.requests.insert(request.id.clone(), request);
        }
        info!(requests = self.requests.len(), "Request store restored");
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl Default for RequestStore {
    fn default() -> Self {
        Self::new()
    }
}
