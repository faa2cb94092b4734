// Assignment: binding exactly one agent to a pending request

mod candidates;

pub use candidates::CandidateList;


use crate::agent::AgentRegistry;
use crate::engine::metrics::EngineMetrics;
use crate::error::{DispatchError, DispatchResult, EntityKind};
use crate::geo::Coordinate;
use crate::notify::{Audience, ChangeEvent, EventKind, Notifier, Owner};
use crate::request::{Request, RequestStatus, RequestStore, RequestWithDistance};
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Assignment service: claim, decline and the per-agent candidate feed.
///
/// The request row is the unit of mutual exclusion. A claim is a single
/// conditional update on that row (`pending` and unassigned), so with any
/// number of concurrent claimants exactly one wins and every other one
/// observes `AlreadyClaimed`.
pub struct AssignmentService {
    requests: Arc<RequestStore>,
    agents: Arc<AgentRegistry>,
    notifier: Arc<Notifier>,
    metrics: Arc<EngineMetrics>,
    require_verified: bool,
    /// Per-agent claim reservations: serialise one agent's claims so the
    /// busy check and the row update cannot interleave with a second claim
    claim_locks: DashMap<String, Arc<Mutex<()>>>,
    /// agent_id -> request ids the agent declined
    declined: DashMap<String, HashSet<String>>,
}

impl AssignmentService {
    pub fn new(
        requests: Arc<RequestStore>,
        agents: Arc<AgentRegistry>,
        notifier: Arc<Notifier>,
        metrics: Arc<EngineMetrics>,
        require_verified: bool,
    ) -> Self {
        Self {
            requests,
            agents,
            notifier,
            metrics,
            require_verified,
            claim_locks: DashMap::new(),
            declined: DashMap::new(),
        }
    }

    /// Bind `agent_id` to `request_id`.
    ///
    /// Fails with `AgentUnavailable` for an offline (or unverified, when
    /// required) agent, `AgentBusy` when the agent already holds an active
    /// mission and `AlreadyClaimed` when another agent got there first.
    pub fn claim(&self, request_id: &str, agent_id: &str) -> DispatchResult<Request> {
        let agent = self.agents.get(agent_id)?;
        if !agent.online || (self.require_verified && !agent.verified) {
            return Err(DispatchError::AgentUnavailable(agent_id.to_string()));
        }

        let reservation = self
            .claim_locks
            .entry(agent_id.to_string())
            .or_default()
            .clone();
        let _guard = reservation.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(active) = self.requests.active_for_agent(agent_id) {
            return Err(DispatchError::AgentBusy {
                agent_id: agent_id.to_string(),
                request_id: active.id,
            });
        }

        let result = self.requests.update_if(
            request_id,
            |current| {
                if current.status == RequestStatus::Pending && current.assigned_agent_id.is_none() {
                    Ok(())
                } else {
                    Err(DispatchError::AlreadyClaimed(current.id.clone()))
                }
            },
            |row, now| {
                row.status = RequestStatus::Accepted;
                row.assigned_agent_id = Some(agent_id.to_string());
                row.accepted_at = Some(now);
            },
        );

        let request = match result {
            Ok(request) => request,
            Err(e) if e.is_contention() => {
                self.metrics.record_claim_contended();
                debug!(
                    request_id = %request_id,
                    agent_id = %agent_id,
                    "Claim lost to another agent"
                );
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.metrics.record_claim_won();
        self.forget_declines_of(&request.id);
        info!(
            request_id = %request.id,
            agent_id = %agent_id,
            version = request.version,
            "Request claimed"
        );

        let payload = serde_json::to_value(&request).unwrap_or_default();
        // Other online agents use this to prune their candidate lists
        let audience = Audience::online_agents()
            .with_requester(&request.requester_id)
            .with_agent(Some(agent_id));
        self.notifier.publish(ChangeEvent::new(
            EventKind::RequestClaimed,
            EntityKind::Request,
            &request.id,
            audience,
            payload,
        ));
        self.notifier.notify(
            &Owner::Requester(request.requester_id.clone()),
            "Request accepted",
            "An agent accepted your request and will be on the way shortly.",
            "request_status",
            json!({
                "request_id": request.id,
                "status": request.status,
                "agent_id": agent_id,
            }),
        );

        Ok(request)
    }

    /// Decline a request locally: it leaves this agent's candidate feed.
    ///
    /// No stored mutation and no event.
    pub fn release(&self, request_id: &str, agent_id: &str) -> DispatchResult<()> {
        self.agents.get(agent_id)?;
        self.requests.get(request_id)?;

        self.declined
            .entry(agent_id.to_string())
            .or_default()
            .insert(request_id.to_string());

        debug!(request_id = %request_id, agent_id = %agent_id, "Request declined");
        Ok(())
    }

    pub fn has_declined(&self, agent_id: &str, request_id: &str) -> bool {
        self.declined
            .get(agent_id)
            .map(|set| set.contains(request_id))
            .unwrap_or(false)
    }

    /// The agent's candidate feed: pending requests it has not declined,
    /// nearest first.
    pub fn pending_for(
        &self,
        agent_id: &str,
        origin: Coordinate,
        radius_km: f64,
    ) -> DispatchResult<Vec<RequestWithDistance>> {
        self.agents.get(agent_id)?;

        let pending = self.requests.list_pending_near(origin, radius_km)?;
        self.prune_declined(agent_id, &pending);

        Ok(pending
            .into_iter()
            .filter(|r| !self.has_declined(agent_id, &r.request.id))
            .collect())
    }

    /// Drop declines of requests that are no longer pending
    fn prune_declined(&self, agent_id: &str, pending: &[RequestWithDistance]) {
        let still_pending: HashSet<&str> = pending.iter().map(|r| r.request.id.as_str()).collect();
        if let Some(mut declined) = self.declined.get_mut(agent_id) {
            declined.retain(|id| still_pending.contains(id.as_str()));
        }
        self.declined.remove_if(agent_id, |_, declined| declined.is_empty());
    }

    /// A claimed request can never come back to anyone's feed
    fn forget_declines_of(&self, request_id: &str) {
        for mut declined in self.declined.iter_mut() {
            declined.remove(request_id);
        }
        self.declined.retain(|_, declined| !declined.is_empty());
    }

    #[cfg(test)]
    fn declined_count(&self, agent_id: &str) -> usize {
        self.declined.get(agent_id).map_or(0, |set| set.len())
    }

    pub fn requests(&self) -> &Arc<RequestStore> {
        &self.requests
    }
}
