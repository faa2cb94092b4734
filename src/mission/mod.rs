// Mission lifecycle: ordered status transitions after a claim

mod view;

pub use view::MissionView;

#[cfg(test)]
mod tests;

use crate::agent::AgentRegistry;
use crate::engine::metrics::EngineMetrics;
use crate::error::{DispatchError, DispatchResult, EntityKind};
use crate::notify::{Audience, ChangeEvent, EventKind, Notifier, Owner};
use crate::request::{Request, RequestStatus, RequestStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Which agent-driven edges the state machine accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// accepted -> in_progress -> arrived -> working -> completed only
    Full,
    /// The full path, plus in_progress -> completed directly
    #[default]
    Collapsed,
}

impl TransitionPolicy {
    /// Check if an agent may move a mission from `from` to `to`
    pub fn allows(&self, from: RequestStatus, to: RequestStatus) -> bool {
        match (from, to) {
            (RequestStatus::Accepted, RequestStatus::InProgress) => true,
            (RequestStatus::InProgress, RequestStatus::Arrived) => true,
            (RequestStatus::Arrived, RequestStatus::Working) => true,
            (RequestStatus::Working, RequestStatus::Completed) => true,
            // Two-step product flow
            (RequestStatus::InProgress, RequestStatus::Completed) => {
                *self == TransitionPolicy::Collapsed
            }
            // Cancellation goes through the dedicated paths
            _ => false,
        }
    }
}

/// The state a caller believes the request is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expected {
    pub status: RequestStatus,
    /// When set, the stored version must match too
    #[serde(default)]
    pub version: Option<u64>,
}

impl Expected {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status,
            version: None,
        }
    }

    pub fn at_version(status: RequestStatus, version: u64) -> Self {
        Self {
            status,
            version: Some(version),
        }
    }

    fn check(&self, current: &Request) -> DispatchResult<()> {
        let version_matches = self.version.map_or(true, |v| v == current.version);
        if current.status == self.status && version_matches {
            return Ok(());
        }
        Err(DispatchError::StaleState {
            id: current.id.clone(),
            expected: self.status,
            expected_version: self.version,
            actual: current.status,
            actual_version: current.version,
        })
    }
}

/// Drives a claimed request through its lifecycle.
///
/// Every transition is a single conditional update on the request row, so a
/// transition racing a cancellation or a second device resolves to exactly
/// one winner; the loser sees `StaleState` or `InvalidTransition`.
pub struct MissionStateMachine {
    requests: Arc<RequestStore>,
    agents: Arc<AgentRegistry>,
    notifier: Arc<Notifier>,
    metrics: Arc<EngineMetrics>,
    policy: TransitionPolicy,
}

impl MissionStateMachine {
    pub fn new(
        requests: Arc<RequestStore>,
        agents: Arc<AgentRegistry>,
        notifier: Arc<Notifier>,
        metrics: Arc<EngineMetrics>,
        policy: TransitionPolicy,
    ) -> Self {
        Self {
            requests,
            agents,
            notifier,
            metrics,
            policy,
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Move the assigned agent's mission to `next`
    pub fn advance(
        &self,
        request_id: &str,
        agent_id: &str,
        expected: Expected,
        next: RequestStatus,
    ) -> DispatchResult<Request> {
        let policy = self.policy;

        let request = self.requests.update_if(
            request_id,
            |current| {
                if !current.is_assigned_to(agent_id) {
                    return Err(DispatchError::NotOwner(agent_id.to_string()));
                }
                expected.check(current)?;
                if current.is_terminal() || !policy.allows(current.status, next) {
                    return Err(DispatchError::InvalidTransition {
                        from: current.status,
                        to: next,
                    });
                }
                Ok(())
            },
            |row, now| {
                row.status = next;
                if next == RequestStatus::Completed {
                    row.completed_at = Some(now);
                }
            },
        )?;

        info!(
            request_id = %request.id,
            agent_id = %agent_id,
            from = %expected.status,
            to = %next,
            "Mission advanced"
        );

        if next == RequestStatus::Completed {
            if let Err(e) = self.agents.record_completion(agent_id, &request.id) {
                error!(
                    request_id = %request.id,
                    agent_id = %agent_id,
                    error = %e,
                    "Failed to record mission completion"
                );
            }
        }

        self.announce(&request, Audience::requester(&request.requester_id));
        Ok(request)
    }

    /// Requester withdraws a request nobody has claimed yet
    pub fn cancel_by_requester(
        &self,
        request_id: &str,
        requester_id: &str,
    ) -> DispatchResult<Request> {
        let request = self.requests.update_if(
            request_id,
            |current| {
                if current.requester_id != requester_id {
                    return Err(DispatchError::NotOwner(requester_id.to_string()));
                }
                if current.status != RequestStatus::Pending {
                    return Err(DispatchError::InvalidTransition {
                        from: current.status,
                        to: RequestStatus::Cancelled,
                    });
                }
                Ok(())
            },
            |row, now| {
                row.status = RequestStatus::Cancelled;
                row.cancelled_at = Some(now);
            },
        )?;

        info!(
            request_id = %request.id,
            requester_id = %requester_id,
            "Request cancelled by requester"
        );

        // Agents drop it from their candidate lists
        self.announce(
            &request,
            Audience::online_agents().with_requester(&request.requester_id),
        );
        Ok(request)
    }

    /// Operator-side cancellation of an accepted or in-progress mission.
    ///
    /// The assigned agent stays on the row for the record.
    pub fn cancel_external(&self, request_id: &str, reason: &str) -> DispatchResult<Request> {
        let request = self.requests.update_if(
            request_id,
            |current| match current.status {
                RequestStatus::Accepted | RequestStatus::InProgress => Ok(()),
                from => Err(DispatchError::InvalidTransition {
                    from,
                    to: RequestStatus::Cancelled,
                }),
            },
            |row, now| {
                row.status = RequestStatus::Cancelled;
                row.cancelled_at = Some(now);
            },
        )?;

        info!(request_id = %request.id, reason = %reason, "Mission cancelled");

        self.announce(&request, Audience::requester(&request.requester_id));
        Ok(request)
    }

    /// One-time 1..=5 rating of a completed mission by its requester
    pub fn rate(
        &self,
        request_id: &str,
        requester_id: &str,
        rating: u8,
    ) -> DispatchResult<Request> {
        if !(1..=5).contains(&rating) {
            return Err(DispatchError::InvalidRating(rating.into()));
        }

        let request = self.requests.write_rating(request_id, requester_id, rating)?;

        if let Some(agent_id) = request.assigned_agent_id.as_deref() {
            if let Err(e) = self.agents.record_rating(agent_id, rating) {
                error!(
                    request_id = %request.id,
                    agent_id = %agent_id,
                    error = %e,
                    "Failed to fold rating into agent aggregate"
                );
            }

            self.notifier.notify(
                &Owner::Agent(agent_id.to_string()),
                "New rating",
                &format!("A client rated your mission {}/5.", rating),
                "request_rated",
                json!({ "request_id": request.id, "rating": rating }),
            );
        }

        info!(request_id = %request.id, rating = rating, "Mission rated");

        self.notifier.publish(ChangeEvent::new(
            EventKind::RequestRated,
            EntityKind::Request,
            &request.id,
            Audience::requester(&request.requester_id)
                .with_agent(request.assigned_agent_id.as_deref()),
            serde_json::to_value(&request).unwrap_or_default(),
        ));

        Ok(request)
    }

    /// Publish `request_status_changed` and write the requester's notification row
    fn announce(&self, request: &Request, audience: Audience) {
        self.metrics.record_transition();

        let audience = audience.with_agent(request.assigned_agent_id.as_deref());
        self.notifier.publish(ChangeEvent::new(
            EventKind::RequestStatusChanged,
            EntityKind::Request,
            &request.id,
            audience,
            serde_json::to_value(request).unwrap_or_default(),
        ));

        let (title, message) = status_message(request.status);
        self.notifier.notify(
            &Owner::Requester(request.requester_id.clone()),
            title,
            message,
            "request_status",
            json!({
                "request_id": request.id,
                "status": request.status,
                "agent_id": request.assigned_agent_id,
            }),
        );
    }
}

fn status_message(status: RequestStatus) -> (&'static str, &'static str) {
    match status {
        RequestStatus::InProgress => (
            "Agent on the way",
            "Your agent is heading to the pickup point.",
        ),
        RequestStatus::Arrived => ("Agent arrived", "Your agent has arrived at the pickup point."),
        RequestStatus::Working => ("Service started", "Your agent has started the service."),
        RequestStatus::Completed => (
            "Service completed",
            "Your request is complete. You can now rate the service.",
        ),
        RequestStatus::Cancelled => ("Request cancelled", "Your request has been cancelled."),
        RequestStatus::Pending | RequestStatus::Accepted => {
            ("Request updated", "Your request status changed.")
        }
    }
}
