use super::AssignmentService;
use crate::error::{DispatchError, DispatchResult, EntityKind};
use crate::geo::Coordinate;
use crate::notify::{ChangeEvent, EventKind};
use crate::request::{Request, RequestStatus, RequestWithDistance};
use std::sync::Arc;
use tracing::debug;

/// An agent's local list of pending requests.
///
/// Losing a claim is routine: the item is dropped from the list exactly as
/// if the claim had succeeded, and the caller sees `Ok(None)`.
pub struct CandidateList {
    service: Arc<AssignmentService>,
    agent_id: String,
    origin: Coordinate,
    radius_km: f64,
    items: Vec<RequestWithDistance>,
}

impl CandidateList {
    pub fn load(
        service: Arc<AssignmentService>,
        agent_id: &str,
        origin: Coordinate,
        radius_km: f64,
    ) -> DispatchResult<Self> {
        let items = service.pending_for(agent_id, origin, radius_km)?;
        Ok(Self {
            service,
            agent_id: agent_id.to_string(),
            origin,
            radius_km,
            items,
        })
    }

    pub fn items(&self) -> &[RequestWithDistance] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.items.iter().any(|r| r.request.id == request_id)
    }

    /// Re-read the feed from the store (after a lagged subscription)
    pub fn refresh(&mut self) -> DispatchResult<()> {
        self.items = self
            .service
            .pending_for(&self.agent_id, self.origin, self.radius_km)?;
        Ok(())
    }

    /// Move the observer and re-rank
    pub fn set_origin(&mut self, origin: Coordinate) -> DispatchResult<()> {
        origin.validate()?;
        self.origin = origin;
        self.refresh()
    }

    /// Claim a listed request. `Ok(None)` when another agent won.
    pub fn claim(&mut self, request_id: &str) -> DispatchResult<Option<Request>> {
        match self.service.claim(request_id, &self.agent_id) {
            Ok(request) => {
                self.remove(request_id);
                Ok(Some(request))
            }
            Err(DispatchError::AlreadyClaimed(_)) => {
                self.remove(request_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn decline(&mut self, request_id: &str) -> DispatchResult<()> {
        self.service.release(request_id, &self.agent_id)?;
        self.remove(request_id);
        Ok(())
    }

    /// Fold a live request event into the list
    pub fn apply(&mut self, event: &ChangeEvent) -> DispatchResult<()> {
        if event.entity != EntityKind::Request {
            return Ok(());
        }
        let request: Request = match serde_json::from_value(event.payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                debug!(event_id = %event.id, error = %e, "Ignoring unreadable request payload");
                return Ok(());
            }
        };

        match event.kind {
            EventKind::RequestCreated
                if request.status == RequestStatus::Pending
                    && !self.contains(&request.id)
                    && !self.service.has_declined(&self.agent_id, &request.id) =>
            {
                let annotated =
                    self.service
                        .requests()
                        .annotate(request, self.origin, self.radius_km)?;
                self.items.push(annotated);
                self.items.sort_by(|a, b| {
                    a.distance_km
                        .total_cmp(&b.distance_km)
                        .then_with(|| a.request.created_at.cmp(&b.request.created_at))
                });
            }
            _ if request.status != RequestStatus::Pending => self.remove(&request.id),
            _ => {}
        }
        Ok(())
    }

    fn remove(&mut self, request_id: &str) {
        self.items.retain(|r| r.request.id != request_id);
    }
}
