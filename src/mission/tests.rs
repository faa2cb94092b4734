use super::*;
use crate::assignment::AssignmentService;
use crate::geo::Coordinate;
use crate::notify::{Dispatcher, NotificationStore, SubscriptionFilter};
use crate::request::{Pricing, RequestDetails, ServiceKind};

struct Fixture {
    requests: Arc<RequestStore>,
    agents: Arc<AgentRegistry>,
    dispatcher: Arc<Dispatcher>,
    notifications: Arc<NotificationStore>,
    assignment: AssignmentService,
    missions: MissionStateMachine,
}

fn fixture(policy: TransitionPolicy) -> Fixture {
    let requests = Arc::new(RequestStore::new());
    let agents = Arc::new(AgentRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(256, Arc::clone(&agents)));
    let notifications = Arc::new(NotificationStore::new(":memory:").unwrap());
    let notifier = Arc::new(Notifier::new(
        Arc::clone(&dispatcher),
        Some(Arc::clone(&notifications)),
    ));
    let metrics = Arc::new(EngineMetrics::new());
    let assignment = AssignmentService::new(
        Arc::clone(&requests),
        Arc::clone(&agents),
        Arc::clone(&notifier),
        Arc::clone(&metrics),
        false,
    );
    let missions = MissionStateMachine::new(
        Arc::clone(&requests),
        Arc::clone(&agents),
        notifier,
        metrics,
        policy,
    );
    Fixture {
        requests,
        agents,
        dispatcher,
        notifications,
        assignment,
        missions,
    }
}

fn details() -> RequestDetails {
    RequestDetails {
        service_kind: ServiceKind::LatrineEmptying,
        pickup: Coordinate::new(14.6928, -17.4467),
        address: "Plateau, Dakar".to_string(),
        pricing: Pricing::Band {
            min: 10_000,
            max: 20_000,
        },
        notes: Some("Gate code 1234".to_string()),
    }
}

/// A request claimed by a fresh online agent: (request, agent_id)
fn claimed(f: &Fixture) -> (Request, String) {
    let agent = f.agents.register("identity", "truck", true);
    f.agents.set_online(&agent.id, true).unwrap();
    let request = f.requests.create("client-1", details()).unwrap();
    let request = f.assignment.claim(&request.id, &agent.id).unwrap();
    (request, agent.id)
}

fn step(
    f: &Fixture,
    id: &str,
    agent: &str,
    from: RequestStatus,
    to: RequestStatus,
) -> DispatchResult<Request> {
    f.missions.advance(id, agent, Expected::status(from), to)
}

#[test]
fn test_policy_edges() {
    use RequestStatus::*;

    for policy in [TransitionPolicy::Full, TransitionPolicy::Collapsed] {
        assert!(policy.allows(Accepted, InProgress));
        assert!(policy.allows(InProgress, Arrived));
        assert!(policy.allows(Arrived, Working));
        assert!(policy.allows(Working, Completed));
        // Never skip the departure step
        assert!(!policy.allows(Accepted, Completed));
        assert!(!policy.allows(Accepted, Arrived));
        assert!(!policy.allows(Working, InProgress));
        assert!(!policy.allows(Completed, Pending));
        assert!(!policy.allows(InProgress, Cancelled));
    }

    assert!(!TransitionPolicy::Full.allows(InProgress, Completed));
    assert!(TransitionPolicy::Collapsed.allows(InProgress, Completed));
}

#[test]
fn test_full_lifecycle() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Full);
    let (request, agent) = claimed(&f);

    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();
    step(&f, &request.id, &agent, InProgress, Arrived).unwrap();
    step(&f, &request.id, &agent, Arrived, Working).unwrap();
    let done = step(&f, &request.id, &agent, Working, Completed).unwrap();

    assert_eq!(done.status, Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.assigned_agent_id.as_deref(), Some(agent.as_str()));

    let stats = f.agents.get(&agent).unwrap();
    assert_eq!(stats.completed_missions, 1);
    assert_eq!(f.agents.completed_missions(&agent), vec![request.id.clone()]);
    // The slot is free again
    assert!(f.requests.active_for_agent(&agent).is_none());
}

#[test]
fn test_full_policy_rejects_shortcut() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Full);
    let (request, agent) = claimed(&f);
    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();

    let err = step(&f, &request.id, &agent, InProgress, Completed).unwrap_err();
    assert_eq!(
        err,
        DispatchError::InvalidTransition {
            from: InProgress,
            to: Completed
        }
    );
    assert_eq!(f.requests.get(&request.id).unwrap().status, InProgress);
}

#[test]
fn test_collapsed_policy_two_step_flow() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = claimed(&f);

    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();
    let done = step(&f, &request.id, &agent, InProgress, Completed).unwrap();
    assert_eq!(done.status, Completed);
}

#[test]
fn test_collapsed_policy_rejects_skipping_departure() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = claimed(&f);

    assert!(matches!(
        step(&f, &request.id, &agent, Accepted, Completed),
        Err(DispatchError::InvalidTransition { .. })
    ));
}

#[test]
fn test_only_assigned_agent_can_advance() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, _) = claimed(&f);
    let stranger = f.agents.register("other", "truck", true);

    let err = step(&f, &request.id, &stranger.id, Accepted, InProgress).unwrap_err();
    assert_eq!(err, DispatchError::NotOwner(stranger.id.clone()));
}

#[test]
fn test_stale_expected_status() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = claimed(&f);
    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();

    // Second device still thinks the mission is accepted
    let err = step(&f, &request.id, &agent, Accepted, InProgress).unwrap_err();
    assert!(matches!(
        err,
        DispatchError::StaleState {
            expected: Accepted,
            actual: InProgress,
            ..
        }
    ));
}

#[test]
fn test_stale_expected_version() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = claimed(&f);

    let err = f
        .missions
        .advance(
            &request.id,
            &agent,
            Expected::at_version(Accepted, request.version + 5),
            InProgress,
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::StaleState { .. }));

    let ok = f
        .missions
        .advance(
            &request.id,
            &agent,
            Expected::at_version(Accepted, request.version),
            InProgress,
        )
        .unwrap();
    assert_eq!(ok.version, request.version + 1);
}

#[test]
fn test_terminal_states_are_final() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = claimed(&f);
    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();
    step(&f, &request.id, &agent, InProgress, Completed).unwrap();

    for next in [Pending, Accepted, InProgress, Arrived, Working, Completed, Cancelled] {
        assert!(matches!(
            step(&f, &request.id, &agent, Completed, next),
            Err(DispatchError::InvalidTransition { .. })
        ));
    }
    assert!(matches!(
        f.missions.cancel_external(&request.id, "operator"),
        Err(DispatchError::InvalidTransition { .. })
    ));
    assert_eq!(f.requests.get(&request.id).unwrap().status, Completed);
}

#[test]
fn test_requester_cancels_pending() {
    let f = fixture(TransitionPolicy::Collapsed);
    let request = f.requests.create("client-1", details()).unwrap();

    let cancelled = f.missions.cancel_by_requester(&request.id, "client-1").unwrap();
    assert_eq!(cancelled.status, RequestStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert!(cancelled.assigned_agent_id.is_none());
}

#[test]
fn test_requester_cannot_cancel_claimed() {
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, _) = claimed(&f);

    assert_eq!(
        f.missions.cancel_by_requester(&request.id, "client-1").unwrap_err(),
        DispatchError::InvalidTransition {
            from: RequestStatus::Accepted,
            to: RequestStatus::Cancelled
        }
    );
}

#[test]
fn test_other_requester_cannot_cancel() {
    let f = fixture(TransitionPolicy::Collapsed);
    let request = f.requests.create("client-1", details()).unwrap();

    assert!(matches!(
        f.missions.cancel_by_requester(&request.id, "client-2"),
        Err(DispatchError::NotOwner(_))
    ));
}

#[test]
fn test_external_cancel_keeps_agent_and_frees_slot() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = claimed(&f);
    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();

    let cancelled = f.missions.cancel_external(&request.id, "client unreachable").unwrap();
    assert_eq!(cancelled.status, Cancelled);
    assert_eq!(cancelled.assigned_agent_id.as_deref(), Some(agent.as_str()));
    assert!(f.requests.active_for_agent(&agent).is_none());

    // The agent can take new work
    let next = f.requests.create("client-2", details()).unwrap();
    assert!(f.assignment.claim(&next.id, &agent).is_ok());
}

#[test]
fn test_external_cancel_rejected_once_arrived() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Full);
    let (request, agent) = claimed(&f);
    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();
    step(&f, &request.id, &agent, InProgress, Arrived).unwrap();

    assert!(matches!(
        f.missions.cancel_external(&request.id, "late"),
        Err(DispatchError::InvalidTransition { from: Arrived, .. })
    ));
}

fn completed(f: &Fixture) -> (Request, String) {
    use RequestStatus::*;
    let (request, agent) = claimed(f);
    step(f, &request.id, &agent, Accepted, InProgress).unwrap();
    let done = step(f, &request.id, &agent, InProgress, Completed).unwrap();
    (done, agent)
}

#[test]
fn test_rate_once() {
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = completed(&f);

    let rated = f.missions.rate(&request.id, "client-1", 4).unwrap();
    assert_eq!(rated.rating, Some(4));

    assert_eq!(
        f.missions.rate(&request.id, "client-1", 1).unwrap_err(),
        DispatchError::AlreadyRated(request.id.clone())
    );
    assert_eq!(f.requests.get(&request.id).unwrap().rating, Some(4));

    let stats = f.agents.get(&agent).unwrap();
    assert_eq!(stats.rating_count, 1);
    assert_eq!(stats.average_rating(), Some(4.0));
}

#[test]
fn test_rate_validation() {
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, _) = completed(&f);

    assert_eq!(
        f.missions.rate(&request.id, "client-1", 0).unwrap_err(),
        DispatchError::InvalidRating(0)
    );
    assert_eq!(
        f.missions.rate(&request.id, "client-1", 6).unwrap_err(),
        DispatchError::InvalidRating(6)
    );
    assert!(matches!(
        f.missions.rate(&request.id, "client-2", 5),
        Err(DispatchError::NotOwner(_))
    ));
}

#[test]
fn test_rate_requires_completion() {
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, _) = claimed(&f);

    assert!(matches!(
        f.missions.rate(&request.id, "client-1", 5),
        Err(DispatchError::InvalidRequest(_))
    ));
}

#[test]
fn test_transition_publishes_and_notifies() {
    use RequestStatus::*;
    let f = fixture(TransitionPolicy::Collapsed);
    let (request, agent) = claimed(&f);
    let mut requester = f.dispatcher.subscribe(
        SubscriptionFilter::requester("client-1").with_entity(EntityKind::Request),
    );

    step(&f, &request.id, &agent, Accepted, InProgress).unwrap();

    let event = requester.try_recv().unwrap().unwrap();
    assert_eq!(event.kind, EventKind::RequestStatusChanged);
    assert_eq!(event.payload["status"], "in_progress");

    let rows = f.notifications.list_for_recipient("client-1", false).unwrap();
    // One for the claim, one for the departure
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().any(|r| r.payload["status"] == "in_progress"));
}
