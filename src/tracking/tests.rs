use super::*;
use crate::assignment::AssignmentService;
use crate::geo::Coordinate;
use crate::notify::{Dispatcher, SubscriptionFilter};
use crate::request::{Pricing, RequestDetails, ServiceKind};
use async_trait::async_trait;

struct Fixture {
    agents: Arc<AgentRegistry>,
    requests: Arc<RequestStore>,
    dispatcher: Arc<Dispatcher>,
    notifier: Arc<Notifier>,
    metrics: Arc<EngineMetrics>,
    updater: Arc<PositionUpdater>,
}

fn fixture() -> Fixture {
    let agents = Arc::new(AgentRegistry::new());
    let requests = Arc::new(RequestStore::new());
    let dispatcher = Arc::new(Dispatcher::new(256, Arc::clone(&agents)));
    let notifier = Arc::new(Notifier::new(Arc::clone(&dispatcher), None));
    let metrics = Arc::new(EngineMetrics::new());
    let updater = Arc::new(PositionUpdater::new(
        Arc::clone(&agents),
        Arc::clone(&requests),
        Arc::clone(&notifier),
        Arc::clone(&metrics),
    ));
    Fixture {
        agents,
        requests,
        dispatcher,
        notifier,
        metrics,
        updater,
    }
}

fn online_agent(f: &Fixture) -> String {
    let agent = f.agents.register("identity", "truck", true);
    f.agents.set_online(&agent.id, true).unwrap();
    agent.id
}

fn dakar() -> Coordinate {
    Coordinate::new(14.6928, -17.4467)
}

fn spawn(f: &Fixture, agent_id: &str, source: Arc<dyn LocationSource>) -> TrackingHandle {
    TrackingLoop::spawn(
        agent_id.to_string(),
        source,
        Arc::clone(&f.updater),
        Arc::clone(&f.metrics),
        TrackingSettings::default(),
    )
}

struct FailingSource(LocationError);

#[async_trait]
impl LocationSource for FailingSource {
    async fn current_position(&self) -> Result<PositionSample, LocationError> {
        Err(self.0.clone())
    }
}

struct SlowSource {
    delay: Duration,
    position: Coordinate,
}

#[async_trait]
impl LocationSource for SlowSource {
    async fn current_position(&self) -> Result<PositionSample, LocationError> {
        tokio::time::sleep(self.delay).await;
        Ok(PositionSample::new(
            self.position.latitude,
            self.position.longitude,
            5.0,
        ))
    }
}

struct HangingSource;

#[async_trait]
impl LocationSource for HangingSource {
    async fn current_position(&self) -> Result<PositionSample, LocationError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_samples_immediately_then_every_interval() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let handle = spawn(&f, &agent_id, Arc::new(FixedLocationSource::new(dakar(), 10.0)));

    tokio::time::sleep(Duration::from_secs(65)).await;

    // t = 0, 30, 60
    assert_eq!(f.metrics.snapshot(3600).samples_applied, 3);
    let position = f.agents.get(&agent_id).unwrap().position.unwrap();
    assert_eq!(position.coordinate(), dakar());

    handle.stop();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_future_ticks() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let handle = spawn(&f, &agent_id, Arc::new(FixedLocationSource::new(dakar(), 10.0)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();
    // Idempotent
    handle.stop();
    assert!(handle.is_stopped());
    handle.join().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(f.metrics.snapshot(3600).samples_applied, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_loop() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let handle = spawn(&f, &agent_id, Arc::new(FixedLocationSource::new(dakar(), 10.0)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(handle);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(f.metrics.snapshot(3600).samples_applied, 1);
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_sample_is_discarded_after_stop() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let source = Arc::new(SlowSource {
        delay: Duration::from_secs(5),
        position: dakar(),
    });
    let handle = spawn(&f, &agent_id, source);

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop();
    handle.join().await;

    assert_eq!(f.metrics.snapshot(3600).samples_applied, 0);
    assert!(f.agents.get(&agent_id).unwrap().position.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sample_errors_do_not_stop_the_loop() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let handle = spawn(
        &f,
        &agent_id,
        Arc::new(FailingSource(LocationError::PermissionDenied)),
    );

    tokio::time::sleep(Duration::from_secs(65)).await;

    assert_eq!(f.metrics.snapshot(3600).sample_failures, 3);
    assert!(!handle.is_finished());

    handle.stop();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_hanging_source_times_out() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let handle = spawn(&f, &agent_id, Arc::new(HangingSource));

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(f.metrics.snapshot(3600).sample_failures, 1);

    handle.stop();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_invalid_sample_counts_as_failure() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let handle = spawn(
        &f,
        &agent_id,
        Arc::new(FixedLocationSource::new(Coordinate::new(123.0, 0.0), 1.0)),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(f.metrics.snapshot(3600).sample_failures, 1);
    assert!(f.agents.get(&agent_id).unwrap().position.is_none());

    handle.stop();
    handle.join().await;
}

#[tokio::test]
async fn test_fallback_source_uses_secondary_on_error() {
    let source = FallbackLocationSource::new(
        Arc::new(FailingSource(LocationError::Unavailable("no gps".to_string()))),
        Arc::new(FixedLocationSource::new(dakar(), 50.0)),
    );

    let sample = source.current_position().await.unwrap();
    assert_eq!(sample.coordinate(), dakar());
    assert_eq!(sample.accuracy, 50.0);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_primary_timeout() {
    let feed = DeviceFeed::new();
    let source = FallbackLocationSource::new(
        Arc::new(feed.source()),
        Arc::new(FixedLocationSource::new(dakar(), 50.0)),
    )
    .with_primary_timeout(Duration::from_secs(5));

    // No device reading: the fixed position answers
    let sample = source.current_position().await.unwrap();
    assert_eq!(sample.coordinate(), dakar());
}

#[tokio::test]
async fn test_feed_source_returns_each_reading_once() {
    let feed = DeviceFeed::new();
    let source = feed.source();

    feed.push(PositionSample::new(14.70, -17.44, 3.0));
    let first = source.current_position().await.unwrap();
    assert_eq!(first.latitude, 14.70);

    let pending = tokio::time::timeout(Duration::from_millis(20), source.current_position()).await;
    assert!(pending.is_err(), "no fresh reading should be available");

    feed.push(PositionSample::new(14.71, -17.45, 3.0));
    let second = source.current_position().await.unwrap();
    assert_eq!(second.latitude, 14.71);
}

#[tokio::test]
async fn test_dropped_feed_is_unavailable() {
    let feed = DeviceFeed::new();
    let source = feed.source();
    drop(feed);

    assert!(matches!(
        source.current_position().await,
        Err(LocationError::Unavailable(_))
    ));
}

#[tokio::test]
async fn test_updater_projects_active_mission() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let request = f
        .requests
        .create(
            "client-1",
            RequestDetails {
                service_kind: ServiceKind::WastewaterPumping,
                pickup: Coordinate::new(14.6937, -17.4441),
                address: String::new(),
                pricing: Pricing::Fixed { amount: 25_000 },
                notes: None,
            },
        )
        .unwrap();
    let assignment = AssignmentService::new(
        Arc::clone(&f.requests),
        Arc::clone(&f.agents),
        Arc::clone(&f.notifier),
        Arc::clone(&f.metrics),
        false,
    );
    assignment.claim(&request.id, &agent_id).unwrap();
    let mut requester = f.dispatcher.subscribe(
        SubscriptionFilter::requester("client-1").with_entity(EntityKind::Agent),
    );

    let view = f
        .updater
        .apply(&agent_id, PositionSample::new(14.6928, -17.4467, 5.0))
        .unwrap()
        .expect("active mission should be projected");

    let distance = view.distance_km.unwrap();
    assert!(distance > 0.0 && distance < 2.0);
    assert_eq!(view.request.id, request.id);
    assert!(view.eta_minutes.is_some());

    let event = requester.try_recv().unwrap().unwrap();
    assert_eq!(event.kind, EventKind::AgentPositionChanged);
    assert_eq!(event.payload["mission"]["request"]["id"], request.id.as_str());
}

#[tokio::test]
async fn test_updater_discards_out_of_order_sample() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let newer = PositionSample::new(14.70, -17.44, 5.0);
    let mut older = newer;
    older.captured_at = newer.captured_at - chrono::Duration::seconds(30);

    f.updater.apply(&agent_id, newer).unwrap();
    let mut feed = f.dispatcher.subscribe(SubscriptionFilter::agent(&agent_id));
    assert!(f.updater.apply(&agent_id, older).unwrap().is_none());

    assert!(feed.try_recv().unwrap().is_none());
    assert_eq!(f.agents.get(&agent_id).unwrap().position, Some(newer));
    assert_eq!(f.metrics.snapshot(3600).samples_applied, 1);
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_start_stop() {
    let f = fixture();
    let agent_id = online_agent(&f);
    let supervisor = TrackingSupervisor::new(
        Arc::clone(&f.updater),
        Arc::clone(&f.metrics),
        TrackingSettings::default(),
    );

    supervisor.start(&agent_id, Arc::new(FixedLocationSource::new(dakar(), 10.0)));
    assert!(supervisor.is_tracking(&agent_id));

    // Starting again replaces the loop instead of adding one
    supervisor.start(&agent_id, Arc::new(FixedLocationSource::new(dakar(), 10.0)));
    assert_eq!(supervisor.active_count(), 1);

    assert!(supervisor.stop(&agent_id));
    assert!(!supervisor.stop(&agent_id));
    assert!(!supervisor.is_tracking(&agent_id));
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_stop_all() {
    let f = fixture();
    let supervisor = TrackingSupervisor::new(
        Arc::clone(&f.updater),
        Arc::clone(&f.metrics),
        TrackingSettings::default(),
    );
    for _ in 0..3 {
        let agent_id = online_agent(&f);
        supervisor.start(&agent_id, Arc::new(FixedLocationSource::new(dakar(), 10.0)));
    }

    supervisor.stop_all().await;
    assert_eq!(supervisor.active_count(), 0);

    let before = f.metrics.snapshot(3600).samples_applied;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(f.metrics.snapshot(3600).samples_applied, before);
}
