use super::*;
use crate::agent::PositionSample;
use crate::geo::Coordinate;
use crate::request::{Pricing, RequestDetails, RequestStatus, ServiceKind};
use tempfile::TempDir;

fn details() -> RequestDetails {
    RequestDetails {
        service_kind: ServiceKind::GreaseTrapCleaning,
        pickup: Coordinate::new(14.7167, -17.4677),
        address: "Almadies".to_string(),
        pricing: Pricing::Band {
            min: 30_000,
            max: 45_000,
        },
        notes: None,
    }
}

/// Stores with one pending request, one completed mission and an online agent
fn populated() -> (RequestStore, AgentRegistry, String, String) {
    let requests = RequestStore::new();
    let agents = AgentRegistry::new();

    let agent = agents.register("identity-1", "vacuum truck", true);
    agents.set_online(&agent.id, true).unwrap();
    agents
        .update_position(&agent.id, PositionSample::new(14.70, -17.45, 8.0))
        .unwrap();

    requests.create("client-1", details()).unwrap();
    let done = requests.create("client-2", details()).unwrap();
    requests
        .update_if(
            &done.id,
            |_| Ok(()),
            |row, now| {
                row.status = RequestStatus::Completed;
                row.assigned_agent_id = Some(agent.id.clone());
                row.accepted_at = Some(now);
                row.completed_at = Some(now);
            },
        )
        .unwrap();
    agents.record_completion(&agent.id, &done.id).unwrap();

    (requests, agents, agent.id, done.id)
}

#[test]
fn test_capture_counts() {
    let (requests, agents, agent_id, done_id) = populated();
    let snapshot = DispatchSnapshot::capture(&requests, &agents);

    assert_eq!(snapshot.snapshot_version, SNAPSHOT_VERSION);
    assert_eq!(snapshot.request_count(), 2);
    assert_eq!(snapshot.agent_count(), 1);
    assert_eq!(snapshot.completed, vec![(agent_id, done_id)]);
}

#[test]
fn test_save_load_restore() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("snapshot-test.json.gz");
    let (requests, agents, agent_id, done_id) = populated();

    DispatchSnapshot::capture(&requests, &agents)
        .save_to_file(&path)
        .unwrap();
    assert!(path.exists());
    assert!(!temp_dir.path().join("snapshot-test.json.tmp").exists());

    let restored_requests = RequestStore::new();
    let restored_agents = AgentRegistry::new();
    DispatchSnapshot::load_from_file(&path)
        .unwrap()
        .restore_into(&restored_requests, &restored_agents);

    let mut original = requests.all();
    let mut restored = restored_requests.all();
    original.sort_by(|a, b| a.id.cmp(&b.id));
    restored.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(original, restored);

    let agent = restored_agents.get(&agent_id).unwrap();
    // No tracking loop survives a restart
    assert!(!agent.online);
    assert_eq!(agent.completed_missions, 1);
    assert!(agent.position.is_some());
    assert_eq!(restored_agents.completed_missions(&agent_id), vec![done_id]);
}

#[test]
fn test_restore_replaces_existing_rows() {
    let (requests, agents, _, _) = populated();
    let empty = DispatchSnapshot::capture(&RequestStore::new(), &AgentRegistry::new());

    empty.restore_into(&requests, &agents);

    assert!(requests.is_empty());
    assert!(agents.is_empty());
}

#[test]
fn test_unknown_version_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("snapshot-future.json.gz");
    let (requests, agents, _, _) = populated();

    let mut snapshot = DispatchSnapshot::capture(&requests, &agents);
    snapshot.snapshot_version = "99".to_string();
    snapshot.save_to_file(&path).unwrap();

    let err = DispatchSnapshot::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("Unsupported snapshot version 99"));
}

#[test]
fn test_plain_json_is_not_a_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("snapshot-plain.json.gz");
    let (requests, agents, _, _) = populated();

    let snapshot = DispatchSnapshot::capture(&requests, &agents);
    std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

    assert!(DispatchSnapshot::load_from_file(&path).is_err());
}

#[test]
fn test_load_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    assert!(DispatchSnapshot::load_from_file(&temp_dir.path().join("missing.json.gz")).is_err());
}
