use super::{Agent, PositionSample};
use crate::error::{DispatchError, DispatchResult};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Agent registry manages presence, latest position and statistics.
///
/// Agents are never removed; going offline is the soft retirement.
pub struct AgentRegistry {
    /// Primary storage: agent_id -> Agent
    agents: Arc<DashMap<String, Agent>>,
    /// Secondary index: agent_id -> completed request ids
    completed: Arc<DashMap<String, BTreeSet<String>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(DashMap::new()),
            completed: Arc::new(DashMap::new()),
        }
    }

    /// Register a new agent. Agents start offline.
    pub fn register(&self, identity_ref: &str, vehicle: &str, verified: bool) -> Agent {
        let now = Utc::now();
        let agent = Agent {
            id: Uuid::now_v7().to_string(),
            identity_ref: identity_ref.to_string(),
            online: false,
            verified,
            position: None,
            vehicle: vehicle.to_string(),
            rating_sum: 0,
            rating_count: 0,
            completed_missions: 0,
            registered_at: now,
            updated_at: now,
            version: 1,
        };

        self.agents.insert(agent.id.clone(), agent.clone());

        info!(
            agent_id = %agent.id,
            identity_ref = %agent.identity_ref,
            verified = agent.verified,
            "Agent registered"
        );

        agent
    }

    /// Get agent by ID
    pub fn get(&self, agent_id: &str) -> DispatchResult<Agent> {
        self.agents
            .get(agent_id)
            .map(|a| a.clone())
            .ok_or_else(|| DispatchError::agent_not_found(agent_id))
    }

    /// Set the online flag. Returns the agent and whether the flag changed.
    pub fn set_online(&self, agent_id: &str, online: bool) -> DispatchResult<(Agent, bool)> {
        self.mutate(agent_id, |agent| {
            let changed = agent.online != online;
            agent.online = online;
            changed
        })
    }

    pub fn set_verified(&self, agent_id: &str, verified: bool) -> DispatchResult<Agent> {
        self.mutate(agent_id, |agent| agent.verified = verified)
            .map(|(agent, _)| agent)
    }

    /// Overwrite the latest position with `sample`.
    ///
    /// Samples captured before the stored one are discarded (`Ok(None)`):
    /// an agent signed in on two devices must not move backwards in time.
    pub fn update_position(
        &self,
        agent_id: &str,
        sample: PositionSample,
    ) -> DispatchResult<Option<Agent>> {
        sample.coordinate().validate()?;

        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| DispatchError::agent_not_found(agent_id))?;

        if let Some(current) = agent.position {
            if sample.captured_at < current.captured_at {
                debug!(
                    agent_id = %agent_id,
                    stored = %current.captured_at,
                    received = %sample.captured_at,
                    "Discarding out-of-order position sample"
                );
                return Ok(None);
            }
        }

        agent.position = Some(sample);
        agent.updated_at = Utc::now();
        agent.version += 1;

        Ok(Some(agent.clone()))
    }

    /// All agents currently online
    pub fn list_online(&self) -> Vec<Agent> {
        self.agents
            .iter()
            .filter(|a| a.online)
            .map(|a| a.value().clone())
            .collect()
    }

    pub fn is_online(&self, agent_id: &str) -> bool {
        self.agents.get(agent_id).map(|a| a.online).unwrap_or(false)
    }

    /// Record a completed mission. Idempotent per request.
    pub fn record_completion(&self, agent_id: &str, request_id: &str) -> DispatchResult<Agent> {
        // Existence check first so the completed index never holds unknown agents
        self.get(agent_id)?;

        let newly_added = self
            .completed
            .entry(agent_id.to_string())
            .or_default()
            .insert(request_id.to_string());

        self.mutate(agent_id, |agent| {
            if newly_added {
                agent.completed_missions += 1;
            }
        })
        .map(|(agent, _)| agent)
    }

    /// Fold a 1-5 rating into the running aggregate
    pub fn record_rating(&self, agent_id: &str, rating: u8) -> DispatchResult<Agent> {
        self.mutate(agent_id, |agent| {
            agent.rating_sum += u64::from(rating);
            agent.rating_count += 1;
        })
        .map(|(agent, _)| agent)
    }

    /// Request ids this agent has completed, in id order
    pub fn completed_missions(&self, agent_id: &str) -> Vec<String> {
        self.completed
            .get(agent_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every agent
    pub fn all(&self) -> Vec<Agent> {
        self.agents.iter().map(|a| a.value().clone()).collect()
    }

    /// Replace all agents (snapshot recovery).
    ///
    /// Every restored agent comes back offline: no tracking loop survives a
    /// restart, so presence must be re-announced. The completed index is
    /// rebuilt from `completed` pairs.
    pub fn restore(&self, agents: Vec<Agent>, completed: Vec<(String, String)>) {
        self.agents.clear();
        self.completed.clear();

        for mut agent in agents {
            agent.online = false;
            self.agents.insert(agent.id.clone(), agent);
        }
        for (agent_id, request_id) in completed {
            self.completed.entry(agent_id).or_default().insert(request_id);
        }

        info!(agents = self.agents.len(), "Agent registry restored");
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn mutate<R>(
        &self,
        agent_id: &str,
        f: impl FnOnce(&mut Agent) -> R,
    ) -> DispatchResult<(Agent, R)> {
        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| DispatchError::agent_not_found(agent_id))?;

        let result = f(agent.value_mut());
        agent.updated_at = Utc::now();
        agent.version += 1;

        Ok((agent.clone(), result))
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
