//! Agent directory service
//!
//! Holds the registered agents in registration order and serializes metric
//! updates. A directory is constructed explicitly and shared by handle; it
//! optionally writes every metrics change through to an [`AgentStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::{Agent, SkillLevel, TaskOutcome};
use crate::{Error, Result};

/// Durable sink for the consolidated agent registry
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Replace the persisted registry with the given snapshot
    async fn save_agents(&self, agents: &[Agent]) -> Result<()>;
}

/// Registry-wide aggregate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryStats {
    pub total_agents: usize,
    pub total_tasks: u64,
    pub total_cost: f64,
    pub skill_distribution: BTreeMap<SkillLevel, usize>,
}

/// Shared, insertion-ordered agent directory
#[derive(Clone)]
pub struct AgentDirectory {
    agents: Arc<RwLock<Vec<Agent>>>,
    store: Option<Arc<dyn AgentStore>>,
}

impl std::fmt::Debug for AgentDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDirectory")
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for AgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentDirectory {
    /// Create an empty, memory-only directory
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(Vec::new())),
            store: None,
        }
    }

    /// Create a directory from already-validated agents.
    ///
    /// A later agent with a duplicate name replaces the earlier one in place.
    pub fn from_agents(agents: Vec<Agent>) -> Self {
        let mut ordered: Vec<Agent> = Vec::with_capacity(agents.len());
        for agent in agents {
            match ordered.iter_mut().find(|a| a.name == agent.name) {
                Some(existing) => *existing = agent,
                None => ordered.push(agent),
            }
        }
        Self {
            agents: Arc::new(RwLock::new(ordered)),
            store: None,
        }
    }

    /// Write metrics changes through to the given store
    pub fn with_store(mut self, store: Arc<dyn AgentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register or replace an agent definition
    pub async fn register(&self, agent: Agent) -> Result<()> {
        agent.validate()?;
        let mut agents = self.agents.write().await;
        match agents.iter_mut().find(|a| a.name == agent.name) {
            Some(existing) => {
                debug!("Replacing agent definition: {}", agent.name);
                *existing = agent;
            }
            None => {
                info!("Registered agent: {}", agent.name);
                agents.push(agent);
            }
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Agent> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.name == name)
            .cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.agents.read().await.iter().any(|a| a.name == name)
    }

    /// Snapshot of all agents in registration order
    pub async fn agents(&self) -> Vec<Agent> {
        self.agents.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.agents.read().await.is_empty()
    }

    /// Agents declaring the capability, in registration order
    pub async fn find_by_capability(&self, capability: &str) -> Vec<Agent> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|a| a.has_capability(capability))
            .cloned()
            .collect()
    }

    /// Fold a finished task into one agent's metrics and apply promotion.
    ///
    /// The whole read-modify-write, including the write-through to the store,
    /// happens under the directory write lock, so concurrent callers observe
    /// each update either fully or not at all and snapshots reach the store
    /// in update order. Returns the new tier when the agent was promoted.
    ///
    /// A failed write-through is logged and does not undo the update; the
    /// next successful save carries the full snapshot.
    pub async fn update_metrics(
        &self,
        agent_name: &str,
        outcome: TaskOutcome,
    ) -> Result<Option<SkillLevel>> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .iter_mut()
            .find(|a| a.name == agent_name)
            .ok_or_else(|| Error::not_found("Agent", agent_name))?;

        let promoted = agent.record_outcome(&outcome);
        debug!(
            agent = agent_name,
            success = outcome.success,
            total_tasks = agent.metrics.total_tasks,
            success_rate = agent.metrics.success_rate(),
            "Updated agent metrics"
        );
        if let Some(level) = promoted {
            info!("Agent {} promoted to {}", agent_name, level);
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.save_agents(&agents).await {
                warn!("Failed to persist metrics for agent {}: {}", agent_name, e);
            }
        }
        Ok(promoted)
    }

    pub async fn stats(&self) -> DirectoryStats {
        let agents = self.agents.read().await;
        let mut skill_distribution = BTreeMap::new();
        for level in [
            SkillLevel::Novice,
            SkillLevel::Intermediate,
            SkillLevel::Expert,
            SkillLevel::Master,
        ] {
            skill_distribution.insert(
                level,
                agents.iter().filter(|a| a.skill_level == level).count(),
            );
        }
        DirectoryStats {
            total_agents: agents.len(),
            total_tasks: agents.iter().map(|a| a.metrics.total_tasks).sum(),
            total_cost: agents.iter().map(|a| a.metrics.total_cost).sum(),
            skill_distribution,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::default_roster;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        saves: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl AgentStore for RecordingStore {
        async fn save_agents(&self, agents: &[Agent]) -> Result<()> {
            let total: u64 = agents.iter().map(|a| a.metrics.total_tasks).sum();
            self.saves.lock().unwrap().push(total as usize);
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl AgentStore for FailingStore {
        async fn save_agents(&self, _agents: &[Agent]) -> Result<()> {
            Err(Error::Io("disk full".into()))
        }
    }

    fn outcome(success: bool) -> TaskOutcome {
        TaskOutcome::new(success, 10, 0.5, 2.0)
    }

    #[tokio::test]
    async fn test_registration_order_and_replacement() {
        let directory = AgentDirectory::from_agents(default_roster());
        assert_eq!(directory.len().await, 6);

        let replacement = Agent::builder()
            .name("tester")
            .capability("testing")
            .capability("rust")
            .build()
            .unwrap();
        directory.register(replacement).await.unwrap();

        let names: Vec<String> = directory.agents().await.into_iter().map(|a| a.name).collect();
        assert_eq!(names[2], "tester");
        assert_eq!(names.len(), 6);
        assert!(directory.get("tester").await.unwrap().has_capability("rust"));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_agent() {
        let directory = AgentDirectory::new();
        let mut agent = default_roster().remove(0);
        agent.capabilities.clear();
        assert!(directory.register(agent).await.is_err());
        assert!(directory.is_empty().await);
    }

    #[tokio::test]
    async fn test_update_metrics_and_promotion() {
        let directory = AgentDirectory::from_agents(default_roster());
        for _ in 0..4 {
            assert_eq!(
                directory.update_metrics("tester", outcome(true)).await.unwrap(),
                None
            );
        }
        assert_eq!(
            directory.update_metrics("tester", outcome(true)).await.unwrap(),
            Some(SkillLevel::Intermediate)
        );

        let tester = directory.get("tester").await.unwrap();
        assert_eq!(tester.metrics.total_tasks, 5);
        assert_eq!(tester.success_rate(), 100.0);
        assert!((tester.metrics.total_cost - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_update_metrics_unknown_agent() {
        let directory = AgentDirectory::new();
        let err = directory
            .update_metrics("ghost", outcome(true))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(RecordingStore::default());
        let directory = AgentDirectory::from_agents(default_roster()).with_store(store.clone());

        let mut handles = Vec::new();
        for i in 0..20 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                directory
                    .update_metrics("code_writer", outcome(i % 2 == 0))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let writer = directory.get("code_writer").await.unwrap();
        assert_eq!(writer.metrics.total_tasks, 20);
        assert_eq!(writer.metrics.successful_tasks, 10);
        assert_eq!(writer.metrics.failed_tasks, 10);

        let saves = store.saves.lock().unwrap().clone();
        assert_eq!(saves, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_store_failure_keeps_update_and_promotion() {
        let directory =
            AgentDirectory::from_agents(default_roster()).with_store(Arc::new(FailingStore));
        for _ in 0..4 {
            directory.update_metrics("tester", outcome(true)).await.unwrap();
        }
        assert_eq!(
            directory.update_metrics("tester", outcome(true)).await.unwrap(),
            Some(SkillLevel::Intermediate)
        );

        let tester = directory.get("tester").await.unwrap();
        assert_eq!(tester.metrics.total_tasks, 5);
        assert_eq!(tester.skill_level, SkillLevel::Intermediate);
    }

    #[tokio::test]
    async fn test_find_by_capability_and_stats() {
        let directory = AgentDirectory::from_agents(default_roster());
        let documenters: Vec<String> = directory
            .find_by_capability("Documentation")
            .await
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(documenters, vec!["researcher", "docs_writer"]);

        directory
            .update_metrics("researcher", outcome(false))
            .await
            .unwrap();
        let stats = directory.stats().await;
        assert_eq!(stats.total_agents, 6);
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.skill_distribution[&SkillLevel::Novice], 6);
        assert_eq!(stats.skill_distribution[&SkillLevel::Master], 0);
    }
}
