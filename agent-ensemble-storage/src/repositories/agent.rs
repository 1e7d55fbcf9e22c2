//! Agent repository implementation
//!
//! Agents live in two places: definition documents (markdown with a YAML
//! front-matter block, or plain YAML) that people edit by hand, and a JSON
//! registry keyed by agent name that also carries the rolling metrics.
//! Loading merges the definitions over the registry so metrics survive
//! definition edits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use agent_ensemble_core::agent::{default_roster, Agent, SkillLevel, DEFAULT_MODEL};
use agent_ensemble_core::directory::AgentStore;

use crate::files::{list_files, stem, write_atomic};
use crate::{Error, Result};

/// Tool allow-list written either as a YAML list or a comma separated string
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolList {
    List(Vec<String>),
    Inline(String),
}

impl Default for ToolList {
    fn default() -> Self {
        ToolList::List(Vec::new())
    }
}

impl ToolList {
    fn into_vec(self) -> Vec<String> {
        match self {
            ToolList::List(tools) => tools,
            ToolList::Inline(tools) => tools
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionDocument {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    role: String,
    #[serde(default, alias = "allowed_tools")]
    tools: ToolList,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    instructions: String,
    model: Option<String>,
    skill_level: Option<SkillLevel>,
}

/// Split a markdown document into its front-matter and body
fn split_front_matter(document: &str) -> Option<(&str, &str)> {
    let rest = document.trim_start_matches('\u{feff}');
    let rest = rest
        .strip_prefix("---\r\n")
        .or_else(|| rest.strip_prefix("---\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let header = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((header, body));
        }
        offset += line.len();
    }
    None
}

/// Parse one agent definition document.
///
/// Markdown documents must open with a `---` delimited YAML block; the body
/// becomes the instruction text. Anything else is read as plain YAML. The
/// file stem is used when the document does not name the agent.
pub fn parse_definition(document: &str, fallback_name: &str) -> Result<Agent> {
    let (header, body) = match split_front_matter(document) {
        Some((header, body)) => (header, Some(body.trim())),
        None => (document, None),
    };
    let definition: DefinitionDocument = serde_yaml::from_str(header)?;

    let instructions = match body {
        Some(body) if !body.is_empty() => body.to_string(),
        _ => definition.instructions,
    };
    let name = definition
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| fallback_name.to_string());

    let mut agent = Agent::builder()
        .name(name)
        .description(definition.description)
        .role(definition.role)
        .tools(definition.tools.into_vec())
        .capabilities(definition.capabilities)
        .instructions(instructions)
        .model(definition.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()))
        .build()?;
    if let Some(level) = definition.skill_level {
        agent.skill_level = level;
    }
    Ok(agent)
}

/// Overlay a definition onto a registry entry, keeping its track record
fn merge_definition(existing: &mut Agent, definition: Agent) {
    let metrics = std::mem::take(&mut existing.metrics);
    let skill_level = existing.skill_level.max(definition.skill_level);
    *existing = definition;
    existing.metrics = metrics;
    existing.skill_level = skill_level;
}

/// Repository for agent definitions and the metrics registry
pub struct AgentRepository {
    definitions_dir: PathBuf,
    registry_path: PathBuf,
    write_lock: Mutex<()>,
}

impl AgentRepository {
    /// Create a new agent repository
    pub fn new<P1: Into<PathBuf>, P2: Into<PathBuf>>(definitions_dir: P1, registry_path: P2) -> Self {
        Self {
            definitions_dir: definitions_dir.into(),
            registry_path: registry_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn definitions_dir(&self) -> &Path {
        &self.definitions_dir
    }

    pub fn registry_path(&self) -> &Path {
        &self.registry_path
    }

    /// Registry entries in name order; a missing registry is empty
    pub async fn load_registry(&self) -> Result<Vec<Agent>> {
        let contents = match tokio::fs::read_to_string(&self.registry_path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let registry: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)
            .map_err(|e| Error::invalid_document(&self.registry_path, e.to_string()))?;

        let mut agents = Vec::with_capacity(registry.len());
        for (key, value) in registry {
            let parsed = serde_json::from_value::<Agent>(value)
                .map_err(Error::from)
                .and_then(|agent| {
                    agent.validate()?;
                    Ok(agent)
                });
            match parsed {
                Ok(mut agent) => {
                    if agent.name != key {
                        debug!("Registry key '{}' differs from agent name '{}'", key, agent.name);
                        agent.name = key;
                    }
                    agents.push(agent);
                }
                Err(e) => warn!("Skipping invalid registry entry '{}': {}", key, e),
            }
        }
        Ok(agents)
    }

    /// Definition documents in file name order. Documents that fail to parse
    /// or validate are logged and skipped.
    pub async fn load_definitions(&self) -> Result<Vec<Agent>> {
        let files = list_files(&self.definitions_dir, &["md", "yaml", "yml"]).await?;
        let mut agents: Vec<Agent> = Vec::with_capacity(files.len());
        for path in files {
            let document = match tokio::fs::read_to_string(&path).await {
                Ok(document) => document,
                Err(e) => {
                    warn!("Failed to read agent definition {}: {}", path.display(), e);
                    continue;
                }
            };
            match parse_definition(&document, &stem(&path)) {
                Ok(agent) => {
                    debug!("Loaded agent definition '{}' from {}", agent.name, path.display());
                    match agents.iter_mut().find(|a| a.name == agent.name) {
                        Some(existing) => *existing = agent,
                        None => agents.push(agent),
                    }
                }
                Err(e) => warn!("Skipping agent definition {}: {}", path.display(), e),
            }
        }
        Ok(agents)
    }

    /// Consolidated agent list: registry entries first, definitions merged
    /// over them, new definitions appended. An empty result is seeded with the
    /// built-in roster and persisted.
    pub async fn load(&self) -> Result<Vec<Agent>> {
        let mut agents = self.load_registry().await?;
        for definition in self.load_definitions().await? {
            match agents.iter_mut().find(|a| a.name == definition.name) {
                Some(existing) => merge_definition(existing, definition),
                None => agents.push(definition),
            }
        }

        if agents.is_empty() {
            info!("Agent registry is empty, seeding the default roster");
            agents = default_roster();
            self.save(&agents).await?;
        }
        info!("Loaded {} agents", agents.len());
        Ok(agents)
    }

    /// Rewrite the registry document from a snapshot
    pub async fn save(&self, agents: &[Agent]) -> Result<()> {
        let registry: BTreeMap<&str, &Agent> =
            agents.iter().map(|a| (a.name.as_str(), a)).collect();
        let contents = serde_json::to_vec_pretty(&registry)?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&self.registry_path, &contents).await?;
        debug!("Saved {} agents to {}", agents.len(), self.registry_path.display());
        Ok(())
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Agent>> {
        Ok(self.load().await?.into_iter().find(|a| a.name == name))
    }

    /// Write a definition document for an agent as markdown with front-matter
    pub async fn save_definition(&self, agent: &Agent) -> Result<PathBuf> {
        #[derive(serde::Serialize)]
        struct Header<'a> {
            name: &'a str,
            description: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            role: Option<&'a str>,
            tools: &'a [String],
            capabilities: &'a [String],
            model: &'a str,
        }

        let header = serde_yaml::to_string(&Header {
            name: &agent.name,
            description: &agent.description,
            role: (!agent.role.is_empty()).then_some(agent.role.as_str()),
            tools: &agent.tools,
            capabilities: &agent.capabilities,
            model: &agent.model,
        })?;
        let document = format!("---\n{}---\n\n{}\n", header, agent.instructions);
        let path = self.definitions_dir.join(format!("{}.md", agent.name));
        write_atomic(&path, document.as_bytes()).await?;
        info!("Wrote agent definition {}", path.display());
        Ok(path)
    }

    /// Remove an agent from the registry
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut agents = self.load_registry().await?;
        let before = agents.len();
        agents.retain(|a| a.name != name);
        if agents.len() == before {
            return Err(Error::not_found("Agent", name));
        }
        self.save(&agents).await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }
}

#[async_trait]
impl AgentStore for AgentRepository {
    async fn save_agents(&self, agents: &[Agent]) -> agent_ensemble_core::Result<()> {
        self.save(agents).await.map_err(Into::into)
    }
}
