//! Workflow template repository implementation
//!
//! Three directories of YAML documents: the shipped system templates, a
//! `custom` directory whose entries shadow system templates of the same name,
//! and a `learned` directory of synthesized candidates awaiting review.
//! Only custom and learned templates are ever written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use agent_ensemble_core::workflow::{match_templates, TemplateMatch, WorkflowTemplate};

use crate::files::{list_files, write_atomic};
use crate::Result;

/// Where a template was loaded from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TemplateSource {
    System,
    Custom,
    Learned,
}

impl TemplateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateSource::System => "system",
            TemplateSource::Custom => "custom",
            TemplateSource::Learned => "learned",
        }
    }
}

/// Template store aggregate
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TemplateStats {
    pub total_templates: usize,
    pub system_templates: usize,
    pub custom_templates: usize,
    pub learned_templates: usize,
    pub total_usage: u64,
    /// Mean of the templates' success rates
    pub avg_success_rate: f64,
    pub by_priority: BTreeMap<String, usize>,
    pub by_tag: BTreeMap<String, usize>,
}

/// Repository for workflow templates
pub struct TemplateRepository {
    system_dir: PathBuf,
    custom_dir: PathBuf,
    learned_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl TemplateRepository {
    /// Create a new template repository. Custom templates live in
    /// `<system_dir>/custom`.
    pub fn new<P1: Into<PathBuf>, P2: Into<PathBuf>>(system_dir: P1, learned_dir: P2) -> Self {
        let system_dir = system_dir.into();
        Self {
            custom_dir: system_dir.join("custom"),
            system_dir,
            learned_dir: learned_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self, source: TemplateSource) -> &Path {
        match source {
            TemplateSource::System => &self.system_dir,
            TemplateSource::Custom => &self.custom_dir,
            TemplateSource::Learned => &self.learned_dir,
        }
    }

    /// Valid templates from one directory in file name order. Invalid
    /// documents are logged and skipped.
    pub async fn load_from(&self, source: TemplateSource) -> Result<Vec<WorkflowTemplate>> {
        let dir = self.dir(source);
        let mut templates = Vec::new();
        for path in list_files(dir, &["yaml", "yml"]).await? {
            let document = match tokio::fs::read_to_string(&path).await {
                Ok(document) => document,
                Err(e) => {
                    warn!("Failed to read workflow template {}: {}", path.display(), e);
                    continue;
                }
            };
            match WorkflowTemplate::parse(&document) {
                Ok(template) => {
                    debug!(
                        "Loaded {} template '{}' from {}",
                        source.as_str(),
                        template.name,
                        path.display()
                    );
                    templates.push(template);
                }
                Err(e) => warn!("Skipping workflow template {}: {}", path.display(), e),
            }
        }
        Ok(templates)
    }

    /// Active templates: system and custom, custom shadowing system by name,
    /// sorted by priority then name
    pub async fn list(&self) -> Result<Vec<WorkflowTemplate>> {
        let mut by_name: BTreeMap<String, WorkflowTemplate> = BTreeMap::new();
        for template in self.load_from(TemplateSource::System).await? {
            by_name.insert(template.name.clone(), template);
        }
        for template in self.load_from(TemplateSource::Custom).await? {
            if by_name.contains_key(&template.name) {
                debug!("Custom template '{}' shadows the system template", template.name);
            }
            by_name.insert(template.name.clone(), template);
        }

        let mut templates: Vec<WorkflowTemplate> = by_name.into_values().collect();
        // Names are already ordered and the sort is stable.
        templates.sort_by_key(|t| t.priority);
        Ok(templates)
    }

    pub async fn list_learned(&self) -> Result<Vec<WorkflowTemplate>> {
        self.load_from(TemplateSource::Learned).await
    }

    /// Look up an active template by name, custom first
    pub async fn get(&self, name: &str) -> Result<Option<WorkflowTemplate>> {
        for source in [TemplateSource::Custom, TemplateSource::System] {
            if let Some(template) = self
                .load_from(source)
                .await?
                .into_iter()
                .find(|t| t.name == name)
            {
                return Ok(Some(template));
            }
        }
        Ok(None)
    }

    /// Score active templates against a task description, best first
    pub async fn find_matches(&self, task: &str) -> Result<Vec<TemplateMatch>> {
        Ok(match_templates(&self.list().await?, task))
    }

    pub async fn save_custom(&self, template: &WorkflowTemplate) -> Result<PathBuf> {
        self.save(TemplateSource::Custom, template).await
    }

    pub async fn save_learned(&self, template: &WorkflowTemplate) -> Result<PathBuf> {
        self.save(TemplateSource::Learned, template).await
    }

    async fn save(&self, source: TemplateSource, template: &WorkflowTemplate) -> Result<PathBuf> {
        let report = template.validate();
        if !report.is_valid() {
            return Err(agent_ensemble_core::Error::validation(format!(
                "Invalid workflow template '{}': {}",
                template.name,
                report.errors.join("; ")
            ))
            .into());
        }
        if !template
            .name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(agent_ensemble_core::Error::validation(format!(
                "Template name '{}' cannot be used as a file name",
                template.name
            ))
            .into());
        }

        let path = self.dir(source).join(format!("{}.yaml", template.name));
        let document = template.to_yaml()?;

        let _guard = self.write_lock.lock().await;
        write_atomic(&path, document.as_bytes()).await?;
        info!(
            "Saved {} template '{}' to {}",
            source.as_str(),
            template.name,
            path.display()
        );
        Ok(path)
    }

    /// Aggregate over active templates, with the learned count alongside
    pub async fn stats(&self) -> Result<TemplateStats> {
        let system = self.load_from(TemplateSource::System).await?;
        let custom = self.load_from(TemplateSource::Custom).await?;
        let learned = self.load_from(TemplateSource::Learned).await?;
        let active = self.list().await?;

        let mut stats = TemplateStats {
            total_templates: active.len(),
            system_templates: system
                .iter()
                .filter(|t| !custom.iter().any(|c| c.name == t.name))
                .count(),
            custom_templates: custom.len(),
            learned_templates: learned.len(),
            ..TemplateStats::default()
        };

        for template in &active {
            stats.total_usage += template.usage_count;
            *stats
                .by_priority
                .entry(template.priority.as_str().to_string())
                .or_default() += 1;
            for tag in &template.tags {
                *stats.by_tag.entry(tag.clone()).or_default() += 1;
            }
        }
        if !active.is_empty() {
            stats.avg_success_rate =
                active.iter().map(|t| t.success_rate).sum::<f64>() / active.len() as f64;
        }
        Ok(stats)
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}
