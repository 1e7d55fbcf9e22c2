//! Configuration management for the runner
//!
//! Layering, lowest to highest precedence: built-in defaults,
//! `config/default.*`, `config/local.*`, then `AGENT_ENSEMBLE_*` environment
//! variables with `__` separating nested keys
//! (`AGENT_ENSEMBLE_EXECUTOR__TIMEOUT_SECONDS=600`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use agent_ensemble_core::orchestration::validation::QA_REPORT;
use agent_ensemble_core::orchestration::{EngineConfig, ExecutionConfig};
use agent_ensemble_core::selection::SelectorConfig;
use agent_ensemble_storage::StorageConfig;

use crate::{Error, Result};

/// Runner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageSettings,
    pub executor: ExecutorSettings,
    pub selection: SelectionSettings,
    pub workflow: WorkflowSettings,
    pub learning: LearningSettings,
    pub logging: LoggingSettings,
}

/// Where persisted stores live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub base_dir: PathBuf,
}

/// External agent process settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorSettings {
    pub binary: String,
    pub base_args: Vec<String>,
    pub tools_flag: Option<String>,
    pub model_flag: Option<String>,
    pub output_format: Option<String>,
    pub timeout_seconds: u64,
    pub environment: HashMap<String, String>,
}

/// Ad hoc selection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectionSettings {
    pub max_agents: usize,
    pub generalist: String,
    pub tester: String,
    pub researcher: String,
    pub reviewer: String,
}

/// Templated execution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowSettings {
    pub enabled: bool,
    /// Minimum template match score for automatic routing
    pub match_threshold: u32,
    pub skip_optional_steps: bool,
    pub default_step_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub feedback_artifact: Option<String>,
    pub workspace_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningSettings {
    pub min_occurrences: usize,
    /// Most recent executions considered
    pub history_window: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// Daily rolling log files go here; console only when `None`
    pub directory: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            base_dir: StorageConfig::default().base_dir,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        let defaults = ExecutionConfig::default();
        Self {
            binary: defaults.binary,
            base_args: defaults.base_args,
            tools_flag: defaults.tools_flag,
            model_flag: defaults.model_flag,
            output_format: defaults.output_format,
            timeout_seconds: defaults.timeout_seconds,
            environment: defaults.environment,
        }
    }
}

impl Default for SelectionSettings {
    fn default() -> Self {
        let names = SelectorConfig::default();
        Self {
            max_agents: 3,
            generalist: names.generalist,
            tester: names.tester,
            researcher: names.researcher,
            reviewer: names.reviewer,
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            match_threshold: 10,
            skip_optional_steps: false,
            default_step_timeout_secs: 300,
            retry_delay_ms: 1000,
            feedback_artifact: Some(QA_REPORT.to_string()),
            workspace_root: PathBuf::from("workspace"),
        }
    }
}

impl Default for LearningSettings {
    fn default() -> Self {
        Self {
            min_occurrences: 3,
            history_window: 100,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: Some(PathBuf::from(".agent-ensemble/logs")),
        }
    }
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> Result<Self> {
        Self::build(
            config::Config::builder()
                .add_source(config::File::with_name("config/default").required(false))
                .add_source(config::File::with_name("config/local").required(false)),
        )
    }

    /// Load configuration from an explicit file, still honouring environment
    /// overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .to_str()
            .ok_or_else(|| Error::Configuration(format!("Non UTF-8 config path: {}", path.display())))?;
        Self::build(config::Config::builder().add_source(config::File::with_name(name)))
    }

    fn build(
        files: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(files.build()?)
            .add_source(
                config::Environment::with_prefix("AGENT_ENSEMBLE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("executor.base_args"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run could work with
    pub fn validate(&self) -> Result<()> {
        if self.executor.binary.trim().is_empty() {
            return Err(Error::Configuration("executor.binary cannot be empty".into()));
        }
        if self.executor.timeout_seconds == 0 || self.workflow.default_step_timeout_secs == 0 {
            return Err(Error::Configuration("timeouts must be positive".into()));
        }
        if self.selection.generalist.trim().is_empty() {
            return Err(Error::Configuration(
                "selection.generalist must name an agent".into(),
            ));
        }
        Ok(())
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            base_dir: self.storage.base_dir.clone(),
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            binary: self.executor.binary.clone(),
            base_args: self.executor.base_args.clone(),
            tools_flag: self.executor.tools_flag.clone(),
            model_flag: self.executor.model_flag.clone(),
            output_format: self.executor.output_format.clone(),
            timeout_seconds: self.executor.timeout_seconds,
            environment: self.executor.environment.clone(),
        }
    }

    pub fn selector_config(&self) -> SelectorConfig {
        SelectorConfig {
            generalist: self.selection.generalist.clone(),
            tester: self.selection.tester.clone(),
            researcher: self.selection.researcher.clone(),
            reviewer: self.selection.reviewer.clone(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workspace_root: self.workflow.workspace_root.clone(),
            default_step_timeout_secs: self.workflow.default_step_timeout_secs,
            skip_optional_steps: self.workflow.skip_optional_steps,
            retry_delay_ms: self.workflow.retry_delay_ms,
            feedback_artifact: self.workflow.feedback_artifact.clone(),
        }
    }
}
