//! Repository implementations for persisted entities

pub mod agent;
pub mod history;
pub mod insights;
pub mod template;

pub use agent::{parse_definition, AgentRepository};
pub use history::{HistoryQuery, HistoryRepository};
pub use insights::InsightRepository;
pub use template::{TemplateRepository, TemplateSource, TemplateStats};
