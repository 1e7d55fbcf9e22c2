//! Agent ensemble command-line runner
//!
//! - `run`: execute a task through a matching workflow or ad hoc agents
//! - `analyze`: show classification, selection and routing without running
//! - `stats`: execution statistics from the history
//! - `learn`: detect recurring tasks and optionally save learned workflows
//! - `insights`: per-agent skill insights and improvement suggestions
//! - `validate`: check a workflow template document

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use agent_ensemble_runner::config::{Config, LoggingSettings};
use agent_ensemble_runner::orchestrator::{InsightsView, Route, StatisticsView, TaskPlan};
use agent_ensemble_runner::{Orchestrator, RunRequest};

#[derive(Parser)]
#[command(name = "agent-ensemble")]
#[command(about = "Run tasks through a directory of specialized agents")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a task
    Run {
        task: String,
        /// Use this workflow template regardless of match score
        #[arg(long, conflicts_with = "no_workflow")]
        workflow: Option<String>,
        /// Skip template matching and dispatch agents directly
        #[arg(long)]
        no_workflow: bool,
        /// Upper bound on ad hoc agents
        #[arg(long)]
        max_agents: Option<usize>,
        /// Work inside this directory instead of a fresh workspace
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Show how a task would be handled
    Analyze {
        task: String,
        #[arg(long)]
        max_agents: Option<usize>,
    },
    /// Show execution statistics
    Stats {
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Learn from the execution history
    Learn {
        #[arg(long)]
        min_occurrences: Option<usize>,
        /// Save detected patterns as learned workflow templates
        #[arg(long)]
        save: bool,
    },
    /// Show per-agent skill insights and improvement suggestions
    Insights {
        /// Only this agent
        #[arg(long)]
        agent: Option<String>,
        /// Also write the report to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a workflow template file
    Validate { template: PathBuf },
}

/// Console plus a daily rolling file when a log directory is configured.
/// The returned guard must outlive every log call.
fn init_logging(
    settings: &LoggingSettings,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let Some(logs_dir) = &settings.directory else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::daily(logs_dir, "agent-ensemble.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter.clone()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter),
        )
        .init();
    Ok(Some(guard))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    let _guard = init_logging(&config.logging)?;

    info!("Starting agent-ensemble v{}", env!("CARGO_PKG_VERSION"));
    info!("Storage: {}", config.storage.base_dir.display());

    let orchestrator = Orchestrator::initialize(config).await.map_err(|e| {
        error!("Failed to initialize: {}", e);
        e
    })?;

    match cli.command {
        Command::Run {
            task,
            workflow,
            no_workflow,
            max_agents,
            project,
        } => {
            let request = RunRequest {
                task,
                workflow,
                no_workflow,
                max_agents,
                project_path: project,
            };
            let outcome = orchestrator.run(request).await?;
            println!("{}", outcome.summary());
            if !outcome.success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Analyze { task, max_agents } => {
            let plan = orchestrator.analyze(&task, max_agents).await?;
            print_plan(&plan);
        }
        Command::Stats { workflow } => {
            print_statistics(&orchestrator.statistics(workflow.as_deref()).await?);
        }
        Command::Learn {
            min_occurrences,
            save,
        } => {
            let outcome = orchestrator.learn(min_occurrences, save).await?;
            println!("{}", outcome.report);
            for path in &outcome.saved {
                println!("Saved learned workflow: {}", path.display());
            }
        }
        Command::Insights { agent, output } => {
            let view = orchestrator.skill_insights(agent.as_deref()).await;
            let text = render_insights(&view);
            println!("{}", text);
            if let Some(path) = output {
                std::fs::write(&path, &text)?;
                println!("Report written to {}", path.display());
            }
        }
        Command::Validate { template } => {
            let check = orchestrator.validate_template(&template).await?;
            println!(
                "Template '{}' v{} ({} steps)",
                check.template.name,
                check.template.version,
                check.template.steps.len()
            );
            for message in &check.report.errors {
                println!("  error: {}", message);
            }
            for message in &check.report.warnings {
                println!("  warning: {}", message);
            }
            if !check.report.is_valid() {
                return Ok(ExitCode::FAILURE);
            }
            println!("Template is valid");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_plan(plan: &TaskPlan) {
    let analysis = &plan.analysis;
    println!("Task type: {}", analysis.task_type);
    println!("Complexity: {}", analysis.complexity);
    println!("Parallelizable: {}", analysis.parallelizable);
    println!("Estimated subtasks: {}", analysis.estimated_subtasks);
    println!(
        "Required capabilities: {}",
        analysis.required_capabilities.join(", ")
    );
    println!("Keywords: {}", analysis.keywords.join(", "));

    println!("\nAgents:");
    for assignment in &plan.assignments {
        println!(
            "  {} [{}] confidence {:.2}: {}",
            assignment.agent.name, assignment.priority, assignment.confidence, assignment.reason
        );
    }

    if !plan.template_matches.is_empty() {
        println!("\nMatching workflows:");
        for m in &plan.template_matches {
            println!(
                "  {} (score {}, {:?} relevance)",
                m.template.name, m.score, m.relevance
            );
        }
    }

    match &plan.route {
        Route::Workflow { template, score } => {
            println!("\nRoute: workflow '{}' (score {})", template.name, score)
        }
        Route::AdHoc => println!("\nRoute: ad hoc dispatch"),
    }
}

fn print_statistics(view: &StatisticsView) {
    match view {
        StatisticsView::Workflow(None) => println!("No executions recorded for this workflow"),
        StatisticsView::Workflow(Some(stats)) => {
            println!("Workflow: {}", stats.workflow_name);
            println!(
                "Executions: {} ({} completed, {} partial, {} failed)",
                stats.total_executions, stats.completed, stats.partial, stats.failed
            );
            println!("Success rate: {:.1}%", stats.success_rate * 100.0);
            println!("Average duration: {:.1}s", stats.avg_duration_secs);
            if let Some(last) = stats.last_execution {
                println!("Last execution: {}", last.to_rfc3339());
            }
            for step in &stats.steps {
                println!(
                    "  {} ({}): {}/{} completed, {} failed, {} skipped, avg {:.1}s",
                    step.step_id,
                    step.agent,
                    step.completed,
                    step.executions,
                    step.failed,
                    step.skipped,
                    step.avg_duration_secs
                );
            }
        }
        StatisticsView::Global(global) => {
            println!("Total executions: {}", global.total_executions);
            println!("Workflows used: {}", global.workflows_used);
            println!("Success rate: {:.1}%", global.success_rate * 100.0);
            println!("Average duration: {:.1}s", global.avg_duration_secs);
            for (name, count) in &global.most_used {
                println!("  {}: {} executions", name, count);
            }
        }
    }
}

fn render_insights(view: &InsightsView) -> String {
    match view {
        InsightsView::Report(report) => report.clone(),
        InsightsView::Agent {
            name,
            insights,
            suggestions,
        } => {
            let mut lines = vec![format!("Agent: {}", name)];
            if let Some(insights) = insights {
                lines.push(format!(
                    "Tasks: {} ({:.1}% success, avg {:.1}s, ${:.2})",
                    insights.total_tasks,
                    insights.success_rate(),
                    insights.avg_duration_secs(),
                    insights.total_cost
                ));
                for (task_type, tally) in &insights.task_types {
                    lines.push(format!(
                        "  {}: {}/{} succeeded",
                        task_type, tally.success, tally.count
                    ));
                }
                if let Some(best) = insights.best_tasks.first() {
                    lines.push(format!(
                        "Fastest success: {} ({:.1}s)",
                        best.description, best.duration_secs
                    ));
                }
            }
            lines.push("Suggestions:".to_string());
            lines.extend(suggestions.iter().map(|s| format!("  - {}", s)));
            lines.join("\n")
        }
    }
}
