//! ProjectForge - multi-agent project scaffolding
//!
//! CLI entry point: serve the API, or drive single projects from intake files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result, bail, eyre};
use tracing::{debug, info};

use projectforge::api;
use projectforge::cli::{Cli, Command, OutputFormat, generate_after_help, load_request, resolve_project_ref};
use projectforge::config::Config;
use projectforge::domain::{ProjectStatus, StepStatus};
use projectforge::events::{EventKind, ProgressEvent};
use projectforge::scheduler::{Orchestrator, OrchestratorOptions};
use projectforge::state::StateManager;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("projectforge")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("projectforge.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(db_path = %config.storage.db_path.display(), "ProjectForge loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { bind, no_recover } => cmd_serve(&config, bind, !no_recover).await,
        Command::Validate { file } => cmd_validate(&config, &file).await,
        Command::Plan { file, format } => cmd_plan(&config, &file, format).await,
        Command::Run {
            file,
            auto_approve,
            timeout,
        } => cmd_run(&config, &file, auto_approve, Duration::from_secs(timeout)).await,
        Command::List { status, format } => cmd_list(&config, status.as_deref(), format).await,
        Command::Show { id, format } => cmd_show(&config, &id, format).await,
    }
}

/// Orchestrator over the configured on-disk store
fn open_orchestrator(config: &Config) -> Result<(Orchestrator, StateManager)> {
    let state = StateManager::spawn(&config.storage.db_path)
        .context(format!("Failed to open store at {}", config.storage.db_path.display()))?;
    let options = OrchestratorOptions::from_config(config).context("Failed to configure orchestrator")?;
    Ok((Orchestrator::new(state.clone(), options), state))
}

/// Orchestrator that only plans (nothing is persisted)
fn planning_orchestrator(config: &Config) -> Result<Orchestrator> {
    let state = StateManager::spawn_in_memory()?;
    let options = OrchestratorOptions::from_config(config).context("Failed to configure orchestrator")?;
    Ok(Orchestrator::new(state, options))
}

async fn cmd_serve(config: &Config, bind: Option<String>, recover: bool) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    debug!(%bind, recover, "cmd_serve: called");
    let (orchestrator, state) = open_orchestrator(config)?;

    if recover {
        let stats = orchestrator.recover().await.map_err(|e| eyre!("Recovery failed: {}", e))?;
        println!("Recovered projects ({})", stats);
    }

    println!("ProjectForge API listening on {}", bind.cyan());
    api::serve(orchestrator.clone(), &bind, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    orchestrator.shutdown().await;
    let _ = state.shutdown().await;
    println!("ProjectForge stopped");
    Ok(())
}

async fn cmd_validate(config: &Config, file: &Path) -> Result<()> {
    debug!(?file, "cmd_validate: called");
    let request = load_request(file)?;
    let report = planning_orchestrator(config)?.validate(&request);

    if report.valid {
        println!("{} {}", "valid".green().bold(), file.display());
        if let Some(plan) = &report.plan {
            println!("  {} steps across {:?}", plan.steps.len(), plan.stages);
        }
        return Ok(());
    }
    println!("{} {}", "invalid".red().bold(), file.display());
    for error in &report.errors {
        println!("  {}: {} ({})", error.field.yellow(), error.message, error.code);
    }
    if let Some(plan_error) = &report.plan_error {
        println!("  {}", plan_error);
    }
    bail!("{} is not a valid intake request", file.display())
}

async fn cmd_plan(config: &Config, file: &Path, format: OutputFormat) -> Result<()> {
    debug!(?file, %format, "cmd_plan: called");
    let request = load_request(file)?;
    let plan = planning_orchestrator(config)?
        .plan(&request)
        .map_err(|e| eyre!("{}", e))?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }
    println!("Plan {} ({} / {})", plan.id.bold(), plan.project_type, plan.mode);
    for stage in plan.stages() {
        let gate = if plan.requires_approval(stage) { " [approval]" } else { "" };
        println!("\n{}{}", stage.to_string().cyan().bold(), gate);
        for step in plan.steps_in(stage) {
            let mut line = format!("  {:<22} {}", step.id, step.agent);
            if !step.depends_on.is_empty() {
                let deps: Vec<&str> = step.depends_on.iter().map(String::as_str).collect();
                line.push_str(&format!("  <- {}", deps.join(", ")));
            }
            if let Some(condition) = step.when {
                line.push_str(&format!("  when {}", condition.as_str()));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

async fn cmd_run(config: &Config, file: &Path, auto_approve: bool, timeout: Duration) -> Result<()> {
    debug!(?file, auto_approve, "cmd_run: called");
    let request = load_request(file)?;
    let (orchestrator, state) = open_orchestrator(config)?;

    let record = orchestrator
        .create_project(request)
        .await
        .map_err(|e| eyre!("Failed to create project: {}", e))?;
    println!("Created project {} ({})", record.id.bold(), record.mode());

    let mut subscription = orchestrator
        .subscribe(&record.id)
        .await
        .map_err(|e| eyre!("{}", e))?;

    let follow = async {
        while let Some(event) = subscription.recv().await {
            print_event(&event);
            // A fast project may already be parked or finished when we subscribe
            let gate_stage = match &event.kind {
                EventKind::ApprovalRequired { stage, .. } => Some(*stage),
                EventKind::Connected {
                    status: ProjectStatus::AwaitingApproval,
                    current_phase,
                } => *current_phase,
                _ => None,
            };
            match &event.kind {
                _ if gate_stage.is_some() => {
                    let stage = gate_stage.map(|s| s.to_string()).unwrap_or_default();
                    let outcome = if auto_approve {
                        orchestrator.approve(&record.id, Some("auto-approved".to_string())).await
                    } else {
                        match prompt_decision(&stage).await? {
                            None => orchestrator.approve(&record.id, None).await,
                            Some(feedback) => {
                                orchestrator
                                    .reject(&record.id, Some(feedback), Vec::new(), Vec::new())
                                    .await
                            }
                        }
                    };
                    if let Err(e) = outcome {
                        println!("  {} {}", "decision not applied:".yellow(), e);
                    }
                }
                EventKind::Connected { status, .. } if status.is_terminal() => break,
                kind if kind.is_final() => break,
                _ => {}
            }
        }
        Ok::<(), eyre::Report>(())
    };
    tokio::time::timeout(timeout, follow)
        .await
        .map_err(|_| eyre!("Project {} did not finish within {:?}", record.id, timeout))??;

    let finished = orchestrator.get_project(&record.id).await.map_err(|e| eyre!("{}", e))?;
    orchestrator.shutdown().await;
    let _ = state.shutdown().await;

    match finished.status {
        ProjectStatus::Completed => {
            println!("{} {}", "completed".green().bold(), finished.id);
            Ok(())
        }
        status => {
            let reason = finished.last_error.unwrap_or_default();
            bail!("project {} ended {}: {}", finished.id, status, reason)
        }
    }
}

/// Ask on stdin; None approves, Some(feedback) rejects
async fn prompt_decision(stage: &str) -> Result<Option<String>> {
    let stage = stage.to_string();
    tokio::task::spawn_blocking(move || -> Result<Option<String>> {
        print!("Approve {}? [Y/n] ", stage);
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("n") {
            return Ok(None);
        }
        print!("Feedback: ");
        std::io::stdout().flush()?;
        let mut feedback = String::new();
        std::io::stdin().read_line(&mut feedback)?;
        Ok(Some(feedback.trim().to_string()))
    })
    .await
    .context("Prompt task failed")?
}

fn print_event(event: &ProgressEvent) {
    let seq = format!("[{:>4}]", event.seq).dimmed();
    match &event.kind {
        EventKind::Connected { status, .. } => println!("{} connected ({})", seq, status),
        EventKind::PhaseStarted { stage, steps, .. } => {
            println!("{} {} {} ({} steps)", seq, "phase".cyan(), stage.to_string().bold(), steps.len())
        }
        EventKind::PhaseCompleted { stage, success, .. } => {
            let outcome = if *success { "done".green() } else { "failed".red() };
            println!("{} {} {} {}", seq, "phase".cyan(), stage, outcome)
        }
        EventKind::AgentStarted {
            step_id,
            agent_id,
            attempt,
        } => println!("{}   {} {} ({}, attempt {})", seq, "start".blue(), step_id, agent_id, attempt),
        EventKind::AgentProgress { step_id, message, .. } => println!("{}   {} {}", seq, step_id.dimmed(), message),
        EventKind::AgentCompleted {
            step_id,
            status,
            duration_ms,
            ..
        } => {
            let label = match status {
                StepStatus::Success => status.to_string().green(),
                StepStatus::Warning | StepStatus::Skipped => status.to_string().yellow(),
                StepStatus::Failure => status.to_string().red(),
            };
            println!("{}   {} {} in {}ms", seq, label, step_id, duration_ms)
        }
        EventKind::ApprovalRequired { stage, artifact_type, .. } => {
            println!("{} {} {} ({})", seq, "approval required".magenta().bold(), stage, artifact_type.as_str())
        }
        EventKind::WorkflowCompleted { status } => println!("{} {} {}", seq, "finished".bold(), status),
        EventKind::Error { message, .. } => println!("{} {} {}", seq, "error".red().bold(), message),
        EventKind::Log { message, .. } => println!("{} {}", seq, message.dimmed()),
    }
}

async fn cmd_list(config: &Config, status: Option<&str>, format: OutputFormat) -> Result<()> {
    debug!(?status, %format, "cmd_list: called");
    let status = status
        .map(|s| s.parse::<ProjectStatus>().map_err(|e| eyre!(e)))
        .transpose()?;
    let (orchestrator, state) = open_orchestrator(config)?;
    let projects = orchestrator.list_projects(status).await.map_err(|e| eyre!("{}", e))?;

    if format == OutputFormat::Json {
        let summaries: Vec<api::ProjectSummary> = projects.iter().map(api::ProjectSummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if projects.is_empty() {
        println!("No projects");
    } else {
        for project in &projects {
            println!(
                "{:<40} {:<18} {:<10} {}",
                project.id,
                project.status.to_string(),
                project.mode().to_string(),
                project.spec.project_name
            );
        }
    }
    let _ = state.shutdown().await;
    Ok(())
}

async fn cmd_show(config: &Config, id: &str, format: OutputFormat) -> Result<()> {
    debug!(%id, %format, "cmd_show: called");
    let (orchestrator, state) = open_orchestrator(config)?;
    let records = orchestrator.list_projects(None).await.map_err(|e| eyre!("{}", e))?;
    let id = resolve_project_ref(records.iter().map(|r| r.id.as_str()), id)?;
    let progress = orchestrator.progress(&id).await.map_err(|e| eyre!("{}", e))?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
    } else {
        println!("{} {} ({})", progress.project_id.bold(), progress.status, progress.mode);
        if let Some(phase) = progress.current_phase {
            println!("phase: {}", phase);
        }
        println!("steps: {}/{}", progress.completed_steps, progress.total_steps);
        for step in &progress.steps {
            let status = step.status.map(|s| s.to_string()).unwrap_or_else(|| "waiting".to_string());
            println!("  {:<22} {:<12} attempts {}", step.step_id, status, step.attempts);
            for error in &step.errors {
                println!("    {}", error.red());
            }
        }
        if let Some(approval) = &progress.pending_approval {
            println!("awaiting approval of {} (gate {})", approval.stage, approval.id);
        }
        if let Some(error) = &progress.last_error {
            println!("{} {}", "error:".red().bold(), error);
        }
    }
    let _ = state.shutdown().await;
    Ok(())
}
