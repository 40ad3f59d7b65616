//! storyforge - wave-based character development
//!
//! CLI entry point for creating, running and reviewing sessions.

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use storyforge::cli::{Cli, Command, OutputFormat, RegenerateTarget, RunInput};
use storyforge::config::Config;
use storyforge::domain::{Checkpoint, FinalArtifact, Mode, StoryInput, TaskKind};
use storyforge::events::{ForgeEvent, create_event_bus, read_session_events, spawn_event_logger};
use storyforge::generation::{DisabledGenerator, Generator, LlmGenerator};
use storyforge::llm::create_client;
use storyforge::orchestrator::{OrchestratorError, SessionRegistry, SessionStatusReport};
use storyforge::state::StateManager;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storyforge")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
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

    let log_file = fs::File::create(log_dir.join("storyforge.log")).context("Failed to create log file")?;

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
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    info!(store_dir = %config.storage.store_dir.display(), "storyforge loaded config");

    let state = StateManager::spawn(&config.storage.store_dir).context("Failed to open session store")?;
    let bus = create_event_bus(config.events.channel_capacity);
    let logger = spawn_event_logger(bus.clone(), &config.events.runs_dir).context("Failed to start event logger")?;

    let generator = build_generator(&config, &cli.command)?;
    let registry = Arc::new(SessionRegistry::new(
        state.clone(),
        generator,
        bus.clone(),
        config.pipeline.plan(),
        config.pipeline.max_concurrent_tasks,
    ));

    debug!(command = ?cli.command, "main: dispatching command");
    let result = dispatch(&registry, &config, cli.command, cli.format).await;

    // Closing the bus lets the logger drain and exit
    drop(registry);
    drop(bus);
    if tokio::time::timeout(Duration::from_secs(2), logger).await.is_err() {
        warn!("main: event logger did not finish in time");
    }
    if let Err(e) = state.shutdown().await {
        warn!(error = %e, "main: state manager shutdown failed");
    }
    result
}

fn build_generator(config: &Config, command: &Command) -> Result<Arc<dyn Generator>> {
    if !command.needs_generator() {
        return Ok(Arc::new(DisabledGenerator::new("this command does not generate")));
    }
    config.validate()?;
    let client = create_client(&config.llm).context("Failed to create LLM client")?;
    let generator = LlmGenerator::new(client, config.llm.max_tokens).context("Failed to load prompts")?;
    Ok(Arc::new(generator))
}

async fn dispatch(registry: &Arc<SessionRegistry>, config: &Config, command: Command, format: OutputFormat) -> Result<()> {
    match command {
        Command::Start { input, mode } => {
            let mode = mode.unwrap_or(config.pipeline.default_mode);
            cmd_start(registry, &input, mode, format).await
        }
        Command::Batch { input, mode } => {
            let mode = mode.unwrap_or(config.pipeline.default_mode);
            cmd_batch(registry, &input, mode, format).await
        }
        Command::Run {
            session_id,
            auto_approve,
        } => {
            let id = resolve_session(registry, &session_id).await?;
            cmd_run(registry, &id, auto_approve, format).await
        }
        Command::Status { session_id } => {
            let id = resolve_session(registry, &session_id).await?;
            let report = registry.get_status(&id).await?;
            emit(format, &report, print_status)
        }
        Command::Checkpoint { session_id, number } => {
            let id = resolve_session(registry, &session_id).await?;
            let checkpoint = registry.get_checkpoint(&id, number).await?;
            emit(format, &checkpoint, print_checkpoint)
        }
        Command::Checkpoints { session_id } => {
            let id = resolve_session(registry, &session_id).await?;
            let checkpoints = registry.list_checkpoints(&id).await?;
            emit(format, &checkpoints, |cps| {
                if cps.is_empty() {
                    println!("No checkpoints yet");
                }
                for cp in cps {
                    print_checkpoint_line(cp);
                }
            })
        }
        Command::Approve { session_id, number } => {
            let id = resolve_session(registry, &session_id).await?;
            let waves = registry.approve_checkpoint(&id, number).await?;
            emit(format, &serde_json::json!({"checkpoint": number, "waves_approved": waves}), |_| {
                println!("{} checkpoints up to {}", "Approved".green(), number);
                for wave in &waves {
                    println!("Wave {} approved", wave);
                }
            })
        }
        Command::ApproveWave { session_id, wave } => {
            let id = resolve_session(registry, &session_id).await?;
            let newly = registry.approve_wave(&id, wave).await?;
            emit(format, &serde_json::json!({"wave": wave, "newly_approved": newly}), |_| {
                if newly {
                    println!("Wave {} {}", wave, "approved".green());
                } else {
                    println!("Wave {} was already approved", wave);
                }
            })
        }
        Command::Regenerate {
            session_id,
            target,
            feedback,
        } => {
            let id = resolve_session(registry, &session_id).await?;
            let checkpoint = regenerate(registry, &id, &target, &feedback).await?;
            emit(format, &checkpoint, print_checkpoint)
        }
        Command::Consolidate { session_id } => {
            let id = resolve_session(registry, &session_id).await?;
            let artifact = registry.consolidate(&id).await?;
            emit(format, &artifact, print_artifact)
        }
        Command::Final { session_id } => {
            let id = resolve_session(registry, &session_id).await?;
            let artifact = registry
                .get_final_artifact(&id)
                .await?
                .ok_or_else(|| eyre::eyre!("Session {} has no final artifact yet", id))?;
            emit(format, &artifact, print_artifact)
        }
        Command::List => {
            let sessions = registry.list_sessions().await?;
            emit(format, &sessions, |sessions| {
                if sessions.is_empty() {
                    println!("No sessions");
                }
                for meta in sessions {
                    println!(
                        "{}  {:<11}  {:<8}  {}/{}  {}",
                        meta.session_id,
                        meta.status.to_string(),
                        meta.mode.to_string(),
                        meta.completed_checkpoints,
                        meta.total_checkpoints,
                        meta.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            })
        }
        Command::Delete { session_id } => {
            let id = resolve_session(registry, &session_id).await?;
            registry.delete_session(&id).await?;
            emit(format, &serde_json::json!({"deleted": id}), |_| println!("Deleted {}", id))
        }
        Command::Events { session_id } => {
            let id = resolve_session(registry, &session_id).await?;
            let entries = read_session_events(&config.events.runs_dir, &id)?;
            emit(format, &entries, |entries| {
                for entry in entries {
                    println!("{}  {}", entry.timestamp.format("%H:%M:%S"), describe_event(&entry.event));
                }
            })
        }
    }
}

/// Print `value` as pretty JSON or through `text`
fn emit<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

/// Expand a unique id prefix to the full session id
async fn resolve_session(registry: &SessionRegistry, prefix: &str) -> Result<String> {
    debug!(%prefix, "resolve_session: called");
    let sessions = registry.list_sessions().await?;
    if sessions.iter().any(|m| m.session_id == prefix) {
        return Ok(prefix.to_string());
    }
    let matches: Vec<_> = sessions.iter().filter(|m| m.session_id.starts_with(prefix)).collect();
    match matches.as_slice() {
        [one] => Ok(one.session_id.clone()),
        [] => Err(OrchestratorError::SessionNotFound(prefix.to_string()).into()),
        many => Err(eyre::eyre!("'{}' matches {} sessions, use a longer prefix", prefix, many.len())),
    }
}

fn read_story(path: &Path) -> Result<StoryInput> {
    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    // YAML is a superset of JSON, so both formats parse here
    serde_yaml::from_str(&content).context(format!("Failed to parse story input {}", path.display()))
}

async fn cmd_start(registry: &SessionRegistry, input: &Path, mode: Mode, format: OutputFormat) -> Result<()> {
    debug!(?input, %mode, "cmd_start: called");
    let story = read_story(input)?;
    let id = registry.start_session(story, mode).await?;
    emit(format, &serde_json::json!({"session_id": id}), |_| {
        println!("{} session {}", "Started".green(), id);
        println!("Run it with: sf run {}", id);
    })
}

async fn cmd_batch(registry: &SessionRegistry, input: &Path, mode: Mode, format: OutputFormat) -> Result<()> {
    debug!(?input, %mode, "cmd_batch: called");
    let story = read_story(input)?;
    let selections = registry.start_batch(story, mode).await?;
    emit(format, &selections, |selections| {
        for s in selections {
            match &s.session_id {
                Some(id) => println!("{} {} (priority {}): {}", "started".green(), s.name, s.priority, id),
                None => println!("{} {} (priority {})", "skipped".dimmed(), s.name, s.priority),
            }
        }
    })
}

async fn regenerate(registry: &SessionRegistry, id: &str, target: &str, feedback: &str) -> Result<Checkpoint> {
    let checkpoint = match RegenerateTarget::parse(target) {
        RegenerateTarget::Checkpoint(number) => registry.regenerate_checkpoint(id, number, feedback).await?,
        RegenerateTarget::Task(name) => {
            let task: TaskKind = name.parse().map_err(OrchestratorError::from)?;
            registry.regenerate(id, task, feedback).await?
        }
    };
    Ok(checkpoint)
}

/// Run a session in the foreground, taking review commands from stdin
async fn cmd_run(registry: &Arc<SessionRegistry>, id: &str, auto_approve: bool, format: OutputFormat) -> Result<()> {
    debug!(%id, auto_approve, "cmd_run: called");
    let rx = registry.bus().subscribe();
    let mut printer = tokio::spawn(print_events(rx, registry.clone(), id.to_string(), auto_approve, format));

    let mut handle = registry.spawn_run(id).await?;
    if !auto_approve && format == OutputFormat::Text {
        println!(
            "Running {}. Commands: approve <wave>, checkpoint <n>, regen <task> <feedback>, status, quit",
            id
        );
    }

    let mut stdin_open = !auto_approve;
    let mut lines = if stdin_open {
        spawn_stdin_reader()
    } else {
        mpsc::unbounded_channel().1
    };
    let outcome = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            line = lines.recv(), if stdin_open => match line {
                Some(line) => handle_run_input(registry, id, &line).await,
                None => stdin_open = false,
            },
        }
    };

    if tokio::time::timeout(Duration::from_millis(500), &mut printer).await.is_err() {
        printer.abort();
    }

    match outcome {
        Ok(Ok(artifact)) => emit(format, &artifact, print_artifact),
        Ok(Err(e)) => Err(e.into()),
        Err(e) if e.is_cancelled() => {
            println!("Run stopped. Resume with: sf run {}", id);
            Ok(())
        }
        Err(e) => Err(eyre::eyre!("Run task failed: {}", e)),
    }
}

/// Read stdin on a plain thread so a pending read never holds up runtime shutdown
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || forward_lines(std::io::stdin().lock(), &tx));
    rx
}

/// Send each line until the reader ends or the receiver goes away
fn forward_lines(reader: impl BufRead, tx: &mpsc::UnboundedSender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "forward_lines: read failed");
                break;
            }
        }
    }
}

async fn handle_run_input(registry: &SessionRegistry, id: &str, line: &str) {
    let input = match RunInput::parse(line) {
        Ok(input) => input,
        Err(usage) => {
            println!("{}", usage.yellow());
            return;
        }
    };
    debug!(?input, "handle_run_input: parsed");

    let result = match input {
        RunInput::ApproveWave(wave) => registry.approve_wave(id, wave).await.map(|_| ()).map_err(eyre::Report::from),
        RunInput::ApproveCheckpoint(number) => registry
            .approve_checkpoint(id, number)
            .await
            .map(|_| ())
            .map_err(eyre::Report::from),
        RunInput::Regenerate { target, feedback } => {
            let target = match target {
                RegenerateTarget::Checkpoint(n) => n.to_string(),
                RegenerateTarget::Task(name) => name,
            };
            regenerate(registry, id, &target, &feedback).await.map(|cp| {
                println!("Checkpoint {} regenerated:", cp.checkpoint_number);
                println!("{}", cp.output.narrative);
            })
        }
        RunInput::Status => registry.get_status(id).await.map(|r| print_status(&r)).map_err(eyre::Report::from),
        RunInput::Quit => {
            registry.cancel(id);
            Ok(())
        }
    };
    if let Err(e) = result {
        println!("{} {}", "error:".red(), e);
    }
}

/// Print this session's events until it completes
async fn print_events(
    mut rx: broadcast::Receiver<ForgeEvent>,
    registry: Arc<SessionRegistry>,
    id: String,
    auto_approve: bool,
    format: OutputFormat,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "print_events: lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if event.session_id() != id {
            continue;
        }

        match format {
            OutputFormat::Json => {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            }
            OutputFormat::Text => println!("{}", describe_event(&event)),
        }

        if let ForgeEvent::AwaitingApproval { wave, .. } = &event {
            if auto_approve {
                if let Err(e) = registry.approve_wave(&id, *wave).await {
                    warn!(wave, error = %e, "print_events: auto-approve failed");
                }
            }
        }
        if event.is_terminal() {
            break;
        }
    }
}

fn describe_event(event: &ForgeEvent) -> String {
    match event {
        ForgeEvent::WaveStarted { wave, tasks, .. } => {
            format!("{} {}: {}", "Wave".bold().cyan(), wave, tasks.join(", "))
        }
        ForgeEvent::TaskStarted { task, .. } => format!("  {} {}", "started".dimmed(), task),
        ForgeEvent::TaskCompleted {
            task,
            tokens_used,
            elapsed_ms,
            ..
        } => format!("  {} {} ({} tokens, {} ms)", "done".green(), task, tokens_used, elapsed_ms),
        ForgeEvent::TaskFailed { task, error, .. } => format!("  {} {}: {}", "failed".red(), task, error),
        ForgeEvent::CheckpointReady {
            checkpoint_number,
            task,
            ..
        } => format!("  checkpoint {} ready: {}", checkpoint_number, task),
        ForgeEvent::WaveComplete {
            wave,
            tasks_completed,
            tasks_failed,
            ..
        } => format!(
            "Wave {} complete: {} ok, {} failed",
            wave,
            tasks_completed.len(),
            tasks_failed.len()
        ),
        ForgeEvent::AwaitingApproval { message, .. } => message.yellow().to_string(),
        ForgeEvent::WaveApproved { wave, .. } => format!("Wave {} {}", wave, "approved".green()),
        ForgeEvent::CheckpointRegenerated {
            checkpoint_number,
            task,
            revision,
            ..
        } => format!("  checkpoint {} ({}) regenerated, revision {}", checkpoint_number, task, revision),
        ForgeEvent::SessionComplete { session_id } => {
            format!("{} {}", "Session complete:".bold().green(), session_id)
        }
        ForgeEvent::Error { message, .. } => format!("{} {}", "error:".red(), message),
    }
}

fn print_status(report: &SessionStatusReport) {
    println!("Session:     {}", report.session_id.bold());
    println!("Status:      {}{}", report.status, if report.running { " (running)" } else { "" });
    println!("Mode:        {}", report.mode);
    println!("Wave:        {}", report.current_wave);
    println!(
        "Checkpoints: {}/{} approved, at {}",
        report.progress.completed_checkpoints, report.progress.total_checkpoints, report.progress.current_checkpoint
    );
    println!("Approved:    {:?}", report.approved_waves);
    println!("Regenerated: {}", report.regenerations);
    if let Some(error) = &report.last_error {
        println!("Last error:  {}", error.red());
    }
    println!();
    for (task, state) in &report.tasks {
        let status = state.status.to_string();
        let status = match state.status {
            storyforge::domain::TaskStatus::Completed => status.green(),
            storyforge::domain::TaskStatus::Failed => status.red(),
            storyforge::domain::TaskStatus::InProgress => status.yellow(),
            storyforge::domain::TaskStatus::Pending => status.dimmed(),
        };
        println!("  wave {}  {:<22} {}", state.wave, task.as_str(), status);
    }
}

fn print_checkpoint_line(cp: &Checkpoint) {
    println!(
        "{:>3}  {:<22} {:<18} rev {}  wave {}",
        cp.checkpoint_number,
        cp.task,
        cp.status.to_string(),
        cp.revision,
        cp.metadata.wave
    );
}

fn print_checkpoint(cp: &Checkpoint) {
    print_checkpoint_line(cp);
    println!();
    println!("{}", cp.output.narrative);
    println!();
    match serde_json::to_string_pretty(&cp.output.structured) {
        Ok(json) => println!("{}", json),
        Err(e) => warn!(error = %e, "print_checkpoint: could not render structured output"),
    }
}

fn print_artifact(artifact: &FinalArtifact) {
    println!("{}", artifact.overview.one_line.bold());
    println!("Importance: {}/10", artifact.overview.importance);
    println!("Relationships: {}", artifact.relationships.len());
    println!("Images: {}", artifact.visual.images.len());
    println!(
        "Checkpoints: {}  Regenerations: {}  Tokens: {}",
        artifact.metadata.total_checkpoints, artifact.metadata.regenerations, artifact.metadata.total_tokens
    );
    println!("Full profile: sf final {} --format json", artifact.session_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_lines_sends_every_line() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        forward_lines("approve 1\nstatus\n".as_bytes(), &tx);
        assert_eq!(rx.try_recv().unwrap(), "approve 1");
        assert_eq!(rx.try_recv().unwrap(), "status");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_lines_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        forward_lines("a\nb\n".as_bytes(), &tx);
        assert!(tx.is_closed());
    }
}
