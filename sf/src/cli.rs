//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::domain::Mode;

/// storyforge - wave-based character development with human checkpoints
#[derive(Parser)]
#[command(
    name = "sf",
    about = "Wave-based, checkpoint-gated character development",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
///
/// Session ids may be abbreviated to any unique prefix.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a session from a story file (YAML or JSON)
    Start {
        /// Story input file
        input: PathBuf,

        /// Depth mode (fast, balanced, deep)
        #[arg(short, long)]
        mode: Option<Mode>,
    },

    /// Create one session per important character in a story file
    Batch {
        /// Story input file
        input: PathBuf,

        #[arg(short, long)]
        mode: Option<Mode>,
    },

    /// Run a session, pausing for approval after each wave
    ///
    /// While running, stdin accepts: approve <wave>, checkpoint <n>,
    /// regen <task> <feedback>, status, quit
    Run {
        session_id: String,

        /// Approve every wave as soon as it completes
        #[arg(short, long)]
        auto_approve: bool,
    },

    /// Show session progress
    Status { session_id: String },

    /// Show one checkpoint
    Checkpoint { session_id: String, number: u32 },

    /// List a session's checkpoints
    Checkpoints { session_id: String },

    /// Approve every checkpoint up to and including NUMBER
    Approve {
        session_id: String,
        #[arg(value_name = "NUMBER")]
        number: u32,
    },

    /// Approve a whole wave
    ApproveWave { session_id: String, wave: u32 },

    /// Re-run one task with feedback
    Regenerate {
        session_id: String,

        /// Task name or checkpoint number
        target: String,

        /// Reviewer feedback for the new version
        feedback: String,
    },

    /// Rebuild the final artifact from the current sections
    Consolidate { session_id: String },

    /// Show the final artifact
    Final { session_id: String },

    /// List sessions
    List,

    /// Delete a session and its files
    Delete { session_id: String },

    /// Show a session's event log
    Events { session_id: String },
}

impl Command {
    /// Whether this command calls the LLM
    pub fn needs_generator(&self) -> bool {
        matches!(self, Self::Run { .. } | Self::Regenerate { .. })
    }
}

/// What `regenerate` was pointed at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegenerateTarget {
    Task(String),
    Checkpoint(u32),
}

impl RegenerateTarget {
    pub fn parse(s: &str) -> Self {
        debug!(%s, "RegenerateTarget::parse: called");
        match s.trim().parse::<u32>() {
            Ok(number) => Self::Checkpoint(number),
            Err(_) => Self::Task(s.trim().to_string()),
        }
    }
}

/// Output format for command results
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

/// A command typed on stdin while `run` is in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    ApproveWave(u32),
    ApproveCheckpoint(u32),
    Regenerate { target: RegenerateTarget, feedback: String },
    Status,
    Quit,
}

impl RunInput {
    /// Parse one line; `Err` carries a usage hint
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default().to_lowercase();
        let number = |arg: Option<&str>| -> Result<u32, String> {
            arg.and_then(|a| a.parse().ok())
                .ok_or_else(|| format!("usage: {} <number>", verb))
        };

        match verb.as_str() {
            "approve" | "a" => number(parts.next()).map(Self::ApproveWave),
            "checkpoint" | "c" => number(parts.next()).map(Self::ApproveCheckpoint),
            "regen" | "regenerate" | "r" => {
                let target = parts.next().ok_or("usage: regen <task|checkpoint> <feedback>")?;
                let feedback = parts.collect::<Vec<_>>().join(" ");
                if feedback.is_empty() {
                    return Err("usage: regen <task|checkpoint> <feedback>".to_string());
                }
                Ok(Self::Regenerate {
                    target: RegenerateTarget::parse(target),
                    feedback,
                })
            }
            "status" | "s" => Ok(Self::Status),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            "" => Err("commands: approve <wave>, checkpoint <n>, regen <task> <feedback>, status, quit".to_string()),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_auto_approve() {
        let cli = Cli::try_parse_from(["sf", "--format", "json", "run", "abc", "--auto-approve"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Run {
                session_id,
                auto_approve,
            } => {
                assert_eq!(session_id, "abc");
                assert!(auto_approve);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_start_mode() {
        let cli = Cli::try_parse_from(["sf", "start", "story.yml", "--mode", "deep"]).unwrap();
        assert!(matches!(cli.command, Command::Start { mode: Some(Mode::Deep), .. }));
        assert!(!cli.command.needs_generator());
    }

    #[test]
    fn test_regenerate_target() {
        assert_eq!(RegenerateTarget::parse("3"), RegenerateTarget::Checkpoint(3));
        assert_eq!(
            RegenerateTarget::parse("personality"),
            RegenerateTarget::Task("personality".into())
        );
    }

    #[test]
    fn test_run_input() {
        assert_eq!(RunInput::parse("approve 2"), Ok(RunInput::ApproveWave(2)));
        assert_eq!(RunInput::parse("c 5"), Ok(RunInput::ApproveCheckpoint(5)));
        assert_eq!(
            RunInput::parse("regen personality make them braver"),
            Ok(RunInput::Regenerate {
                target: RegenerateTarget::Task("personality".into()),
                feedback: "make them braver".into(),
            })
        );
        assert_eq!(RunInput::parse("quit"), Ok(RunInput::Quit));
        assert!(RunInput::parse("approve").is_err());
        assert!(RunInput::parse("regen personality").is_err());
        assert!(RunInput::parse("dance").is_err());
    }
}
