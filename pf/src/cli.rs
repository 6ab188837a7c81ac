//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::Config;
use crate::domain::{ReferenceMatch, match_reference};
use crate::intake::IntakeRequest;

/// ProjectForge - multi-agent project scaffolding
#[derive(Parser)]
#[command(
    name = "pf",
    about = "Multi-agent project scaffolding orchestrator",
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

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the REST + WebSocket API
    Serve {
        /// Address to bind (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Do not resume unfinished projects on start-up
        #[arg(long)]
        no_recover: bool,
    },

    /// Validate an intake file without creating a project
    Validate {
        /// Intake request (JSON or YAML)
        file: PathBuf,
    },

    /// Print the execution plan an intake file would run
    Plan {
        /// Intake request (JSON or YAML)
        file: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Create a project and follow it to the end
    Run {
        /// Intake request (JSON or YAML)
        file: PathBuf,

        /// Approve every gate as soon as it opens
        #[arg(short, long)]
        auto_approve: bool,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "3600")]
        timeout: u64,
    },

    /// List stored projects
    List {
        /// Filter by status (pending, designing, awaiting_approval, ...)
        #[arg(short, long)]
        status: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one project's progress
    Show {
        /// Project ID, ID prefix or name fragment
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Read an intake request from a JSON or YAML file
///
/// `.json` files are parsed as JSON; everything else as YAML (a superset).
pub fn load_request(path: &Path) -> Result<IntakeRequest> {
    debug!(?path, "load_request: called");
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read intake file: {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(&content).context(format!("Failed to parse JSON intake: {}", path.display()))
    } else {
        serde_yaml::from_str(&content).context(format!("Failed to parse YAML intake: {}", path.display()))
    }
}

/// Resolve a project reference typed on the command line to a full ID
pub fn resolve_project_ref<'a, I>(ids: I, reference: &str) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    debug!(%reference, "resolve_project_ref: called");
    match match_reference(ids, reference) {
        ReferenceMatch::Unique(id) => Ok(id),
        ReferenceMatch::Missing => Err(eyre::eyre!("No project matches '{}'", reference)),
        ReferenceMatch::Ambiguous(candidates) => Err(eyre::eyre!(
            "'{}' matches several projects: {}",
            reference,
            candidates.join(", ")
        )),
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("projectforge")
        .join("logs")
        .join("projectforge.log")
}

/// Generate the after_help text with storage and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let defaults = Config::default();
    let mut help = String::new();
    help.push_str(&format!("Projects are stored in: {}\n", defaults.storage.db_path.display()));
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for plan/list/show commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::try_parse_from(["pf", "serve", "--bind", "0.0.0.0:9000"]).unwrap();
        match cli.command {
            Command::Serve { bind, no_recover } => {
                assert_eq!(bind.as_deref(), Some("0.0.0.0:9000"));
                assert!(!no_recover);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_run_with_globals() {
        let cli = Cli::try_parse_from(["pf", "run", "shop.yml", "--auto-approve", "-l", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Command::Run {
                file,
                auto_approve,
                timeout,
            } => {
                assert_eq!(file, PathBuf::from("shop.yml"));
                assert!(auto_approve);
                assert_eq!(timeout, 3600);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_list_json() {
        let cli = Cli::try_parse_from(["pf", "list", "--status", "completed", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::List { status: Some(ref s), format: OutputFormat::Json } if s == "completed"
        ));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["pf"]).is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("plain".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_load_request_json_and_yaml() {
        let dir = tempfile::tempdir().unwrap();

        let json = dir.path().join("api.json");
        std::fs::write(
            &json,
            r#"{"project_name": "inventory", "mode": "direct", "project_type": "api", "language_stack": "go"}"#,
        )
        .unwrap();
        let request = load_request(&json).unwrap();
        assert_eq!(request.language_stack.as_deref(), Some("go"));

        let yaml = dir.path().join("shop.yml");
        std::fs::write(
            &yaml,
            "project_name: shop\nmode: discovery\noverview: An online furniture shop\nhints:\n  key_features: [cart, search]\n",
        )
        .unwrap();
        let request = load_request(&yaml).unwrap();
        assert_eq!(request.mode.as_deref(), Some("discovery"));
        assert_eq!(request.hints.unwrap().key_features, vec!["cart", "search"]);
    }

    #[test]
    fn test_resolve_project_ref() {
        let ids = ["0194aa30-project-shop-api", "0194bb31-project-shop-web"];
        assert_eq!(resolve_project_ref(ids, "0194bb").unwrap(), "0194bb31-project-shop-web");
        assert_eq!(resolve_project_ref(ids, "api").unwrap(), "0194aa30-project-shop-api");

        let err = resolve_project_ref(ids, "shop").unwrap_err().to_string();
        assert!(err.contains("several projects"));
        assert!(err.contains("0194aa30-project-shop-api"));

        let err = resolve_project_ref(ids, "blog").unwrap_err().to_string();
        assert!(err.contains("No project matches 'blog'"));
    }

    #[test]
    fn test_load_request_reports_missing_file() {
        let err = load_request(Path::new("/nonexistent/intake.yml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read intake file"));
    }
}
