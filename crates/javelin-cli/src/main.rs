mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Javelin -- tamper-evident audit chains for chat conversations.
#[derive(Parser, Debug)]
#[command(name = "javelin", version, about)]
struct Cli {
    /// Configuration file (defaults to ./javelin.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the canonical form of FILE (or stdin)
    Canonicalize {
        file: Option<PathBuf>,
    },

    /// Print the deduplication fingerprint of FILE's canonical form (or stdin)
    Fingerprint {
        file: Option<PathBuf>,
    },

    /// Show the effective configuration and where each value came from
    Config,

    /// Audit chain subcommands
    Audit {
        #[command(subcommand)]
        action: AuditCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
    /// Canonicalize a message or tool result and link it onto a conversation
    Append {
        #[arg(long)]
        user: String,

        #[arg(long)]
        conversation: String,

        /// user, assistant or tool
        #[arg(long, default_value = "user")]
        role: String,

        /// Step id (a random one is generated when omitted)
        #[arg(long)]
        step: Option<String>,

        /// Client-side sequence number
        #[arg(long)]
        seq: Option<i64>,

        /// Record a tool result from this tool instead of a message
        #[arg(long)]
        tool: Option<String>,

        /// Entry state (tool status for tool results)
        #[arg(long)]
        state: Option<String>,

        /// Anchor the entry at this RFC 3339 timestamp
        #[arg(long)]
        at: Option<String>,

        /// Content file (defaults to stdin)
        file: Option<PathBuf>,
    },

    /// Verify a conversation's hash chain
    Verify {
        #[arg(long)]
        user: String,

        #[arg(long)]
        conversation: String,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the hash the next entry will link to
    Tail {
        #[arg(long)]
        user: String,

        #[arg(long)]
        conversation: String,
    },

    /// Export a conversation's timeline
    Export {
        #[arg(long)]
        user: String,

        #[arg(long)]
        conversation: String,

        /// csv, json or ndjson
        #[arg(long, default_value = "csv")]
        format: String,

        /// Output file (defaults to stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List conversations present in the ledger
    List,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing with env filter (e.g., RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Canonicalize { file } => commands::text::canonicalize(file.as_deref()),
        Commands::Fingerprint { file } => commands::text::fingerprint(file.as_deref()),
        Commands::Config => commands::config::show(config),
        Commands::Audit { action } => match action {
            AuditCommands::Append {
                user,
                conversation,
                role,
                step,
                seq,
                tool,
                state,
                at,
                file,
            } => commands::audit::append(
                config,
                commands::audit::AppendArgs {
                    user,
                    conversation,
                    role,
                    step,
                    seq,
                    tool,
                    state,
                    at,
                    file,
                },
            ),
            AuditCommands::Verify {
                user,
                conversation,
                json,
            } => commands::audit::verify(config, &user, &conversation, json),
            AuditCommands::Tail { user, conversation } => {
                commands::audit::tail(config, &user, &conversation)
            }
            AuditCommands::Export {
                user,
                conversation,
                format,
                output,
            } => commands::audit::export(config, &user, &conversation, &format, output.as_deref()),
            AuditCommands::List => commands::audit::list(config),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_append_with_global_config() {
        let cli = Cli::try_parse_from([
            "javelin",
            "audit",
            "append",
            "--user",
            "u1",
            "--conversation",
            "c1",
            "--role",
            "assistant",
            "--config",
            "ledger.toml",
            "reply.md",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ledger.toml")));
        match cli.command {
            Commands::Audit {
                action: AuditCommands::Append { role, file, .. },
            } => {
                assert_eq!(role, "assistant");
                assert_eq!(file, Some(PathBuf::from("reply.md")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn export_defaults_to_csv() {
        let cli = Cli::try_parse_from([
            "javelin",
            "audit",
            "export",
            "--user",
            "u",
            "--conversation",
            "c",
        ])
        .unwrap();
        match cli.command {
            Commands::Audit {
                action: AuditCommands::Export { format, output, .. },
            } => {
                assert_eq!(format, "csv");
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
