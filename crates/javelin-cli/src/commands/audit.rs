use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use javelin_ledger::{
    ChainLinker, ChainStore, ExportFormat, Exporter, MessageAudit, SqliteChainStore, ToolAudit,
    Verifier, VerifyReport,
};
use javelin_types::{ConversationKey, LedgerConfig, Role};

use crate::commands::{load_config, read_input};

/// Arguments of `javelin audit append`.
pub struct AppendArgs {
    pub user: String,
    pub conversation: String,
    pub role: String,
    pub step: Option<String>,
    pub seq: Option<i64>,
    pub tool: Option<String>,
    pub state: Option<String>,
    pub at: Option<String>,
    pub file: Option<PathBuf>,
}

fn open_store(config: &LedgerConfig) -> Result<Arc<SqliteChainStore>> {
    let store = SqliteChainStore::open(&config.ledger_path).with_context(|| {
        format!(
            "failed to open audit ledger at {}",
            config.ledger_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

/// Run `javelin audit append`.
///
/// Messages are recorded as a message payload with canonicalized content.
/// With `--tool`, the input is recorded as a tool result: its data hash is
/// taken over the input parsed as JSON, or over the raw text if it is not JSON.
pub fn append(config_path: Option<&Path>, args: AppendArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let key = ConversationKey::new(args.user, args.conversation);
    let content = read_input(args.file.as_deref())?;

    let at: Option<DateTime<Utc>> = args
        .at
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .context("invalid --at timestamp (expected RFC 3339)")
        })
        .transpose()?;
    let step = args.step.unwrap_or_else(|| Uuid::new_v4().to_string());

    let draft = match &args.tool {
        Some(tool) => {
            let data: Value =
                serde_json::from_str(&content).unwrap_or_else(|_| Value::String(content.clone()));
            let status = args.state.as_deref().unwrap_or("ok");
            let mut payload = ToolAudit::new(&key, &step, tool, status).with_data(&data);
            payload.ts = at;
            payload.draft()?
        }
        None => {
            let role: Role = args.role.parse().context("invalid --role")?;
            let mut payload = MessageAudit::new(&key, &step, role).with_content(&content);
            payload.seq = args.seq;
            payload.ts = at;
            let draft = payload.draft()?;
            match args.state {
                Some(state) => draft.with_state(state),
                None => draft,
            }
        }
    };
    let draft = match args.seq {
        Some(seq) => draft.with_seq(seq),
        None => draft,
    };

    let linker = ChainLinker::new(store, config.link);
    let entry = match at {
        Some(at) => linker.link_at(&key, at, draft),
        None => linker.link(&key, draft),
    }
    .context("failed to link entry")?;

    println!("Linked entry #{} in {key}", entry.index);
    println!("  Step:      {step}");
    println!("  Prev hash: {}", entry.prev_hash);
    println!("  Hash:      {}", entry.hash);
    Ok(())
}

/// Run `javelin audit verify`. Exits with status 1 when issues are found.
pub fn verify(config_path: Option<&Path>, user: &str, conversation: &str, json: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let verifier = Verifier::new(open_store(&config)?);
    let key = ConversationKey::new(user, conversation);

    let report = verifier
        .verify(&key)
        .context("failed to verify audit chain")?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{rendered}");
    } else {
        print_report(&report);
    }

    if !report.is_valid() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &VerifyReport) {
    println!("Chain Report: {}", report.conversation);
    println!("  Total entries: {}", report.total);
    println!(
        "  Valid:         {}",
        if report.is_valid() { "YES" } else { "NO" }
    );
    println!("  OK / bad:      {} / {}", report.ok, report.bad);
    if let Some(first) = &report.first_bad {
        println!("  First bad:     entry #{} ({})", first.index, first.reason);
    }
    println!("  Latest hash:   {}", report.latest_hash);

    for issue in &report.issues {
        println!();
        println!(
            "  #{} id={} role={} step={} [{}]",
            issue.index,
            issue.entry_id,
            issue.role,
            issue.step_id.as_deref().unwrap_or("-"),
            issue.reason
        );
        println!("    stored prev:   {}", issue.stored_prev);
        println!("    expected prev: {}", issue.expected_prev);
        println!("    stored hash:   {}", issue.stored_hash);
        println!(
            "    expected hash: {}",
            issue.expected_hash.as_deref().unwrap_or("(no payload)")
        );
    }
}

/// Run `javelin audit tail`.
pub fn tail(config_path: Option<&Path>, user: &str, conversation: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let verifier = Verifier::new(open_store(&config)?);
    let hash = verifier
        .tail_hash(&ConversationKey::new(user, conversation))
        .context("failed to read chain tail")?;
    println!("{hash}");
    Ok(())
}

/// Run `javelin audit export`.
pub fn export(
    config_path: Option<&Path>,
    user: &str,
    conversation: &str,
    format: &str,
    output: Option<&Path>,
) -> Result<()> {
    let format: ExportFormat = format.parse().context("invalid --format")?;
    let config = load_config(config_path)?;
    let exporter = Exporter::new(open_store(&config)?, config.export);
    let key = ConversationKey::new(user, conversation);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    rt.block_on(async {
        match output {
            Some(path) => {
                let mut file = tokio::fs::File::create(path)
                    .await
                    .with_context(|| format!("failed to create {}", path.display()))?;
                let written = exporter
                    .export_to_writer(&key, format, &mut file)
                    .await
                    .context("export failed")?;
                eprintln!(
                    "Exported {written} bytes of {} to {} (suggested name: {})",
                    format.content_type(),
                    path.display(),
                    format.file_name(&key)
                );
            }
            None => {
                let mut stdout = tokio::io::stdout();
                exporter
                    .export_to_writer(&key, format, &mut stdout)
                    .await
                    .context("export failed")?;
            }
        }
        Ok(())
    })
}

/// Run `javelin audit list`.
pub fn list(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let conversations = store
        .conversations()
        .context("failed to list conversations")?;

    if conversations.is_empty() {
        println!("No conversations found.");
        return Ok(());
    }

    let verifier = Verifier::new(Arc::clone(&store));
    println!("{:<24} {:<24} {:>7}  STATUS", "USER", "CONVERSATION", "ENTRIES");
    for key in conversations {
        let report = verifier.verify(&key)?;
        let status = if report.is_valid() { "ok" } else { "TAMPERED" };
        println!(
            "{:<24} {:<24} {:>7}  {status}",
            key.user_id, key.conversation_id, report.total
        );
    }
    Ok(())
}
