//! Timeline export in CSV, NDJSON and JSON.
//!
//! All three formats render the same row source: [`Exporter::rows`] runs one
//! ordered store scan on the blocking pool and feeds a bounded channel. The
//! consumer pulls rows as it writes them out, so CSV and NDJSON start
//! producing bytes before the scan is finished, and a full channel pauses the
//! scan. Dropping a stream closes the channel and stops the scan at the next
//! row.

use std::fmt;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use javelin_types::{ConversationKey, ExportConfig, LedgerError};

use crate::entry::TimelineRow;
use crate::store::ChainStore;

pub type RowStream = Pin<Box<dyn Stream<Item = Result<TimelineRow, LedgerError>> + Send>>;
pub type ExportStream = Pin<Box<dyn Stream<Item = Result<Bytes, LedgerError>> + Send>>;

pub const CSV_HEADER: &str = "id,type,role,step_id,seq,state,created_at,prev_hash,hash\n";

/// Microsecond-precision UTC timestamp used in CSV output.
const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Ndjson,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
            ExportFormat::Ndjson => "application/x-ndjson",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Ndjson => "ndjson",
        }
    }

    /// Attachment name for an export of `key`.
    pub fn file_name(&self, key: &ConversationKey) -> String {
        format!("audit-{}.{}", key.conversation_id, self.extension())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "ndjson" | "jsonl" => Ok(ExportFormat::Ndjson),
            other => Err(LedgerError::Export(format!(
                "unknown export format: {other:?} (expected csv, json or ndjson)"
            ))),
        }
    }
}

/// Quote a CSV field when it contains a separator, quote or line break.
pub fn csv_escape(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_line(row: &TimelineRow) -> String {
    let fields = [
        row.id.to_string(),
        row.kind.as_str().to_string(),
        row.role.as_str().to_string(),
        row.step_id.clone().unwrap_or_default(),
        row.seq.map(|s| s.to_string()).unwrap_or_default(),
        row.state.clone().unwrap_or_default(),
        row.created_at.format(CSV_TIMESTAMP_FORMAT).to_string(),
        row.prev_hash.clone(),
        row.hash.clone(),
    ];
    let mut line = fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn ndjson_line(row: &TimelineRow) -> Result<Bytes, LedgerError> {
    let mut line = serde_json::to_vec(row)
        .map_err(|e| LedgerError::Export(format!("failed to encode row {}: {e}", row.id)))?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// Pass items through up to and including the first error, then end.
fn end_after_error<S>(stream: S) -> impl Stream<Item = Result<Bytes, LedgerError>> + Send
where
    S: Stream<Item = Result<Bytes, LedgerError>> + Send,
{
    stream.scan(false, |failed, item| {
        if *failed {
            return future::ready(None);
        }
        *failed = item.is_err();
        future::ready(Some(item))
    })
}

/// Streams a conversation's timeline out of a store.
///
/// Streams must be created inside a Tokio runtime: the scan runs on the
/// blocking pool.
pub struct Exporter<S> {
    store: Arc<S>,
    config: ExportConfig,
}

impl<S: ChainStore + 'static> Exporter<S> {
    pub fn new(store: Arc<S>, config: ExportConfig) -> Self {
        Self { store, config }
    }

    /// Timeline rows in creation order. A read failure arrives as the last item.
    pub fn rows(&self, key: &ConversationKey) -> RowStream {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let store = Arc::clone(&self.store);
        let key = key.clone();

        tokio::task::spawn_blocking(move || {
            let mut sent = 0usize;
            let mut cancelled = false;
            let result = store.scan_timeline(&key, &mut |row| {
                if tx.blocking_send(Ok(row)).is_err() {
                    cancelled = true;
                    return ControlFlow::Break(());
                }
                sent += 1;
                ControlFlow::Continue(())
            });

            match result {
                Ok(()) if cancelled => {
                    debug!(conversation = %key, sent, "export cancelled by consumer");
                }
                Ok(()) => debug!(conversation = %key, sent, "export scan finished"),
                Err(e) => {
                    warn!(conversation = %key, sent, error = %e, "export scan failed");
                    let _ = tx.blocking_send(Err(e));
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    /// Header line, then one CSV line per row.
    pub fn export_csv(&self, key: &ConversationKey) -> ExportStream {
        info!(conversation = %key, format = "csv", "export started");
        let header = stream::once(future::ready(Ok(Bytes::from_static(CSV_HEADER.as_bytes()))));
        let rows = self
            .rows(key)
            .map(|row| row.map(|row| Bytes::from(csv_line(&row))));
        Box::pin(end_after_error(header.chain(rows)))
    }

    /// One compact JSON object per line.
    pub fn export_ndjson(&self, key: &ConversationKey) -> ExportStream {
        info!(conversation = %key, format = "ndjson", "export started");
        let rows = self
            .rows(key)
            .map(|row| row.and_then(|row| ndjson_line(&row)));
        Box::pin(end_after_error(rows))
    }

    /// The whole timeline as one JSON array. Buffered: prefer NDJSON for
    /// large conversations.
    pub async fn export_json(&self, key: &ConversationKey) -> Result<Vec<u8>, LedgerError> {
        info!(conversation = %key, format = "json", "export started");
        let mut rows = self.rows(key);
        let mut all = Vec::new();
        while let Some(row) = rows.next().await {
            all.push(row?);
        }
        serde_json::to_vec(&all)
            .map_err(|e| LedgerError::Export(format!("failed to encode timeline: {e}")))
    }

    /// Any format as a byte stream. JSON is produced as a single chunk.
    pub fn export(&self, key: &ConversationKey, format: ExportFormat) -> ExportStream {
        match format {
            ExportFormat::Csv => self.export_csv(key),
            ExportFormat::Ndjson => self.export_ndjson(key),
            ExportFormat::Json => {
                info!(conversation = %key, format = "json", "export started");
                let rows = self.rows(key);
                Box::pin(stream::once(async move {
                    let all = rows
                        .collect::<Vec<_>>()
                        .await
                        .into_iter()
                        .collect::<Result<Vec<_>, _>>()?;
                    serde_json::to_vec(&all)
                        .map(Bytes::from)
                        .map_err(|e| LedgerError::Export(format!("failed to encode timeline: {e}")))
                }))
            }
        }
    }

    /// Write an export to `writer`, returning the number of bytes written.
    pub async fn export_to_writer<W>(
        &self,
        key: &ConversationKey,
        format: ExportFormat,
        writer: &mut W,
    ) -> Result<u64, LedgerError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = self.export(key, format);
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        info!(conversation = %key, %format, bytes = written, "export finished");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainLinker;
    use crate::entry::EntryDraft;
    use crate::memory::MemoryChainStore;
    use chrono::{TimeZone, Utc};
    use javelin_types::{LinkConfig, Role};

    fn key() -> ConversationKey {
        ConversationKey::new("u", "conv-42")
    }

    fn exporter_with(n: usize) -> Exporter<MemoryChainStore> {
        let store = Arc::new(MemoryChainStore::new());
        let linker = ChainLinker::new(Arc::clone(&store), LinkConfig::default());
        for i in 0..n {
            let draft = EntryDraft::message(Role::User, format!("m{i}")).with_seq(i as i64);
            linker.link(&key(), draft).unwrap();
        }
        Exporter::new(
            store,
            ExportConfig {
                channel_capacity: 2,
            },
        )
    }

    async fn collect(stream: ExportStream) -> String {
        let chunks: Vec<Bytes> = stream
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        String::from_utf8(chunks.concat()).unwrap()
    }

    #[test]
    fn format_names() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("jsonl".parse::<ExportFormat>().unwrap(), ExportFormat::Ndjson);
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Ndjson.file_name(&key()), "audit-conv-42.ndjson");
        assert_eq!(ExportFormat::Csv.content_type(), "text/csv; charset=utf-8");
    }

    #[test]
    fn csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn csv_line_renders_micros_and_empty_fields() {
        let row = TimelineRow {
            id: 9,
            kind: javelin_types::EntryKind::Message,
            role: Role::Assistant,
            step_id: Some("s,1".into()),
            seq: None,
            state: None,
            created_at: Utc.timestamp_opt(1_700_000_000, 5_000).unwrap(),
            prev_hash: "genesis".into(),
            hash: "abc".into(),
        };
        assert_eq!(
            csv_line(&row),
            "9,message,assistant,\"s,1\",,,2023-11-14T22:13:20.000005,genesis,abc\n"
        );
    }

    #[tokio::test]
    async fn csv_has_header_and_one_line_per_row() {
        let exporter = exporter_with(5);
        let csv = collect(exporter.export_csv(&key())).await;
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER.trim_end());
        assert_eq!(lines.len(), 6);
    }

    #[tokio::test]
    async fn ndjson_has_one_object_per_line() {
        let exporter = exporter_with(4);
        let ndjson = collect(exporter.export_ndjson(&key())).await;
        assert!(ndjson.ends_with('\n'));
        let seqs: Vec<i64> = ndjson
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn json_is_one_array() {
        let exporter = exporter_with(3);
        let bytes = exporter.export_json(&key()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(3));
        assert_eq!(value[0]["prev_hash"], "genesis");
    }

    #[tokio::test]
    async fn empty_conversation_exports_header_only() {
        let exporter = exporter_with(0);
        assert_eq!(collect(exporter.export_csv(&key())).await, CSV_HEADER);
        assert_eq!(collect(exporter.export_ndjson(&key())).await, "");
        assert_eq!(exporter.export_json(&key()).await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn writer_receives_every_byte() {
        let exporter = exporter_with(3);
        let mut out = Vec::new();
        let written = exporter
            .export_to_writer(&key(), ExportFormat::Json, &mut out)
            .await
            .unwrap();
        assert_eq!(written as usize, out.len());
        assert_eq!(out, exporter.export_json(&key()).await.unwrap());
    }
}
