//! Journal source backed by a `journalctl --follow` subprocess.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{JournalRecord, JournalSource, RECORD_CHANNEL_CAPACITY};

/// Tails `journalctl --follow -o json` filtered to emerg..err priorities.
pub struct PipeSource {
    cursor_file: Option<PathBuf>,
}

impl PipeSource {
    /// `cursor_file` is where journalctl persists its position for resume
    /// across sessions; `None` disables cursor tracking.
    pub fn new(cursor_file: Option<PathBuf>) -> Self {
        PipeSource { cursor_file }
    }
}

#[async_trait]
impl JournalSource for PipeSource {
    async fn entries(
        &mut self,
        token: CancellationToken,
    ) -> Result<mpsc::Receiver<JournalRecord>> {
        let mut cmd = Command::new("journalctl");
        cmd.args(["--follow", "-o", "json", "--no-pager", "-p", "0..3"]);
        if let Some(cursor_file) = &self.cursor_file {
            cmd.arg("--cursor-file").arg(cursor_file);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("spawning journalctl")?;
        let stdout = child
            .stdout
            .take()
            .context("journalctl stdout unavailable")?;

        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let record = match parse_journal_json(&line) {
                                Ok(record) => record,
                                Err(err) => {
                                    debug!(error = %err, "skipping unparseable journal line");
                                    continue;
                                }
                            };
                            if tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "journal pipe read error");
                            break;
                        }
                    }
                }
            }
            let _ = child.kill().await;
            let _ = child.wait().await;
        });

        info!(priority_filter = "0..3", "journal watcher started");
        Ok(rx)
    }
}

/// Parses a single JSON line from `journalctl -o json`. Field values are
/// coerced to strings; multi-value array fields keep their first element.
pub(crate) fn parse_journal_json(line: &str) -> Result<JournalRecord> {
    let raw: serde_json::Map<String, Value> =
        serde_json::from_str(line).context("parsing journal JSON")?;

    let mut fields = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        let coerced = match value {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(items) => match items.into_iter().next() {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => continue,
            },
            Value::Null => continue,
            other => other.to_string(),
        };
        fields.insert(key, coerced);
    }

    let priority = fields
        .get("PRIORITY")
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let field = |key: &str| fields.get(key).cloned().unwrap_or_default();

    let message = field("MESSAGE");
    let syslog_identifier = field("SYSLOG_IDENTIFIER");
    let systemd_unit = field("_SYSTEMD_UNIT");
    let pid = field("_PID");
    let transport = field("_TRANSPORT");
    let cursor = field("__CURSOR");
    let realtime_timestamp = field("__REALTIME_TIMESTAMP");

    Ok(JournalRecord {
        message,
        priority,
        syslog_identifier,
        systemd_unit,
        pid,
        transport,
        cursor,
        realtime_timestamp,
        fields,
    })
}
