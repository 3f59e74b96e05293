//! Crash enrichment: coredump metadata from coredumpctl.

use std::fmt::Write as _;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::debug;

use super::query::run_command;
use crate::event::Event;
use crate::format;

const BACKTRACE_FRAME_LIMIT: usize = 5;

/// Queries coredumpctl for the crashing pid and formats signal, coredump
/// size, and the top backtrace frames into the event detail.
pub(crate) async fn enrich(ev: &mut Event) {
    if ev.pid == 0 {
        return;
    }

    let info = match coredump_info(ev.pid).await {
        Ok(info) => info,
        Err(err) => {
            debug!(pid = ev.pid, error = %err, "crash enrichment: coredumpctl query failed");
            return;
        }
    };

    let mut detail = String::new();
    if !ev.process.is_empty() {
        let _ = write!(detail, "{} crashed", ev.process);
    } else if !info.executable.is_empty() {
        let _ = write!(detail, "{} crashed", info.executable);
    }
    if !info.signal.is_empty() {
        let _ = write!(detail, " with {}", info.signal);
    }
    detail.push_str(".\n");

    if info.coredump_size > 0 {
        let _ = writeln!(detail, "Coredump saved ({}).", format::bytes(info.coredump_size));
    }

    if !info.backtrace.is_empty() {
        detail.push_str("\nTop backtrace frames:\n");
        for (i, frame) in info.backtrace.iter().take(BACKTRACE_FRAME_LIMIT).enumerate() {
            let _ = writeln!(detail, "  #{i} {frame}");
        }
    }

    ev.detail = detail;
}

#[derive(Debug, Default)]
pub(crate) struct CoredumpInfo {
    pub signal: String,
    pub executable: String,
    pub coredump_size: i64,
    pub backtrace: Vec<String>,
}

async fn coredump_info(pid: i64) -> Result<CoredumpInfo> {
    let out = run_command(
        "coredumpctl",
        &["info", &pid.to_string(), "--json=short", "--no-pager"],
    )
    .await?;
    parse_coredump_json(&out)
}

/// coredumpctl --json=short emits a JSON array, or occasionally a single
/// object; the most recent entry wins.
pub(crate) fn parse_coredump_json(data: &[u8]) -> Result<CoredumpInfo> {
    let value: Value = serde_json::from_slice(data).context("parsing coredumpctl JSON")?;

    let entry = match &value {
        Value::Array(entries) => entries.last().cloned(),
        Value::Object(_) => Some(value.clone()),
        _ => None,
    };
    let Some(entry) = entry else {
        bail!("no coredump entries found");
    };

    let mut info = CoredumpInfo::default();

    if let Some(signal) = entry.get("COREDUMP_SIGNAL_NAME").and_then(Value::as_str) {
        info.signal = signal.to_string();
    } else if let Some(signal) = entry.get("COREDUMP_SIGNAL").and_then(Value::as_str) {
        info.signal = format!("signal {signal}");
    }

    if let Some(exe) = entry.get("COREDUMP_EXE").and_then(Value::as_str) {
        info.executable = exe.to_string();
    }

    if let Some(size) = entry.get("COREDUMP_SIZE").and_then(Value::as_i64) {
        info.coredump_size = size;
    }

    // The journal stores the rendered stack in the coredump message.
    if let Some(message) = entry.get("COREDUMP_MESSAGE").and_then(Value::as_str) {
        info.backtrace = message
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with('#'))
            .map(str::to_string)
            .collect();
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_array_output() {
        let data = json!([
            {"COREDUMP_SIGNAL_NAME": "SIGABRT", "COREDUMP_SIZE": 1024},
            {
                "COREDUMP_SIGNAL_NAME": "SIGSEGV",
                "COREDUMP_EXE": "/usr/bin/vlc",
                "COREDUMP_SIZE": 52_428_800,
                "COREDUMP_MESSAGE": "Stack trace of thread 5678:\n#0 0x00007f deref (libc.so)\n#1 0x00007f main (vlc)"
            }
        ]);
        let info = parse_coredump_json(data.to_string().as_bytes()).unwrap();
        // Most recent (last) entry wins.
        assert_eq!(info.signal, "SIGSEGV");
        assert_eq!(info.executable, "/usr/bin/vlc");
        assert_eq!(info.coredump_size, 52_428_800);
        assert_eq!(info.backtrace.len(), 2);
        assert!(info.backtrace[0].starts_with("#0"));
    }

    #[test]
    fn parses_single_object_output() {
        let data = json!({"COREDUMP_SIGNAL": "11", "COREDUMP_SIZE": 4096});
        let info = parse_coredump_json(data.to_string().as_bytes()).unwrap();
        assert_eq!(info.signal, "signal 11");
        assert_eq!(info.coredump_size, 4096);
    }

    #[test]
    fn empty_array_is_an_error() {
        assert!(parse_coredump_json(b"[]").is_err());
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_coredump_json(b"not json").is_err());
    }

    #[tokio::test]
    async fn zero_pid_skips_enrichment() {
        let mut ev = Event::new(
            "host1",
            chrono::Utc::now(),
            crate::event::Tier::ProcessCrash,
            "Crash: vlc",
        );
        ev.pid = 0;
        enrich(&mut ev).await;
        assert!(ev.detail.is_empty());
    }
}
