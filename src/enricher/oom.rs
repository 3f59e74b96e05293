//! OOM kill enrichment: reconstructs the kernel's process table dump.

use std::fmt::Write as _;

use tracing::debug;

use super::query::{journal_messages, run_command};
use crate::event::Event;

const TOP_CONSUMER_COUNT: usize = 5;

/// Queries kernel logs from the minute before the kill and summarizes the
/// OOM killer's process table into the event detail.
pub(crate) async fn enrich(ev: &mut Event) {
    let lines = match kernel_logs_around().await {
        Ok(lines) => lines,
        Err(err) => {
            debug!(error = %err, "oom enrichment: failed to get kernel logs");
            return;
        }
    };

    let mut detail = String::new();
    if !ev.process.is_empty() {
        let _ = writeln!(detail, "{} was killed by OOM killer.", ev.process);
    }

    let consumers = parse_oom_table(&lines);
    if !consumers.is_empty() {
        detail.push_str("\nTop memory consumers at time of kill:\n");
        for (i, c) in consumers.iter().take(TOP_CONSUMER_COUNT).enumerate() {
            let suffix = if c.name == ev.process { " (killed)" } else { "" };
            let _ = writeln!(detail, "  {}. {:<16} {} pages{}", i + 1, c.name, c.pages, suffix);
        }
    }

    ev.detail = detail;
}

async fn kernel_logs_around() -> anyhow::Result<Vec<String>> {
    let out = run_command(
        "journalctl",
        &["-k", "--since", "60s ago", "-o", "json", "--no-pager"],
    )
    .await?;
    Ok(journal_messages(&out))
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct MemConsumer {
    pub name: String,
    pub pages: i64,
}

/// Finds the OOM killer's process table in kernel messages and returns its
/// rows sorted by RSS descending. The table looks like:
///
///   [ pid ]   uid  tgid total_vm      rss pgtables_bytes swapents oom_score_adj name
///   [  123]  1000   123   123456    78901     456789       0             0 firefox
pub(crate) fn parse_oom_table(lines: &[String]) -> Vec<MemConsumer> {
    let mut consumers = Vec::new();
    let mut in_table = false;

    for line in lines {
        if line.contains("uid  tgid total_vm") || line.contains("oom_score_adj name") {
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        if line.contains("oom-kill:") || line.contains("Out of memory") {
            break;
        }
        if let Some(consumer) = parse_oom_table_line(line) {
            consumers.push(consumer);
        }
    }

    consumers.sort_by(|a, b| b.pages.cmp(&a.pages));
    consumers
}

fn parse_oom_table_line(line: &str) -> Option<MemConsumer> {
    let line = line.trim();
    if !line.starts_with('[') {
        return None;
    }
    let rest = &line[line.find(']')? + 1..];

    // uid tgid total_vm rss pgtables_bytes swapents oom_score_adj name
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 8 {
        return None;
    }

    let pages = fields[3].parse().ok()?;
    let name = fields.last()?.to_string();
    Some(MemConsumer { name, pages })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_lines() -> Vec<String> {
        [
            "some unrelated kernel message",
            "[ pid ]   uid  tgid total_vm      rss pgtables_bytes swapents oom_score_adj name",
            "[  100]  1000   100   123456    78901     456789       0             0 firefox",
            "[  200]  1000   200   223456   178901     456789       0             0 electron",
            "[  300]  1000   300    23456     8901      56789       0             0 bash",
            "Out of memory: Killed process 200 (electron)",
            "[  400]  1000   400    99999    99999      99999       0             0 after-terminator",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn parses_table_sorted_by_rss() {
        let consumers = parse_oom_table(&table_lines());
        assert_eq!(consumers.len(), 3);
        assert_eq!(consumers[0].name, "electron");
        assert_eq!(consumers[0].pages, 178_901);
        assert_eq!(consumers[1].name, "firefox");
        assert_eq!(consumers[2].name, "bash");
    }

    #[test]
    fn stops_at_table_terminator() {
        let consumers = parse_oom_table(&table_lines());
        assert!(consumers.iter().all(|c| c.name != "after-terminator"));
    }

    #[test]
    fn ignores_lines_outside_table() {
        let lines: Vec<String> = vec![
            "[  100]  1000   100   123456    78901     456789       0             0 firefox"
                .to_string(),
        ];
        assert!(parse_oom_table(&lines).is_empty());
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(parse_oom_table_line("no brackets here").is_none());
        assert!(parse_oom_table_line("[ 100] too few fields").is_none());
        assert!(parse_oom_table_line("").is_none());
    }
}
