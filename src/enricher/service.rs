//! Service failure enrichment: recent log lines of the failed unit.

use std::fmt::Write as _;

use tracing::debug;

use super::query::{journal_messages, run_command};
use crate::event::Event;

const UNIT_LOG_LINES: usize = 10;

/// Appends the failed unit's most recent journal lines to the event detail.
pub(crate) async fn enrich(ev: &mut Event) {
    if ev.unit.is_empty() {
        return;
    }

    let lines = match unit_logs(&ev.unit, UNIT_LOG_LINES).await {
        Ok(lines) => lines,
        Err(err) => {
            debug!(unit = %ev.unit, error = %err, "service enrichment: failed to get unit logs");
            return;
        }
    };
    if lines.is_empty() {
        return;
    }

    let mut detail = format!("{} failed.\n\nLast log lines:\n", ev.unit);
    for line in &lines {
        let _ = writeln!(detail, "  {line}");
    }
    ev.detail = detail;
}

async fn unit_logs(unit: &str, n: usize) -> anyhow::Result<Vec<String>> {
    let n = n.to_string();
    let out = run_command(
        "journalctl",
        &["-u", unit, "-n", &n, "--no-pager", "-o", "json"],
    )
    .await?;
    Ok(journal_messages(&out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tier;
    use chrono::Utc;

    #[tokio::test]
    async fn empty_unit_skips_enrichment() {
        let mut ev = Event::new("host1", Utc::now(), Tier::ServiceFailure, "Service failed");
        enrich(&mut ev).await;
        assert!(ev.detail.is_empty());
    }
}
