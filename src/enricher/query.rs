//! Subprocess helper shared by the enrichment queries.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;

pub(crate) const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a command under the enrichment deadline and returns its stdout.
pub(crate) async fn run_command(name: &str, args: &[&str]) -> Result<Vec<u8>> {
    let output = tokio::time::timeout(
        QUERY_TIMEOUT,
        Command::new(name)
            .args(args)
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| anyhow!("{name} timed out after {QUERY_TIMEOUT:?}"))?
    .with_context(|| format!("running {name}"))?;

    if !output.status.success() {
        bail!(
            "{name} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

/// Extracts MESSAGE fields from `journalctl -o json` output lines.
pub(crate) fn journal_messages(output: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(output)
        .lines()
        .filter_map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).ok()?;
            value
                .get("MESSAGE")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_messages_from_journal_json() {
        let output = concat!(
            r#"{"MESSAGE": "first line", "PRIORITY": "3"}"#,
            "\n",
            "garbage that is not json\n",
            r#"{"MESSAGE": "second line"}"#,
            "\n",
            r#"{"OTHER": "no message field"}"#,
            "\n",
        );
        let messages = journal_messages(output.as_bytes());
        assert_eq!(messages, vec!["first line", "second line"]);
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        assert!(run_command("definitely-not-a-real-binary", &[]).await.is_err());
    }
}
