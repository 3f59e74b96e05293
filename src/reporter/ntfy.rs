//! Event notifications over the ntfy HTTP API.

use std::fmt::Write as _;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use reqwest::header::HeaderValue;
use reqwest::Client;
use tracing::{debug, info};

use crate::config::Config;
use crate::event::{Event, Tier};

const NTFY_TIMEOUT: Duration = Duration::from_secs(15);
const DIGEST_PRIORITY: &str = "low";
const DIGEST_TAGS: &str = "bar_chart";

/// Sends event and digest notifications to a configured ntfy endpoint.
/// With no endpoint configured every send is a successful no-op.
pub struct NtfyReporter {
    config: Config,
    client: Client,
}

impl NtfyReporter {
    pub fn new(config: Config) -> Self {
        NtfyReporter {
            config,
            client: Client::new(),
        }
    }

    /// Posts a notification for the event if its tier is in the configured
    /// alert tiers. A non-2xx response is an error; the caller decides
    /// whether to mark the event notified.
    pub async fn report(&self, ev: &Event) -> Result<()> {
        if self.config.ntfy.url.is_empty() {
            debug!("ntfy url not configured, skipping notification");
            return Ok(());
        }
        if !self.config.ntfy.should_alert(ev.tier.as_str()) {
            debug!(tier = %ev.tier, "event tier not in alert tiers, skipping");
            return Ok(());
        }

        let title = format_title(ev);
        let priority = self.config.ntfy.priority_for(ev.severity.as_str());
        let tags = tags_for_tier(ev.tier);

        let response = self
            .client
            .post(&self.config.ntfy.url)
            .timeout(NTFY_TIMEOUT)
            .header("Title", header_value(&title))
            .header("Priority", header_value(priority))
            .header("Tags", header_value(tags))
            .body(format_body(ev))
            .send()
            .await
            .context("sending ntfy notification")?;

        if !response.status().is_success() {
            bail!("ntfy returned status {}", response.status());
        }

        info!(tier = %ev.tier, summary = %ev.summary, priority, "notification sent");
        Ok(())
    }

    /// Posts a rendered digest to the digest topic (falling back to the
    /// main ntfy topic) with a low priority.
    pub async fn send_digest(&self, title: &str, body: &str) -> Result<()> {
        let topic = self.config.digest.effective_topic(&self.config.ntfy.url);
        if topic.is_empty() {
            bail!("no digest topic or ntfy url configured");
        }

        let response = self
            .client
            .post(topic)
            .timeout(NTFY_TIMEOUT)
            .header("Title", header_value(title))
            .header("Priority", header_value(DIGEST_PRIORITY))
            .header("Tags", header_value(DIGEST_TAGS))
            .body(body.to_string())
            .send()
            .await
            .context("sending digest notification")?;

        if !response.status().is_success() {
            bail!("ntfy returned status {}", response.status());
        }
        Ok(())
    }
}

/// Builds the notification title: `<emoji> [<instance>] <summary>`.
pub fn format_title(ev: &Event) -> String {
    format!("{} [{}] {}", tier_emoji(ev.tier), ev.instance_id, ev.summary)
}

/// Builds the notification body: host and time lines plus the detail block.
pub fn format_body(ev: &Event) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Host: {}", ev.instance_id);
    let _ = writeln!(body, "Time: {}", ev.timestamp.format("%Y-%m-%d %H:%M:%S %Z"));
    if !ev.detail.is_empty() {
        body.push('\n');
        body.push_str(&ev.detail);
    }
    body
}

fn tier_emoji(tier: Tier) -> &'static str {
    match tier {
        Tier::OomKill => "\u{1f534}",      // red circle
        Tier::ProcessCrash => "\u{1f4a5}", // collision
        _ => "\u{2757}",                   // exclamation mark
    }
}

/// Fixed ntfy tag list per tier.
pub fn tags_for_tier(tier: Tier) -> &'static str {
    match tier {
        Tier::OomKill => "skull,memory",
        Tier::ProcessCrash => "warning,crash",
        _ => "warning",
    }
}

// ntfy titles may carry UTF-8; HeaderValue::from_bytes accepts it where
// from_str would reject anything past ASCII.
fn header_value(s: &str) -> HeaderValue {
    HeaderValue::from_bytes(s.as_bytes())
        .unwrap_or_else(|_| HeaderValue::from_static("logtriage"))
}

/// Synthetic event for verifying ntfy connectivity end to end.
pub fn test_event(instance_id: &str) -> Event {
    let mut ev = Event::new(
        instance_id,
        Utc::now(),
        Tier::ProcessCrash,
        "Test notification from logtriage",
    );
    ev.detail = "This is a test notification to verify ntfy connectivity.\n\
                 If you see this, logtriage is configured correctly."
        .to_string();
    ev
}
