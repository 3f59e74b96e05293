//! Aggregated digest over a window of stored events.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::event::{Event, Tier};

/// Per-tier counts and breakdowns for a digest period.
#[derive(Debug)]
pub struct DigestSummary {
    pub instance_id: String,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,

    pub oom_kills: i64,
    pub oom_breakdown: HashMap<String, i64>,
    pub crashes: i64,
    pub crash_breakdown: HashMap<String, i64>,
    pub service_failures: i64,
    pub service_breakdown: HashMap<String, i64>,
    pub kernel_hw_errors: i64,
    /// Unique T4 summaries, in first-seen order.
    pub kernel_breakdown: Vec<String>,
    pub mem_pressure: i64,
}

impl DigestSummary {
    fn empty(instance_id: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        DigestSummary {
            instance_id: instance_id.to_string(),
            since,
            until,
            oom_kills: 0,
            oom_breakdown: HashMap::new(),
            crashes: 0,
            crash_breakdown: HashMap::new(),
            service_failures: 0,
            service_breakdown: HashMap::new(),
            kernel_hw_errors: 0,
            kernel_breakdown: Vec::new(),
            mem_pressure: 0,
        }
    }
}

/// Aggregates events into a digest summary. Breakdowns key on process for
/// T1/T2, unit for T3, and deduplicated summary strings for T4.
pub fn build_digest(
    instance_id: &str,
    events: &[Event],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> DigestSummary {
    let mut digest = DigestSummary::empty(instance_id, since, until);

    let mut kernel_seen: HashMap<String, bool> = HashMap::new();

    for ev in events {
        match ev.tier {
            Tier::OomKill => {
                digest.oom_kills += 1;
                *digest.oom_breakdown.entry(subject(&ev.process)).or_default() += 1;
            }
            Tier::ProcessCrash => {
                digest.crashes += 1;
                *digest.crash_breakdown.entry(subject(&ev.process)).or_default() += 1;
            }
            Tier::ServiceFailure => {
                digest.service_failures += 1;
                *digest.service_breakdown.entry(subject(&ev.unit)).or_default() += 1;
            }
            Tier::KernelHw => {
                digest.kernel_hw_errors += 1;
                if kernel_seen.insert(ev.summary.clone(), true).is_none() {
                    digest.kernel_breakdown.push(ev.summary.clone());
                }
            }
            Tier::MemPressure => {
                digest.mem_pressure += 1;
            }
        }
    }

    digest
}

fn subject(name: &str) -> String {
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.to_string()
    }
}

/// Renders the digest as plain text suitable for ntfy or stdout.
pub fn format_digest(digest: &DigestSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== {} ===", digest.instance_id);
    let _ = writeln!(
        out,
        "Period: {} - {}\n",
        digest.since.format("%b %d"),
        digest.until.format("%b %d")
    );

    let _ = write!(out, "OOM Kills:        {}", digest.oom_kills);
    if digest.oom_kills > 0 {
        let _ = write!(out, " ({})", format_breakdown(&digest.oom_breakdown));
    }
    out.push('\n');

    let _ = write!(out, "Process Crashes:  {}", digest.crashes);
    if digest.crashes > 0 {
        let _ = write!(out, " ({})", format_breakdown(&digest.crash_breakdown));
    }
    out.push('\n');

    let _ = write!(out, "Service Failures: {}", digest.service_failures);
    if digest.service_failures > 0 {
        let _ = write!(out, " ({})", format_breakdown(&digest.service_breakdown));
    }
    out.push('\n');

    let _ = write!(out, "HW/Kernel Errors: {}", digest.kernel_hw_errors);
    if digest.kernel_hw_errors > 0 && !digest.kernel_breakdown.is_empty() {
        let _ = write!(out, " ({})", digest.kernel_breakdown.join(", "));
    }
    out.push('\n');

    let _ = writeln!(out, "Memory Pressure:  {} warning episodes", digest.mem_pressure);

    out
}

/// Title for a digest notification.
pub fn format_digest_title(since: DateTime<Utc>, until: DateTime<Utc>) -> String {
    format!(
        "\u{1f4ca} logtriage weekly digest ({}-{})",
        since.format("%b %d"),
        until.format("%b %d")
    )
}

/// Renders a breakdown map as "firefox ×3, vlc ×1" sorted by count desc.
fn format_breakdown(breakdown: &HashMap<String, i64>) -> String {
    let mut entries: Vec<(&String, &i64)> = breakdown.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    entries
        .iter()
        .map(|(name, count)| format!("{name} \u{d7}{count}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_with(tier: Tier, process: &str, unit: &str, summary: &str) -> Event {
        let mut ev = Event::new("testhost", Utc::now(), tier, summary);
        ev.process = process.to_string();
        ev.unit = unit.to_string();
        ev
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 17, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn empty_digest_has_zero_counts() {
        let (since, until) = window();
        let digest = build_digest("testhost", &[], since, until);
        assert_eq!(digest.instance_id, "testhost");
        assert_eq!(digest.oom_kills, 0);
        assert_eq!(digest.crashes, 0);
        assert_eq!(digest.service_failures, 0);
        assert_eq!(digest.kernel_hw_errors, 0);
        assert_eq!(digest.mem_pressure, 0);
    }

    #[test]
    fn counts_and_breakdowns() {
        let (since, until) = window();
        let events = vec![
            event_with(Tier::OomKill, "firefox", "", "OOM"),
            event_with(Tier::OomKill, "electron", "", "OOM"),
            event_with(Tier::OomKill, "firefox", "", "OOM"),
            event_with(Tier::ProcessCrash, "vlc", "", "Crash"),
            event_with(Tier::ProcessCrash, "vlc", "", "Crash"),
            event_with(Tier::ProcessCrash, "gimp", "", "Crash"),
            event_with(Tier::ServiceFailure, "", "docker.service", "Service failed"),
            event_with(Tier::KernelHw, "", "", "I/O error on /dev/sda"),
            event_with(Tier::KernelHw, "", "", "I/O error on /dev/sda"),
            event_with(Tier::KernelHw, "", "", "EXT4 error on /dev/sdb"),
            event_with(Tier::MemPressure, "", "", "Memory pressure"),
            event_with(Tier::MemPressure, "", "", "Memory pressure"),
        ];

        let digest = build_digest("testhost", &events, since, until);
        assert_eq!(digest.oom_kills, 3);
        assert_eq!(digest.crashes, 3);
        assert_eq!(digest.service_failures, 1);
        assert_eq!(digest.kernel_hw_errors, 3);
        assert_eq!(digest.mem_pressure, 2);

        assert_eq!(digest.oom_breakdown["firefox"], 2);
        assert_eq!(digest.oom_breakdown["electron"], 1);
        assert_eq!(digest.crash_breakdown["vlc"], 2);
        assert_eq!(digest.service_breakdown["docker.service"], 1);
        // T4 summaries are deduplicated.
        assert_eq!(digest.kernel_breakdown.len(), 2);
    }

    #[test]
    fn empty_subjects_count_as_unknown() {
        let (since, until) = window();
        let events = vec![
            event_with(Tier::OomKill, "", "", "OOM"),
            event_with(Tier::ProcessCrash, "", "", "Crash"),
            event_with(Tier::ServiceFailure, "", "", "Service failed"),
        ];
        let digest = build_digest("host", &events, since, until);
        assert_eq!(digest.oom_breakdown["unknown"], 1);
        assert_eq!(digest.crash_breakdown["unknown"], 1);
        assert_eq!(digest.service_breakdown["unknown"], 1);
    }

    #[test]
    fn renders_all_sections() {
        let (since, until) = window();
        let mut digest = DigestSummary::empty("workstation", since, until);
        digest.oom_kills = 2;
        digest.crashes = 3;
        digest.service_failures = 1;
        digest.mem_pressure = 4;
        digest.oom_breakdown.insert("firefox".to_string(), 1);
        digest.oom_breakdown.insert("electron".to_string(), 1);
        digest.crash_breakdown.insert("vlc".to_string(), 2);
        digest.crash_breakdown.insert("gimp".to_string(), 1);
        digest.service_breakdown.insert("docker.service".to_string(), 1);

        let out = format_digest(&digest);
        for needle in [
            "workstation",
            "OOM Kills:        2",
            "Process Crashes:  3",
            "Service Failures: 1",
            "HW/Kernel Errors: 0",
            "Memory Pressure:  4",
            "firefox",
            "vlc \u{d7}2",
            "docker.service",
        ] {
            assert!(out.contains(needle), "missing {needle:?} in:\n{out}");
        }
    }

    #[test]
    fn breakdown_sorted_by_count_desc() {
        let mut breakdown = HashMap::new();
        breakdown.insert("firefox".to_string(), 3);
        breakdown.insert("chrome".to_string(), 1);
        breakdown.insert("vlc".to_string(), 2);

        let out = format_breakdown(&breakdown);
        let firefox = out.find("firefox").unwrap();
        let vlc = out.find("vlc").unwrap();
        let chrome = out.find("chrome").unwrap();
        assert!(firefox < vlc && vlc < chrome, "unsorted: {out}");
        assert!(out.contains("\u{d7}3"));
    }

    #[test]
    fn digest_title_mentions_period() {
        let (since, until) = window();
        let title = format_digest_title(since, until);
        assert!(title.contains("weekly digest"));
        assert!(title.contains("Feb 10"));
    }
}
