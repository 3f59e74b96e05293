//! Disk-health monitor backed by smartctl.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::MONITOR_CHANNEL_CAPACITY;

const SMARTCTL_TIMEOUT: Duration = Duration::from_secs(30);

/// Health status of one disk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SmartStatus {
    pub device: String,
    pub model_name: String,
    pub healthy: bool,
    pub temperature: i64,
    pub realloc_count: i64,
    pub pending_count: i64,
    pub error_count: i64,
}

/// Emitted when a disk's status changes or shows errors.
#[derive(Debug, Clone)]
pub struct SmartEvent {
    pub timestamp: DateTime<Utc>,
    pub status: SmartStatus,
    /// True when the status differs from the previous poll (or the device
    /// is newly seen).
    pub changed: bool,
}

impl SmartEvent {
    pub fn summary(&self) -> String {
        let s = &self.status;
        if !s.healthy {
            format!("SMART FAILING: {}", s.device)
        } else if s.realloc_count > 0 || s.pending_count > 0 {
            format!(
                "SMART warning: {} ({} reallocated, {} pending)",
                s.device, s.realloc_count, s.pending_count
            )
        } else {
            format!("SMART status changed: {}", s.device)
        }
    }

    pub fn detail(&self) -> String {
        format_smart_detail(&self.status)
    }
}

/// Renders the fields queried from smartctl as an indented block.
pub fn format_smart_detail(status: &SmartStatus) -> String {
    let mut out = format!("SMART status for {}:\n", status.device);
    if !status.model_name.is_empty() {
        out.push_str(&format!("  Model: {}\n", status.model_name));
    }
    let health = if status.healthy { "PASSED" } else { "FAILED" };
    out.push_str(&format!("  Health: {health}\n"));
    if status.temperature > 0 {
        out.push_str(&format!("  Temperature: {}°C\n", status.temperature));
    }
    if status.realloc_count > 0 {
        out.push_str(&format!("  Reallocated sectors: {}\n", status.realloc_count));
    }
    if status.pending_count > 0 {
        out.push_str(&format!("  Pending sectors: {}\n", status.pending_count));
    }
    if status.error_count > 0 {
        out.push_str(&format!("  CRC errors: {}\n", status.error_count));
    }
    out
}

/// Polls smartctl for every detected disk and emits events on change.
pub struct SmartMonitor {
    poll_interval: Duration,
    last_status: HashMap<String, SmartStatus>,
}

impl SmartMonitor {
    pub fn new(poll_interval: Duration) -> Self {
        SmartMonitor {
            poll_interval,
            last_status: HashMap::new(),
        }
    }

    /// Starts polling; the returned channel closes when the token fires.
    pub fn spawn(mut self, token: CancellationToken) -> mpsc::Receiver<SmartEvent> {
        let (tx, rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.check_all(&tx).await;
            }
        });

        rx
    }

    async fn check_all(&mut self, tx: &mpsc::Sender<SmartEvent>) {
        let devices = match detect_disks() {
            Ok(devices) => devices,
            Err(err) => {
                debug!(error = %err, "failed to detect disks");
                return;
            }
        };

        for device in devices {
            let status = match query_smart(&device).await {
                Ok(status) => status,
                Err(err) => {
                    debug!(device = %device, error = %err, "smartctl query failed");
                    continue;
                }
            };

            let changed = self
                .last_status
                .get(&device)
                .map(|prev| status_changed(prev, &status))
                .unwrap_or(true);

            if changed || !status.healthy || status.realloc_count > 0 || status.pending_count > 0 {
                let event = SmartEvent {
                    timestamp: Utc::now(),
                    status: status.clone(),
                    changed,
                };
                if tx.try_send(event).is_err() {
                    debug!(device = %device, "disk channel full, dropping event");
                }
            }

            self.last_status.insert(device, status);
        }
    }
}

/// Finds block devices that can answer SMART queries.
fn detect_disks() -> Result<Vec<String>> {
    detect_disks_in(Path::new("/sys/block"))
}

fn detect_disks_in(root: &Path) -> Result<Vec<String>> {
    let entries =
        std::fs::read_dir(root).with_context(|| format!("reading {}", root.display()))?;

    let mut devices = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("dm-") {
            continue;
        }
        // Only devices with a backing device node are real disks.
        if root.join(&name).join("device").exists() {
            devices.push(format!("/dev/{name}"));
        }
    }
    devices.sort();
    Ok(devices)
}

/// Runs smartctl in JSON mode. smartctl exits non-zero for unhealthy disks
/// while still printing JSON, so only empty output is treated as failure.
async fn query_smart(device: &str) -> Result<SmartStatus> {
    let output = tokio::time::timeout(
        SMARTCTL_TIMEOUT,
        Command::new("smartctl")
            .args(["--json=c", "-a", device])
            .stdin(Stdio::null())
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("smartctl timed out for {device}"))?
    .context("running smartctl")?;

    if output.stdout.is_empty() {
        bail!(
            "smartctl returned no output for {device}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_smart_json(device, &output.stdout)
}

#[derive(Debug, Default, Deserialize)]
struct SmartJson {
    #[serde(default)]
    model_name: String,
    #[serde(default)]
    smart_status: SmartStatusJson,
    #[serde(default)]
    temperature: TemperatureJson,
    #[serde(default)]
    ata_smart_attributes: AttributesJson,
}

#[derive(Debug, Default, Deserialize)]
struct SmartStatusJson {
    #[serde(default)]
    passed: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TemperatureJson {
    #[serde(default)]
    current: i64,
}

#[derive(Debug, Default, Deserialize)]
struct AttributesJson {
    #[serde(default)]
    table: Vec<AttributeJson>,
}

#[derive(Debug, Deserialize)]
struct AttributeJson {
    id: i64,
    #[serde(default)]
    raw: AttributeRawJson,
}

#[derive(Debug, Default, Deserialize)]
struct AttributeRawJson {
    #[serde(default)]
    value: i64,
}

/// Parses the subset of smartctl JSON output we care about.
pub(crate) fn parse_smart_json(device: &str, data: &[u8]) -> Result<SmartStatus> {
    let parsed: SmartJson = serde_json::from_slice(data).context("parsing smartctl JSON")?;

    let mut status = SmartStatus {
        device: device.to_string(),
        model_name: parsed.model_name,
        healthy: parsed.smart_status.passed,
        temperature: parsed.temperature.current,
        ..SmartStatus::default()
    };

    for attr in parsed.ata_smart_attributes.table {
        match attr.id {
            5 => status.realloc_count = attr.raw.value,
            197 => status.pending_count = attr.raw.value,
            199 => status.error_count = attr.raw.value,
            _ => {}
        }
    }

    Ok(status)
}

fn status_changed(prev: &SmartStatus, curr: &SmartStatus) -> bool {
    prev.healthy != curr.healthy
        || prev.realloc_count != curr.realloc_count
        || prev.pending_count != curr.pending_count
        || prev.error_count != curr.error_count
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEALTHY_JSON: &str = r#"{
        "model_name": "Samsung SSD 860 EVO",
        "smart_status": {"passed": true},
        "temperature": {"current": 34},
        "ata_smart_attributes": {"table": [
            {"id": 5, "name": "Reallocated_Sector_Ct", "raw": {"value": 0}},
            {"id": 197, "name": "Current_Pending_Sector", "raw": {"value": 0}},
            {"id": 199, "name": "UDMA_CRC_Error_Count", "raw": {"value": 0}}
        ]}
    }"#;

    const FAILING_JSON: &str = r#"{
        "model_name": "WDC WD40EFRX",
        "smart_status": {"passed": false},
        "temperature": {"current": 41},
        "ata_smart_attributes": {"table": [
            {"id": 5, "name": "Reallocated_Sector_Ct", "raw": {"value": 12}},
            {"id": 197, "name": "Current_Pending_Sector", "raw": {"value": 3}}
        ]}
    }"#;

    #[test]
    fn parses_healthy_disk() {
        let status = parse_smart_json("/dev/sda", HEALTHY_JSON.as_bytes()).unwrap();
        assert_eq!(status.device, "/dev/sda");
        assert_eq!(status.model_name, "Samsung SSD 860 EVO");
        assert!(status.healthy);
        assert_eq!(status.temperature, 34);
        assert_eq!(status.realloc_count, 0);
    }

    #[test]
    fn parses_failing_disk() {
        let status = parse_smart_json("/dev/sdb", FAILING_JSON.as_bytes()).unwrap();
        assert!(!status.healthy);
        assert_eq!(status.realloc_count, 12);
        assert_eq!(status.pending_count, 3);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_smart_json("/dev/sda", b"not json").is_err());
    }

    #[test]
    fn change_detection() {
        let healthy = parse_smart_json("/dev/sda", HEALTHY_JSON.as_bytes()).unwrap();
        let failing = parse_smart_json("/dev/sda", FAILING_JSON.as_bytes()).unwrap();
        assert!(!status_changed(&healthy, &healthy.clone()));
        assert!(status_changed(&healthy, &failing));
    }

    #[test]
    fn event_summaries() {
        let failing = parse_smart_json("/dev/sdb", FAILING_JSON.as_bytes()).unwrap();
        let event = SmartEvent {
            timestamp: Utc::now(),
            status: failing,
            changed: true,
        };
        assert_eq!(event.summary(), "SMART FAILING: /dev/sdb");

        let mut warning = parse_smart_json("/dev/sdb", FAILING_JSON.as_bytes()).unwrap();
        warning.healthy = true;
        let event = SmartEvent {
            timestamp: Utc::now(),
            status: warning,
            changed: true,
        };
        assert_eq!(event.summary(), "SMART warning: /dev/sdb (12 reallocated, 3 pending)");

        let healthy = parse_smart_json("/dev/sda", HEALTHY_JSON.as_bytes()).unwrap();
        let event = SmartEvent {
            timestamp: Utc::now(),
            status: healthy,
            changed: true,
        };
        assert_eq!(event.summary(), "SMART status changed: /dev/sda");
    }

    #[test]
    fn detail_lists_counters() {
        let status = parse_smart_json("/dev/sdb", FAILING_JSON.as_bytes()).unwrap();
        let detail = format_smart_detail(&status);
        assert!(detail.contains("Health: FAILED"));
        assert!(detail.contains("Temperature: 41°C"));
        assert!(detail.contains("Reallocated sectors: 12"));
        assert!(detail.contains("Pending sectors: 3"));
    }

    #[test]
    fn disk_detection_skips_virtual_devices() {
        let root = tempfile::tempdir().unwrap();
        for (name, backed) in [
            ("sda", true),
            ("nvme0n1", true),
            ("loop0", true),
            ("ram0", true),
            ("dm-0", true),
            ("sr0", false),
        ] {
            let dir = root.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            if backed {
                std::fs::create_dir_all(dir.join("device")).unwrap();
            }
        }

        let devices = detect_disks_in(root.path()).unwrap();
        assert_eq!(devices, vec!["/dev/nvme0n1", "/dev/sda"]);
    }
}
