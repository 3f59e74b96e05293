//! GPU temperature and VRAM monitor over drm sysfs, with an nvidia-smi
//! fallback for NVIDIA cards that expose no hwmon data.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::MONITOR_CHANNEL_CAPACITY;
use crate::format;

const NVIDIA_SMI_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Amd,
    Nvidia,
    Intel,
}

impl GpuVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuVendor::Amd => "amd",
            GpuVendor::Nvidia => "nvidia",
            GpuVendor::Intel => "intel",
        }
    }
}

/// Current state of one GPU card.
#[derive(Debug, Clone)]
pub struct GpuStatus {
    /// e.g. "/sys/class/drm/card0"
    pub card_path: PathBuf,
    pub vendor: GpuVendor,
    /// degrees Celsius, 0 if unavailable
    pub temperature: i64,
    /// critical threshold, 0 if unavailable
    pub temp_crit: i64,
    /// bytes, 0 if unavailable
    pub vram_used: i64,
    pub vram_total: i64,
}

impl GpuStatus {
    pub fn card_name(&self) -> String {
        self.card_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuReason {
    ThermalWarning,
    VramHigh,
}

impl GpuReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuReason::ThermalWarning => "thermal_warning",
            GpuReason::VramHigh => "vram_high",
        }
    }
}

/// Emitted when a GPU crosses a warning threshold.
#[derive(Debug, Clone)]
pub struct GpuEvent {
    pub timestamp: DateTime<Utc>,
    pub status: GpuStatus,
    pub reason: GpuReason,
}

impl GpuEvent {
    pub fn summary(&self) -> String {
        match self.reason {
            GpuReason::ThermalWarning => format!(
                "GPU thermal warning: {} {}°C",
                self.status.card_name(),
                self.status.temperature
            ),
            GpuReason::VramHigh => {
                let pct = if self.status.vram_total > 0 {
                    self.status.vram_used * 100 / self.status.vram_total
                } else {
                    0
                };
                format!("GPU VRAM high: {} {}%", self.status.card_name(), pct)
            }
        }
    }
}

/// Polls GPU sysfs (and vendor CLIs) for thermal and VRAM thresholds.
pub struct GpuMonitor {
    poll_interval: Duration,
    temp_warn: i64,
    vram_warn_pct: i64,
}

impl GpuMonitor {
    pub fn new(poll_interval: Duration, temp_warn: i64, vram_warn_pct: i64) -> Self {
        GpuMonitor {
            poll_interval,
            temp_warn,
            vram_warn_pct,
        }
    }

    /// Starts polling; the returned channel closes when the token fires.
    pub fn spawn(self, token: CancellationToken) -> mpsc::Receiver<GpuEvent> {
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

    async fn check_all(&self, tx: &mpsc::Sender<GpuEvent>) {
        for mut gpu in detect_gpus() {
            read_gpu_temp(&mut gpu);
            read_gpu_vram(&mut gpu);

            if gpu.vendor == GpuVendor::Nvidia && gpu.temperature == 0 {
                read_nvidia_smi(&mut gpu).await;
            }

            if gpu.temperature > 0 && gpu.temperature >= self.temp_warn {
                let event = GpuEvent {
                    timestamp: Utc::now(),
                    status: gpu.clone(),
                    reason: GpuReason::ThermalWarning,
                };
                if tx.try_send(event).is_err() {
                    debug!("gpu channel full, dropping thermal event");
                }
            }

            if gpu.vram_total > 0 && gpu.vram_used > 0 {
                let pct = gpu.vram_used * 100 / gpu.vram_total;
                if pct >= self.vram_warn_pct {
                    let event = GpuEvent {
                        timestamp: Utc::now(),
                        status: gpu.clone(),
                        reason: GpuReason::VramHigh,
                    };
                    if tx.try_send(event).is_err() {
                        debug!("gpu channel full, dropping vram event");
                    }
                }
            }
        }
    }
}

/// Scans /sys/class/drm for GPU cards with a recognized driver.
pub fn detect_gpus() -> Vec<GpuStatus> {
    detect_gpus_in(Path::new("/sys/class/drm"))
}

fn detect_gpus_in(root: &Path) -> Vec<GpuStatus> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut gpus = Vec::new();
    let mut names: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();

    for name in names {
        // Only card0, card1, ...; connector children like card0-DP-1 are
        // not devices.
        let Some(suffix) = name.strip_prefix("card") else {
            continue;
        };
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let card_path = root.join(&name);
        let Some(vendor) = identify_gpu_vendor(&card_path) else {
            continue;
        };

        gpus.push(GpuStatus {
            card_path,
            vendor,
            temperature: 0,
            temp_crit: 0,
            vram_used: 0,
            vram_total: 0,
        });
    }
    gpus
}

/// Reads the driver symlink to determine the GPU vendor.
fn identify_gpu_vendor(card_path: &Path) -> Option<GpuVendor> {
    let target = std::fs::read_link(card_path.join("device").join("driver")).ok()?;
    let driver = target.file_name()?.to_string_lossy().to_string();

    match driver.as_str() {
        "amdgpu" | "radeon" => Some(GpuVendor::Amd),
        "nvidia" | "nouveau" => Some(GpuVendor::Nvidia),
        "i915" | "xe" => Some(GpuVendor::Intel),
        _ => None,
    }
}

/// Reads GPU temperature from hwmon sysfs (millidegrees).
pub fn read_gpu_temp(gpu: &mut GpuStatus) {
    let hwmon_root = gpu.card_path.join("device").join("hwmon");
    let Ok(entries) = std::fs::read_dir(&hwmon_root) else {
        return;
    };

    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with("hwmon") {
            continue;
        }
        let hwmon = entry.path();

        let temp = read_sysfs_i64(&hwmon.join("temp1_input"));
        if temp > 0 {
            gpu.temperature = temp / 1000;
        }
        let crit = read_sysfs_i64(&hwmon.join("temp1_crit"));
        if crit > 0 {
            gpu.temp_crit = crit / 1000;
        }

        if gpu.temperature > 0 {
            break;
        }
    }
}

/// Reads VRAM usage from amdgpu sysfs. Other vendors expose no equivalent.
pub fn read_gpu_vram(gpu: &mut GpuStatus) {
    if gpu.vendor != GpuVendor::Amd {
        return;
    }
    let device = gpu.card_path.join("device");
    gpu.vram_used = read_sysfs_i64(&device.join("mem_info_vram_used"));
    gpu.vram_total = read_sysfs_i64(&device.join("mem_info_vram_total"));
}

/// Queries nvidia-smi for temperature and VRAM when sysfs has neither.
async fn read_nvidia_smi(gpu: &mut GpuStatus) {
    let result = tokio::time::timeout(
        NVIDIA_SMI_TIMEOUT,
        Command::new("nvidia-smi")
            .args([
                "--query-gpu=temperature.gpu,memory.used,memory.total",
                "--format=csv,noheader,nounits",
            ])
            .stdin(Stdio::null())
            .output(),
    )
    .await;

    let output = match result {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            debug!(status = %output.status, "nvidia-smi query failed");
            return;
        }
        Ok(Err(err)) => {
            debug!(error = %err, "nvidia-smi query failed");
            return;
        }
        Err(_) => {
            debug!("nvidia-smi query timed out");
            return;
        }
    };

    parse_nvidia_smi_csv(gpu, &String::from_utf8_lossy(&output.stdout));
}

/// Parses "72, 4096, 8192" (temperature, MiB used, MiB total).
fn parse_nvidia_smi_csv(gpu: &mut GpuStatus, line: &str) {
    let mut parts = line.trim().split(',').map(str::trim);
    if let Some(temp) = parts.next().and_then(|v| v.parse::<i64>().ok()) {
        gpu.temperature = temp;
    }
    if let Some(used) = parts.next().and_then(|v| v.parse::<i64>().ok()) {
        gpu.vram_used = used * 1024 * 1024;
    }
    if let Some(total) = parts.next().and_then(|v| v.parse::<i64>().ok()) {
        gpu.vram_total = total * 1024 * 1024;
    }
}

fn read_sysfs_i64(path: &Path) -> i64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

/// Human-readable status block for one GPU.
pub fn format_gpu_status(gpu: &GpuStatus) -> String {
    let mut out = format!("GPU: {} ({})\n", gpu.card_name(), gpu.vendor.as_str());

    if gpu.temperature > 0 {
        let mut temp = format!("{}°C", gpu.temperature);
        if gpu.temp_crit > 0 {
            temp.push_str(&format!(" (critical: {}°C)", gpu.temp_crit));
        }
        out.push_str(&format!("  Temperature: {temp}\n"));
    }

    if gpu.vram_total > 0 {
        let pct = gpu.vram_used * 100 / gpu.vram_total;
        out.push_str(&format!(
            "  VRAM: {} / {} ({pct}%)\n",
            format::bytes(gpu.vram_used),
            format::bytes(gpu.vram_total)
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_card(root: &Path, name: &str, driver: Option<&str>) -> PathBuf {
        let card = root.join(name);
        let device = card.join("device");
        std::fs::create_dir_all(&device).unwrap();
        if let Some(driver) = driver {
            let target = root.join("drivers").join(driver);
            std::fs::create_dir_all(&target).unwrap();
            std::os::unix::fs::symlink(&target, device.join("driver")).unwrap();
        }
        card
    }

    #[test]
    fn identifies_vendors_from_driver_symlink() {
        let root = tempfile::tempdir().unwrap();

        let amd = fake_card(root.path(), "card0", Some("amdgpu"));
        assert_eq!(identify_gpu_vendor(&amd), Some(GpuVendor::Amd));

        let nvidia = fake_card(root.path(), "card1", Some("nvidia"));
        assert_eq!(identify_gpu_vendor(&nvidia), Some(GpuVendor::Nvidia));

        let intel = fake_card(root.path(), "card2", Some("i915"));
        assert_eq!(identify_gpu_vendor(&intel), Some(GpuVendor::Intel));

        let unknown = fake_card(root.path(), "card3", Some("unknown_drv"));
        assert_eq!(identify_gpu_vendor(&unknown), None);

        let missing = fake_card(root.path(), "card4", None);
        assert_eq!(identify_gpu_vendor(&missing), None);
    }

    #[test]
    fn detection_skips_connector_children() {
        let root = tempfile::tempdir().unwrap();
        fake_card(root.path(), "card0", Some("amdgpu"));
        fake_card(root.path(), "card0-DP-1", Some("amdgpu"));
        fake_card(root.path(), "renderD128", Some("amdgpu"));

        let gpus = detect_gpus_in(root.path());
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].card_name(), "card0");
        assert_eq!(gpus[0].vendor, GpuVendor::Amd);
    }

    #[test]
    fn reads_temperature_from_hwmon() {
        let root = tempfile::tempdir().unwrap();
        let card = fake_card(root.path(), "card0", Some("amdgpu"));
        let hwmon = card.join("device").join("hwmon").join("hwmon0");
        std::fs::create_dir_all(&hwmon).unwrap();
        std::fs::write(hwmon.join("temp1_input"), "72000\n").unwrap();
        std::fs::write(hwmon.join("temp1_crit"), "100000\n").unwrap();

        let mut gpu = GpuStatus {
            card_path: card,
            vendor: GpuVendor::Amd,
            temperature: 0,
            temp_crit: 0,
            vram_used: 0,
            vram_total: 0,
        };
        read_gpu_temp(&mut gpu);
        assert_eq!(gpu.temperature, 72);
        assert_eq!(gpu.temp_crit, 100);
    }

    #[test]
    fn missing_hwmon_leaves_temperature_zero() {
        let root = tempfile::tempdir().unwrap();
        let card = fake_card(root.path(), "card0", Some("amdgpu"));

        let mut gpu = GpuStatus {
            card_path: card,
            vendor: GpuVendor::Amd,
            temperature: 0,
            temp_crit: 0,
            vram_used: 0,
            vram_total: 0,
        };
        read_gpu_temp(&mut gpu);
        assert_eq!(gpu.temperature, 0);
    }

    #[test]
    fn reads_amd_vram() {
        let root = tempfile::tempdir().unwrap();
        let card = fake_card(root.path(), "card0", Some("amdgpu"));
        let device = card.join("device");
        std::fs::write(device.join("mem_info_vram_used"), "4294967296\n").unwrap();
        std::fs::write(device.join("mem_info_vram_total"), "8589934592\n").unwrap();

        let mut gpu = GpuStatus {
            card_path: card.clone(),
            vendor: GpuVendor::Amd,
            temperature: 0,
            temp_crit: 0,
            vram_used: 0,
            vram_total: 0,
        };
        read_gpu_vram(&mut gpu);
        assert_eq!(gpu.vram_used, 4_294_967_296);
        assert_eq!(gpu.vram_total, 8_589_934_592);

        // Non-AMD vendors expose no VRAM files worth reading.
        let mut nvidia = GpuStatus {
            card_path: card,
            vendor: GpuVendor::Nvidia,
            temperature: 0,
            temp_crit: 0,
            vram_used: 0,
            vram_total: 0,
        };
        read_gpu_vram(&mut nvidia);
        assert_eq!(nvidia.vram_used, 0);
    }

    #[test]
    fn parses_nvidia_smi_output() {
        let mut gpu = GpuStatus {
            card_path: PathBuf::from("/sys/class/drm/card0"),
            vendor: GpuVendor::Nvidia,
            temperature: 0,
            temp_crit: 0,
            vram_used: 0,
            vram_total: 0,
        };
        parse_nvidia_smi_csv(&mut gpu, "72, 4096, 8192\n");
        assert_eq!(gpu.temperature, 72);
        assert_eq!(gpu.vram_used, 4096 * 1024 * 1024);
        assert_eq!(gpu.vram_total, 8192 * 1024 * 1024);
    }

    #[test]
    fn formats_status_block() {
        let gpu = GpuStatus {
            card_path: PathBuf::from("/sys/class/drm/card0"),
            vendor: GpuVendor::Amd,
            temperature: 75,
            temp_crit: 100,
            vram_used: 4 * 1024 * 1024 * 1024,
            vram_total: 8 * 1024 * 1024 * 1024,
        };
        let out = format_gpu_status(&gpu);
        for needle in ["card0", "amd", "75°C", "100°C", "VRAM", "50%"] {
            assert!(out.contains(needle), "missing {needle:?} in {out}");
        }
    }

    #[test]
    fn event_summaries() {
        let status = GpuStatus {
            card_path: PathBuf::from("/sys/class/drm/card0"),
            vendor: GpuVendor::Amd,
            temperature: 92,
            temp_crit: 100,
            vram_used: 95,
            vram_total: 100,
        };
        let thermal = GpuEvent {
            timestamp: Utc::now(),
            status: status.clone(),
            reason: GpuReason::ThermalWarning,
        };
        assert_eq!(thermal.summary(), "GPU thermal warning: card0 92°C");

        let vram = GpuEvent {
            timestamp: Utc::now(),
            status,
            reason: GpuReason::VramHigh,
        };
        assert_eq!(vram.summary(), "GPU VRAM high: card0 95%");
    }
}
