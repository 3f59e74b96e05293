//! GPU enrichment: current GPU status for GPU-flagged T4 events, plus
//! kernel GPU messages for compositor crashes.

use tracing::debug;

use super::query::run_command;
use crate::classifier::{compositor_label, is_compositor_process};
use crate::event::Event;
use crate::monitor::gpu::{detect_gpus, format_gpu_status, read_gpu_temp, read_gpu_vram};

const GPU_LOG_LINE_LIMIT: usize = 10;

/// Appends the current status of every detected GPU to the event detail.
pub(crate) async fn enrich(ev: &mut Event) {
    let mut detail = String::new();
    for mut gpu in detect_gpus() {
        read_gpu_temp(&mut gpu);
        read_gpu_vram(&mut gpu);

        if gpu.temperature > 0 || gpu.vram_total > 0 {
            detail.push_str(&format_gpu_status(&gpu));
        }
    }

    if !detail.is_empty() {
        if !ev.detail.is_empty() {
            ev.detail.push('\n');
        }
        ev.detail.push_str(&detail);
    }
}

/// Annotates a compositor crash with recent GPU kernel messages and the
/// current GPU status; crashes of a display server usually trace back to
/// the GPU driver.
pub(crate) async fn enrich_compositor_crash(ev: &mut Event) {
    if ev.process.is_empty() || !is_compositor_process(&ev.process) {
        return;
    }

    let label = compositor_label(&ev.process).to_string();

    match recent_gpu_kernel_logs().await {
        Ok(logs) if !logs.is_empty() => {
            if !ev.detail.is_empty() {
                ev.detail.push('\n');
            }
            ev.detail
                .push_str(&format!("{label} crash, recent GPU kernel messages:\n{logs}"));
        }
        Ok(_) => {}
        Err(err) => {
            debug!(error = %err, "compositor crash enrichment: GPU log query failed");
        }
    }

    enrich(ev).await;
}

/// Greps the last minute of kernel logs for GPU driver messages.
async fn recent_gpu_kernel_logs() -> anyhow::Result<String> {
    let out = run_command(
        "journalctl",
        &[
            "-k",
            "--since",
            "60s ago",
            "--no-pager",
            "-o",
            "short-precise",
            "--grep",
            "GPU|NVRM|amdgpu|i915|drm.*ERROR",
        ],
    )
    .await?;

    let text = String::from_utf8_lossy(&out);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(GPU_LOG_LINE_LIMIT);
    Ok(lines[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tier;
    use chrono::Utc;

    #[tokio::test]
    async fn non_compositor_crash_is_untouched() {
        let mut ev = Event::new("host1", Utc::now(), Tier::ProcessCrash, "Crash: vlc");
        ev.process = "vlc".to_string();
        enrich_compositor_crash(&mut ev).await;
        assert!(ev.detail.is_empty());
    }
}
