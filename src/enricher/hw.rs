//! Kernel/HW enrichment for disk errors: cross-references SMART health.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::query::run_command;
use crate::event::Event;
use crate::monitor::smart;

static DEVICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/dev/(\w+)").unwrap());

/// Appends a SMART health summary for the device mentioned in the event.
pub(crate) async fn enrich(ev: &mut Event) {
    let Some(device) = extract_device(ev) else {
        return;
    };

    let detail = match smart_detail(&device).await {
        Ok(detail) => detail,
        Err(err) => {
            debug!(device = %device, error = %err, "kernel/hw enrichment: SMART query failed");
            return;
        }
    };

    if !ev.detail.is_empty() {
        ev.detail.push('\n');
    }
    ev.detail.push_str(&detail);
}

/// Looks for a /dev/xxx reference in the event summary or detail.
pub(crate) fn extract_device(ev: &Event) -> Option<String> {
    DEVICE_RE
        .captures(&ev.summary)
        .or_else(|| DEVICE_RE.captures(&ev.detail))
        .map(|caps| format!("/dev/{}", &caps[1]))
}

async fn smart_detail(device: &str) -> anyhow::Result<String> {
    let out = run_command("smartctl", &["--json=c", "-a", device]).await?;
    let status = smart::parse_smart_json(device, &out)?;
    Ok(smart::format_smart_detail(&status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Tier;
    use chrono::Utc;

    #[test]
    fn extracts_device_from_summary() {
        let ev = Event::new("host1", Utc::now(), Tier::KernelHw, "I/O error on /dev/sda");
        assert_eq!(extract_device(&ev).as_deref(), Some("/dev/sda"));
    }

    #[test]
    fn extracts_device_from_detail() {
        let mut ev = Event::new("host1", Utc::now(), Tier::KernelHw, "Machine check exception");
        ev.detail = "errors observed on /dev/nvme0n1 during probe".to_string();
        assert_eq!(extract_device(&ev).as_deref(), Some("/dev/nvme0n1"));
    }

    #[test]
    fn no_device_reference_yields_none() {
        let ev = Event::new("host1", Utc::now(), Tier::KernelHw, "Machine check exception");
        assert_eq!(extract_device(&ev), None);
    }
}
