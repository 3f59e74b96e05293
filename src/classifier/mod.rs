//! Matches journal records to event tiers using ordered pattern tables.
//!
//! Classification is a pure function of the record: tiers are tried in the
//! order T1, T2, T3, T4 and the first tier whose precondition and patterns
//! match produces the event. Monitors bypass pattern matching through the
//! synthetic entry points but obey the same tier/severity invariants.

mod patterns;

use chrono::{DateTime, Utc};

use crate::event::{Event, Tier};
use crate::watcher::JournalRecord;
use patterns::*;

const COMPOSITORS: &[&str] = &[
    "Xorg",
    "Xwayland",
    "gnome-shell",
    "kwin_wayland",
    "kwin_x11",
    "sway",
    "Hyprland",
    "mutter",
];

/// Returns true for display-server processes whose crashes commonly indicate
/// GPU driver faults.
pub fn is_compositor_process(name: &str) -> bool {
    COMPOSITORS.contains(&name)
}

/// Human-readable label for a compositor process name.
pub fn compositor_label(name: &str) -> &str {
    match name {
        "gnome-shell" => "GNOME Shell",
        "kwin_wayland" | "kwin_x11" => "KWin",
        "sway" => "Sway",
        "mutter" => "Mutter",
        _ => name,
    }
}

pub struct Classifier {
    instance_id: String,
}

impl Classifier {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Classifier {
            instance_id: instance_id.into(),
        }
    }

    /// Examines a journal record and returns a classified event, or `None`
    /// when the record matches no known pattern.
    pub fn classify(&self, record: &JournalRecord) -> Option<Event> {
        let ts = parse_timestamp(record);

        self.classify_oom(record, ts)
            .or_else(|| self.classify_crash(record, ts))
            .or_else(|| self.classify_service_failure(record, ts))
            .or_else(|| self.classify_kernel_hw(record, ts))
    }

    fn classify_oom(&self, record: &JournalRecord, ts: DateTime<Utc>) -> Option<Event> {
        OOM_PATTERNS.iter().find(|re| re.is_match(&record.message))?;

        let (process, pid) = extract_oom_process(&record.message);
        let summary = if process.is_empty() {
            "OOM Kill".to_string()
        } else {
            format!("OOM Kill: {process} (pid {pid})")
        };

        let mut ev = Event::new(&self.instance_id, ts, Tier::OomKill, summary);
        ev.process = process;
        ev.pid = pid;
        ev.raw_fields = record.fields.clone();
        Some(ev)
    }

    fn classify_crash(&self, record: &JournalRecord, ts: DateTime<Utc>) -> Option<Event> {
        // Anything from systemd-coredump is a crash report.
        if record.syslog_identifier == "systemd-coredump" {
            let (process, pid) = extract_coredump_process(&record.message);
            let summary = if process.is_empty() {
                "Process Crash".to_string()
            } else {
                format!("Crash: {process} (pid {pid}) dumped core")
            };

            let mut ev = Event::new(&self.instance_id, ts, Tier::ProcessCrash, summary);
            ev.process = process;
            ev.pid = pid;
            ev.raw_fields = record.fields.clone();
            return Some(ev);
        }

        CRASH_PATTERNS
            .iter()
            .find(|re| re.is_match(&record.message))?;

        let (process, pid) = extract_crash_process(record);
        let summary = if process.is_empty() {
            "Process Crash".to_string()
        } else {
            format!("Crash: {process} (pid {pid}) segfault")
        };

        let mut ev = Event::new(&self.instance_id, ts, Tier::ProcessCrash, summary);
        ev.process = process;
        ev.pid = pid;
        ev.raw_fields = record.fields.clone();
        Some(ev)
    }

    fn classify_service_failure(&self, record: &JournalRecord, ts: DateTime<Utc>) -> Option<Event> {
        // Only messages from systemd itself describe unit state changes.
        if record.syslog_identifier != "systemd" {
            return None;
        }
        SERVICE_FAIL_PATTERNS
            .iter()
            .find(|re| re.is_match(&record.message))?;

        let unit = extract_service_unit(record);
        if unit.is_empty() {
            // Without a unit there is nothing actionable to report.
            return None;
        }

        let summary = match extract_exit_code(&record.message) {
            Some(code) => format!("Service failed: {unit} (exit {code})"),
            None => format!("Service failed: {unit}"),
        };

        let mut ev = Event::new(&self.instance_id, ts, Tier::ServiceFailure, summary);
        ev.unit = unit;
        ev.raw_fields = record.fields.clone();
        Some(ev)
    }

    fn classify_kernel_hw(&self, record: &JournalRecord, ts: DateTime<Utc>) -> Option<Event> {
        if record.syslog_identifier != "kernel" && record.transport != "kernel" {
            return None;
        }
        KERNEL_HW_PATTERNS
            .iter()
            .find(|re| re.is_match(&record.message))?;

        let summary = extract_kernel_hw_summary(&record.message);

        let mut ev = Event::new(&self.instance_id, ts, Tier::KernelHw, summary);
        ev.raw_fields = record.fields.clone();
        if GPU_EVENT_PATTERN.is_match(&record.message) {
            ev.raw_fields
                .insert("_gpu_event".to_string(), "true".to_string());
        }
        Some(ev)
    }

    /// Creates a T5 memory-pressure event from PSI monitor data.
    pub fn classify_psi_event(&self, some_avg10: f64, full_avg10: f64, detail: &str) -> Event {
        let summary = format!("Memory pressure: some={some_avg10:.1}% full={full_avg10:.1}%");
        let mut ev = Event::new(&self.instance_id, Utc::now(), Tier::MemPressure, summary);
        ev.detail = detail.to_string();
        ev
    }

    /// Creates a T4 kernel/HW event from a SMART status change.
    pub fn classify_smart_event(&self, device: &str, summary: &str, detail: &str) -> Event {
        let mut ev = Event::new(&self.instance_id, Utc::now(), Tier::KernelHw, summary);
        ev.detail = detail.to_string();
        ev.raw_fields
            .insert("_device".to_string(), device.to_string());
        ev
    }

    /// Creates a T4 kernel/HW event from a GPU monitor threshold crossing.
    /// The GPU marker keeps enrichment and store queries on the GPU path.
    pub fn classify_gpu_event(&self, card: &str, vendor: &str, summary: &str, detail: &str) -> Event {
        let mut ev = Event::new(&self.instance_id, Utc::now(), Tier::KernelHw, summary);
        ev.detail = detail.to_string();
        ev.raw_fields
            .insert("_gpu_event".to_string(), "true".to_string());
        ev.raw_fields
            .insert("_gpu_vendor".to_string(), vendor.to_string());
        ev.raw_fields
            .insert("_gpu_card".to_string(), card.to_string());
        ev
    }
}

/// Produces a concise summary for kernel/HW messages via the summary table,
/// truncating the raw message as a last resort.
fn extract_kernel_hw_summary(msg: &str) -> String {
    if let Some(caps) = NVIDIA_XID_RE.captures(msg) {
        if let Ok(xid) = caps[1].parse::<u32>() {
            return format!("NVIDIA Xid {xid}: {}", nvidia_xid_cause(xid));
        }
    }

    for sp in KERNEL_HW_SUMMARY_PATTERNS.iter() {
        if let Some(caps) = sp.re.captures(msg) {
            let mut out = sp.template.to_string();
            for i in 1..caps.len() {
                if let Some(m) = caps.get(i) {
                    out = out.replace(&format!("{{{i}}}"), m.as_str());
                }
            }
            return out;
        }
    }

    if msg.chars().count() > 80 {
        let truncated: String = msg.chars().take(77).collect();
        format!("Kernel/HW: {truncated}...")
    } else {
        format!("Kernel/HW: {msg}")
    }
}

fn extract_oom_process(msg: &str) -> (String, i64) {
    if let Some(caps) = OOM_KILL_PROCESS_RE.captures(msg) {
        let pid = caps[1].parse().unwrap_or(0);
        return (caps[2].to_string(), pid);
    }
    if let Some(caps) = OOM_KILL_TASK_RE.captures(msg) {
        let pid = caps[2].parse().unwrap_or(0);
        return (caps[1].to_string(), pid);
    }
    (String::new(), 0)
}

fn extract_coredump_process(msg: &str) -> (String, i64) {
    if let Some(caps) = COREDUMP_PROCESS_RE.captures(msg) {
        let pid = caps[1].parse().unwrap_or(0);
        return (caps[2].to_string(), pid);
    }
    (String::new(), 0)
}

fn extract_crash_process(record: &JournalRecord) -> (String, i64) {
    if let Some(caps) = CRASH_SEGFAULT_RE.captures(&record.message) {
        let pid = caps[2].parse().unwrap_or(0);
        return (caps[1].to_string(), pid);
    }
    // Fall back to the record's own identity.
    if !record.syslog_identifier.is_empty() {
        let pid = record.pid.parse().unwrap_or(0);
        return (record.syslog_identifier.clone(), pid);
    }
    (String::new(), 0)
}

fn extract_service_unit(record: &JournalRecord) -> String {
    if let Some(caps) = SERVICE_UNIT_RE.captures(&record.message) {
        return caps[1].to_string();
    }
    if let Some(unit) = record.fields.get("UNIT") {
        return unit.clone();
    }
    record.systemd_unit.clone()
}

fn extract_exit_code(msg: &str) -> Option<String> {
    SERVICE_EXIT_CODE_RE
        .captures(msg)
        .map(|caps| caps[1].to_string())
}

/// Converts the record's `__REALTIME_TIMESTAMP` (microseconds since epoch)
/// to a UTC timestamp, falling back to the current time.
fn parse_timestamp(record: &JournalRecord) -> DateTime<Utc> {
    record
        .realtime_timestamp
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_micros)
        .unwrap_or_else(Utc::now)
}
