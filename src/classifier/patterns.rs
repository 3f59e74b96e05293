//! Compiled pattern tables, ordered by match priority within each tier.

use once_cell::sync::Lazy;
use regex::Regex;

// T1 — OOM kill match patterns.
pub(crate) static OOM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"oom-kill:").unwrap(),
        Regex::new(r"Out of memory: Kill(ed)? process").unwrap(),
        Regex::new(r"invoked oom-killer").unwrap(),
    ]
});

// T2 — process crash match patterns.
pub(crate) static CRASH_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"segfault at").unwrap(),
        Regex::new(r"traps:.*trap").unwrap(),
        Regex::new(r"Process \d+ \(.+\) of user \d+ dumped core").unwrap(),
    ]
});

// T3 — service failure match patterns; only consulted for systemd messages.
pub(crate) static SERVICE_FAIL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"entered failed state").unwrap(),
        Regex::new(r"Failed with result '").unwrap(),
        Regex::new(r"Main process exited, code=\w+, status=[1-9]").unwrap(),
    ]
});

// T4 — kernel/hardware error match patterns.
pub(crate) static KERNEL_HW_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"I/O error").unwrap(),
        Regex::new(r"EXT4-fs error").unwrap(),
        Regex::new(r"\[Hardware Error\]").unwrap(),
        Regex::new(r"GPU HANG").unwrap(),
        Regex::new(r"NVRM: Xid").unwrap(),
        Regex::new(r"GPU has fallen off the bus").unwrap(),
        Regex::new(r"NV_ERR_NO_MEMORY").unwrap(),
        Regex::new(r"amdgpu: GPU reset").unwrap(),
        Regex::new(r"amdgpu: ring \S+ timeout").unwrap(),
        Regex::new(r"VM_L2_PROTECTION_FAULT").unwrap(),
        Regex::new(r"VRAM is lost").unwrap(),
        Regex::new(r"CTF temperature reached").unwrap(),
        Regex::new(r"Resetting \S+ for ").unwrap(),
        Regex::new(r"flip_done timed out").unwrap(),
    ]
});

// Any match here means a T4 event takes the GPU enrichment path.
pub(crate) static GPU_EVENT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"NVRM:|amdgpu|GPU HANG|GPU has fallen off the bus|VM_L2_PROTECTION_FAULT|VRAM is lost|CTF temperature reached|Resetting \S+ for |flip_done timed out",
    )
    .unwrap()
});

/// One row of the T4 summary table: a pattern plus a template where `{1}`
/// and `{2}` stand in for the capture groups.
pub(crate) struct SummaryPattern {
    pub re: Regex,
    pub template: &'static str,
}

// T4 — summary table, distinct from the match table above. Ordered; the
// first matching row wins. NVIDIA Xid lines are handled separately because
// the summary comes from the Xid code, not the message text.
pub(crate) static KERNEL_HW_SUMMARY_PATTERNS: Lazy<Vec<SummaryPattern>> = Lazy::new(|| {
    vec![
        SummaryPattern {
            re: Regex::new(r"I/O error, dev (\w+)").unwrap(),
            template: "I/O error on /dev/{1}",
        },
        SummaryPattern {
            re: Regex::new(r"EXT4-fs error \(device (\w+)\)").unwrap(),
            template: "EXT4 error on /dev/{1}",
        },
        SummaryPattern {
            re: Regex::new(r"GPU HANG: ecode ([^,\s]+)").unwrap(),
            template: "Intel GPU hang (ecode {1})",
        },
        SummaryPattern {
            re: Regex::new(r"\[Hardware Error\]").unwrap(),
            template: "Machine check exception",
        },
        SummaryPattern {
            re: Regex::new(r"GPU has fallen off the bus").unwrap(),
            template: "NVIDIA GPU fallen off bus (fatal)",
        },
        SummaryPattern {
            re: Regex::new(r"NV_ERR_NO_MEMORY").unwrap(),
            template: "NVIDIA VRAM out of memory",
        },
        SummaryPattern {
            re: Regex::new(r"amdgpu: ring (\S+) timeout").unwrap(),
            template: "AMD GPU ring {1} timeout",
        },
        SummaryPattern {
            re: Regex::new(r"amdgpu: GPU reset").unwrap(),
            template: "AMD GPU reset",
        },
        SummaryPattern {
            re: Regex::new(r"VM_L2_PROTECTION_FAULT").unwrap(),
            template: "AMD GPU VRAM protection fault",
        },
        SummaryPattern {
            re: Regex::new(r"VRAM is lost").unwrap(),
            template: "VRAM lost after GPU reset",
        },
        SummaryPattern {
            re: Regex::new(r"CTF temperature reached").unwrap(),
            template: "AMD GPU thermal fault",
        },
        SummaryPattern {
            re: Regex::new(r"Resetting (\S+) for (.+)").unwrap(),
            template: "Intel GPU resetting {1}: {2}",
        },
        SummaryPattern {
            re: Regex::new(r"flip_done timed out").unwrap(),
            template: "DRM flip timeout",
        },
    ]
});

// NVIDIA Xid lines: "NVRM: Xid (PCI:0000:01:00): 79, ..."
pub(crate) static NVIDIA_XID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"NVRM: Xid \([^)]*\): (\d+)").unwrap());

// Subject extraction.
// "Out of memory: Killed process 4521 (firefox)"
pub(crate) static OOM_KILL_PROCESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Killed process (\d+) \(([^)]+)\)").unwrap());
// "oom-kill:constraint=...,task=firefox,pid=4521,uid=1000"
pub(crate) static OOM_KILL_TASK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"task=([^,]+),pid=(\d+)").unwrap());
// "app[1234]: segfault at 0000000000000010 ip ..."
pub(crate) static CRASH_SEGFAULT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\S+)\[(\d+)\]: segfault at").unwrap());
// "Process 1234 (app) of user 1000 dumped core."
pub(crate) static COREDUMP_PROCESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Process (\d+) \(([^)]+)\) of user \d+ dumped core").unwrap());
// Leading "name.service" before ':' or whitespace.
pub(crate) static SERVICE_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+\.service)[:\s]").unwrap());
// "status=1/FAILURE"
pub(crate) static SERVICE_EXIT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"status=(\d+)").unwrap());

/// Maps well-known NVIDIA Xid codes to their cause.
pub(crate) fn nvidia_xid_cause(xid: u32) -> &'static str {
    match xid {
        13 => "Graphics engine exception",
        31 => "GPU memory page fault",
        32 => "Invalid or corrupted push buffer stream",
        43 => "GPU stopped processing",
        45 => "Preemptive cleanup of user channels",
        48 => "Double bit ECC error",
        61 => "Internal micro-controller breakpoint",
        62 => "Internal micro-controller halt",
        63 => "ECC page retirement or row remapping event",
        64 => "ECC page retirement or row remapper failure",
        68 => "Video processor exception",
        74 => "NVLink error",
        79 => "GPU has fallen off the bus",
        94 => "Contained ECC error",
        95 => "Uncontained ECC error",
        119 => "GSP RPC timeout",
        120 => "GSP error",
        _ => "GPU error",
    }
}
