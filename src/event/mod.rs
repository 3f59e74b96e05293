//! Core data model: classified events and their tier/severity taxonomy.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of a host failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// T1: the kernel OOM killer terminated a process.
    OomKill,
    /// T2: a process crashed (segfault, trap, coredump).
    ProcessCrash,
    /// T3: a systemd unit entered a failed state.
    ServiceFailure,
    /// T4: kernel or hardware error (disk I/O, GPU, MCE).
    KernelHw,
    /// T5: sustained memory pressure reported by PSI.
    MemPressure,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::OomKill => "T1",
            Tier::ProcessCrash => "T2",
            Tier::ServiceFailure => "T3",
            Tier::KernelHw => "T4",
            Tier::MemPressure => "T5",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::OomKill => "OOM Kill",
            Tier::ProcessCrash => "Process Crash",
            Tier::ServiceFailure => "Service Failure",
            Tier::KernelHw => "Kernel/HW Error",
            Tier::MemPressure => "Memory Pressure",
        }
    }

    /// Severity is a pure function of the tier.
    pub fn severity(&self) -> Severity {
        match self {
            Tier::OomKill => Severity::Critical,
            Tier::ProcessCrash => Severity::High,
            Tier::ServiceFailure => Severity::Medium,
            Tier::KernelHw => Severity::High,
            Tier::MemPressure => Severity::Warning,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown tier: {0}")]
pub struct ParseTierError(String);

impl FromStr for Tier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "T1" => Ok(Tier::OomKill),
            "T2" => Ok(Tier::ProcessCrash),
            "T3" => Ok(Tier::ServiceFailure),
            "T4" => Ok(Tier::KernelHw),
            "T5" => Ok(Tier::MemPressure),
            _ => Err(ParseTierError(s.to_string())),
        }
    }
}

/// Urgency of an event, derived from its tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Warning => "warning",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown severity: {0}")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "warning" => Ok(Severity::Warning),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// A classified system event, optionally enriched with root-cause context.
///
/// Events are mutable only between creation and store insertion; once
/// persisted they change only via the notified flag.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: String,
    pub instance_id: String,
    pub timestamp: DateTime<Utc>,
    pub tier: Tier,
    pub severity: Severity,
    pub summary: String,
    pub process: String,
    pub pid: i64,
    pub unit: String,
    pub detail: String,
    pub raw_fields: HashMap<String, String>,
}

impl Event {
    /// Creates an event with a fresh UUID; severity is fixed by the tier.
    pub fn new(
        instance_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        tier: Tier,
        summary: impl Into<String>,
    ) -> Self {
        Event {
            id: Uuid::new_v4().to_string(),
            instance_id: instance_id.into(),
            timestamp,
            tier,
            severity: tier.severity(),
            summary: summary.into(),
            process: String::new(),
            pid: 0,
            unit: String::new(),
            detail: String::new(),
            raw_fields: HashMap::new(),
        }
    }
}
