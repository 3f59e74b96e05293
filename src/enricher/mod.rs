//! Tier-dispatched event enrichment via short-lived subprocess queries.
//!
//! Enrichment is best-effort by contract: every failure is logged at debug
//! level and the event continues through the pipeline unchanged. Each
//! external query runs under a 10 second deadline.

mod crash;
mod gpu;
mod hw;
mod oom;
mod query;
mod service;

use tracing::debug;

use crate::event::{Event, Tier};

pub struct Enricher;

impl Enricher {
    pub fn new() -> Self {
        Enricher
    }

    /// Adds root-cause context to an event based on its tier. May spawn
    /// short-lived subprocesses (journalctl, coredumpctl, smartctl).
    pub async fn enrich(&self, ev: &mut Event) {
        match ev.tier {
            Tier::OomKill => oom::enrich(ev).await,
            Tier::ProcessCrash => {
                crash::enrich(ev).await;
                // A compositor crash is usually a GPU driver fault.
                gpu::enrich_compositor_crash(ev).await;
            }
            Tier::ServiceFailure => service::enrich(ev).await,
            Tier::KernelHw => {
                if ev.raw_fields.get("_gpu_event").map(String::as_str) == Some("true") {
                    gpu::enrich(ev).await;
                } else {
                    hw::enrich(ev).await;
                }
            }
            Tier::MemPressure => {
                debug!(tier = %ev.tier, "no enrichment available for tier");
            }
        }
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::new()
    }
}
