//! Sliding-window cooldown and aggregation decisions.

use std::time::Duration;

use rusqlite::params_from_iter;
use tracing::debug;

use super::{format_timestamp, Store, StoreError};
use crate::event::Event;

/// Outcome of a cooldown check for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownDecision {
    /// True if this event should trigger a notification.
    pub should_alert: bool,
    /// Number of similar events already stored within the window.
    pub recent_count: i64,
    /// True when the aggregate threshold was just reached, so the alert is
    /// a crash-looping summary rather than a first occurrence.
    pub aggregated: bool,
}

impl Store {
    /// Decides whether an event should alert, based on how many events with
    /// the same cooldown key (instance + tier + unit-else-process) are
    /// already stored within the window. Must be called before the event is
    /// inserted: the thresholds apply to pre-insert counts.
    ///
    /// count == 0         -> alert (first occurrence)
    /// 0 < count < N      -> suppress (within cooldown)
    /// count == N         -> alert once more, aggregated
    /// count > N          -> suppress (aggregate already sent)
    pub fn check_cooldown(
        &self,
        ev: &Event,
        window: Duration,
        threshold: i64,
    ) -> Result<CooldownDecision, StoreError> {
        let since = format_timestamp(ev.timestamp - window);

        let mut sql = String::from(
            "SELECT COUNT(*) FROM events WHERE instance_id = ? AND tier = ? AND timestamp >= ?",
        );
        let mut args: Vec<String> = vec![
            ev.instance_id.clone(),
            ev.tier.as_str().to_string(),
            since,
        ];

        // Prefer unit when present: systemd-aware dedup without extra keys.
        if !ev.unit.is_empty() {
            sql.push_str(" AND unit = ?");
            args.push(ev.unit.clone());
        } else if !ev.process.is_empty() {
            sql.push_str(" AND process = ?");
            args.push(ev.process.clone());
        }

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(args.iter()), |row| row.get(0))?;

        let (should_alert, aggregated) = if count == 0 {
            (true, false)
        } else if count == threshold {
            (true, true)
        } else {
            (false, false)
        };

        debug!(
            tier = %ev.tier,
            process = %ev.process,
            unit = %ev.unit,
            recent_count = count,
            threshold,
            should_alert,
            "cooldown check"
        );

        Ok(CooldownDecision {
            should_alert,
            recent_count: count,
            aggregated,
        })
    }
}
