//! Memory-pressure monitor over the kernel PSI interface.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{procsnap, ProcMem, MONITOR_CHANNEL_CAPACITY};

const HIGH_FREQ_INTERVAL: Duration = Duration::from_secs(1);
const TOP_CONSUMER_COUNT: usize = 5;

/// Parsed /proc/pressure/memory values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PsiStats {
    pub some_avg10: f64,
    pub some_avg60: f64,
    pub some_avg300: f64,
    pub full_avg10: f64,
    pub full_avg60: f64,
    pub full_avg300: f64,
}

/// Emitted when pressure exceeds the configured thresholds.
#[derive(Debug, Clone)]
pub struct PsiEvent {
    pub timestamp: DateTime<Utc>,
    pub stats: PsiStats,
    /// Top memory consumers captured during the pressure episode.
    pub top_consumers: Vec<ProcMem>,
}

/// Polls the PSI interface, switching to a 1 s cadence while thresholds are
/// exceeded and back once pressure subsides.
pub struct PsiMonitor {
    poll_interval: Duration,
    warn_some_avg10: f64,
    warn_full_avg10: f64,
    psi_path: PathBuf,
}

impl PsiMonitor {
    pub fn new(poll_interval: Duration, warn_some_avg10: f64, warn_full_avg10: f64) -> Self {
        PsiMonitor {
            poll_interval,
            warn_some_avg10,
            warn_full_avg10,
            psi_path: PathBuf::from("/proc/pressure/memory"),
        }
    }

    #[cfg(test)]
    fn with_psi_path(mut self, path: PathBuf) -> Self {
        self.psi_path = path;
        self
    }

    /// Starts polling; the returned channel closes when the token fires.
    /// Emission never blocks: a full channel drops the event.
    pub fn spawn(self, token: CancellationToken) -> mpsc::Receiver<PsiEvent> {
        let (tx, rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut in_pressure = false;
            let mut ticker = tokio::time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let stats = match read_psi(&self.psi_path) {
                    Ok(stats) => stats,
                    Err(err) => {
                        debug!(error = %err, "failed to read PSI stats");
                        continue;
                    }
                };

                let exceeded = stats.some_avg10 > self.warn_some_avg10
                    || stats.full_avg10 > self.warn_full_avg10;

                if exceeded && !in_pressure {
                    in_pressure = true;
                    ticker = tokio::time::interval(HIGH_FREQ_INTERVAL);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    info!(
                        some_avg10 = stats.some_avg10,
                        full_avg10 = stats.full_avg10,
                        "memory pressure detected, switching to high-frequency polling"
                    );
                } else if !exceeded && in_pressure {
                    in_pressure = false;
                    ticker = tokio::time::interval(self.poll_interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    info!("memory pressure subsided, returning to normal polling");
                }

                if exceeded {
                    let top_consumers =
                        procsnap::top_mem_consumers(TOP_CONSUMER_COUNT).unwrap_or_default();
                    let event = PsiEvent {
                        timestamp: Utc::now(),
                        stats,
                        top_consumers,
                    };
                    if tx.try_send(event).is_err() {
                        debug!("pressure channel full, dropping event");
                    }
                }
            }
        });

        rx
    }
}

/// Parses /proc/pressure/memory (or a test file at the given path).
///
/// Format:
///   some avg10=0.00 avg60=0.00 avg300=0.00 total=0
///   full avg10=0.00 avg60=0.00 avg300=0.00 total=0
pub fn read_psi(path: &Path) -> Result<PsiStats> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut stats = PsiStats::default();
    for line in data.lines() {
        if let Some(rest) = line.strip_prefix("some ") {
            (stats.some_avg10, stats.some_avg60, stats.some_avg300) = parse_psi_line(rest);
        } else if let Some(rest) = line.strip_prefix("full ") {
            (stats.full_avg10, stats.full_avg60, stats.full_avg300) = parse_psi_line(rest);
        }
    }
    Ok(stats)
}

/// Parses "avg10=2.10 avg60=0.50 avg300=0.10 total=123456".
fn parse_psi_line(line: &str) -> (f64, f64, f64) {
    let (mut avg10, mut avg60, mut avg300) = (0.0, 0.0, 0.0);
    for field in line.split_whitespace() {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        match key {
            "avg10" => avg10 = value,
            "avg60" => avg60 = value,
            "avg300" => avg300 = value,
            _ => {}
        }
    }
    (avg10, avg60, avg300)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_psi(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("memory");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn reads_psi_stats() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_psi(
            dir.path(),
            "some avg10=2.10 avg60=0.50 avg300=0.10 total=123456\n\
             full avg10=0.30 avg60=0.05 avg300=0.01 total=7890\n",
        );

        let stats = read_psi(&path).unwrap();
        assert_eq!(stats.some_avg10, 2.10);
        assert_eq!(stats.some_avg60, 0.50);
        assert_eq!(stats.some_avg300, 0.10);
        assert_eq!(stats.full_avg10, 0.30);
        assert_eq!(stats.full_avg60, 0.05);
        assert_eq!(stats.full_avg300, 0.01);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_psi(Path::new("/nonexistent/path/memory")).is_err());
    }

    #[test]
    fn parses_psi_line_fields() {
        assert_eq!(parse_psi_line("avg10=0.00 avg60=0.00 avg300=0.00 total=0"), (0.0, 0.0, 0.0));
        assert_eq!(
            parse_psi_line("avg10=12.34 avg60=5.67 avg300=1.23 total=99999"),
            (12.34, 5.67, 1.23)
        );
    }

    #[tokio::test]
    async fn emits_event_when_threshold_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_psi(
            dir.path(),
            "some avg10=65.20 avg60=32.10 avg300=12.50 total=999999\n\
             full avg10=15.30 avg60=5.40 avg300=1.20 total=888888\n",
        );

        let monitor =
            PsiMonitor::new(Duration::from_millis(10), 50.0, 10.0).with_psi_path(path);
        let token = CancellationToken::new();
        let mut rx = monitor.spawn(token.clone());

        let event = rx.recv().await.expect("expected a pressure event");
        assert_eq!(event.stats.some_avg10, 65.20);
        assert_eq!(event.stats.full_avg10, 15.30);
        token.cancel();
    }

    #[tokio::test]
    async fn quiet_system_emits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_psi(
            dir.path(),
            "some avg10=0.00 avg60=0.00 avg300=0.00 total=0\n\
             full avg10=0.00 avg60=0.00 avg300=0.00 total=0\n",
        );

        let monitor =
            PsiMonitor::new(Duration::from_millis(5), 50.0, 10.0).with_psi_path(path);
        let token = CancellationToken::new();
        let mut rx = monitor.spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        assert!(rx.recv().await.is_none());
    }
}
