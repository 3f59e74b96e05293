//! Restart supervision for journal sources.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{JournalRecord, JournalSource, RECORD_CHANNEL_CAPACITY};

pub type SourceFactory = Box<dyn Fn() -> Box<dyn JournalSource> + Send>;

/// Wraps a source factory with automatic restart on session failure. A new
/// session resumes from the cursor the previous one persisted, so records
/// are not replayed from the beginning after a restart.
pub struct SupervisedSource {
    factory: SourceFactory,
    restart_wait: Duration,
    /// 0 means unlimited restarts.
    max_restarts: u32,
}

impl SupervisedSource {
    pub fn new(factory: SourceFactory, restart_wait: Duration, max_restarts: u32) -> Self {
        SupervisedSource {
            factory,
            restart_wait,
            max_restarts,
        }
    }

    /// Starts the supervision loop and returns a channel that receives
    /// records across restarts. The channel closes when the token fires or
    /// the restart cap is exceeded.
    pub fn entries(self, token: CancellationToken) -> mpsc::Receiver<JournalRecord> {
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut restarts: u32 = 0;
            loop {
                if self.max_restarts > 0 && restarts >= self.max_restarts {
                    error!(max = self.max_restarts, "journal watcher exceeded max restarts");
                    return;
                }

                let mut source = (self.factory)();
                let mut entries = match source.entries(token.clone()).await {
                    Ok(entries) => entries,
                    Err(err) => {
                        // Soft failure: journalctl may be momentarily unavailable.
                        warn!(error = %err, restart_count = restarts, "failed to start journal source");
                        restarts += 1;
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = sleep(self.restart_wait) => continue,
                        }
                    }
                };

                info!(restart_count = restarts, "journal source started");

                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        record = entries.recv() => match record {
                            Some(record) => {
                                if tx.send(record).await.is_err() {
                                    return;
                                }
                            }
                            None => break,
                        }
                    }
                }

                if token.is_cancelled() {
                    return;
                }
                warn!(restart_count = restarts, "journal source stopped, restarting");
                restarts += 1;
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = sleep(self.restart_wait) => {}
                }
            }
        });

        rx
    }
}
