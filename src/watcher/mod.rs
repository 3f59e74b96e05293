//! Journal record source and the supervised restart wrapper around it.

pub mod pipe;
pub mod supervisor;

pub use pipe::PipeSource;
pub use supervisor::SupervisedSource;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffer size of the record channels, both per-session and supervised.
pub const RECORD_CHANNEL_CAPACITY: usize = 64;

/// A parsed journal record, the classifier's input.
#[derive(Debug, Clone, Default)]
pub struct JournalRecord {
    pub message: String,
    /// syslog priority (0=emerg .. 7=debug)
    pub priority: i32,
    /// e.g. "kernel", "systemd", or a process name
    pub syslog_identifier: String,
    /// e.g. "docker.service"
    pub systemd_unit: String,
    pub pid: String,
    /// e.g. "kernel", "journal", "syslog"
    pub transport: String,
    pub cursor: String,
    /// microseconds since epoch, as emitted by the journal
    pub realtime_timestamp: String,
    /// all raw fields of the record
    pub fields: HashMap<String, String>,
}

/// A source of journal records. Implementations include the real journalctl
/// pipe and test mocks.
#[async_trait]
pub trait JournalSource: Send {
    /// Starts a session and returns a channel of records. The channel closes
    /// when the session ends or the token is cancelled. Sessions are allowed
    /// to terminate on their own; the supervisor handles restarts.
    async fn entries(
        &mut self,
        token: CancellationToken,
    ) -> anyhow::Result<mpsc::Receiver<JournalRecord>>;
}
