//! Periodic host monitors: memory pressure, disk health, GPU status.
//!
//! Each monitor polls on its own task and emits into a bounded channel with
//! drop-on-full semantics; the pipeline turns the payloads into typed
//! events through the classifier's synthetic entry points.

pub mod gpu;
pub mod procsnap;
pub mod psi;
pub mod smart;

pub use gpu::{GpuEvent, GpuMonitor, GpuReason, GpuStatus, GpuVendor};
pub use procsnap::ProcMem;
pub use psi::{PsiEvent, PsiMonitor, PsiStats};
pub use smart::{SmartEvent, SmartMonitor, SmartStatus};

/// Buffer size of every monitor channel.
pub const MONITOR_CHANNEL_CAPACITY: usize = 8;
