//! Outbound reporting: ntfy notifications and periodic digests.

pub mod digest;
pub mod ntfy;

pub use digest::{build_digest, format_digest, format_digest_title, DigestSummary};
pub use ntfy::{test_event, NtfyReporter};
