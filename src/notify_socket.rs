//! systemd readiness/watchdog notifications over `NOTIFY_SOCKET`.

use std::os::unix::net::UnixDatagram;
use std::time::Duration;

use tracing::debug;

/// Sends a state message ("READY=1", "WATCHDOG=1", "STOPPING=1") to the
/// service manager. A missing or unreachable socket is not an error: the
/// daemon also runs outside systemd.
pub fn notify(state: &str) {
    let Some(path) = std::env::var_os("NOTIFY_SOCKET") else {
        return;
    };
    let path = path.to_string_lossy().to_string();
    if path.is_empty() {
        return;
    }

    let result = (|| -> std::io::Result<()> {
        let socket = UnixDatagram::unbound()?;
        if let Some(name) = path.strip_prefix('@') {
            // Abstract namespace socket.
            use std::os::linux::net::SocketAddrExt;
            let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
            socket.send_to_addr(state.as_bytes(), &addr)?;
        } else {
            socket.send_to(state.as_bytes(), &path)?;
        }
        Ok(())
    })();

    if let Err(err) = result {
        debug!(state, error = %err, "failed to notify service manager");
    }
}

/// Watchdog ping interval: half of `WATCHDOG_USEC`, when set.
pub fn watchdog_interval() -> Option<Duration> {
    let usec: u64 = std::env::var("WATCHDOG_USEC").ok()?.parse().ok()?;
    if usec == 0 {
        return None;
    }
    Some(Duration::from_micros(usec / 2))
}
