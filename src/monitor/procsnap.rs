//! Point-in-time snapshot of per-process memory usage from /proc.

use std::path::Path;

use anyhow::{Context, Result};

use crate::format;

/// A process's resident memory usage, read from `/proc/<pid>/statm`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcMem {
    pub pid: i32,
    pub name: String,
    pub rss_bytes: i64,
}

/// Returns the top N processes by resident set size.
pub fn top_mem_consumers(n: usize) -> Result<Vec<ProcMem>> {
    top_from_root(Path::new("/proc"), n)
}

fn top_from_root(proc_root: &Path, n: usize) -> Result<Vec<ProcMem>> {
    let entries = std::fs::read_dir(proc_root)
        .with_context(|| format!("reading {}", proc_root.display()))?;

    let page_size = page_size();
    let mut procs = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };

        // The process may exit between readdir and the reads below.
        let Ok(rss_pages) = read_statm_rss(&entry.path().join("statm")) else {
            continue;
        };
        let comm = read_comm_name(&entry.path().join("comm"));

        procs.push(ProcMem {
            pid,
            name: comm,
            rss_bytes: rss_pages * page_size,
        });
    }

    procs.sort_by(|a, b| b.rss_bytes.cmp(&a.rss_bytes));
    if n > 0 && procs.len() > n {
        procs.truncate(n);
    }
    Ok(procs)
}

/// Reads the RSS field (second field, in pages) from a statm file.
fn read_statm_rss(path: &Path) -> Result<i64> {
    let data = std::fs::read_to_string(path)?;
    let rss = data
        .split_whitespace()
        .nth(1)
        .context("unexpected statm format")?;
    Ok(rss.parse()?)
}

fn read_comm_name(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|_| "?".to_string())
}

fn page_size() -> i64 {
    // SAFETY: sysconf has no side effects and is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as i64 }
}

/// Formats a consumer list as numbered human-readable lines.
pub fn format_top_consumers(consumers: &[ProcMem]) -> String {
    let mut out = String::new();
    for (i, p) in consumers.iter().enumerate() {
        out.push_str(&format!(
            "  {}. {:<20} {}\n",
            i + 1,
            p.name,
            format::bytes(p.rss_bytes)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fake_proc(root: &Path, pid: &str, name: &str, statm: &str) {
        let dir = root.join(pid);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("comm"), format!("{name}\n")).unwrap();
        std::fs::write(dir.join("statm"), statm).unwrap();
    }

    #[test]
    fn returns_top_consumers_by_rss() {
        let root = tempfile::tempdir().unwrap();
        make_fake_proc(root.path(), "100", "firefox", "10000 5000 300 0 0 0 0");
        make_fake_proc(root.path(), "200", "electron", "20000 8000 500 0 0 0 0");
        make_fake_proc(root.path(), "300", "bash", "5000 1000 100 0 0 0 0");
        // Non-PID entries are skipped.
        std::fs::create_dir_all(root.path().join("sys")).unwrap();

        let procs = top_from_root(root.path(), 2).unwrap();
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].name, "electron");
        assert_eq!(procs[0].pid, 200);
        assert_eq!(procs[1].name, "firefox");
        assert_eq!(procs[0].rss_bytes, 8000 * page_size());
    }

    #[test]
    fn skips_unreadable_processes() {
        let root = tempfile::tempdir().unwrap();
        make_fake_proc(root.path(), "100", "ok", "100 50 0 0 0 0 0");
        // A PID directory without statm simulates a racing exit.
        std::fs::create_dir_all(root.path().join("200")).unwrap();

        let procs = top_from_root(root.path(), 5).unwrap();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].name, "ok");
    }

    #[test]
    fn formats_consumer_list() {
        let consumers = vec![
            ProcMem {
                pid: 100,
                name: "firefox".to_string(),
                rss_bytes: 3 * 1024 * 1024 * 1024,
            },
            ProcMem {
                pid: 200,
                name: "electron".to_string(),
                rss_bytes: 512 * 1024 * 1024,
            },
        ];
        let out = format_top_consumers(&consumers);
        assert!(out.contains("firefox"));
        assert!(out.contains("electron"));
        assert!(out.contains("GB"));
        assert!(out.contains("512.0 MB"));
    }
}
