//! TOML configuration loading with per-section defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};

const DEFAULT_ROLE: &str = "desktop";
const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_secs(5 * 60);
const DEFAULT_AGGREGATE_THRESHOLD: i64 = 3;
const DEFAULT_PSI_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_WARN_SOME_AVG10: f64 = 50.0;
const DEFAULT_WARN_FULL_AVG10: f64 = 10.0;
const DEFAULT_SMART_POLL_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_GPU_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_GPU_TEMP_WARN: i64 = 85;
const DEFAULT_GPU_VRAM_WARN_PCT: i64 = 90;
const DEFAULT_RETENTION: Duration = Duration::from_secs(90 * 86_400);
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub instance: InstanceConfig,
    pub ntfy: NtfyConfig,
    pub digest: DigestConfig,
    pub cooldown: CooldownConfig,
    pub psi: PsiConfig,
    pub smart: SmartConfig,
    pub gpu: GpuConfig,
    pub db: DbConfig,
    pub log: LogConfig,
}

/// Identifies this machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub id: String,
    pub role: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            id: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
            role: DEFAULT_ROLE.to_string(),
        }
    }
}

/// Controls the ntfy notification target.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NtfyConfig {
    pub url: String,
    pub priority_map: HashMap<String, String>,
    pub alert_tiers: Vec<String>,
}

impl Default for NtfyConfig {
    fn default() -> Self {
        let priority_map = HashMap::from([
            ("critical".to_string(), "urgent".to_string()),
            ("high".to_string(), "high".to_string()),
            ("medium".to_string(), "default".to_string()),
        ]);
        NtfyConfig {
            url: String::new(),
            priority_map,
            alert_tiers: vec!["T1".to_string(), "T2".to_string()],
        }
    }
}

impl NtfyConfig {
    /// Returns true if the given tier is in the configured alert tiers.
    pub fn should_alert(&self, tier: &str) -> bool {
        self.alert_tiers.iter().any(|t| t.eq_ignore_ascii_case(tier))
    }

    /// Maps a severity string to an ntfy priority string.
    pub fn priority_for(&self, severity: &str) -> &str {
        self.priority_map
            .get(severity)
            .map(String::as_str)
            .unwrap_or("default")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub enabled: bool,
    pub topic: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        DigestConfig {
            enabled: true,
            topic: String::new(),
        }
    }
}

impl DigestConfig {
    /// Digest target URL, falling back to the main ntfy topic.
    pub fn effective_topic<'a>(&'a self, ntfy_url: &'a str) -> &'a str {
        if self.topic.is_empty() {
            ntfy_url
        } else {
            &self.topic
        }
    }
}

/// Controls dedup/cooldown behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    #[serde(deserialize_with = "de_duration")]
    pub window: Duration,
    pub aggregate_threshold: i64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        CooldownConfig {
            window: DEFAULT_COOLDOWN_WINDOW,
            aggregate_threshold: DEFAULT_AGGREGATE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PsiConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "de_duration")]
    pub poll_interval: Duration,
    pub warn_some_avg10: f64,
    pub warn_full_avg10: f64,
}

impl Default for PsiConfig {
    fn default() -> Self {
        PsiConfig {
            enabled: true,
            poll_interval: DEFAULT_PSI_POLL_INTERVAL,
            warn_some_avg10: DEFAULT_WARN_SOME_AVG10,
            warn_full_avg10: DEFAULT_WARN_FULL_AVG10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmartConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "de_duration")]
    pub poll_interval: Duration,
}

impl Default for SmartConfig {
    fn default() -> Self {
        SmartConfig {
            enabled: false,
            poll_interval: DEFAULT_SMART_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "de_duration")]
    pub poll_interval: Duration,
    pub temp_warn: i64,
    pub vram_warn_pct: i64,
}

impl Default for GpuConfig {
    fn default() -> Self {
        GpuConfig {
            enabled: true,
            poll_interval: DEFAULT_GPU_POLL_INTERVAL,
            temp_warn: DEFAULT_GPU_TEMP_WARN,
            vram_warn_pct: DEFAULT_GPU_VRAM_WARN_PCT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub path: String,
    #[serde(deserialize_with = "de_duration")]
    pub retention: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            path: String::new(),
            retention: DEFAULT_RETENTION,
        }
    }
}

impl DbConfig {
    /// Resolves the events database path: explicit value (with `~/` expansion)
    /// or `<data_dir>/logtriage/events.db`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if self.path.is_empty() {
            return Ok(data_dir()?.join("events.db"));
        }
        if let Some(rest) = self.path.strip_prefix("~/") {
            let home = dirs::home_dir().context("resolving home directory")?;
            return Ok(home.join(rest));
        }
        Ok(PathBuf::from(&self.path))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Reads configuration from the given path, or from the default location
    /// when no path is given. A missing file at the default location is not
    /// an error; a missing or unparseable file at an explicit path is.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !explicit => {
                return Ok(Config::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading config {}", path.display()));
            }
        };

        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Default config file path: `<config_dir>/logtriage/config.toml`.
pub fn default_config_path() -> PathBuf {
    let config_dir = dirs::config_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    });
    config_dir.join("logtriage").join("config.toml")
}

/// Data directory for the events database and journal cursor, created on
/// first use. Honors `XDG_DATA_HOME`.
pub fn data_dir() -> Result<PathBuf> {
    let base = match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .context("resolving home directory")?
            .join(".local")
            .join("share"),
    };
    let dir = base.join("logtriage");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating data directory {}", dir.display()))?;
    Ok(dir)
}

/// Parses a duration string. `Nd` means N days; otherwise the usual
/// `ms`/`s`/`m`/`h` suffixes apply.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if let Some(days) = s.strip_suffix('d') {
        let n: u64 = days
            .parse()
            .with_context(|| format!("invalid day count in duration {s:?}"))?;
        return Ok(Duration::from_secs(n * 86_400));
    }

    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .with_context(|| format!("duration {s:?} is missing a unit suffix"))?;
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .with_context(|| format!("invalid number in duration {s:?}"))?;
    if value < 0.0 {
        bail!("negative duration {s:?}");
    }
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => bail!("unknown duration unit {unit:?} in {s:?}"),
    };
    Ok(Duration::from_secs_f64(secs))
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let cfg = Config::default();
        assert!(!cfg.instance.id.is_empty());
        assert_eq!(cfg.instance.role, "desktop");
        assert_eq!(cfg.cooldown.window, Duration::from_secs(300));
        assert_eq!(cfg.cooldown.aggregate_threshold, 3);
        assert_eq!(cfg.log.level, "info");
        assert_eq!(cfg.ntfy.alert_tiers, vec!["T1", "T2"]);
        assert!(cfg.psi.enabled);
        assert!(!cfg.smart.enabled);
        assert!(cfg.gpu.enabled);
        assert_eq!(cfg.gpu.temp_warn, 85);
        assert_eq!(cfg.db.retention, Duration::from_secs(90 * 86_400));
    }

    #[test]
    fn load_missing_default_path_uses_defaults() {
        // No explicit path was given, so a missing file falls back to defaults.
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_CONFIG_HOME", dir.path());
        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.instance.role, "desktop");
    }

    #[test]
    fn load_missing_explicit_path_fails() {
        assert!(Config::load(Some(Path::new("/nonexistent/config.toml"))).is_err());
    }

    #[test]
    fn load_valid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[instance]
id = "mynas"
role = "nas"

[ntfy]
url = "https://ntfy.sh/my-topic"
alert_tiers = ["T1", "T2", "T3"]

[cooldown]
window = "10m"
aggregate_threshold = 5

[smart]
enabled = true
poll_interval = "30m"

[db]
retention = "30d"

[log]
level = "debug"
"#,
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.instance.id, "mynas");
        assert_eq!(cfg.instance.role, "nas");
        assert_eq!(cfg.ntfy.url, "https://ntfy.sh/my-topic");
        assert_eq!(cfg.ntfy.alert_tiers.len(), 3);
        assert_eq!(cfg.cooldown.window, Duration::from_secs(600));
        assert_eq!(cfg.cooldown.aggregate_threshold, 5);
        assert!(cfg.smart.enabled);
        assert_eq!(cfg.smart.poll_interval, Duration::from_secs(1800));
        assert_eq!(cfg.db.retention, Duration::from_secs(30 * 86_400));
        assert_eq!(cfg.log.level, "debug");
        // Unset sections keep their defaults.
        assert!(cfg.psi.enabled);
        assert_eq!(cfg.gpu.vram_warn_pct, 90);
    }

    #[test]
    fn load_invalid_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid [[[ toml").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn should_alert_respects_tiers() {
        let cfg = Config::default();
        assert!(cfg.ntfy.should_alert("T1"));
        assert!(cfg.ntfy.should_alert("t2"));
        assert!(!cfg.ntfy.should_alert("T3"));
    }

    #[test]
    fn priority_mapping() {
        let cfg = Config::default();
        assert_eq!(cfg.ntfy.priority_for("critical"), "urgent");
        assert_eq!(cfg.ntfy.priority_for("high"), "high");
        assert_eq!(cfg.ntfy.priority_for("unknown"), "default");
    }

    #[test]
    fn duration_day_suffix() {
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(
            parse_duration("90d").unwrap(),
            Duration::from_secs(90 * 86_400)
        );
    }

    #[test]
    fn duration_standard_suffixes() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
    }

    #[test]
    fn duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn db_path_tilde_expansion() {
        let cfg = DbConfig {
            path: "~/events.db".to_string(),
            ..DbConfig::default()
        };
        let resolved = cfg.resolved_path().unwrap();
        assert!(resolved.ends_with("events.db"));
        assert!(!resolved.to_string_lossy().contains('~'));
    }
}
