use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

/// When a snapshot counts as "has media".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaPolicy {
    /// Only a playing session shows the media card.
    Playing,
    /// A paused session with a known title also keeps the card.
    KnownTrack,
}

impl MediaPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "playing" => Some(MediaPolicy::Playing),
            "known_track" | "known-track" => Some(MediaPolicy::KnownTrack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Sidecar,
    Windows,
}

impl ProviderKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sidecar" => Some(ProviderKind::Sidecar),
            "windows" => Some(ProviderKind::Windows),
            _ => None,
        }
    }
}

impl Default for ProviderKind {
    fn default() -> Self {
        if cfg!(windows) {
            ProviderKind::Windows
        } else {
            ProviderKind::Sidecar
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            program: "halo-media-helper".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub collapse_after: Duration,
    pub metadata_retry_delay: Duration,
    pub refresh_timeout: Duration,
    pub media_policy: MediaPolicy,
    pub provider: ProviderKind,
    pub sidecar: SidecarConfig,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            tick_interval: Duration::from_secs(5),
            collapse_after: Duration::from_secs(5),
            metadata_retry_delay: Duration::from_millis(100),
            refresh_timeout: Duration::from_secs(5),
            media_policy: MediaPolicy::Playing,
            provider: ProviderKind::default(),
            sidecar: SidecarConfig::default(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load the first config file found, then apply `HALO_*` environment overrides.
    ///
    /// Also returns the overrides that were rejected. Logging is configured from
    /// the result, so the caller reports them once the logger is up.
    pub fn load() -> Result<(Self, Vec<String>)> {
        let mut config = match Self::find_file() {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        let rejected = config.apply_env(|key| env::var(key).ok());
        Ok((config, rejected))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&data)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let doc: ConfigDocument = toml::from_str(data)?;
        Ok(doc.into())
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(explicit) = env::var("HALO_CONFIG") {
            return Some(PathBuf::from(explicit));
        }

        let mut candidates = Vec::new();

        if let Ok(current_dir) = env::current_dir() {
            candidates.push(current_dir.join("halo.toml"));
            candidates.push(current_dir.join("config").join("halo.toml"));
        }

        if let Ok(exe) = env::current_exe() {
            if let Some(dir) = exe.parent() {
                candidates.push(dir.join("halo.toml"));
            }
        }

        candidates.into_iter().find(|path| path.exists())
    }

    /// Environment overrides, looked up through `lookup` so tests need not touch the process env.
    ///
    /// Returns a message for every value that was not understood.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rejected = Vec::new();
        if let Some(value) = lookup("HALO_PROVIDER") {
            match ProviderKind::parse(&value) {
                Some(kind) => self.provider = kind,
                None => rejected.push(format!("Ignoring unknown HALO_PROVIDER value: {}", value)),
            }
        }
        if let Some(program) = lookup("HALO_SIDECAR") {
            self.sidecar.program = program;
        }
        if let Some(value) = lookup("HALO_MEDIA_POLICY") {
            match MediaPolicy::parse(&value) {
                Some(policy) => self.media_policy = policy,
                None => {
                    rejected.push(format!("Ignoring unknown HALO_MEDIA_POLICY value: {}", value))
                }
            }
        }
        if let Some(path) = lookup("HALO_LOG_FILE") {
            self.log_file = Some(PathBuf::from(path));
        }
        rejected
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigDocument {
    #[serde(default)]
    timing: TimingSection,
    media_policy: Option<MediaPolicy>,
    provider: Option<ProviderKind>,
    #[serde(default)]
    sidecar: SidecarSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingSection {
    poll_interval_ms: Option<u64>,
    tick_interval_ms: Option<u64>,
    collapse_after_ms: Option<u64>,
    metadata_retry_delay_ms: Option<u64>,
    refresh_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SidecarSection {
    program: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingSection {
    level: Option<String>,
    file: Option<PathBuf>,
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    // A zero interval would make tokio::time::interval panic.
    value
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

impl From<ConfigDocument> for Config {
    fn from(value: ConfigDocument) -> Self {
        let defaults = Config::default();
        let timing = value.timing;

        Config {
            poll_interval: millis_or(timing.poll_interval_ms, defaults.poll_interval),
            tick_interval: millis_or(timing.tick_interval_ms, defaults.tick_interval),
            collapse_after: millis_or(timing.collapse_after_ms, defaults.collapse_after),
            metadata_retry_delay: timing
                .metadata_retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.metadata_retry_delay),
            refresh_timeout: millis_or(timing.refresh_timeout_ms, defaults.refresh_timeout),
            media_policy: value.media_policy.unwrap_or(defaults.media_policy),
            provider: value.provider.unwrap_or(defaults.provider),
            sidecar: SidecarConfig {
                program: value.sidecar.program.unwrap_or(defaults.sidecar.program),
                args: value.sidecar.args.unwrap_or_default(),
            },
            log_level: value.logging.level.unwrap_or(defaults.log_level),
            log_file: value.logging.file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_widget_timings() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.collapse_after, Duration::from_secs(5));
        assert_eq!(config.metadata_retry_delay, Duration::from_millis(100));
        assert_eq!(config.media_policy, MediaPolicy::Playing);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.sidecar, SidecarConfig::default());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn parses_all_sections() {
        let config = Config::from_toml(
            r#"
            media_policy = "known_track"
            provider = "sidecar"

            [timing]
            poll_interval_ms = 1500
            collapse_after_ms = 8000
            metadata_retry_delay_ms = 0

            [sidecar]
            program = "python3"
            args = ["helper.py", "--json"]

            [logging]
            level = "debug"
            file = "/tmp/halo.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.media_policy, MediaPolicy::KnownTrack);
        assert_eq!(config.provider, ProviderKind::Sidecar);
        assert_eq!(config.poll_interval, Duration::from_millis(1500));
        assert_eq!(config.collapse_after, Duration::from_secs(8));
        assert_eq!(config.metadata_retry_delay, Duration::ZERO);
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.sidecar.program, "python3");
        assert_eq!(config.sidecar.args, vec!["helper.py", "--json"]);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/halo.log")));
    }

    #[test]
    fn zero_intervals_fall_back_to_defaults() {
        let config = Config::from_toml("[timing]\npoll_interval_ms = 0\ntick_interval_ms = 0\n")
            .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.tick_interval, Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Config::from_toml("[timing]\npoll_every = 3\n").is_err());
        assert!(Config::from_toml("media_policy = \"sometimes\"\n").is_err());
    }

    #[test]
    fn env_overrides_apply_on_top_of_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HALO_PROVIDER", "windows"),
            ("HALO_SIDECAR", "/usr/local/bin/helper"),
            ("HALO_MEDIA_POLICY", "known-track"),
            ("HALO_LOG_FILE", "/var/log/halo.log"),
        ]);

        let mut config = Config::default();
        let rejected = config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert!(rejected.is_empty());
        assert_eq!(config.provider, ProviderKind::Windows);
        assert_eq!(config.sidecar.program, "/usr/local/bin/helper");
        assert_eq!(config.media_policy, MediaPolicy::KnownTrack);
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/halo.log")));
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = Config::default();
        let before = config.provider;
        let rejected = config.apply_env(|key| match key {
            "HALO_PROVIDER" => Some("pipewire".to_string()),
            "HALO_MEDIA_POLICY" => Some("always".to_string()),
            _ => None,
        });
        assert_eq!(config.provider, before);
        assert_eq!(config.media_policy, MediaPolicy::Playing);

        // Handed back to the caller, which logs them once the logger exists.
        assert_eq!(rejected.len(), 2);
        assert!(rejected[0].contains("HALO_PROVIDER") && rejected[0].contains("pipewire"));
        assert!(rejected[1].contains("HALO_MEDIA_POLICY") && rejected[1].contains("always"));
    }

    #[test]
    fn from_file_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timing").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timing]\ntick_interval_ms = 250").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.tick_interval, Duration::from_millis(250));
    }
}
