use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::catalog::blacklist::parse_rules;
use crate::constants::{self, markers};
use crate::domain::ServiceKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub mdnx: MdnxConfig,

    pub crunchyroll: ServiceConfig,

    pub hidive: ServiceConfig,

    pub downloads: DownloadConfig,

    pub scheduler: SchedulerConfig,

    pub transfer: TransferConfig,

    pub media_server: MediaServerConfig,

    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,

    pub log_dir: PathBuf,

    /// Compressed log archives kept after rotation.
    pub max_log_archives: usize,

    /// 0 lets tokio pick.
    pub worker_threads: usize,

    pub catalog_path: PathBuf,

    /// Where the tool writes its output before it is moved into the library.
    pub temp_dir: PathBuf,

    /// Library root.
    pub data_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: PathBuf::from("./logs"),
            max_log_archives: 10,
            worker_threads: 0,
            catalog_path: PathBuf::from("./data/queue.json"),
            temp_dir: PathBuf::from("./temp"),
            data_dir: PathBuf::from("./library"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdnxConfig {
    pub bin_path: PathBuf,

    /// Prefix invocations with `stdbuf -oL -eL` when it is installed.
    pub use_stdbuf: bool,

    /// Any of these in the download output marks a finished mux.
    pub success_markers: Vec<String>,

    pub auth_error_markers: Vec<String>,

    pub list_timeout_seconds: u64,

    /// Timeout for the per-episode track query run while building the HiDive tree.
    pub probe_timeout_seconds: u64,

    pub download_timeout_seconds: u64,
}

impl Default for MdnxConfig {
    fn default() -> Self {
        Self {
            bin_path: PathBuf::from("./mdnx/aniDL"),
            use_stdbuf: true,
            success_markers: markers::SUCCESS.iter().map(ToString::to_string).collect(),
            auth_error_markers: markers::AUTH_ERRORS
                .iter()
                .map(ToString::to_string)
                .collect(),
            list_timeout_seconds: 300,
            probe_timeout_seconds: 60,
            download_timeout_seconds: 7200,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub enabled: bool,

    pub username: String,

    pub password: String,

    /// Skip the listing used to detect stale tokens at startup.
    pub skip_api_test: bool,

    /// Series listed during the startup token check. Unset uses a well-known series.
    pub test_series_id: Option<String>,

    /// Monitored series ids mapped to their override rules.
    pub monitor: BTreeMap<String, Vec<String>>,
}

impl ServiceConfig {
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Path template relative to `general.data_dir`.
    /// Tokens: {Series Title}, {Series Id}, {Season}, {Season:02}, {Season Title},
    /// {Episode}, {Episode:02}, {Title}.
    pub naming_format: String,

    pub output_extension: String,

    pub dub_languages: Vec<String>,

    pub backup_dub_languages: Vec<String>,

    pub sub_locales: Vec<String>,

    /// Log what would be downloaded without invoking the tool.
    pub dry_run: bool,

    /// Refresh the catalog once and stop.
    pub only_create_queue: bool,

    pub check_missing_tracks: bool,

    pub probe_timeout_seconds: u64,

    pub fuzzy_matching: bool,

    /// Minimum similarity (0.0 - 1.0) for an existing path to count as the episode.
    pub fuzzy_threshold: f64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            naming_format:
                "{Series Title}/Season {Season}/{Series Title} - S{Season:02}E{Episode:02}"
                    .to_string(),
            output_extension: constants::DEFAULT_OUTPUT_EXTENSION.to_string(),
            dub_languages: vec!["jpn".to_string()],
            backup_dub_languages: vec![],
            sub_locales: vec!["en".to_string()],
            dry_run: false,
            only_create_queue: false,
            check_missing_tracks: true,
            probe_timeout_seconds: 30,
            fuzzy_matching: false,
            fuzzy_threshold: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub check_interval_seconds: u64,

    pub between_episode_seconds: u64,

    /// Log rotation runs every this many iterations.
    pub housekeeping_every: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 3600,
            between_episode_seconds: 5,
            housekeeping_every: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub ready_check_interval_ms: u64,

    /// The source must keep the same size for this long before it is moved.
    pub ready_stable_seconds: u64,

    pub ready_timeout_seconds: u64,

    pub move_retries: u32,

    pub retry_delay_seconds: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            ready_check_interval_ms: 1000,
            ready_stable_seconds: 5,
            ready_timeout_seconds: 300,
            move_retries: 3,
            retry_delay_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaServerKind {
    #[default]
    None,
    Plex,
    Jellyfin,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
    pub kind: MediaServerKind,

    pub url: String,

    pub token: String,

    /// Use `url` verbatim as the refresh endpoint.
    pub url_override: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    None,
    Ntfy,
    Script,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub kind: NotificationKind,

    /// Full topic URL, e.g. `https://ntfy.sh/my-topic`.
    pub ntfy_url: String,

    /// Executable invoked as `<script> <message>`.
    pub script_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            mdnx: MdnxConfig::default(),
            crunchyroll: ServiceConfig {
                enabled: true,
                ..ServiceConfig::default()
            },
            hidive: ServiceConfig::default(),
            downloads: DownloadConfig::default(),
            scheduler: SchedulerConfig::default(),
            transfer: TransferConfig::default(),
            media_server: MediaServerConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                let mut config = Self::load_from_path(path)?;
                config.apply_env_overrides();
                return Ok(config);
            }
        }

        info!("No config file found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(constants::APP_NAME).join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(
                home.join(format!(".{}", constants::APP_NAME))
                    .join("config.toml"),
            );
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    /// Credentials from the environment (or a `.env` file) win over the config file.
    fn apply_env_overrides(&mut self) {
        let vars = [
            ("CR_USERNAME", &mut self.crunchyroll.username),
            ("CR_PASSWORD", &mut self.crunchyroll.password),
            ("HIDIVE_USERNAME", &mut self.hidive.username),
            ("HIDIVE_PASSWORD", &mut self.hidive.password),
        ];

        for (key, slot) in vars {
            if let Ok(value) = std::env::var(key)
                && !value.is_empty()
            {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for kind in ServiceKind::ALL {
            let service = self.service(kind);
            if service.enabled && !service.has_credentials() {
                anyhow::bail!(
                    "{} is enabled but username or password is missing",
                    kind.display_name()
                );
            }
        }

        for kind in ServiceKind::ALL {
            for (series_id, rules) in &self.service(kind).monitor {
                parse_rules(rules).with_context(|| {
                    format!("Invalid override rule for {} series {series_id}", kind.display_name())
                })?;
            }
        }

        if self.scheduler.check_interval_seconds == 0 {
            anyhow::bail!("Scheduler check interval must be > 0");
        }

        if self.scheduler.housekeeping_every == 0 {
            anyhow::bail!("Housekeeping interval must be > 0");
        }

        if self.downloads.naming_format.trim().is_empty() {
            anyhow::bail!("Naming format cannot be empty");
        }

        if !(0.0..=1.0).contains(&self.downloads.fuzzy_threshold) {
            anyhow::bail!(
                "Fuzzy threshold must be between 0.0 and 1.0, got {}",
                self.downloads.fuzzy_threshold
            );
        }

        if self.media_server.kind != MediaServerKind::None && self.media_server.url.is_empty() {
            anyhow::bail!("Media server URL cannot be empty when a server kind is set");
        }

        match self.notifications.kind {
            NotificationKind::Ntfy if self.notifications.ntfy_url.is_empty() => {
                anyhow::bail!("ntfy URL cannot be empty when ntfy notifications are enabled");
            }
            NotificationKind::Script if self.notifications.script_path.is_none() => {
                anyhow::bail!("Notification script path must be set for script notifications");
            }
            _ => {}
        }

        Ok(())
    }

    #[must_use]
    pub const fn service(&self, kind: ServiceKind) -> &ServiceConfig {
        match kind {
            ServiceKind::Crunchyroll => &self.crunchyroll,
            ServiceKind::Hidive => &self.hidive,
        }
    }

    /// Enabled services in a stable order.
    #[must_use]
    pub fn enabled_services(&self) -> Vec<ServiceKind> {
        ServiceKind::ALL
            .into_iter()
            .filter(|kind| self.service(*kind).enabled)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_credentials() -> Config {
        let mut config = Config::default();
        config.crunchyroll.username = "user".to_string();
        config.crunchyroll.password = "pass".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scheduler.check_interval_seconds, 3600);
        assert_eq!(config.transfer.move_retries, 3);
        assert!(config.crunchyroll.enabled);
        assert!(!config.hidive.enabled);
        assert_eq!(config.mdnx.success_markers, vec!["[mkvmerge Done]"]);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[mdnx]"));
        assert!(toml_str.contains("[scheduler]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [hidive]
            enabled = true
            username = "a"
            password = "b"

            [hidive.monitor]
            "1234" = ["S:77:E:3-5"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!(config.hidive.enabled);
        assert_eq!(config.hidive.monitor["1234"], vec!["S:77:E:3-5"]);
        assert_eq!(config.scheduler.between_episode_seconds, 5);
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = Config::default();
        assert!(config.validate().is_err());
        assert!(with_credentials().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = with_credentials();
        config.downloads.fuzzy_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_media_server_without_url() {
        let mut config = with_credentials();
        config.media_server.kind = MediaServerKind::Plex;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_override_rule() {
        let mut config = with_credentials();
        config
            .crunchyroll
            .monitor
            .insert("G1".to_string(), vec!["S:GY1:E:9-2".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_services() {
        let mut config = with_credentials();
        assert_eq!(config.enabled_services(), vec![ServiceKind::Crunchyroll]);
        config.crunchyroll.enabled = false;
        assert!(config.enabled_services().is_empty());
    }
}
