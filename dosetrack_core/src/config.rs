//! Configuration file support for dosetrack.
//!
//! Settings are loaded from `$XDG_CONFIG_HOME/dosetrack/settings.toml`.
//! Keys keep the capitalised names users already know (`MaxLogsPerUser`,
//! `UseSource`, ...).

use crate::store::{DbDriver, NetworkedDsn};
use crate::{Error, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "MaxLogsPerUser", default = "default_max_logs")]
    pub max_logs_per_user: i32,

    #[serde(rename = "UseSource", default = "default_source")]
    pub use_source: String,

    #[serde(rename = "AutoFetch", default = "default_true")]
    pub auto_fetch: bool,

    #[serde(rename = "AutoRemove", default)]
    pub auto_remove: bool,

    #[serde(rename = "DBDriver", default)]
    pub db_driver: DbDriver,

    #[serde(rename = "DBPath", default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(rename = "DBConnection", default)]
    pub db_connection: String,

    #[serde(rename = "VerbosePrinting", default)]
    pub verbose_printing: bool,

    #[serde(rename = "Timezone", default = "default_timezone")]
    pub timezone: String,

    #[serde(rename = "ProxyURL", default)]
    pub proxy_url: String,

    #[serde(rename = "Timeout", default = "default_timeout")]
    pub timeout: String,

    #[serde(rename = "CostCurrency", default)]
    pub cost_currency: String,

    #[serde(rename = "NamesDir", default = "default_names_dir")]
    pub names_dir: PathBuf,

    #[serde(rename = "InfoCacheDir", default = "default_info_cache_dir")]
    pub info_cache_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_logs_per_user: default_max_logs(),
            use_source: default_source(),
            auto_fetch: default_true(),
            auto_remove: false,
            db_driver: DbDriver::default(),
            db_path: default_db_path(),
            db_connection: String::new(),
            verbose_printing: false,
            timezone: default_timezone(),
            proxy_url: String::new(),
            timeout: default_timeout(),
            cost_currency: String::new(),
            names_dir: default_names_dir(),
            info_cache_dir: default_info_cache_dir(),
        }
    }
}

// Default value functions
fn data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("dosetrack")
}

fn config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("dosetrack")
}

fn default_max_logs() -> i32 {
    100
}

fn default_source() -> String {
    "psychonautwiki".into()
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    data_dir().join("dosetrack.sqlite")
}

fn default_timezone() -> String {
    "Local".into()
}

fn default_timeout() -> String {
    "5s".into()
}

fn default_names_dir() -> PathBuf {
    config_dir().join("names")
}

fn default_info_cache_dir() -> PathBuf {
    data_dir().join("info_cache")
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No settings file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded settings from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        config_dir().join("settings.toml")
    }

    /// Save the current configuration to a specific path
    ///
    /// Writes a sibling temp file and renames it over the target.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        let mut temp = NamedTempFile::new_in(parent)?;
        std::io::Write::write_all(&mut temp, contents.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Check every option that has a constrained format
    pub fn validate(&self) -> Result<()> {
        if self.max_logs_per_user <= 0 {
            return Err(Error::Config(format!(
                "MaxLogsPerUser must be positive, got {}",
                self.max_logs_per_user
            )));
        }
        if !crate::store::is_valid_identifier(&self.use_source) {
            return Err(Error::Config(format!(
                "UseSource {:?} must be alphanumeric or underscores",
                self.use_source
            )));
        }
        self.timeout_duration()?;
        self.timezone_offset()?;
        if self.db_driver == DbDriver::Mysql {
            self.networked_dsn()?;
        }
        Ok(())
    }

    pub fn timeout_duration(&self) -> Result<Duration> {
        parse_duration(&self.timeout)
    }

    /// Fixed offset for display; `None` means the local zone
    pub fn timezone_offset(&self) -> Result<Option<FixedOffset>> {
        parse_timezone(&self.timezone)
    }

    pub fn networked_dsn(&self) -> Result<NetworkedDsn> {
        self.db_connection.parse()
    }
}

/// Parse a duration such as `500ms`, `5s`, `2m` or `1h`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| Error::Config(format!("Invalid Timeout {:?}", input)))?;
    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "s" | "" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => {
            return Err(Error::Config(format!(
                "Invalid Timeout unit {:?} in {:?}",
                other, input
            )))
        }
    };
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::Config(format!("Timeout must be positive, got {:?}", input)));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|_| Error::Config(format!("Timeout {:?} is too large", input)))
}

/// Parse `Local`, `UTC` or an offset such as `+02:00`
pub fn parse_timezone(input: &str) -> Result<Option<FixedOffset>> {
    let s = input.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("local") {
        return Ok(None);
    }
    if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") {
        return Ok(FixedOffset::east_opt(0));
    }
    let invalid = || Error::Config(format!("Invalid Timezone {:?}", input));
    let (sign, rest) = match s.as_bytes()[0] {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .map(Some)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_logs_per_user, 100);
        assert_eq!(config.use_source, "psychonautwiki");
        assert_eq!(config.db_driver, DbDriver::Sqlite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.toml");
        let mut config = Config::default();
        config.cost_currency = "EUR".into();
        config.save_to(&path).unwrap();

        let parsed = Config::load_from(&path).unwrap();
        assert_eq!(parsed.cost_currency, "EUR");
        assert_eq!(parsed.max_logs_per_user, config.max_logs_per_user);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
MaxLogsPerUser = 3
AutoRemove = true
CostCurrency = "USD"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_logs_per_user, 3);
        assert!(config.auto_remove);
        assert!(config.auto_fetch); // default
        assert_eq!(config.timeout, "5s");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.max_logs_per_user = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.use_source = "drop table;".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.db_driver = DbDriver::Mysql;
        config.db_connection = "nonsense".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timeout = "99999999999999999999s".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
        assert!(parse_duration("9999999999999999999s").is_ok());
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("Local").unwrap(), None);
        assert_eq!(parse_timezone("UTC").unwrap(), FixedOffset::east_opt(0));
        assert_eq!(
            parse_timezone("+02:00").unwrap(),
            FixedOffset::east_opt(7200)
        );
        assert_eq!(
            parse_timezone("-05:30").unwrap(),
            FixedOffset::east_opt(-(5 * 3600 + 1800))
        );
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
