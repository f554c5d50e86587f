use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AdbSettings {
    /// Empty means `adb` resolved from `PATH`.
    pub command_path: String,
}

/// Per-command timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutSettings {
    pub availability: u64,
    pub probe: u64,
    pub list_devices: u64,
    pub connect: u64,
    pub reboot: u64,
    pub package_list: u64,
    pub uninstall: u64,
    pub disable: u64,
    pub package_detail: u64,
    pub install: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            availability: 5,
            probe: 5,
            list_devices: 20,
            connect: 15,
            reboot: 10,
            package_list: 60,
            uninstall: 60,
            disable: 30,
            package_detail: 30,
            install: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PackageSettings {
    pub user_id: String,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            user_id: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationSettings {
    pub reboot_delay_ms: u64,
    pub power_off_delay_ms: u64,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            reboot_delay_ms: 5000,
            power_off_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogcatSettings {
    pub format: String,
    pub stop_grace_ms: u64,
    pub max_buffer_lines: usize,
}

impl Default for LogcatSettings {
    fn default() -> Self {
        Self {
            format: "time".to_string(),
            stop_grace_ms: 2000,
            max_buffer_lines: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub log_level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default)]
    pub packages: PackageSettings,
    #[serde(default)]
    pub verification: VerificationSettings,
    #[serde(default)]
    pub logcat: LogcatSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

const LOGCAT_FORMATS: &[&str] = &[
    "brief", "long", "process", "raw", "tag", "thread", "threadtime", "time",
];

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ADB_GRIPPER_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".adb_gripper_config.json")
}

pub fn backup_config_path(path: &Path) -> PathBuf {
    path.with_extension("backup.json")
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    let path = config_path();
    save_config_to_path(config, &path, &backup_config_path(&path))
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

/// Strips whitespace and one layer of wrapping quotes from a configured program path.
pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn resolve_adb_program(config: &AppConfig) -> String {
    let normalized = normalize_command_path(&config.adb.command_path);
    if normalized.is_empty() {
        "adb".to_string()
    } else {
        normalized
    }
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = TimeoutSettings::default();
    let timeouts = &mut config.timeouts;
    for (value, fallback) in [
        (&mut timeouts.availability, defaults.availability),
        (&mut timeouts.probe, defaults.probe),
        (&mut timeouts.list_devices, defaults.list_devices),
        (&mut timeouts.connect, defaults.connect),
        (&mut timeouts.reboot, defaults.reboot),
        (&mut timeouts.package_list, defaults.package_list),
        (&mut timeouts.uninstall, defaults.uninstall),
        (&mut timeouts.disable, defaults.disable),
        (&mut timeouts.package_detail, defaults.package_detail),
        (&mut timeouts.install, defaults.install),
    ] {
        if *value == 0 {
            *value = fallback;
        }
    }
    if config.packages.user_id.trim().is_empty()
        || !config.packages.user_id.trim().chars().all(|c| c.is_ascii_digit())
    {
        config.packages.user_id = PackageSettings::default().user_id;
    }
    if !LOGCAT_FORMATS.contains(&config.logcat.format.as_str()) {
        config.logcat.format = LogcatSettings::default().format;
    }
    if config.logcat.max_buffer_lines == 0 {
        config.logcat.max_buffer_lines = LogcatSettings::default().max_buffer_lines;
    }
    if config.logging.log_level.trim().is_empty() {
        config.logging.log_level = LoggingSettings::default().log_level;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().expect("tmp");
        let config = load_config_from_path(&tmp.path().join("absent.json")).expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.timeouts.install, 300);
        assert_eq!(config.packages.user_id, "0");
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"timeouts": {"probe": 9}, "adb": {"command_path": "/opt/adb"}}"#)
            .expect("write");
        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.timeouts.probe, 9);
        assert_eq!(config.timeouts.list_devices, 20);
        assert_eq!(config.adb.command_path, "/opt/adb");
        assert_eq!(config.logcat.format, "time");
    }

    #[test]
    fn unparseable_file_is_a_system_error() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        fs::write(&path, "{not json").expect("write");
        let err = load_config_from_path(&path).expect_err("parse error");
        assert_eq!(err.code, "ERR_SYSTEM");
    }

    #[test]
    fn clamps_invalid_values() {
        let mut config = AppConfig::default();
        config.timeouts.probe = 0;
        config.packages.user_id = "owner".to_string();
        config.logcat.format = "fancy".to_string();
        config.logcat.max_buffer_lines = 0;
        let validated = validate_config(config);
        assert_eq!(validated.timeouts.probe, 5);
        assert_eq!(validated.packages.user_id, "0");
        assert_eq!(validated.logcat.format, "time");
        assert_eq!(validated.logcat.max_buffer_lines, 50_000);
    }

    #[test]
    fn save_keeps_backup_of_previous_file() {
        let tmp = TempDir::new().expect("tmp");
        let path = tmp.path().join("config.json");
        let backup = backup_config_path(&path);
        save_config_to_path(&AppConfig::default(), &path, &backup).expect("first save");
        let mut changed = AppConfig::default();
        changed.packages.user_id = "10".to_string();
        save_config_to_path(&changed, &path, &backup).expect("second save");

        assert_eq!(load_config_from_path(&path).expect("load").packages.user_id, "10");
        assert_eq!(load_config_from_path(&backup).expect("backup").packages.user_id, "0");
    }

    #[test]
    fn resolves_program_from_quoted_path() {
        let mut config = AppConfig::default();
        assert_eq!(resolve_adb_program(&config), "adb");
        config.adb.command_path = "  \"/opt/platform-tools/adb\"  ".to_string();
        assert_eq!(resolve_adb_program(&config), "/opt/platform-tools/adb");
        config.adb.command_path = "'/opt/adb'".to_string();
        assert_eq!(resolve_adb_program(&config), "/opt/adb");
    }
}
