use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Placeholder rendered for a field whose probe did not produce a value.
pub const UNAVAILABLE: &str = "N/A";

/// Placeholder for package dump fields missing from the output.
pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Device,
    Offline,
    Unauthorized,
    Unknown,
}

impl DeviceState {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "device" => Self::Device,
            "offline" => Self::Offline,
            "unauthorized" => Self::Unauthorized,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Offline => "offline",
            Self::Unauthorized => "unauthorized",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRecord {
    pub serial: String,
    pub state: DeviceState,
    pub description: String,
}

/// A line the parser could not make sense of. Reported, never fatal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParseWarning {
    pub line: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceListing {
    pub devices: Vec<DeviceRecord>,
    pub warnings: Vec<ParseWarning>,
}

/// Best-effort device description. `None` fields failed their probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfoRecord {
    pub serial: String,
    pub model: Option<String>,
    pub android_version: Option<String>,
    /// Chosen candidate, else the model, else the serial.
    pub display_name: String,
    /// Formatted as a percentage, e.g. `87%`.
    pub battery_level: Option<String>,
}

impl DeviceInfoRecord {
    pub fn model_or_unavailable(&self) -> &str {
        self.model.as_deref().unwrap_or(UNAVAILABLE)
    }

    pub fn android_version_or_unavailable(&self) -> &str {
        self.android_version.as_deref().unwrap_or(UNAVAILABLE)
    }

    pub fn battery_or_unavailable(&self) -> &str {
        self.battery_level.as_deref().unwrap_or(UNAVAILABLE)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageDetail {
    pub package_name: String,
    pub version_name: String,
    pub version_code: String,
    pub installer: String,
    pub first_install_time: String,
    pub last_update_time: String,
    pub uid: String,
    pub permissions: Vec<String>,
}

impl PackageDetail {
    pub fn unknown(package_name: &str) -> Self {
        Self {
            package_name: package_name.to_string(),
            version_name: UNKNOWN.to_string(),
            version_code: UNKNOWN.to_string(),
            installer: UNKNOWN.to_string(),
            first_install_time: UNKNOWN.to_string(),
            last_update_time: UNKNOWN.to_string(),
            uid: UNKNOWN.to_string(),
            permissions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BatchOutcome {
    Success,
    Disabled,
    Failed,
}

impl BatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchEntry {
    pub package_name: String,
    pub outcome: BatchOutcome,
}

/// Per-target outcomes of a batch, in processing order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchResult {
    entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub(crate) fn push(&mut self, package_name: &str, outcome: BatchOutcome) -> &BatchEntry {
        self.entries.push(BatchEntry {
            package_name: package_name.to_string(),
            outcome,
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn outcome(&self, package_name: &str) -> Option<BatchOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.package_name == package_name)
            .map(|entry| entry.outcome)
    }

    pub fn to_map(&self) -> HashMap<String, BatchOutcome> {
        self.entries
            .iter()
            .map(|entry| (entry.package_name.clone(), entry.outcome))
            .collect()
    }

    pub fn count(&self, outcome: BatchOutcome) -> usize {
        self.entries.iter().filter(|entry| entry.outcome == outcome).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RebootMode {
    Normal,
    Recovery,
    Bootloader,
    Sideload,
    SideloadAutoReboot,
}

impl RebootMode {
    pub const ALL: [RebootMode; 5] = [
        Self::Normal,
        Self::Recovery,
        Self::Bootloader,
        Self::Sideload,
        Self::SideloadAutoReboot,
    ];

    /// Argument appended after `reboot`; `None` for a normal reboot.
    pub fn as_arg(self) -> Option<&'static str> {
        match self {
            Self::Normal => None,
            Self::Recovery => Some("recovery"),
            Self::Bootloader => Some("bootloader"),
            Self::Sideload => Some("sideload"),
            Self::SideloadAutoReboot => Some("sideload-auto-reboot"),
        }
    }

    pub fn label(self) -> &'static str {
        self.as_arg().unwrap_or("normal")
    }
}

impl FromStr for RebootMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "normal" => Ok(Self::Normal),
            "recovery" => Ok(Self::Recovery),
            "bootloader" => Ok(Self::Bootloader),
            "sideload" => Ok(Self::Sideload),
            "sideload-auto-reboot" => Ok(Self::SideloadAutoReboot),
            other => Err(format!(
                "Invalid reboot mode '{other}'. Valid modes are: {}.",
                Self::ALL
                    .iter()
                    .map(|mode| mode.label())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectStatus {
    Connected,
    AlreadyConnected,
    /// Zero exit code but output matched no known marker.
    Unrecognized,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InstallStatus {
    Confirmed,
    /// Zero exit code with neither marker present.
    Assumed,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisableStatus {
    Confirmed,
    Unconfirmed,
}

/// Returned once a reboot or power-off was sent. The device drops off the bus,
/// so callers re-list devices after `verify_after`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PowerReceipt {
    pub serial: String,
    pub action: String,
    #[serde(with = "duration_ms")]
    pub verify_after: Duration,
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
