use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{DeviceListing, DeviceRecord, DeviceState, ParseWarning};

const DEVICES_HEADER: &str = "List of devices attached";

/// Parses `adb devices -l`.
///
/// Each data line is split into at most three fields; the third keeps its inner
/// spaces. Lines with a single token are reported and dropped.
pub fn parse_adb_devices(output: &str) -> DeviceListing {
    let mut listing = DeviceListing::default();
    for raw in output.lines() {
        let line = raw.trim();
        if line.is_empty() || line.contains(DEVICES_HEADER) {
            continue;
        }
        // adb prints "* daemon not running; starting now ..." before the header on cold start.
        if line.starts_with('*') {
            continue;
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let serial = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim_start();
        let mut rest_parts = rest.splitn(2, char::is_whitespace);
        let state = rest_parts.next().unwrap_or_default();
        if serial.is_empty() || state.is_empty() {
            listing.warnings.push(ParseWarning {
                line: line.to_string(),
                reason: "expected at least a serial and a state".to_string(),
            });
            continue;
        }
        let description = rest_parts.next().unwrap_or_default().trim().to_string();
        listing.devices.push(DeviceRecord {
            serial: serial.to_string(),
            state: DeviceState::parse(state),
            description,
        });
    }
    listing
}

/// Cleans a single `getprop` value. `None` means the property is not set.
pub fn parse_property_value(output: &str) -> Option<String> {
    let value = output
        .trim()
        .trim_matches(|c: char| c == '\'' || c == '"' || c == '\r');
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn battery_level_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^level:\s*(\d+)").ok()).as_ref()
}

/// Finds `level: <n>` in `dumpsys battery` output and formats it as `<n>%`.
pub fn parse_battery_level(output: &str) -> Option<String> {
    let re = battery_level_re()?;
    output
        .lines()
        .map(str::trim)
        .find_map(|line| re.captures(line))
        .map(|caps| format!("{}%", &caps[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_adb_devices_output() {
        let output = "List of devices attached\nemulator-5554\tdevice\tproduct:sdk model:sdk device:generic\n";
        let listing = parse_adb_devices(output);
        assert_eq!(
            listing.devices,
            vec![DeviceRecord {
                serial: "emulator-5554".to_string(),
                state: DeviceState::Device,
                description: "product:sdk model:sdk device:generic".to_string(),
            }]
        );
        assert!(listing.warnings.is_empty());
    }

    #[test]
    fn keeps_one_record_per_data_line() {
        let output = "List of devices attached\n0123456789ABCDEF device product:p model:Pixel_7 device:d transport_id:1\nemulator-5554 unauthorized transport_id:2\n192.168.1.5:5555\toffline\n\n";
        let listing = parse_adb_devices(output);
        assert_eq!(listing.devices.len(), 3);
        assert!(listing.devices.iter().all(|d| !d.serial.is_empty()));
        assert_eq!(listing.devices[1].state, DeviceState::Unauthorized);
        assert_eq!(listing.devices[2].state, DeviceState::Offline);
        assert_eq!(listing.devices[2].description, "");
    }

    #[test]
    fn reports_single_token_lines() {
        let listing = parse_adb_devices("List of devices attached\nlonely\nabc device\n");
        assert_eq!(listing.devices.len(), 1);
        assert_eq!(listing.warnings.len(), 1);
        assert_eq!(listing.warnings[0].line, "lonely");
    }

    #[test]
    fn parsing_is_repeatable() {
        let output = "List of devices attached\nA device usb:1\nB offline\n";
        assert_eq!(parse_adb_devices(output), parse_adb_devices(output));
    }

    #[test]
    fn header_only_output_is_empty() {
        let listing = parse_adb_devices("List of devices attached\n\n");
        assert!(listing.devices.is_empty());
        assert!(listing.warnings.is_empty());
    }

    #[test]
    fn cleans_property_values() {
        assert_eq!(parse_property_value("SM-G960F\r\n").as_deref(), Some("SM-G960F"));
        assert_eq!(parse_property_value("'Galaxy S9'\n").as_deref(), Some("Galaxy S9"));
        assert_eq!(parse_property_value("\"\"\r\n"), None);
        assert_eq!(parse_property_value("\n"), None);
    }

    #[test]
    fn parses_battery_level() {
        let output = "Current Battery Service state:\n  AC powered: false\n  level: 87\n  scale: 100\n";
        assert_eq!(parse_battery_level(output).as_deref(), Some("87%"));
        assert_eq!(parse_battery_level("  status: 2\n"), None);
    }
}
