//! Resolves a best-effort description of one device from independent probes.

use std::time::Duration;

use tracing::debug;

use crate::app::adb::client::{device_args, Adb};
use crate::app::adb::parse::{parse_battery_level, parse_property_value};
use crate::app::error::AppError;
use crate::app::models::DeviceInfoRecord;

pub const MODEL_PROPERTY: &str = "ro.product.model";
pub const VERSION_PROPERTY: &str = "ro.build.version.release";

/// Display-name candidates, most preferred first. Market names come before
/// generic name/model properties.
pub const DISPLAY_NAME_CANDIDATES: &[&str] = &[
    "ro.product.marketname",
    "ro.product.vendor.marketname",
    "ro.product.odm.marketname",
    "ro.product.system_dlkm.marketname",
    "ro.product.bootimage.marketname",
    "ro.product.display",
    "ro.product.name",
    "ro.product.device",
    MODEL_PROPERTY,
    "ro.vendor.product.model",
    "ro.system.product.model",
    "ro.system_ext.product.model",
    "ro.odm.product.model",
];

fn is_marketing_key(key: &str) -> bool {
    key.to_lowercase().contains("marketname")
}

/// First candidate wins. A value equal to the model only counts when its key
/// is a market-name property.
pub fn select_display_name<'a, I>(model: Option<&str>, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    candidates.into_iter().find_map(|(key, value)| {
        let value = value?;
        let repeats_model = model.is_some_and(|model| model == value);
        if !repeats_model || is_marketing_key(key) {
            Some(value)
        } else {
            None
        }
    })
}

pub struct DeviceInfoAggregator<'a> {
    adb: &'a Adb,
    probe_timeout: Duration,
}

impl<'a> DeviceInfoAggregator<'a> {
    pub fn new(adb: &'a Adb, probe_timeout: Duration) -> Self {
        Self { adb, probe_timeout }
    }

    fn get_property(&self, serial: &str, key: &str, trace_id: &str) -> Option<String> {
        let args = device_args(serial, &["shell", "getprop", key]);
        match self.adb.run(&args, self.probe_timeout, trace_id) {
            Ok(output) if output.succeeded() => parse_property_value(&output.stdout),
            _ => None,
        }
    }

    fn battery_level(&self, serial: &str, trace_id: &str) -> Option<String> {
        let args = device_args(serial, &["shell", "dumpsys", "battery"]);
        match self.adb.run(&args, self.probe_timeout, trace_id) {
            Ok(output) if output.succeeded() => parse_battery_level(&output.stdout),
            _ => None,
        }
    }

    /// Returns `Ok(None)` only when both the model and the version probe failed.
    pub fn fetch(&self, serial: &str, trace_id: &str) -> Result<Option<DeviceInfoRecord>, AppError> {
        let notifier = self.adb.notifier();
        if serial.trim().is_empty() {
            let message = "Error: No device selected to get info.";
            notifier.error(message);
            return Err(AppError::validation(message, trace_id));
        }
        self.adb.ensure_available(trace_id)?;
        notifier.info(format!("Fetching info for device {serial}..."));

        let model = self.get_property(serial, MODEL_PROPERTY, trace_id);
        let android_version = self.get_property(serial, VERSION_PROPERTY, trace_id);
        let battery_level = self.battery_level(serial, trace_id);

        let candidates = DISPLAY_NAME_CANDIDATES
            .iter()
            .filter(|key| **key != MODEL_PROPERTY && **key != VERSION_PROPERTY)
            .map(|key| (*key, self.get_property(serial, key, trace_id)));
        let chosen = select_display_name(model.as_deref(), candidates);
        debug!(trace_id = %trace_id, serial = %serial, chosen = ?chosen, model = ?model, "display name resolved");

        if model.is_none() && android_version.is_none() {
            notifier.error(format!(
                "Failed to fetch essential model/version info for device {serial}."
            ));
            return Ok(None);
        }

        let display_name = chosen
            .or_else(|| model.clone())
            .unwrap_or_else(|| serial.to_string());
        notifier.info(format!("Info fetch complete for {serial}."));
        Ok(Some(DeviceInfoRecord {
            serial: serial.to_string(),
            model,
            android_version,
            display_name,
            battery_level,
        }))
    }
}
