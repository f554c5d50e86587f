use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::apk::{extract_split_apks, is_split_bundle, normalize_apk_path, SplitApkBundle};
use crate::app::adb::apps::{is_empty_detail, parse_package_detail, parse_pm_list_packages_output};
use crate::app::adb::client::{device_args, Adb};
use crate::app::adb::parse::parse_adb_devices;
use crate::app::adb::runner::SystemRunner;
use crate::app::config::{resolve_adb_program, AppConfig};
use crate::app::device_info::DeviceInfoAggregator;
use crate::app::error::AppError;
use crate::app::logcat::{spawn_logcat, LogcatEmitter, LogcatSession};
use crate::app::models::{
    BatchEntry, BatchOutcome, BatchResult, ConnectStatus, DeviceInfoRecord, DeviceRecord,
    DisableStatus, InstallStatus, PackageDetail, PowerReceipt, RebootMode,
};
use crate::app::notify::Notifier;


pub fn new_trace_id() -> String {
    Uuid::new_v4().to_string()
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectVerdict {
    Connected,
    AlreadyConnected,
    Refused,
    Failed,
    Unrecognized,
}

/// Classifies `adb connect` stdout from a zero-exit run.
pub fn classify_connect_output(stdout: &str) -> ConnectVerdict {
    let lower = stdout.to_lowercase();
    if lower.contains("already connected") {
        ConnectVerdict::AlreadyConnected
    } else if lower.contains("connected to") {
        ConnectVerdict::Connected
    } else if lower.contains("connection refused") {
        ConnectVerdict::Refused
    } else if lower.contains("unable to connect") || lower.contains("failed to connect") {
        ConnectVerdict::Failed
    } else {
        ConnectVerdict::Unrecognized
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallVerdict {
    Success,
    Failure(String),
    NoMarker,
}

/// `Success` wins over `Failure`; with neither marker the exit code is authoritative.
pub fn classify_install_output(stdout: &str) -> InstallVerdict {
    if stdout.contains("Success") {
        return InstallVerdict::Success;
    }
    match stdout.lines().find(|line| line.contains("Failure")) {
        Some(line) => InstallVerdict::Failure(line.trim().to_string()),
        None => InstallVerdict::NoMarker,
    }
}

/// Sequences adb invocations for one user action at a time.
///
/// All methods block. Nothing here stops two callers from driving the same
/// device at once; that is up to whoever dispatches the work.
pub struct DeviceController {
    adb: Adb,
    config: AppConfig,
}

impl DeviceController {
    pub fn new(adb: Adb, config: AppConfig) -> Self {
        Self { adb, config }
    }

    /// Probes the configured program once and wires up the real process runner.
    pub fn with_system_runner(config: AppConfig, notifier: Notifier) -> Self {
        let trace_id = new_trace_id();
        let adb = Adb::probe(
            resolve_adb_program(&config),
            Arc::new(SystemRunner),
            notifier,
            secs(config.timeouts.availability),
            &trace_id,
        );
        Self::new(adb, config)
    }

    pub fn adb(&self) -> &Adb {
        &self.adb
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn notifier(&self) -> &Notifier {
        self.adb.notifier()
    }

    fn require(&self, value: &str, message: &str, trace_id: &str) -> Result<(), AppError> {
        if value.trim().is_empty() {
            self.notifier().error(message);
            return Err(AppError::validation(message, trace_id));
        }
        Ok(())
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceRecord>, AppError> {
        let trace_id = new_trace_id();
        self.adb.ensure_available(&trace_id)?;
        self.notifier().info("Searching for devices...");

        let args = vec!["devices".to_string(), "-l".to_string()];
        let output = self
            .adb
            .run_checked(&args, secs(self.config.timeouts.list_devices), &trace_id)?;
        let listing = parse_adb_devices(&output.stdout);
        for warning in &listing.warnings {
            self.notifier().warning(format!(
                "Warning: Could not fully parse device line: '{}'",
                warning.line
            ));
        }
        if listing.devices.is_empty() {
            self.notifier().info("No devices found.");
        } else {
            self.notifier()
                .info(format!("Found {} device(s).", listing.devices.len()));
        }
        info!(trace_id = %trace_id, count = listing.devices.len(), "devices listed");
        Ok(listing.devices)
    }

    pub fn connect(&self, address: &str) -> Result<ConnectStatus, AppError> {
        let trace_id = new_trace_id();
        self.require(address, "Error: IP address is empty for connection.", &trace_id)?;
        let address = address.trim();
        self.notifier()
            .info(format!("Attempting to connect to {address}..."));

        let args = vec!["connect".to_string(), address.to_string()];
        let output = self
            .adb
            .run_checked(&args, secs(self.config.timeouts.connect), &trace_id)?;
        let stdout = output.stdout.trim();
        match classify_connect_output(stdout) {
            ConnectVerdict::Connected => {
                self.notifier().info(format!("Connected to {address}."));
                Ok(ConnectStatus::Connected)
            }
            ConnectVerdict::AlreadyConnected => {
                self.notifier().info(format!("Already connected to {address}."));
                Ok(ConnectStatus::AlreadyConnected)
            }
            ConnectVerdict::Refused => {
                let message = format!(
                    "Connection failed for {address}: Connection refused. Is ADB over TCP enabled on the device?"
                );
                self.notifier().error(&message);
                Err(AppError::connection_refused(message, &trace_id))
            }
            ConnectVerdict::Failed => {
                let message = format!("Connection failed for {address}: {stdout}");
                self.notifier().error(&message);
                Err(AppError::command_failed(message, &trace_id))
            }
            ConnectVerdict::Unrecognized => {
                self.notifier().warning(format!(
                    "Connect command successful for {address}, but output was unexpected: {stdout}"
                ));
                Ok(ConnectStatus::Unrecognized)
            }
        }
    }

    /// `Ok(None)` when neither the model nor the Android version could be read.
    pub fn device_info(&self, serial: &str) -> Result<Option<DeviceInfoRecord>, AppError> {
        let trace_id = new_trace_id();
        DeviceInfoAggregator::new(&self.adb, secs(self.config.timeouts.probe))
            .fetch(serial, &trace_id)
    }

    /// Validates `mode` before anything is spawned.
    pub fn reboot(&self, serial: &str, mode: &str) -> Result<PowerReceipt, AppError> {
        let trace_id = new_trace_id();
        self.require(serial, "Error: No device selected to reboot.", &trace_id)?;
        let mode = mode.trim().parse::<RebootMode>().map_err(|message| {
            self.notifier().error(format!("Error: {message}"));
            AppError::validation(message, &trace_id)
        })?;
        self.reboot_into(serial, mode, &trace_id)
    }

    fn reboot_into(
        &self,
        serial: &str,
        mode: RebootMode,
        trace_id: &str,
    ) -> Result<PowerReceipt, AppError> {
        let mut rest = vec!["reboot"];
        match mode.as_arg() {
            Some(arg) => {
                rest.push(arg);
                self.notifier().info(format!(
                    "Sending command: Rebooting device {serial} to {arg}..."
                ));
            }
            None => self.notifier().info(format!(
                "Sending command: Rebooting device {serial} normally..."
            )),
        }
        self.send_power_command(
            serial,
            &device_args(serial, &rest),
            "Reboot",
            self.config.verification.reboot_delay_ms,
            trace_id,
        )
    }

    pub fn power_off(&self, serial: &str) -> Result<PowerReceipt, AppError> {
        let trace_id = new_trace_id();
        self.require(serial, "Error: No device selected to power off.", &trace_id)?;
        self.notifier()
            .info(format!("Sending command: Powering off device {serial}..."));
        self.send_power_command(
            serial,
            &device_args(serial, &["shell", "reboot", "-p"]),
            "Power off",
            self.config.verification.power_off_delay_ms,
            &trace_id,
        )
    }

    /// The device usually drops off immediately, so a clean exit with empty
    /// stderr is the only success signal available at send time.
    fn send_power_command(
        &self,
        serial: &str,
        args: &[String],
        action: &str,
        verify_delay_ms: u64,
        trace_id: &str,
    ) -> Result<PowerReceipt, AppError> {
        let output = self
            .adb
            .run(args, secs(self.config.timeouts.reboot), trace_id)?;
        if !output.succeeded() {
            return Err(AppError::exit_status(
                format!("{action} command failed for {serial}"),
                trace_id,
            ));
        }
        if !output.stderr.trim().is_empty() {
            return Err(AppError::command_failed(
                format!("{action} command for {serial} wrote to stderr: {}", output.stderr.trim()),
                trace_id,
            ));
        }
        self.notifier()
            .info(format!("{action} command sent successfully to {serial}."));
        Ok(PowerReceipt {
            serial: serial.to_string(),
            action: action.to_lowercase(),
            verify_after: Duration::from_millis(verify_delay_ms),
        })
    }

    pub fn install_apk(&self, serial: &str, path: &str) -> Result<InstallStatus, AppError> {
        let trace_id = new_trace_id();
        self.require(serial, "Error: No device selected to install to.", &trace_id)?;
        let apk_path = normalize_apk_path(path.trim());
        if path.trim().is_empty() || !apk_path.is_file() {
            let message = format!(
                "No valid APK file selected or file not found: {}",
                apk_path.display()
            );
            self.notifier().error(&message);
            return Err(AppError::validation(message, &trace_id));
        }
        self.adb.ensure_available(&trace_id)?;

        let file_name = file_label(&apk_path);
        self.notifier()
            .info(format!("Starting installation of {file_name}..."));

        // Extracted splits must outlive the install command.
        let mut _bundle: Option<SplitApkBundle> = None;
        let args = if is_split_bundle(&apk_path) {
            let bundle = extract_split_apks(&apk_path).map_err(|message| {
                self.notifier()
                    .error(format!("Could not read bundle {file_name}: {message}"));
                AppError::validation(message, &trace_id)
            })?;
            let mut args = device_args(serial, &["install-multiple", "-r"]);
            args.extend(bundle.apk_paths.iter().cloned());
            _bundle = Some(bundle);
            args
        } else {
            let apk = apk_path.to_string_lossy().to_string();
            device_args(serial, &["install", "-r", apk.as_str()])
        };

        let output = self
            .adb
            .run_checked(&args, secs(self.config.timeouts.install), &trace_id)?;
        match classify_install_output(&output.stdout) {
            InstallVerdict::Success => {
                self.notifier()
                    .info(format!("Successfully installed {file_name}."));
                Ok(InstallStatus::Confirmed)
            }
            InstallVerdict::Failure(detail) => {
                let message = format!("Installation of {file_name} reported failure: {detail}");
                self.notifier().error(&message);
                Err(AppError::command_failed(message, &trace_id))
            }
            InstallVerdict::NoMarker => {
                warn!(trace_id = %trace_id, stdout = %output.stdout.trim(), "install output had no marker");
                self.notifier().warning(format!(
                    "Install of {file_name} exited cleanly without a Success marker; assuming it worked."
                ));
                Ok(InstallStatus::Assumed)
            }
        }
    }

    pub fn list_packages(&self, serial: &str, user_only: bool) -> Result<Vec<String>, AppError> {
        let trace_id = new_trace_id();
        self.require(serial, "Error: No device selected to list packages.", &trace_id)?;
        let user_id = self.config.packages.user_id.as_str();
        self.notifier().info(format!(
            "Listing packages for device {serial} (User {user_id}, {})...",
            if user_only { "User apps only" } else { "All apps" }
        ));

        let mut rest = vec!["shell", "pm", "list", "packages", "--user", user_id];
        if user_only {
            rest.push("-3");
        }
        let output = self.adb.run_checked(
            &device_args(serial, &rest),
            secs(self.config.timeouts.package_list),
            &trace_id,
        )?;
        let packages = parse_pm_list_packages_output(&output.stdout);
        if packages.is_empty() {
            self.notifier()
                .info("No packages found with the current filter.");
        } else {
            self.notifier()
                .info(format!("Found {} packages.", packages.len()));
        }
        Ok(packages)
    }

    pub fn uninstall(&self, serial: &str, package_name: &str, user_id: &str) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        let message = "Error: Device and package must be specified for uninstall.";
        self.require(serial, message, &trace_id)?;
        self.require(package_name, message, &trace_id)?;
        self.notifier().info(format!(
            "Sending command: Uninstalling {package_name} from {serial} (User {user_id})..."
        ));

        let args = device_args(serial, &["uninstall", "--user", user_id, package_name]);
        let output = self
            .adb
            .run_checked(&args, secs(self.config.timeouts.uninstall), &trace_id)?;
        let stdout = output.stdout.trim();
        let lower = stdout.to_lowercase();
        if lower.contains("success") {
            self.notifier()
                .info(format!("Successfully uninstalled {package_name}."));
            return Ok(());
        }
        let message = if lower.contains("failure") {
            format!("Uninstall command reported failure for {package_name}: {stdout}")
        } else {
            format!("Uninstall of {package_name} did not report success: {stdout}")
        };
        self.notifier().error(&message);
        Err(AppError::command_failed(message, &trace_id))
    }

    pub fn disable(
        &self,
        serial: &str,
        package_name: &str,
        user_id: &str,
    ) -> Result<DisableStatus, AppError> {
        let trace_id = new_trace_id();
        let message = "Error: Device and package must be specified for disabling.";
        self.require(serial, message, &trace_id)?;
        self.require(package_name, message, &trace_id)?;
        self.notifier().info(format!(
            "Sending command: Disabling {package_name} for {serial} (User {user_id})..."
        ));

        let args = device_args(
            serial,
            &["shell", "pm", "disable-user", "--user", user_id, package_name],
        );
        let output = self
            .adb
            .run_checked(&args, secs(self.config.timeouts.disable), &trace_id)?;
        let stdout = output.stdout.trim();
        let confirmation = format!("package {} new state: disabled", package_name.to_lowercase());
        if stdout.to_lowercase().contains(&confirmation) {
            self.notifier()
                .info(format!("Successfully disabled {package_name}."));
            Ok(DisableStatus::Confirmed)
        } else if !stdout.is_empty() {
            self.notifier().warning(format!(
                "Disable command sent for {package_name}, but output was unexpected: {stdout}"
            ));
            Ok(DisableStatus::Unconfirmed)
        } else {
            let message = format!("Disable command sent for {package_name} but received no output.");
            self.notifier().error(&message);
            Err(AppError::command_failed(message, &trace_id))
        }
    }

    pub fn package_detail(&self, serial: &str, package_name: &str) -> Result<PackageDetail, AppError> {
        let trace_id = new_trace_id();
        let message = "Error: Device and package must be specified for package details.";
        self.require(serial, message, &trace_id)?;
        self.require(package_name, message, &trace_id)?;
        self.notifier()
            .info(format!("Fetching details for {package_name}..."));

        let args = device_args(serial, &["shell", "dumpsys", "package", package_name]);
        let output = self
            .adb
            .run_checked(&args, secs(self.config.timeouts.package_detail), &trace_id)?;
        let detail = parse_package_detail(package_name, &output.stdout);
        if is_empty_detail(&detail) {
            self.notifier()
                .warning(format!("No package details found for {package_name}."));
        } else {
            self.notifier()
                .info(format!("Fetched details for {package_name}."));
        }
        Ok(detail)
    }

    pub fn process_batch(&self, serial: &str, targets: &[String]) -> Result<BatchResult, AppError> {
        self.process_batch_with(serial, targets, |_, _| {})
    }

    /// Uninstall each target, falling back to disable, strictly in input order.
    ///
    /// `on_outcome` runs once per target as soon as its outcome is known. One
    /// target failing never stops the rest.
    pub fn process_batch_with(
        &self,
        serial: &str,
        targets: &[String],
        mut on_outcome: impl FnMut(usize, &BatchEntry),
    ) -> Result<BatchResult, AppError> {
        let trace_id = new_trace_id();
        self.require(serial, "Error: No device selected for uninstall.", &trace_id)?;
        self.adb.ensure_available(&trace_id)?;

        let user_id = self.config.packages.user_id.clone();
        let total = targets.len();
        let mut result = BatchResult::default();
        for (index, package_name) in targets.iter().enumerate() {
            let position = index + 1;
            self.notifier()
                .info(format!("[{position}/{total}] Processing {package_name}..."));

            let outcome = if self.uninstall(serial, package_name, &user_id).is_ok() {
                BatchOutcome::Success
            } else {
                self.notifier().warning(format!(
                    "[{position}/{total}] Uninstall failed for {package_name}. Attempting to disable..."
                ));
                match self.disable(serial, package_name, &user_id) {
                    Ok(_) => BatchOutcome::Disabled,
                    Err(_) => BatchOutcome::Failed,
                }
            };
            info!(trace_id = %trace_id, package = %package_name, outcome = %outcome, "batch target processed");
            let entry = result.push(package_name, outcome);
            on_outcome(index, entry);
        }

        self.notifier().info(format!(
            "Uninstallation process complete: {} uninstalled, {} disabled, {} failed.",
            result.count(BatchOutcome::Success),
            result.count(BatchOutcome::Disabled),
            result.count(BatchOutcome::Failed),
        ));
        Ok(result)
    }

    /// Starts `logcat -v <format>` for `serial`, stopping any running stream first.
    pub fn start_log_stream(
        &self,
        session: &LogcatSession,
        serial: &str,
        emitter: LogcatEmitter,
    ) -> Result<(), AppError> {
        let trace_id = new_trace_id();
        self.require(serial, "Error: No device selected for log streaming.", &trace_id)?;
        self.adb.ensure_available(&trace_id)?;
        let program = self.adb.program().to_string();
        let format = self.config.logcat.format.clone();
        session.start(serial, emitter, &trace_id, |serial, trace_id| {
            spawn_logcat(&program, serial, &format, trace_id)
        })
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
