//! Command-line front end over [`DeviceController`].

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use crate::app::config::{config_path, load_config, load_config_from_path, save_config, AppConfig};
use crate::app::controller::{new_trace_id, DeviceController};
use crate::app::error::AppError;
use crate::app::logcat::{LogcatEmitter, LogcatEvent, LogcatSession};
use crate::app::logging::init_logging;
use crate::app::models::{BatchOutcome, DeviceState, PowerReceipt};
use crate::app::notify::Notifier;

/// Android device control over the adb command-line tool
#[derive(Parser, Debug)]
#[command(name = "adb_gripper")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Target device serial (defaults to the only online device)
    #[arg(short, long, global = true, env = "ANDROID_SERIAL")]
    serial: Option<String>,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached devices
    Devices,

    /// Show model, Android version, display name and battery
    Info,

    /// Connect to a device over TCP/IP
    Connect {
        /// host[:port]
        address: String,
    },

    /// Reboot the device
    Reboot {
        /// normal, recovery, bootloader, sideload or sideload-auto-reboot
        #[arg(long, default_value = "normal")]
        mode: String,

        /// Return right after sending instead of re-listing devices
        #[arg(long)]
        no_wait: bool,
    },

    /// Power the device off
    PowerOff {
        /// Return right after sending instead of re-listing devices
        #[arg(long)]
        no_wait: bool,
    },

    /// Install an .apk, or an .apks/.xapk split bundle
    Install {
        path: String,
    },

    /// List installed packages (user apps only unless --all)
    Packages {
        #[arg(long)]
        all: bool,
    },

    /// Uninstall packages, disabling any that cannot be removed
    Uninstall {
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Show version, installer and permissions of one package
    Detail {
        package: String,
    },

    /// Stream logcat until the device goes away or --seconds elapse
    Logcat {
        #[arg(long)]
        seconds: Option<u64>,

        /// Write the captured log to this file when the stream ends
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the default location
        #[arg(long)]
        init: bool,
    },
}

/// Parses process arguments, runs one command and returns the exit code.
pub fn run_from_args() -> i32 {
    run(Cli::parse())
}

pub fn run(cli: Cli) -> i32 {
    let loaded = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[error] {err}");
            return 1;
        }
    };
    init_logging(if cli.verbose {
        "debug"
    } else {
        config.logging.log_level.as_str()
    });

    match execute(&cli, config) {
        Ok(()) => 0,
        Err(err) => {
            debug!(trace_id = %err.trace_id, code = %err.code, "command failed");
            if cli.json {
                if let Ok(payload) = serde_json::to_string_pretty(&err) {
                    println!("{payload}");
                }
            }
            1
        }
    }
}

fn stderr_notifier() -> Notifier {
    Notifier::from_fn(|message, severity| eprintln!("[{severity}] {message}"))
}

/// Shows an error raised in this module. Controller failures are notified where they happen.
fn report(notifier: &Notifier, err: AppError) -> AppError {
    notifier.error(&err.error);
    err
}

fn print_json<T: Serialize + ?Sized>(notifier: &Notifier, value: &T) -> Result<(), AppError> {
    let payload = serde_json::to_string_pretty(value).map_err(|err| {
        report(notifier, AppError::system(format!("Failed to serialize output: {err}"), ""))
    })?;
    println!("{payload}");
    Ok(())
}

fn execute(cli: &Cli, config: AppConfig) -> Result<(), AppError> {
    let notifier = stderr_notifier();
    if let Command::Config { init } = &cli.command {
        if *init {
            save_config(&config).map_err(|err| report(&notifier, err))?;
            notifier.info(format!("Wrote {}", config_path().display()));
        }
        return print_json(&notifier, &config);
    }
    let controller = DeviceController::with_system_runner(config, notifier);
    dispatch(cli, &controller)
}

fn dispatch(cli: &Cli, controller: &DeviceController) -> Result<(), AppError> {
    let notifier = controller.adb().notifier();
    let json = cli.json;

    match &cli.command {
        Command::Devices => {
            let devices = controller.list_devices()?;
            if json {
                return print_json(notifier, &devices);
            }
            for device in &devices {
                println!("{}\t{}\t{}", device.serial, device.state, device.description);
            }
        }
        Command::Connect { address } => {
            let status = controller.connect(address)?;
            if json {
                return print_json(notifier, &status);
            }
            println!("{status:?}");
        }
        Command::Info => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            let Some(record) = controller.device_info(&serial)? else {
                return Err(AppError::command_failed(
                    format!("No device info for {serial}"),
                    "",
                ));
            };
            if json {
                return print_json(notifier, &record);
            }
            println!("Serial:   {}", record.serial);
            println!("Name:     {}", record.display_name);
            println!("Model:    {}", record.model_or_unavailable());
            println!("Android:  {}", record.android_version_or_unavailable());
            println!("Battery:  {}", record.battery_or_unavailable());
        }
        Command::Reboot { mode, no_wait } => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            let receipt = controller.reboot(&serial, mode)?;
            finish_power_command(controller, &receipt, *no_wait, json)?;
        }
        Command::PowerOff { no_wait } => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            let receipt = controller.power_off(&serial)?;
            finish_power_command(controller, &receipt, *no_wait, json)?;
        }
        Command::Install { path } => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            let status = controller.install_apk(&serial, path)?;
            if json {
                return print_json(notifier, &status);
            }
            println!("{status:?}");
        }
        Command::Packages { all } => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            let packages = controller.list_packages(&serial, !all)?;
            if json {
                return print_json(notifier, &packages);
            }
            for package in &packages {
                println!("{package}");
            }
        }
        Command::Uninstall { packages } => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            let result = controller.process_batch_with(&serial, packages, |_, entry| {
                if !json {
                    println!("{}\t{}", entry.package_name, entry.outcome);
                }
            })?;
            if json {
                print_json(notifier, result.entries())?;
            }
            let failed = result.count(BatchOutcome::Failed);
            if failed > 0 {
                return Err(AppError::command_failed(
                    format!("{failed} of {} package(s) could not be removed", result.len()),
                    "",
                ));
            }
        }
        Command::Detail { package } => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            let detail = controller.package_detail(&serial, package)?;
            if json {
                return print_json(notifier, &detail);
            }
            println!("Package:        {}", detail.package_name);
            println!("Version name:   {}", detail.version_name);
            println!("Version code:   {}", detail.version_code);
            println!("Installer:      {}", detail.installer);
            println!("First install:  {}", detail.first_install_time);
            println!("Last update:    {}", detail.last_update_time);
            println!("UID:            {}", detail.uid);
            println!("Permissions:    {}", detail.permissions.len());
            for permission in &detail.permissions {
                println!("  {permission}");
            }
        }
        Command::Logcat { seconds, save } => {
            let serial = resolve_serial(controller, cli.serial.as_deref())?;
            stream_logcat(controller, notifier.clone(), &serial, *seconds, save.as_ref())?;
        }
        Command::Config { .. } => {}
    }
    Ok(())
}

/// Uses `--serial` when given, otherwise the only device in the `device` state.
fn resolve_serial(controller: &DeviceController, serial: Option<&str>) -> Result<String, AppError> {
    if let Some(serial) = serial.map(str::trim).filter(|serial| !serial.is_empty()) {
        return Ok(serial.to_string());
    }
    let online: Vec<String> = controller
        .list_devices()?
        .into_iter()
        .filter(|device| device.state == DeviceState::Device)
        .map(|device| device.serial)
        .collect();
    let err = match online.as_slice() {
        [serial] => return Ok(serial.clone()),
        [] => AppError::validation("No online adb devices found.", ""),
        many => AppError::validation(
            format!(
                "Multiple online devices found ({}). Set ANDROID_SERIAL or pass --serial.",
                many.join(", ")
            ),
            "",
        ),
    };
    Err(report(controller.adb().notifier(), err))
}

/// Waits out the verification delay, then re-lists devices so the caller sees
/// whether the target dropped off.
fn finish_power_command(
    controller: &DeviceController,
    receipt: &PowerReceipt,
    no_wait: bool,
    json: bool,
) -> Result<(), AppError> {
    if !no_wait {
        thread::sleep(receipt.verify_after);
        let still_listed = controller
            .list_devices()?
            .iter()
            .any(|device| device.serial == receipt.serial && device.state == DeviceState::Device);
        eprintln!(
            "[info] {} is {} after {} ms.",
            receipt.serial,
            if still_listed { "still online" } else { "no longer online" },
            receipt.verify_after.as_millis()
        );
    }
    if json {
        return print_json(controller.adb().notifier(), receipt);
    }
    Ok(())
}

fn stream_logcat(
    controller: &DeviceController,
    notifier: Notifier,
    serial: &str,
    seconds: Option<u64>,
    save: Option<&PathBuf>,
) -> Result<(), AppError> {
    let session = LogcatSession::new(&controller.config().logcat, notifier);
    let emitter: LogcatEmitter = Arc::new(|event: LogcatEvent| {
        for line in event.lines {
            println!("{line}");
        }
    });
    controller.start_log_stream(&session, serial, emitter)?;

    match seconds {
        Some(seconds) => thread::sleep(Duration::from_secs(seconds)),
        None => {
            while session.is_streaming() {
                thread::sleep(Duration::from_millis(200));
            }
        }
    }

    let trace_id = new_trace_id();
    session.stop(&trace_id)?;
    if let Some(path) = save {
        session.save(path, &trace_id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::client::Adb;
    use crate::app::adb::runner::{CommandOutput, ProcessRunner};
    use crate::app::notify::testing::RecordingSink;
    use crate::app::notify::Severity;
    use clap::CommandFactory;

    /// Answers every adb invocation with the same stdout.
    struct FixedOutput(&'static str);

    impl ProcessRunner for FixedOutput {
        fn run(&self, _: &str, _: &[String], _: Duration, _: &str) -> Result<CommandOutput, AppError> {
            Ok(CommandOutput {
                stdout: self.0.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    fn controller(stdout: &'static str, sink: &RecordingSink) -> DeviceController {
        let adb = Adb::with_availability("adb", Arc::new(FixedOutput(stdout)), sink.notifier(), true);
        DeviceController::new(adb, AppConfig::default())
    }

    fn cli(command: Command, serial: Option<&str>) -> Cli {
        Cli {
            command,
            serial: serial.map(str::to_string),
            json: false,
            verbose: false,
            config: None,
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["adb_gripper", "reboot", "--mode", "recovery", "-s", "ABC", "--json"])
            .expect("parse");
        assert_eq!(cli.serial.as_deref(), Some("ABC"));
        assert!(cli.json);
        match cli.command {
            Command::Reboot { mode, no_wait } => {
                assert_eq!(mode, "recovery");
                assert!(!no_wait);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn uninstall_requires_a_package() {
        assert!(Cli::try_parse_from(["adb_gripper", "uninstall"]).is_err());
        let cli = Cli::try_parse_from(["adb_gripper", "uninstall", "com.a", "com.b"]).expect("parse");
        match cli.command {
            Command::Uninstall { packages } => assert_eq!(packages, ["com.a", "com.b"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn ambiguous_device_choice_is_shown_to_the_user() {
        let sink = RecordingSink::default();
        let controller = controller("List of devices attached\nAAA\tdevice\nBBB\tdevice\n", &sink);

        let err = dispatch(&cli(Command::Info, None), &controller).expect_err("two devices");
        assert_eq!(err.code, "ERR_VALIDATION");
        let errors = sink.with_severity(Severity::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Multiple online devices found (AAA, BBB)"));
    }

    #[test]
    fn missing_online_device_is_shown_to_the_user() {
        let sink = RecordingSink::default();
        let controller = controller("List of devices attached\nCCC\toffline\n", &sink);

        let err = resolve_serial(&controller, None).expect_err("no online device");
        assert_eq!(err.code, "ERR_VALIDATION");
        assert_eq!(sink.with_severity(Severity::Error), ["No online adb devices found."]);
    }

    #[test]
    fn explicit_serial_is_used_as_given() {
        let sink = RecordingSink::default();
        let controller = controller("", &sink);
        assert_eq!(resolve_serial(&controller, Some(" XYZ ")).expect("serial"), "XYZ");
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn uninstall_json_lists_targets_in_input_order() {
        let sink = RecordingSink::default();
        let controller = controller("Success\n", &sink);
        let targets: Vec<String> = ["com.z", "com.a", "com.m"].map(String::from).to_vec();
        let result = controller.process_batch("SER", &targets).expect("batch");

        let value = serde_json::to_value(result.entries()).expect("json");
        let names: Vec<&str> = value
            .as_array()
            .expect("array")
            .iter()
            .map(|entry| entry["package_name"].as_str().expect("name"))
            .collect();
        assert_eq!(names, ["com.z", "com.a", "com.m"]);
        assert_eq!(value[0]["outcome"], serde_json::json!("success"));
    }
}
