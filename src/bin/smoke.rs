use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use adb_gripper_lib::app::config::load_config;
use adb_gripper_lib::app::controller::{new_trace_id, DeviceController};
use adb_gripper_lib::app::logcat::{LogcatEmitter, LogcatEvent, LogcatSession};
use adb_gripper_lib::app::logging::init_logging;
use adb_gripper_lib::app::models::DeviceState;
use adb_gripper_lib::app::notify::Notifier;
use chrono::Utc;
use serde::Serialize;

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    json: bool,
    logcat_seconds: u64,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    started_at: String,
    serial: Option<String>,
    adb_program: String,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut json = false;
    let mut logcat_seconds = 0u64;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--json" => json = true,
            "--logcat-seconds" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--logcat-seconds requires a value".to_string())?;
                logcat_seconds = value
                    .parse()
                    .map_err(|_| format!("Invalid --logcat-seconds: {value}"))?;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--serial SERIAL] [--json] [--logcat-seconds N]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }
    Ok(Args {
        serial,
        json,
        logcat_seconds,
    })
}

fn run_check(
    checks: &mut Vec<SmokeCheck>,
    name: &'static str,
    f: impl FnOnce() -> Result<String, (String, String)>,
) -> bool {
    let start = Instant::now();
    let (status, detail, error_code) = match f() {
        Ok(detail) => ("pass", Some(detail), None),
        Err((code, error)) => ("fail", Some(error), Some(code)),
    };
    checks.push(SmokeCheck {
        name,
        status,
        duration_ms: start.elapsed().as_millis(),
        detail,
        error_code,
    });
    status == "pass"
}

fn skip(checks: &mut Vec<SmokeCheck>, name: &'static str, reason: &str) {
    checks.push(SmokeCheck {
        name,
        status: "skip",
        duration_ms: 0,
        detail: Some(reason.to_string()),
        error_code: None,
    });
}

/// Read-only checks against a real device. Nothing here installs, removes or reboots.
fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };
    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    init_logging(&config.logging.log_level);

    let trace_id = new_trace_id();
    let started_at = Utc::now().to_rfc3339();
    let notifier = if args.json {
        Notifier::silent()
    } else {
        Notifier::from_fn(|message, severity| eprintln!("[{severity}] {message}"))
    };
    let controller = DeviceController::with_system_runner(config, notifier.clone());
    let mut checks = Vec::new();

    let available = run_check(&mut checks, "adb_available", || {
        if controller.adb().is_available() {
            Ok(controller.adb().program().to_string())
        } else {
            Err(("ERR_TOOL_UNAVAILABLE".to_string(), "adb not found".to_string()))
        }
    });

    let mut serial = args.serial.clone();
    if available {
        run_check(&mut checks, "list_devices", || {
            let devices = controller
                .list_devices()
                .map_err(|err| (err.code, err.error))?;
            let online: Vec<_> = devices
                .iter()
                .filter(|device| device.state == DeviceState::Device)
                .collect();
            if serial.is_none() && online.len() == 1 {
                serial = Some(online[0].serial.clone());
            }
            Ok(format!("{} device(s), {} online", devices.len(), online.len()))
        });
    } else {
        skip(&mut checks, "list_devices", "adb unavailable");
    }

    match serial.clone() {
        Some(serial) if available => {
            run_check(&mut checks, "device_info", || {
                match controller.device_info(&serial) {
                    Ok(Some(record)) => Ok(format!(
                        "{} (Android {}, battery {})",
                        record.display_name,
                        record.android_version_or_unavailable(),
                        record.battery_or_unavailable()
                    )),
                    Ok(None) => Err(("ERR_COMMAND_FAILED".to_string(), "no model/version".to_string())),
                    Err(err) => Err((err.code, err.error)),
                }
            });
            let mut first_package = None;
            run_check(&mut checks, "list_packages", || {
                let packages = controller
                    .list_packages(&serial, true)
                    .map_err(|err| (err.code, err.error))?;
                first_package = packages.first().cloned();
                Ok(format!("{} user package(s)", packages.len()))
            });
            match &first_package {
                Some(package) => {
                    run_check(&mut checks, "package_detail", || {
                        controller
                            .package_detail(&serial, package)
                            .map(|detail| {
                                format!(
                                    "{} {} ({} permission(s))",
                                    detail.package_name,
                                    detail.version_name,
                                    detail.permissions.len()
                                )
                            })
                            .map_err(|err| (err.code, err.error))
                    });
                }
                None => skip(&mut checks, "package_detail", "no user packages"),
            }
            if args.logcat_seconds > 0 {
                let lines = Arc::new(AtomicUsize::new(0));
                run_check(&mut checks, "logcat_stream", || {
                    let session = LogcatSession::new(&controller.config().logcat, notifier.clone());
                    let counter = Arc::clone(&lines);
                    let emitter: LogcatEmitter = Arc::new(move |event: LogcatEvent| {
                        counter.fetch_add(event.lines.len(), Ordering::Relaxed);
                    });
                    controller
                        .start_log_stream(&session, &serial, emitter)
                        .map_err(|err| (err.code, err.error))?;
                    std::thread::sleep(Duration::from_secs(args.logcat_seconds));
                    session
                        .stop(&trace_id)
                        .map_err(|err| (err.code, err.error))?;
                    Ok(format!("{} line(s)", lines.load(Ordering::Relaxed)))
                });
            } else {
                skip(&mut checks, "logcat_stream", "pass --logcat-seconds to enable");
            }
        }
        _ => {
            for name in ["device_info", "list_packages", "package_detail", "logcat_stream"] {
                skip(&mut checks, name, "no single online device; pass --serial");
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == "fail");
    let summary = SmokeSummary {
        tool: "adb_gripper_smoke",
        status: if failed { "fail" } else { "pass" },
        trace_id,
        started_at,
        serial,
        adb_program: controller.adb().program().to_string(),
        checks,
    };

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(payload) => println!("{payload}"),
            Err(err) => eprintln!("Failed to serialize summary: {err}"),
        }
    } else {
        for check in &summary.checks {
            println!(
                "{:<16} {:<5} {:>6} ms  {}",
                check.name,
                check.status,
                check.duration_ms,
                check.detail.as_deref().unwrap_or("")
            );
        }
        println!("overall: {}", summary.status);
    }
    std::process::exit(if failed { 1 } else { 0 });
}
