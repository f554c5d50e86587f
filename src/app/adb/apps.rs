use crate::app::models::PackageDetail;

const PACKAGE_PREFIX: &str = "package:";

/// Extracts package names from `pm list packages`.
///
/// Also accepts the `-f` form (`package:<apk path>=<name>`).
pub fn parse_pm_list_packages_output(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix(PACKAGE_PREFIX))
        .map(|payload| match payload.rsplit_once('=') {
            Some((_, name)) => name.trim(),
            None => payload.trim(),
        })
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    Fields,
    RequestedPermissions,
}

fn ends_permission_block(line: &str) -> bool {
    line.is_empty()
        || line.starts_with("install permissions:")
        || line.starts_with("runtime permissions:")
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

/// Single pass over `dumpsys package <name>`.
///
/// The first occurrence of each field wins; a dump can repeat a field for the
/// hidden system copy of an updated package. Missing fields read `unknown`.
pub fn parse_package_detail(package_name: &str, output: &str) -> PackageDetail {
    let mut version_name = None;
    let mut version_code = None;
    let mut installer = None;
    let mut first_install_time = None;
    let mut last_update_time = None;
    let mut uid = None;
    let mut permissions = Vec::new();
    let mut mode = ScanMode::Fields;

    for raw in output.lines() {
        let line = raw.trim();

        if mode == ScanMode::RequestedPermissions {
            if ends_permission_block(line) {
                mode = ScanMode::Fields;
            } else {
                permissions.push(line.to_string());
                continue;
            }
        }

        if line == "requested permissions:" {
            mode = ScanMode::RequestedPermissions;
        } else if let Some(value) = line.strip_prefix("versionName=") {
            set_once(&mut version_name, value.trim());
        } else if let Some(value) = line.strip_prefix("versionCode=") {
            // versionCode=1000 minSdk=24 targetSdk=34
            set_once(&mut version_code, value.split_whitespace().next().unwrap_or_default());
        } else if let Some(value) = line.strip_prefix("installerPackageName=") {
            set_once(&mut installer, value.trim());
        } else if let Some(value) = line.strip_prefix("firstInstallTime=") {
            set_once(&mut first_install_time, value.trim());
        } else if let Some(value) = line.strip_prefix("lastUpdateTime=") {
            set_once(&mut last_update_time, value.trim());
        } else if let Some(value) = line.strip_prefix("userId=") {
            set_once(&mut uid, value.split_whitespace().next().unwrap_or_default());
        }
    }

    let mut detail = PackageDetail::unknown(package_name);
    let fields = [
        (&mut detail.version_name, version_name),
        (&mut detail.version_code, version_code),
        (&mut detail.installer, installer),
        (&mut detail.first_install_time, first_install_time),
        (&mut detail.last_update_time, last_update_time),
        (&mut detail.uid, uid),
    ];
    for (slot, value) in fields {
        if let Some(value) = value {
            *slot = value;
        }
    }
    detail.permissions = permissions;
    detail
}

/// True when the dump carried none of the scanned fields.
pub fn is_empty_detail(detail: &PackageDetail) -> bool {
    detail == &PackageDetail::unknown(&detail.package_name)
}
