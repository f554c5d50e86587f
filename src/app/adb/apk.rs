use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

/// APKs extracted from a split bundle. The temp dir lives as long as this value.
pub struct SplitApkBundle {
    pub apk_paths: Vec<String>,
    _temp_dir: TempDir,
}

pub fn is_split_bundle(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("apks") || ext.eq_ignore_ascii_case("xapk"))
        .unwrap_or(false)
}

pub fn normalize_apk_path(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Unpacks every `.apk` entry of an `.apks`/`.xapk` archive, base split first.
pub fn extract_split_apks(path: &Path) -> Result<SplitApkBundle, String> {
    let file = File::open(path).map_err(|err| format!("Failed to open bundle: {err}"))?;
    let mut archive = ZipArchive::new(file).map_err(|err| format!("Invalid bundle: {err}"))?;
    let temp_dir = TempDir::new().map_err(|err| format!("Failed to create temp dir: {err}"))?;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| format!("Failed to read bundle: {err}"))?;
        let name = entry.name().to_string();
        if !name.to_lowercase().ends_with(".apk") {
            continue;
        }
        let file_name = Path::new(&name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| format!("Invalid apk entry name: {name}"))?;
        let target = temp_dir.path().join(file_name);
        let mut output =
            File::create(&target).map_err(|err| format!("Failed to extract apk: {err}"))?;
        io::copy(&mut entry, &mut output).map_err(|err| format!("Failed to write apk: {err}"))?;
        extracted.push(target.to_string_lossy().to_string());
    }

    if extracted.is_empty() {
        return Err("Bundle contains no .apk files".to_string());
    }

    extracted.sort_by_key(|path| {
        let name = Path::new(path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("")
            .to_lowercase();
        if name.contains("base") {
            (0, name)
        } else {
            (1, name)
        }
    });

    Ok(SplitApkBundle {
        apk_paths: extracted,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_bundle(dir: &Path, entries: &[&str]) -> PathBuf {
        let bundle_path = dir.join("bundle.apks");
        let file = File::create(&bundle_path).expect("bundle");
        let mut zip = zip::ZipWriter::new(file);
        for entry in entries {
            zip.start_file(*entry, SimpleFileOptions::default()).expect("start");
            zip.write_all(entry.as_bytes()).expect("write");
        }
        zip.finish().expect("finish");
        bundle_path
    }

    #[test]
    fn extracts_split_apks_base_first() {
        let tmp = TempDir::new().expect("tmp");
        let bundle = write_bundle(
            tmp.path(),
            &["splits/config.arm64.apk", "toc.pb", "splits/base-master.apk"],
        );

        let extracted = extract_split_apks(&bundle).expect("extract");
        assert_eq!(extracted.apk_paths.len(), 2);
        assert!(extracted.apk_paths[0].ends_with("base-master.apk"));
        assert!(Path::new(&extracted.apk_paths[1]).exists());
    }

    #[test]
    fn bundle_without_apks_is_rejected() {
        let tmp = TempDir::new().expect("tmp");
        let bundle = write_bundle(tmp.path(), &["toc.pb"]);
        assert!(extract_split_apks(&bundle).is_err());
    }

    #[test]
    fn recognizes_bundle_extensions() {
        assert!(is_split_bundle(Path::new("/tmp/app.apks")));
        assert!(is_split_bundle(Path::new("/tmp/App.XAPK")));
        assert!(!is_split_bundle(Path::new("/tmp/app.apk")));
    }
}
